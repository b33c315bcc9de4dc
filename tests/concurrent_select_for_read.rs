//! Scenario 5 from spec.md §8: re-arming `select_for_read` from inside a
//! `read_ready` callback (running on a worker thread) delivers exactly one
//! more `read_ready` per byte sent, with no duplicate dispatches.

use std::io::{Read, Write};
use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use reactor_mux::{ChannelHandler, ChannelHandlerConfig, CloseReason, ConnectionHandle, EventSink, ThreadPoolDispatcher};

struct Client {
    handle: Mutex<Option<Arc<ConnectionHandle>>>,
    reads_tx: Sender<u8>,
    dispatch_count: AtomicUsize,
}

impl EventSink for Client {
    fn connected(&self, handle: &Arc<ConnectionHandle>) {
        *self.handle.lock().unwrap() = Some(handle.clone());
        handle.select_for_read();
    }

    fn read_ready(&self) {
        self.dispatch_count.fetch_add(1, Ordering::SeqCst);
        let handle = self.handle.lock().unwrap().clone().unwrap();
        let mut byte = [0u8; 1];
        match handle.with_stream(|stream| stream.read(&mut byte)) {
            Some(Ok(1)) => {
                let _ = self.reads_tx.send(byte[0]);
                handle.select_for_read();
            }
            _ => {}
        }
    }

    fn closing(&self, _reason: Option<CloseReason>) {}
}

#[test]
fn re_arming_from_inside_read_ready_gets_one_dispatch_per_byte() {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            for byte in [1u8, 2, 3] {
                thread::sleep(Duration::from_millis(80));
                let _ = stream.write_all(&[byte]);
            }
            thread::sleep(Duration::from_secs(5));
        }
    });

    let dispatcher = Arc::new(ThreadPoolDispatcher::new(2, 8));
    let channel_handler =
        ChannelHandler::construct(ChannelHandlerConfig::new(1, dispatcher)).unwrap();
    channel_handler.start();

    let (tx, rx) = channel();
    let sink = Arc::new(Client {
        handle: Mutex::new(None),
        reads_tx: tx,
        dispatch_count: AtomicUsize::new(0),
    });
    channel_handler.connect_to(addr, sink.clone()).unwrap();

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(rx.recv_timeout(Duration::from_secs(5)).expect("expected a byte"));
    }
    assert_eq!(received, vec![1, 2, 3]);
    assert_eq!(sink.dispatch_count.load(Ordering::SeqCst), 3);

    channel_handler.terminate();
}
