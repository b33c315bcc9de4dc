//! Scenario 1 from spec.md §8: connect to a local echo listener, write
//! "hello", read it back.

use std::io::{Read, Write};
use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use reactor_mux::{ChannelHandler, ChannelHandlerConfig, CloseReason, ConnectionHandle, EventSink, ThreadPoolDispatcher};

enum Event {
    Connected,
    Read(Vec<u8>),
    Closing,
}

struct EchoClient {
    handle: Mutex<Option<Arc<ConnectionHandle>>>,
    events: std::sync::mpsc::Sender<Event>,
    write_ready_count: AtomicUsize,
}

impl EventSink for EchoClient {
    fn connected(&self, handle: &Arc<ConnectionHandle>) {
        *self.handle.lock().unwrap() = Some(handle.clone());
        let _ = self.events.send(Event::Connected);
        handle.select_for_write();
    }

    fn write_ready(&self) {
        self.write_ready_count.fetch_add(1, Ordering::SeqCst);
        let handle = self.handle.lock().unwrap().clone().unwrap();
        let wrote = handle
            .with_stream(|stream| stream.write_all(b"hello"))
            .unwrap();
        wrote.unwrap();
        handle.select_for_read();
    }

    fn read_ready(&self) {
        let handle = self.handle.lock().unwrap().clone().unwrap();
        let mut buf = [0u8; 5];
        let n = handle.with_stream(|stream| stream.read(&mut buf)).unwrap().unwrap();
        let _ = self.events.send(Event::Read(buf[..n].to_vec()));
    }

    fn closing(&self, _reason: Option<CloseReason>) {
        let _ = self.events.send(Event::Closing);
    }
}

fn start_echo_listener() -> std::net::SocketAddr {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 64];
            if let Ok(n) = stream.read(&mut buf) {
                if n > 0 {
                    let _ = stream.write_all(&buf[..n]);
                }
            }
        }
    });
    addr
}

fn recv_timeout(rx: &Receiver<Event>) -> Event {
    rx.recv_timeout(Duration::from_secs(5)).expect("timed out waiting for event")
}

#[test]
fn echo_round_trip() {
    let addr = start_echo_listener();

    let dispatcher = Arc::new(ThreadPoolDispatcher::new(2, 8));
    let channel_handler =
        ChannelHandler::construct(ChannelHandlerConfig::new(1, dispatcher)).unwrap();
    channel_handler.start();

    let (tx, rx) = channel();
    let sink = Arc::new(EchoClient {
        handle: Mutex::new(None),
        events: tx,
        write_ready_count: AtomicUsize::new(0),
    });

    let handle = channel_handler.connect_to(addr, sink.clone()).unwrap();

    assert!(matches!(recv_timeout(&rx), Event::Connected));
    match recv_timeout(&rx) {
        Event::Read(data) => assert_eq!(data, b"hello"),
        _ => panic!("expected a read event"),
    }

    handle.close_default();
    assert!(matches!(recv_timeout(&rx), Event::Closing));

    channel_handler.terminate();
}
