//! Scenario 3 from spec.md §8: terminate with many quiescent connections
//! open; every handle gets exactly one `closing`, and termination completes
//! in bounded time.

use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reactor_mux::{ChannelHandler, ChannelHandlerConfig, CloseReason, ConnectionHandle, EventSink, ThreadPoolDispatcher};

struct QuietClient {
    closing_tx: Sender<()>,
    closing_count: AtomicUsize,
}

impl EventSink for QuietClient {
    fn connected(&self, _handle: &Arc<ConnectionHandle>) {}

    fn closing(&self, _reason: Option<CloseReason>) {
        self.closing_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.closing_tx.send(());
    }
}

#[test]
fn terminate_closes_every_live_handle() {
    const CONNECTIONS: usize = 100;

    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept every connection and hold it open without reading or writing.
    thread::spawn(move || {
        let mut accepted = Vec::with_capacity(CONNECTIONS);
        for _ in 0..CONNECTIONS {
            match listener.accept() {
                Ok((stream, _)) => accepted.push(stream),
                Err(_) => break,
            }
        }
        thread::sleep(Duration::from_secs(30));
        drop(accepted);
    });

    let dispatcher = Arc::new(ThreadPoolDispatcher::new(4, 256));
    let channel_handler =
        ChannelHandler::construct(ChannelHandlerConfig::new(2, dispatcher)).unwrap();
    channel_handler.start();

    let (tx, rx) = channel();
    let mut sinks = Vec::with_capacity(CONNECTIONS);
    for _ in 0..CONNECTIONS {
        let sink = Arc::new(QuietClient {
            closing_tx: tx.clone(),
            closing_count: AtomicUsize::new(0),
        });
        channel_handler.connect_to(addr, sink.clone()).unwrap();
        sinks.push(sink);
    }

    // Give every connect a moment to finish before tearing down.
    thread::sleep(Duration::from_millis(200));

    let start = Instant::now();
    channel_handler.terminate();

    for _ in 0..CONNECTIONS {
        rx.recv_timeout(Duration::from_secs(5))
            .expect("every handle must receive closing before terminate returns control");
    }
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "terminate took too long: {:?}",
        start.elapsed()
    );

    for sink in &sinks {
        assert_eq!(sink.closing_count.load(Ordering::SeqCst), 1);
    }
    assert!(channel_handler.open_handlers().is_empty());
}
