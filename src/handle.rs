use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mio::net::TcpStream;
use mio::Token;

use crate::action::{Interest, RegistrationAction};
use crate::channel_handler::Shared;
use crate::error::CloseReason;

/// The application-supplied callbacks for one connection.
///
/// Each method is called at most once per readiness event; `closing` is
/// called exactly once over a handle's life. Default bodies are no-ops so
/// an embedder only implements the events it cares about (an outbound-only
/// client, say, never needs `accepted`).
pub trait EventSink: Send + Sync {
    /// A passively-accepted connection has joined the live set.
    fn accepted(&self, _handle: &Arc<ConnectionHandle>) {}
    /// An outbound `connectTo` finished connecting.
    fn connected(&self, _handle: &Arc<ConnectionHandle>) {}
    /// The socket is readable; re-arm with `select_for_read` for another.
    fn read_ready(&self) {}
    /// The socket is writable; re-arm with `select_for_write` for another.
    fn write_ready(&self) {}
    /// Delivered exactly once, after the handle has fully closed.
    fn closing(&self, _reason: Option<CloseReason>) {}
}

/// The per-connection object tying a socket, an application [`EventSink`],
/// and a selector-loop identity together.
///
/// A handle is bound to read-loop and write-loop pair `i` for its entire
/// life: every registration for its socket goes to that pair, which gives a
/// single-socket happens-before chain through one read loop and one write
/// loop.
pub struct ConnectionHandle {
    stream: Mutex<Option<TcpStream>>,
    sink: Arc<dyn EventSink>,
    loop_index: usize,
    closed: AtomicBool,
    read_token: Mutex<Option<Token>>,
    write_token: Mutex<Option<Token>>,
    live_set_key: Mutex<Option<usize>>,
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        stream: TcpStream,
        sink: Arc<dyn EventSink>,
        loop_index: usize,
        shared: Arc<Shared>,
    ) -> Arc<ConnectionHandle> {
        Arc::new(ConnectionHandle {
            stream: Mutex::new(Some(stream)),
            sink,
            loop_index,
            closed: AtomicBool::new(false),
            read_token: Mutex::new(None),
            write_token: Mutex::new(None),
            live_set_key: Mutex::new(None),
            shared,
        })
    }

    pub(crate) fn loop_index(&self) -> usize {
        self.loop_index
    }

    pub(crate) fn set_live_set_key(&self, key: usize) {
        *self.live_set_key.lock().expect("live-set key mutex poisoned") = Some(key);
    }

    pub(crate) fn sink(&self) -> Arc<dyn EventSink> {
        self.sink.clone()
    }

    pub(crate) fn set_read_token(&self, token: Token) {
        *self.read_token.lock().expect("read token mutex poisoned") = Some(token);
    }

    pub(crate) fn read_token(&self) -> Option<Token> {
        *self.read_token.lock().expect("read token mutex poisoned")
    }

    pub(crate) fn set_write_token(&self, token: Token) {
        *self.write_token.lock().expect("write token mutex poisoned") = Some(token);
    }

    pub(crate) fn write_token(&self) -> Option<Token> {
        *self.write_token.lock().expect("write token mutex poisoned")
    }

    /// Run `f` with exclusive access to the underlying socket. Returns
    /// `None` if the handle is already closed.
    pub fn with_stream<R>(&self, f: impl FnOnce(&mut TcpStream) -> R) -> Option<R> {
        let mut guard = self.stream.lock().expect("stream mutex poisoned");
        guard.as_mut().map(f)
    }

    /// `true` once `close` has run for this handle.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Arm this handle's socket for read readiness on its read loop. Safe to
    /// call from any thread, including from inside a `read_ready`/
    /// `write_ready` callback. Silently dropped once the handle is closing
    /// or closed.
    pub fn select_for_read(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        self.shared.read_queues[self.loop_index].post(RegistrationAction::Arm {
            handle: self.clone(),
            interest: Interest::Read,
        });
    }

    /// Arm this handle's socket for write readiness on its write loop.
    pub fn select_for_write(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        self.shared.write_queues[self.loop_index].post(RegistrationAction::Arm {
            handle: self.clone(),
            interest: Interest::Write,
        });
    }

    /// Close with [`CloseReason::Requested`]. Idempotent.
    pub fn close_default(self: &Arc<Self>) {
        self.close(CloseReason::Requested);
    }

    /// Close this handle. The first call transitions it out of the live
    /// set, closes the socket, and schedules exactly one `closing(reason)`
    /// callback through the dispatcher; every later call is a no-op.
    pub fn close(self: &Arc<Self>, reason: CloseReason) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if let Some(key) = self
            .live_set_key
            .lock()
            .expect("live-set key mutex poisoned")
            .take()
        {
            self.shared.live_set.remove(key);
        }

        if let Some(token) = self.read_token.lock().expect("read token mutex poisoned").take() {
            self.shared.read_queues[self.loop_index].post(RegistrationAction::Forget { token });
        }
        if let Some(token) = self
            .write_token
            .lock()
            .expect("write token mutex poisoned")
            .take()
        {
            self.shared.write_queues[self.loop_index].post(RegistrationAction::Forget { token });
        }

        // Dropping the stream runs the OS close() exactly once, right here,
        // regardless of how many Arc<ConnectionHandle> clones remain alive.
        let _ = self.stream.lock().expect("stream mutex poisoned").take();

        let sink = self.sink.clone();
        let task: crate::dispatcher::Task = Box::new(move || sink.closing(Some(reason)));
        crate::dispatcher::submit_blocking(&self.shared.dispatcher, task);
    }
}
