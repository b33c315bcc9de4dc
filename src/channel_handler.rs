use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use mio::net::TcpStream;
use mio::{Poll, Waker};

use crate::action::{Interest, RegistrationAction, Side};
use crate::dispatcher::{submit_blocking, Dispatcher};
use crate::handle::{ConnectionHandle, EventSink};
use crate::live_set::LiveSet;
use crate::queue::QueueHandle;
use crate::selector_loop::{SelectorLoop, WAKE_TOKEN};
use crate::socket_options::{NoopSocketOptions, SocketOptions};
use crate::CloseReason;

/// State every selector loop and every [`ConnectionHandle`] of one
/// `ChannelHandler` shares.
pub(crate) struct Shared {
    pub(crate) live_set: Arc<LiveSet>,
    pub(crate) read_queues: Vec<QueueHandle>,
    pub(crate) write_queues: Vec<QueueHandle>,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
}

/// Construction parameters for a [`ChannelHandler`].
///
/// Mirrors the teacher's builder-style event-loop configuration: a small set
/// of knobs fixed at construction, everything else an accessor.
pub struct ChannelHandlerConfig {
    /// `Q`: the number of read-loop/write-loop pairs to run.
    pub queue_count: usize,
    /// The worker pool application callbacks run on.
    pub dispatcher: Arc<dyn Dispatcher>,
    /// Socket-option policy applied to every new socket before it is handed
    /// to a selector loop.
    pub socket_options: Arc<dyn SocketOptions>,
}

impl ChannelHandlerConfig {
    /// A config with `queue_count` loop pairs, the given dispatcher, and no
    /// socket-option policy (sockets are left at their OS defaults).
    pub fn new(queue_count: usize, dispatcher: Arc<dyn Dispatcher>) -> Self {
        ChannelHandlerConfig {
            queue_count,
            dispatcher,
            socket_options: Arc::new(NoopSocketOptions),
        }
    }

    pub fn with_socket_options(mut self, socket_options: Arc<dyn SocketOptions>) -> Self {
        self.socket_options = socket_options;
        self
    }
}

struct PendingLoop {
    side: Side,
    index: usize,
    poll: Poll,
    receiver: Receiver<RegistrationAction>,
}

/// The public facade: owns the `Q` selector-loop pairs, the live-set, the
/// dispatcher handle, and the running flag.
///
/// `construct` builds the object graph (pollers, queues, wakers) without
/// spawning any thread; `start` is what launches the `2Q` selector threads.
/// Splitting the two lets an embedder build a `ChannelHandler`, hand
/// `Arc<ConnectionHandle>`-producing closures to other collaborators, and
/// only then go live.
pub struct ChannelHandler {
    shared: Arc<Shared>,
    socket_options: Arc<dyn SocketOptions>,
    running: Arc<AtomicBool>,
    queue_count: usize,
    next_loop: AtomicUsize,
    read_wakers: Vec<Arc<Waker>>,
    write_wakers: Vec<Arc<Waker>>,
    pending: Mutex<Vec<PendingLoop>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelHandler {
    /// Allocate the `Q` poller pairs and their registration queues. No
    /// thread is spawned; call [`ChannelHandler::start`] to go live.
    pub fn construct(config: ChannelHandlerConfig) -> io::Result<ChannelHandler> {
        assert!(config.queue_count >= 1, "Q must be at least 1");

        let mut read_queues = Vec::with_capacity(config.queue_count);
        let mut write_queues = Vec::with_capacity(config.queue_count);
        let mut read_wakers = Vec::with_capacity(config.queue_count);
        let mut write_wakers = Vec::with_capacity(config.queue_count);
        let mut pending = Vec::with_capacity(config.queue_count * 2);

        for index in 0..config.queue_count {
            for side in [Side::Read, Side::Write] {
                let poll = Poll::new()?;
                let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
                let (sender, receiver) = mpsc::channel();
                let queue = QueueHandle::new(sender, waker.clone());
                match side {
                    Side::Read => {
                        read_queues.push(queue);
                        read_wakers.push(waker);
                    }
                    Side::Write => {
                        write_queues.push(queue);
                        write_wakers.push(waker);
                    }
                }
                pending.push(PendingLoop {
                    side,
                    index,
                    poll,
                    receiver,
                });
            }
        }

        let shared = Arc::new(Shared {
            live_set: Arc::new(LiveSet::new()),
            read_queues,
            write_queues,
            dispatcher: config.dispatcher,
        });

        Ok(ChannelHandler {
            shared,
            socket_options: config.socket_options,
            running: Arc::new(AtomicBool::new(false)),
            queue_count: config.queue_count,
            next_loop: AtomicUsize::new(0),
            read_wakers,
            write_wakers,
            pending: Mutex::new(pending),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Launch the `2Q` selector threads. Idempotent: a second call is a
    /// no-op.
    pub fn start(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let pending = std::mem::take(&mut *self.pending.lock().expect("pending-loop mutex poisoned"));
        let mut threads = self.threads.lock().expect("threads mutex poisoned");
        for loop_ in pending {
            let selector = SelectorLoop::new(
                loop_.side,
                loop_.index,
                loop_.poll,
                loop_.receiver,
                self.running.clone(),
                self.shared.clone(),
            );
            threads.push(selector.spawn());
        }
        log::debug!("reactor-mux started with {} queue pairs", self.queue_count);
    }

    /// Stop the multiplexer. Wakes every poller so in-flight `poll` calls
    /// return, closes every live handle, and joins all selector threads.
    /// Idempotent: a second call is a no-op.
    pub fn terminate(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        for waker in self.read_wakers.iter().chain(self.write_wakers.iter()) {
            let _ = waker.wake();
        }

        self.shared.live_set.close_all(|| CloseReason::Shutdown);

        let mut threads = self.threads.lock().expect("threads mutex poisoned");
        for thread in threads.drain(..) {
            let _ = thread.join();
        }
        log::debug!("reactor-mux terminated");
    }

    /// Open an outbound non-blocking connection, bound round-robin to one
    /// read/write loop pair. Returns the handle immediately; `connected` or
    /// `closing` is delivered asynchronously once the CONNECT readiness
    /// resolves.
    pub fn connect_to(
        &self,
        addr: SocketAddr,
        sink: Arc<dyn EventSink>,
    ) -> io::Result<Arc<ConnectionHandle>> {
        let index = self.next_loop_index();
        let stream = TcpStream::connect(addr)?;
        self.socket_options.configure(&stream)?;

        let handle = ConnectionHandle::new(stream, sink, index, self.shared.clone());
        let key = self.shared.live_set.insert(handle.clone());
        handle.set_live_set_key(key);

        self.shared.read_queues[index].post(RegistrationAction::Arm {
            handle: handle.clone(),
            interest: Interest::Connect,
        });

        Ok(handle)
    }

    /// Hand an already-connected, already non-blocking socket (produced by
    /// an external acceptor) into the live set. Dispatches `accepted` and
    /// arms READ; there is no CONNECT step since the socket is already
    /// connected.
    pub fn register_accepted(
        &self,
        stream: TcpStream,
        sink: Arc<dyn EventSink>,
    ) -> io::Result<Arc<ConnectionHandle>> {
        let index = self.next_loop_index();
        self.socket_options.configure(&stream)?;

        let handle = ConnectionHandle::new(stream, sink, index, self.shared.clone());
        let key = self.shared.live_set.insert(handle.clone());
        handle.set_live_set_key(key);

        let sink = handle.sink();
        let for_task = handle.clone();
        submit_blocking(
            &self.shared.dispatcher,
            Box::new(move || sink.accepted(&for_task)),
        );

        self.shared.read_queues[index].post(RegistrationAction::Arm {
            handle: handle.clone(),
            interest: Interest::Read,
        });

        Ok(handle)
    }

    /// Snapshot of every currently-live connection's event sink.
    pub fn open_handlers(&self) -> Vec<Arc<dyn EventSink>> {
        self.shared
            .live_set
            .snapshot()
            .into_iter()
            .map(|handle| handle.sink())
            .collect()
    }

    pub fn socket_options(&self) -> &Arc<dyn SocketOptions> {
        &self.socket_options
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn next_loop_index(&self) -> usize {
        self.next_loop.fetch_add(1, Ordering::Relaxed) % self.queue_count
    }
}
