use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;

/// A task the dispatcher runs off the selector thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Raised by [`Dispatcher::submit`] when the pool has no capacity to accept
/// another task right now. Carries the rejected task back so a caller that
/// needs at-least-once delivery (closing a handle) can retry it.
pub struct SubmitError(Task);

impl SubmitError {
    /// Recover the task that was rejected.
    pub fn into_task(self) -> Task {
        self.0
    }
}

impl fmt::Debug for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubmitError(..)")
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dispatcher saturated")
    }
}

impl std::error::Error for SubmitError {}

/// Submit `task`, retrying on rejection until the dispatcher accepts it.
///
/// Used for the handful of lifecycle callbacks (`closing`, `accepted`) that
/// must be delivered exactly once rather than dropped or re-armed -- there
/// is no registration to fall back to the way there is for a deferred read
/// or write.
pub(crate) fn submit_blocking(dispatcher: &Arc<dyn Dispatcher>, mut task: Task) {
    loop {
        match dispatcher.submit(task) {
            Ok(()) => return,
            Err(rejected) => {
                task = rejected.into_task();
                thread::yield_now();
            }
        }
    }
}

/// A bounded worker pool, supplied by the embedder.
///
/// The selector loop never runs application code in-line; it always
/// submits through this trait. Implementations must not block the caller
/// (the selector thread) -- a full pool must return [`SubmitError`] rather
/// than wait for capacity.
pub trait Dispatcher: Send + Sync {
    /// Submit `task` for execution. Returns `Err(SubmitError)` if the pool
    /// is saturated; the caller is responsible for the reject policy
    /// (re-arm for read/write, close for connect).
    fn submit(&self, task: Task) -> Result<(), SubmitError>;
}

/// A fixed-size thread pool `Dispatcher`, good enough for most embedders and
/// for this crate's own tests.
///
/// Submission is non-blocking: if every worker is busy and the bounded job
/// queue is full, `submit` returns `SubmitError` immediately rather than
/// queuing indefinitely. A panic inside a submitted task is caught at the
/// worker boundary and logged; it never kills the worker thread or
/// propagates back to the selector loop.
pub struct ThreadPoolDispatcher {
    tx: SyncSender<Task>,
    _workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadPoolDispatcher {
    /// Build a pool of `workers` threads with a job queue that holds at
    /// most `queue_capacity` pending tasks beyond what a free worker can
    /// take immediately.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        assert!(workers > 0, "a dispatcher needs at least one worker");
        let (tx, rx) = sync_channel::<Task>(queue_capacity);
        let rx = std::sync::Arc::new(std::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("reactor-mux-worker-{id}"))
                .spawn(move || loop {
                    let task = {
                        let rx = rx.lock().expect("worker queue mutex poisoned");
                        rx.recv()
                    };
                    match task {
                        Ok(task) => {
                            if let Err(_panic) = panic::catch_unwind(AssertUnwindSafe(task)) {
                                log::error!("reactor-mux worker panicked running a task");
                            }
                        }
                        Err(_disconnected) => break,
                    }
                })
                .expect("failed to spawn reactor-mux worker thread");
            handles.push(handle);
        }

        ThreadPoolDispatcher {
            tx,
            _workers: handles,
        }
    }
}

impl Dispatcher for ThreadPoolDispatcher {
    fn submit(&self, task: Task) -> Result<(), SubmitError> {
        match self.tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => Err(SubmitError(task)),
            Err(TrySendError::Disconnected(task)) => {
                log::error!("reactor-mux dispatcher has no live workers");
                Err(SubmitError(task))
            }
        }
    }
}
