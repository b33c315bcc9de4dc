use std::sync::mpsc;
use std::sync::Arc;

use mio::Waker;

use crate::action::RegistrationAction;

/// A handle producers use to post registration actions onto one selector
/// loop's queue.
///
/// `post` is the only producer-facing primitive and composes the two steps
/// the design calls for: push onto the FIFO, then wake the loop. The wakeup
/// happens after the push so the loop, whether mid-drain, mid-poll, or
/// between iterations, is guaranteed to observe the action on this tick or
/// the next.
#[derive(Clone)]
pub(crate) struct QueueHandle {
    sender: mpsc::Sender<RegistrationAction>,
    waker: Arc<Waker>,
}

impl QueueHandle {
    pub(crate) fn new(sender: mpsc::Sender<RegistrationAction>, waker: Arc<Waker>) -> Self {
        QueueHandle { sender, waker }
    }

    /// Enqueue `action`. Non-blocking; the queue is unbounded by contract,
    /// backpressure is the caller's responsibility.
    ///
    /// Silently drops the action if the loop has already exited (the
    /// receiver is gone) -- at that point there is nothing left to notify.
    pub(crate) fn post(&self, action: RegistrationAction) {
        if self.sender.send(action).is_ok() {
            let _ = self.waker.wake();
        }
    }
}
