use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mio::{Events, Interest as MioInterest, Poll, Token};
use slab::Slab;

use crate::action::{Interest, RegistrationAction, Side};
use crate::channel_handler::Shared;
use crate::dispatcher::Task;
use crate::error::CloseReason;
use crate::handle::{ConnectionHandle, EventSink};

/// Fixed poll timeout: bounds how long a loop can sit inside `poll` with no
/// registrations to drain, so `terminate()` always observes `running ==
/// false` promptly even without a wakeup.
pub(crate) const SELECT_TIMEOUT_MS: u64 = 1000;

/// Reserved token for the loop's own cross-thread wakeup source. No
/// connection is ever assigned this token since `Token(usize::MAX)` is
/// outside the range `slab::Slab` hands out.
pub(crate) const WAKE_TOKEN: Token = Token(usize::MAX);

/// One selector loop: drains its registration queue, polls, and dispatches
/// ready keys to the dispatcher. `2 * Q` of these run, one dedicated OS
/// thread apiece.
pub(crate) struct SelectorLoop {
    side: Side,
    index: usize,
    poll: Poll,
    events: Events,
    receiver: Receiver<RegistrationAction>,
    local: Slab<(Arc<ConnectionHandle>, Interest)>,
    running: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl SelectorLoop {
    /// Wrap an already-open `Poll` (its `Waker` was registered by the
    /// caller at [`WAKE_TOKEN`] and is kept alive via the shared
    /// [`QueueHandle`](crate::queue::QueueHandle), not by this struct).
    pub(crate) fn new(
        side: Side,
        index: usize,
        poll: Poll,
        receiver: Receiver<RegistrationAction>,
        running: Arc<AtomicBool>,
        shared: Arc<Shared>,
    ) -> Self {
        SelectorLoop {
            side,
            index,
            poll,
            events: Events::with_capacity(1024),
            receiver,
            local: Slab::new(),
            running,
            shared,
        }
    }

    pub(crate) fn spawn(mut self) -> thread::JoinHandle<()> {
        let name = format!("reactor-mux-{:?}-{}", self.side, self.index);
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .expect("failed to spawn reactor-mux selector thread")
    }

    fn run(&mut self) {
        while self.running.load(Ordering::Acquire) {
            self.drain_queue();

            match self
                .poll
                .poll(&mut self.events, Some(Duration::from_millis(SELECT_TIMEOUT_MS)))
            {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::error!(
                        "reactor-mux selector loop {:?}/{} exiting: {}",
                        self.side,
                        self.index,
                        err
                    );
                    return;
                }
            }

            if !self.running.load(Ordering::Acquire) {
                break;
            }

            // Snapshot the ready tokens before dispatching: dispatch can
            // mutate `self.local` (a Forget racing in from a close, or a
            // re-Arm posted from inside a callback that landed on this same
            // queue), and `self.events` must not stay borrowed across that.
            let ready: Vec<(Token, bool, bool)> = self
                .events
                .iter()
                .filter(|event| event.token() != WAKE_TOKEN)
                .map(|event| (event.token(), event.is_readable(), event.is_writable()))
                .collect();

            for (token, readable, writable) in ready {
                if !self.running.load(Ordering::Acquire) {
                    break;
                }
                self.dispatch_ready(token, readable, writable);
            }
        }
        log::debug!(
            "reactor-mux selector loop {:?}/{} stopped",
            self.side,
            self.index
        );
    }

    fn drain_queue(&mut self) {
        loop {
            match self.receiver.try_recv() {
                Ok(action) => self.run_action(action),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn run_action(&mut self, action: RegistrationAction) {
        match action {
            RegistrationAction::Arm { handle, interest } => self.arm(handle, interest),
            RegistrationAction::Forget { token } => {
                if self.local.contains(token.0) {
                    self.local.remove(token.0);
                }
            }
        }
    }

    fn arm(&mut self, handle: Arc<ConnectionHandle>, interest: Interest) {
        if handle.is_closed() {
            return;
        }
        let mio_interest = match interest {
            Interest::Connect | Interest::Write => MioInterest::WRITABLE,
            Interest::Read => MioInterest::READABLE,
        };
        let existing_token = match self.side {
            Side::Read => handle.read_token(),
            Side::Write => handle.write_token(),
        };

        if let Some(token) = existing_token {
            let result =
                handle.with_stream(|stream| self.poll.registry().register(stream, token, mio_interest));
            match result {
                Some(Ok(())) => {
                    if let Some(slot) = self.local.get_mut(token.0) {
                        slot.1 = interest;
                    }
                }
                Some(Err(err)) => {
                    log::trace!("reactor-mux re-register failed, closing connection: {err}");
                    handle.close(CloseReason::Io(err));
                }
                None => {}
            }
            return;
        }

        // First registration for this handle on this loop: reserve a slab
        // key up front so we know what token to register with, but don't
        // insert until the registration actually succeeds.
        let token = Token(self.local.vacant_entry().key());
        let result =
            handle.with_stream(|stream| self.poll.registry().register(stream, token, mio_interest));
        match result {
            Some(Ok(())) => {
                let key = self.local.insert((handle.clone(), interest));
                debug_assert_eq!(key, token.0, "no other insert can race a single-threaded loop");
                match self.side {
                    Side::Read => handle.set_read_token(token),
                    Side::Write => handle.set_write_token(token),
                }
            }
            Some(Err(err)) => {
                log::trace!("reactor-mux register failed, treating connection as gone: {err}");
                handle.close(CloseReason::Io(err));
            }
            None => {
                // Closed between the check above and now; nothing to do.
            }
        }
    }

    fn dispatch_ready(&mut self, token: Token, readable: bool, writable: bool) {
        let Some((handle, interest)) = self.local.get(token.0).cloned() else {
            return;
        };
        if handle.is_closed() {
            self.local.remove(token.0);
            return;
        }

        // One-shot: clear the registration before handing off. No further
        // event for this token is possible until the handle re-arms.
        let _ = handle.with_stream(|stream| self.poll.registry().deregister(stream));

        match (self.side, interest) {
            (Side::Read, Interest::Connect) => self.dispatch_connect(handle),
            (Side::Read, Interest::Read) => {
                debug_assert!(readable || !writable, "read-loop event should be readable");
                self.dispatch_read(handle);
            }
            (Side::Write, Interest::Write) => self.dispatch_write(handle),
            (side, interest) => {
                log::warn!("reactor-mux: unexpected {interest:?} interest on {side:?} loop");
            }
        }
    }

    fn dispatch_connect(&self, handle: Arc<ConnectionHandle>) {
        let outcome = handle.with_stream(|stream| stream.take_error());
        match outcome {
            Some(Ok(None)) => {
                self.submit_event(handle, Interest::Connect, |sink, h| sink.connected(h));
            }
            Some(Ok(Some(err))) | Some(Err(err)) => {
                handle.close(CloseReason::ConnectFailed(err));
            }
            None => {}
        }
    }

    fn dispatch_read(&self, handle: Arc<ConnectionHandle>) {
        self.submit_event(handle, Interest::Read, |sink, _h| sink.read_ready());
    }

    fn dispatch_write(&self, handle: Arc<ConnectionHandle>) {
        self.submit_event(handle, Interest::Write, |sink, _h| sink.write_ready());
    }

    /// Submit a callback through the dispatcher, applying the §4.4 reject
    /// policy for whichever op it was: close for a failed connect, re-arm
    /// for a deferred read or write.
    fn submit_event(
        &self,
        handle: Arc<ConnectionHandle>,
        op: Interest,
        f: impl FnOnce(&dyn EventSink, &Arc<ConnectionHandle>) + Send + 'static,
    ) {
        let sink = handle.sink();
        let for_task = handle.clone();
        let task: Task = Box::new(move || f(&*sink, &for_task));
        if self.shared.dispatcher.submit(task).is_err() {
            match op {
                Interest::Connect => {
                    log::warn!("reactor-mux: dispatcher saturated, failing pending connect");
                    handle.close(CloseReason::Io(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "dispatcher saturated",
                    )));
                }
                Interest::Read => handle.select_for_read(),
                Interest::Write => handle.select_for_write(),
            }
        }
    }
}
