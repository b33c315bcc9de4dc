use std::sync::Arc;

use mio::Token;

use crate::handle::ConnectionHandle;

/// Which selector-loop pool a loop belongs to.
///
/// A read-side loop handles `Connect` and `Read` interests; a write-side
/// loop handles only `Write`. There are `Q` loops of each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Read,
    Write,
}

/// The logical readiness class a registration is armed for.
///
/// This is tracked by `reactor-mux` itself rather than read back off the OS
/// event, because a pending outbound connect and a pending read share the
/// same underlying `WRITABLE`/`READABLE` OS signal depending on platform;
/// what distinguishes them is which side of the handle's lifecycle posted
/// the registration, not the raw event bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    Connect,
    Read,
    Write,
}

/// A deferred registration request, enqueued from any thread and drained by
/// exactly one selector loop.
///
/// This is a tagged record rather than a boxed closure: every registration
/// action needs exactly four pieces of data (the loop index is implicit in
/// which loop's queue it was pushed to), so the loop can dispatch on a tag
/// instead of invoking an allocated closure.
pub(crate) enum RegistrationAction {
    /// Arm (or re-arm) `handle`'s socket for `interest` on this loop.
    Arm {
        handle: Arc<ConnectionHandle>,
        interest: Interest,
    },
    /// Drop the loop-local bookkeeping for a token whose handle has closed.
    Forget { token: Token },
}
