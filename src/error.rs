use std::fmt;
use std::io;

/// Why a [`ConnectionHandle`](crate::ConnectionHandle) was closed.
///
/// Delivered exactly once to [`EventSink::closing`](crate::EventSink::closing)
/// over a handle's life.
#[derive(Debug)]
pub enum CloseReason {
    /// The application called `close()` directly.
    Requested,
    /// An outbound `connectTo` failed to establish.
    ConnectFailed(io::Error),
    /// A read, write, or poll on the socket failed.
    Io(io::Error),
    /// The whole channel handler is tearing down via `terminate()`.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => write!(f, "closed by application"),
            CloseReason::ConnectFailed(err) => write!(f, "connect failed: {err}"),
            CloseReason::Io(err) => write!(f, "I/O error: {err}"),
            CloseReason::Shutdown => write!(f, "channel handler shut down"),
        }
    }
}
