use std::io;

use mio::net::TcpStream;

/// Socket-option policy, applied to every new outbound socket before it is
/// handed to the selector loop.
///
/// This is an external collaborator: `reactor-mux` never decides
/// `TCP_NODELAY`, buffer sizes, or keepalive on its own behalf.
pub trait SocketOptions: Send + Sync {
    fn configure(&self, socket: &TcpStream) -> io::Result<()>;
}

/// A `SocketOptions` that leaves every socket at its OS default.
pub struct NoopSocketOptions;

impl SocketOptions for NoopSocketOptions {
    fn configure(&self, _socket: &TcpStream) -> io::Result<()> {
        Ok(())
    }
}
