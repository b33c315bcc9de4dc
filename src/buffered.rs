//! A thin buffered-protocol adapter built on the raw [`EventSink`] contract.
//!
//! This is not part of the core multiplexer -- it is the core's canonical
//! client. It owns a read buffer and a write buffer and forwards to a
//! higher-level [`Protocol`] once a buffer fills (read side) or drains
//! (write side).

use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

use crate::{CloseReason, ConnectionHandle, EventSink};

/// The higher-level interface a [`BufferedProtocolAdapter`] forwards to.
///
/// Every method has a default no-op body; a protocol implements only the
/// events it cares about.
pub trait Protocol: Send + Sync {
    fn accepted(&self, _handle: &Arc<ConnectionHandle>) {}
    fn connected(&self, _handle: &Arc<ConnectionHandle>) {}
    /// A full (or, with `read_full_buffer = false`, partial) read buffer is
    /// ready. `buf` is the filled portion only.
    fn read_ready(&self, _buf: &[u8]) {}
    /// The write buffer has fully drained to the socket.
    fn write_ready(&self) {}
    /// A read failed for a reason that is not a plain closed-connection
    /// condition.
    fn read_error(&self, _err: &io::Error) {}
    fn write_error(&self, _err: &io::Error) {}
    fn closing(&self, _reason: Option<CloseReason>) {}
    /// Size of the read buffer to allocate for a new connection.
    fn new_read_buffer(&self) -> usize {
        4096
    }
    /// Size of the write buffer to allocate for a new connection.
    fn new_write_buffer(&self) -> usize {
        4096
    }
}

/// `true` if `err` is one of the conditions that mean "the peer is gone",
/// which the adapter treats as a silent close rather than a protocol error.
fn is_closed_connection(err: &io::Error) -> bool {
    match err.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => true,
        ErrorKind::UnexpectedEof => true,
        _ => false,
    }
}

struct ReadBuffer {
    data: Vec<u8>,
    filled: usize,
}

struct WriteBuffer {
    data: Vec<u8>,
    sent: usize,
}

/// Adapts the raw [`EventSink`] contract to a buffered [`Protocol`].
///
/// `read_full_buffer` controls whether `read_ready` is delivered as soon as
/// any bytes land (false) or only once the buffer is completely full
/// (true, re-arming READ silently in between).
pub struct BufferedProtocolAdapter<P: Protocol> {
    protocol: P,
    read_full_buffer: bool,
    read_buf: Mutex<ReadBuffer>,
    write_buf: Mutex<WriteBuffer>,
    handle: Mutex<Option<Arc<ConnectionHandle>>>,
}

impl<P: Protocol> BufferedProtocolAdapter<P> {
    pub fn new(protocol: P, read_full_buffer: bool) -> Arc<Self> {
        let read_len = protocol.new_read_buffer();
        let write_len = protocol.new_write_buffer();
        Arc::new(BufferedProtocolAdapter {
            protocol,
            read_full_buffer,
            read_buf: Mutex::new(ReadBuffer {
                data: vec![0u8; read_len],
                filled: 0,
            }),
            write_buf: Mutex::new(WriteBuffer {
                data: Vec::with_capacity(write_len),
                sent: 0,
            }),
            handle: Mutex::new(None),
        })
    }

    /// Queue `data` to be written out, replacing anything left over from a
    /// prior incomplete write. The caller is expected to call
    /// `select_for_write` on the owning handle afterwards.
    pub fn queue_write(&self, data: &[u8]) {
        let mut write_buf = self.write_buf.lock().expect("write buffer mutex poisoned");
        write_buf.data.clear();
        write_buf.data.extend_from_slice(data);
        write_buf.sent = 0;
    }

    fn handle(&self) -> Option<Arc<ConnectionHandle>> {
        self.handle.lock().expect("handle mutex poisoned").clone()
    }

    fn close_for(&self, handle: &Arc<ConnectionHandle>, reason: CloseReason) {
        handle.close(reason);
    }
}

impl<P: Protocol> EventSink for BufferedProtocolAdapter<P> {
    fn accepted(&self, handle: &Arc<ConnectionHandle>) {
        *self.handle.lock().expect("handle mutex poisoned") = Some(handle.clone());
        self.protocol.accepted(handle);
    }

    fn connected(&self, handle: &Arc<ConnectionHandle>) {
        *self.handle.lock().expect("handle mutex poisoned") = Some(handle.clone());
        self.protocol.connected(handle);
    }

    fn read_ready(&self) {
        let Some(handle) = self.handle() else { return };

        let outcome = handle.with_stream(|stream| {
            let mut read_buf = self.read_buf.lock().expect("read buffer mutex poisoned");
            let ReadBuffer { data, filled } = &mut *read_buf;
            stream.read(&mut data[*filled..])
        });

        let Some(result) = outcome else { return };
        match result {
            Ok(0) => {
                self.close_for(&handle, CloseReason::Io(io::Error::from(ErrorKind::UnexpectedEof)));
            }
            Ok(n) => {
                let (filled, capacity, snapshot) = {
                    let mut read_buf = self.read_buf.lock().expect("read buffer mutex poisoned");
                    read_buf.filled += n;
                    let capacity = read_buf.data.len();
                    (read_buf.filled, capacity, read_buf.data[..read_buf.filled].to_vec())
                };

                if filled < capacity && self.read_full_buffer {
                    handle.select_for_read();
                    return;
                }

                {
                    let mut read_buf = self.read_buf.lock().expect("read buffer mutex poisoned");
                    read_buf.filled = 0;
                }
                self.protocol.read_ready(&snapshot);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                handle.select_for_read();
            }
            Err(err) if is_closed_connection(&err) => {
                self.close_for(&handle, CloseReason::Io(err));
            }
            Err(err) => {
                self.protocol.read_error(&err);
                self.close_for(&handle, CloseReason::Io(err));
            }
        }
    }

    fn write_ready(&self) {
        let Some(handle) = self.handle() else { return };

        let outcome = handle.with_stream(|stream| {
            let mut write_buf = self.write_buf.lock().expect("write buffer mutex poisoned");
            let WriteBuffer { data, sent } = &mut *write_buf;
            stream.write(&data[*sent..])
        });

        let Some(result) = outcome else { return };
        match result {
            Ok(0) => {
                self.close_for(&handle, CloseReason::Io(io::Error::from(ErrorKind::WriteZero)));
            }
            Ok(n) => {
                let drained = {
                    let mut write_buf = self.write_buf.lock().expect("write buffer mutex poisoned");
                    write_buf.sent += n;
                    write_buf.sent >= write_buf.data.len()
                };
                if drained {
                    self.protocol.write_ready();
                } else {
                    handle.select_for_write();
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                handle.select_for_write();
            }
            Err(err) if is_closed_connection(&err) => {
                self.close_for(&handle, CloseReason::Io(err));
            }
            Err(err) => {
                self.protocol.write_error(&err);
                self.close_for(&handle, CloseReason::Io(err));
            }
        }
    }

    fn closing(&self, reason: Option<CloseReason>) {
        self.protocol.closing(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering};

    struct Recorder {
        reads: Mutex<Vec<Vec<u8>>>,
        closes: StdAtomicUsize,
    }

    impl Recorder {
        fn new() -> Self {
            Recorder {
                reads: Mutex::new(Vec::new()),
                closes: StdAtomicUsize::new(0),
            }
        }
    }

    impl Protocol for Arc<Recorder> {
        fn read_ready(&self, buf: &[u8]) {
            self.reads.lock().unwrap().push(buf.to_vec());
        }
        fn closing(&self, _reason: Option<CloseReason>) {
            self.closes.fetch_add(1, StdOrdering::SeqCst);
        }
        fn new_read_buffer(&self) -> usize {
            8
        }
    }

    #[test]
    fn is_closed_connection_classifies_peer_gone_errors() {
        assert!(is_closed_connection(&io::Error::from(ErrorKind::BrokenPipe)));
        assert!(is_closed_connection(&io::Error::from(ErrorKind::ConnectionReset)));
        assert!(!is_closed_connection(&io::Error::from(ErrorKind::PermissionDenied)));
    }

    #[test]
    fn adapter_without_handle_ignores_readiness() {
        let recorder = Arc::new(Recorder::new());
        let adapter = BufferedProtocolAdapter::new(recorder, true);
        // No handle attached yet (accepted/connected never fired): must not
        // panic or record anything.
        adapter.read_ready();
        adapter.write_ready();
    }
}
