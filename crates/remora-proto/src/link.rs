//! Byte-pipe abstraction between host and device.
//!
//! The transport under the protocol is an ordered reliable byte stream; USB
//! CDC-ACM on real hardware, a serial device file on the host, an in-memory
//! pair in tests. Both protocol ends only ever need two operations: fill a
//! buffer completely, and push bytes out.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum LinkError {
    /// Peer went away; no more bytes will arrive
    #[error("link closed by peer")]
    Closed,

    /// Read deadline expired before the buffer filled
    #[error("link read timed out")]
    Timeout,

    /// Underlying stream error
    #[error("link I/O error: {0}")]
    Io(#[from] io::Error),
}

/// An ordered reliable byte pipe.
pub trait Link {
    /// Fill `buf` completely, blocking as needed.
    fn recv(&mut self, buf: &mut [u8]) -> Result<(), LinkError>;

    /// Send all of `data`, blocking as needed.
    fn send(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Throw away any bytes already received but not yet consumed.
    ///
    /// Used by the host after a timeout to resynchronize; implementations
    /// without a local receive buffer may leave this a no-op.
    fn discard_input(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

/// [`Link`] over any blocking `Read + Write` stream (serial device file,
/// TCP socket, PTY). Timeouts are whatever the underlying stream is
/// configured with.
pub struct StreamLink<T: Read + Write> {
    stream: T,
}

impl<T: Read + Write> StreamLink<T> {
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    /// Access the wrapped stream (e.g. to adjust timeouts).
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.stream
    }
}

impl<T: Read + Write> Link for StreamLink<T> {
    fn recv(&mut self, buf: &mut [u8]) -> Result<(), LinkError> {
        self.stream.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => LinkError::Closed,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => LinkError::Timeout,
            _ => LinkError::Io(e),
        })
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }
}

// ===== In-memory duplex link =====

const PIPE_CAPACITY: usize = 4 * 1024 * 1024;

struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
}

struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
    writable: Condvar,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PipeState {
                buf: VecDeque::new(),
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        })
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

/// One end of an in-memory duplex byte pipe.
///
/// Stands in for the serial transport in tests and the loopback harness.
/// Sends block when the peer's queue is full; dropping an end closes both
/// directions so a blocked peer wakes with [`LinkError::Closed`].
pub struct MemoryLink {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
    read_timeout: Option<Duration>,
}

/// Create a connected pair of in-memory links.
pub fn memory_link_pair() -> (MemoryLink, MemoryLink) {
    let a_to_b = Pipe::new();
    let b_to_a = Pipe::new();
    (
        MemoryLink {
            rx: b_to_a.clone(),
            tx: a_to_b.clone(),
            read_timeout: None,
        },
        MemoryLink {
            rx: a_to_b,
            tx: b_to_a,
            read_timeout: None,
        },
    )
}

impl MemoryLink {
    /// Set or clear the receive deadline applied per `recv` call.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }
}

impl Link for MemoryLink {
    fn recv(&mut self, buf: &mut [u8]) -> Result<(), LinkError> {
        let mut filled = 0;
        let mut state = self.rx.state.lock();
        while filled < buf.len() {
            while state.buf.is_empty() {
                if state.closed {
                    return Err(LinkError::Closed);
                }
                match self.read_timeout {
                    Some(t) => {
                        if self.rx.readable.wait_for(&mut state, t).timed_out() {
                            return Err(LinkError::Timeout);
                        }
                    }
                    None => self.rx.readable.wait(&mut state),
                }
            }
            while filled < buf.len() {
                match state.buf.pop_front() {
                    Some(b) => {
                        buf[filled] = b;
                        filled += 1;
                    }
                    None => break,
                }
            }
            self.rx.writable.notify_all();
        }
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let mut sent = 0;
        let mut state = self.tx.state.lock();
        while sent < data.len() {
            if state.closed {
                return Err(LinkError::Closed);
            }
            while state.buf.len() >= PIPE_CAPACITY {
                self.tx.writable.wait(&mut state);
                if state.closed {
                    return Err(LinkError::Closed);
                }
            }
            let room = PIPE_CAPACITY - state.buf.len();
            let take = room.min(data.len() - sent);
            state.buf.extend(&data[sent..sent + take]);
            sent += take;
            self.tx.readable.notify_all();
        }
        Ok(())
    }

    fn discard_input(&mut self) -> Result<(), LinkError> {
        let mut state = self.rx.state.lock();
        state.buf.clear();
        self.rx.writable.notify_all();
        Ok(())
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.rx.close();
        self.tx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_memory_link_roundtrip() {
        let (mut a, mut b) = memory_link_pair();
        a.send(&[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        b.recv(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_memory_link_is_full_duplex() {
        let (mut a, mut b) = memory_link_pair();
        a.send(b"ping").unwrap();
        b.send(b"pong").unwrap();

        let mut buf = [0u8; 4];
        b.recv(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        a.recv(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn test_recv_blocks_until_data_arrives() {
        let (mut a, mut b) = memory_link_pair();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 2];
            b.recv(&mut buf).unwrap();
            buf
        });
        thread::sleep(Duration::from_millis(10));
        a.send(&[7, 9]).unwrap();
        assert_eq!(handle.join().unwrap(), [7, 9]);
    }

    #[test]
    fn test_drop_closes_peer() {
        let (a, mut b) = memory_link_pair();
        drop(a);
        let mut buf = [0u8; 1];
        assert!(matches!(b.recv(&mut buf), Err(LinkError::Closed)));
    }

    #[test]
    fn test_read_timeout() {
        let (_a, mut b) = memory_link_pair();
        b.set_read_timeout(Some(Duration::from_millis(10)));
        let mut buf = [0u8; 1];
        assert!(matches!(b.recv(&mut buf), Err(LinkError::Timeout)));
    }

    #[test]
    fn test_discard_input() {
        let (mut a, mut b) = memory_link_pair();
        a.send(&[1, 2, 3]).unwrap();
        b.discard_input().unwrap();
        b.set_read_timeout(Some(Duration::from_millis(10)));
        let mut buf = [0u8; 1];
        assert!(matches!(b.recv(&mut buf), Err(LinkError::Timeout)));
    }
}
