//! TCP socket helpers
//!
//! Streams are configured with a short read timeout so that blocked reads
//! return often enough to observe the session stop signal.

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

use crate::session::signal::Signals;

/// Connect to `addr`, optionally from a fixed local address
pub fn dial(addr: SocketAddr, bind: Option<IpAddr>, timeout: Duration) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if let Some(ip) = bind {
        if ip.is_ipv4() == addr.is_ipv4() {
            socket.bind(&SocketAddr::new(ip, 0).into())?;
        }
    }

    socket.connect_timeout(&addr.into(), timeout)?;
    socket.set_nodelay(true)?;
    Ok(socket.into())
}

/// Apply per-connection timeouts. Reads wake every `slice` so the caller
/// can check for shutdown; writes give up after `write_timeout`.
pub fn prepare(stream: &TcpStream, slice: Duration, write_timeout: Duration) -> io::Result<()> {
    stream.set_read_timeout(Some(slice))?;
    stream.set_write_timeout(Some(write_timeout))?;
    Ok(())
}

pub fn set_recv_buffer(stream: &TcpStream, size: usize) -> io::Result<()> {
    SockRef::from(stream).set_recv_buffer_size(size)
}

/// Borrowed stream whose reads honor the session stop signal.
///
/// A read that sees no data for `idle_limit` fails with `TimedOut`; a read
/// interrupted by shutdown fails with `ConnectionAborted`.
pub struct SessionStream<'a> {
    stream: &'a TcpStream,
    signals: &'a Signals,
    slice: Duration,
    idle_limit: Duration,
}

impl<'a> SessionStream<'a> {
    /// `slice` must match the read timeout installed by [`prepare`]
    pub fn new(stream: &'a TcpStream, signals: &'a Signals, slice: Duration, idle_limit: Duration) -> Self {
        Self {
            stream,
            signals,
            slice,
            idle_limit,
        }
    }
}

impl Read for SessionStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut idle = Duration::ZERO;
        loop {
            if self.signals.is_stopped() {
                return Err(io::Error::new(ErrorKind::ConnectionAborted, "session stopped"));
            }

            match (&*self.stream).read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    idle += self.slice;
                    if idle >= self.idle_limit {
                        return Err(io::Error::new(ErrorKind::TimedOut, "read timed out"));
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl Write for SessionStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.signals.is_stopped() {
            return Err(io::Error::new(ErrorKind::ConnectionAborted, "session stopped"));
        }
        (&*self.stream).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self.stream).flush()
    }
}
