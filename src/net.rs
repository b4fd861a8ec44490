//! Non-blocking TCP primitives.
//!
//! Thin wrappers over the handful of socket operations the reactor drives.
//! Everything server-side is non-blocking: `accept` reports an empty backlog
//! as `None`, and `read`/`write` surface `WouldBlock` for the caller to
//! suspend on until the next readiness event.

use mio::net::{TcpListener, TcpStream};
use std::io::{self, Read, Write};
use std::net::SocketAddr;

/// Binds a non-blocking listener on `addr`.
///
/// The socket carries `SO_REUSEADDR`, so restarts don't trip over sockets
/// lingering in TIME_WAIT.
pub fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr)
}

/// Accepts one pending connection, or `None` when the backlog is empty.
/// The returned stream is already non-blocking.
pub fn accept(listener: &TcpListener) -> io::Result<Option<(TcpStream, SocketAddr)>> {
    match listener.accept() {
        Ok(pair) => Ok(Some(pair)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e),
    }
}

/// Reads once into `buf`, retrying on `Interrupted`. `Ok(0)` means the peer
/// closed its end.
pub fn read(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Writes from `buf` once, retrying on `Interrupted`. Short counts are the
/// caller's problem.
pub fn write(stream: &mut TcpStream, buf: &[u8]) -> io::Result<usize> {
    loop {
        match stream.write(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// True when the error only means "try again once readiness fires".
pub fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// Blocking client-side connect. Only tests dial the server from inside this
/// crate, so a plain std stream is the convenient shape.
pub fn connect(addr: SocketAddr) -> io::Result<std::net::TcpStream> {
    std::net::TcpStream::connect(addr)
}
