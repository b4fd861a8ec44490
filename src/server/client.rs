//! Per-connection client state.
//!
//! A client owns its socket, a growable read buffer with the parser state
//! riding alongside, and a FIFO of prebuilt reply frames. Socket I/O drains
//! in both directions until it would block, which is what the reactor's
//! edge-triggered notifications require.

use crate::net;
use crate::protocol::parser::{ParseError, QueryParser};
use bytes::{Bytes, BytesMut};
use mio::net::TcpStream;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

/// Initial capacity of the query buffer.
pub const IO_BUF: usize = 16 * 1024;
/// Read granularity and grow step of the query buffer.
pub const READ_PAGE: usize = 4 * 1024;

/// What a socket drain pass observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Connection still healthy.
    Open,
    /// The peer closed its end; the client must be freed.
    Closed,
}

pub struct Client {
    pub fd: RawFd,
    pub addr: SocketAddr,
    stream: TcpStream,
    /// Bytes read off the socket, not yet parsed.
    query: BytesMut,
    parser: QueryParser,
    /// Reply frames awaiting the socket, oldest first.
    reply: VecDeque<Bytes>,
    /// Bytes of the head reply frame already written.
    sent: usize,
}

impl Client {
    pub fn new(fd: RawFd, stream: TcpStream, addr: SocketAddr) -> Self {
        Client {
            fd,
            addr,
            stream,
            query: BytesMut::with_capacity(IO_BUF),
            parser: QueryParser::new(),
            reply: VecDeque::new(),
            sent: 0,
        }
    }

    /// Drains the socket into the query buffer until it would block.
    /// Returns the bytes gained and whether the connection is still open.
    pub fn read_from_socket(&mut self) -> io::Result<(usize, SocketState)> {
        let mut total = 0;
        let mut page = [0u8; READ_PAGE];
        loop {
            match net::read(&mut self.stream, &mut page) {
                Ok(0) => return Ok((total, SocketState::Closed)),
                Ok(n) => {
                    self.query.extend_from_slice(&page[..n]);
                    total += n;
                }
                Err(e) if net::would_block(&e) => return Ok((total, SocketState::Open)),
                Err(e) => return Err(e),
            }
        }
    }

    /// Pulls the next complete command out of the buffered bytes.
    pub fn next_command(&mut self) -> Result<Option<Vec<Bytes>>, ParseError> {
        self.parser.next_command(&mut self.query)
    }

    /// Queues a prebuilt reply frame.
    pub fn add_reply(&mut self, frame: Bytes) {
        self.reply.push_back(frame);
    }

    pub fn has_pending_replies(&self) -> bool {
        !self.reply.is_empty()
    }

    /// Removes and returns the oldest queued frame. Mostly for inspection.
    pub fn take_reply(&mut self) -> Option<Bytes> {
        self.reply.pop_front()
    }

    /// Writes queued frames until the queue empties or the socket would
    /// block. `Ok(true)` means fully drained; a partial write leaves the
    /// byte offset into the head frame for the next pass.
    pub fn flush_replies(&mut self) -> io::Result<bool> {
        while let Some(head) = self.reply.front().cloned() {
            if self.sent < head.len() {
                match net::write(&mut self.stream, &head[self.sent..]) {
                    Ok(n) => self.sent += n,
                    Err(e) if net::would_block(&e) => return Ok(false),
                    Err(e) => return Err(e),
                }
            }
            if self.sent < head.len() {
                return Ok(false);
            }
            self.reply.pop_front();
            self.sent = 0;
        }
        self.sent = 0;
        Ok(true)
    }
}

/// A client wired to a real socket, plus the peer end to drive it.
#[cfg(test)]
pub(crate) fn connected_pair() -> (Client, std::net::TcpStream) {
    use std::os::unix::io::AsRawFd;

    let listener = net::listen("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = net::connect(addr).unwrap();
    for _ in 0..200 {
        if let Ok(Some((stream, peer_addr))) = net::accept(&listener) {
            let fd = stream.as_raw_fd();
            return (Client::new(fd, stream, peer_addr), peer);
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    panic!("no connection arrived");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn replies_flush_in_fifo_order() {
        let (mut client, mut peer) = connected_pair();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        client.add_reply(Bytes::from_static(b"+OK\r\n"));
        client.add_reply(Bytes::from_static(b"$1\r\nv\r\n"));
        assert!(client.has_pending_replies());

        assert!(client.flush_replies().unwrap());
        assert!(!client.has_pending_replies());

        let mut got = [0u8; 12];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"+OK\r\n$1\r\nv\r\n");
    }

    #[test]
    fn reading_collects_buffered_commands() {
        use std::io::Write as _;

        let (mut client, mut peer) = connected_pair();
        peer.write_all(b"set k v\r\nget k\r\n").unwrap();
        thread::sleep(Duration::from_millis(50));

        let (n, state) = client.read_from_socket().unwrap();
        assert_eq!(n, 16);
        assert_eq!(state, SocketState::Open);

        let first = client.next_command().unwrap().expect("first command");
        assert_eq!(first.len(), 3);
        let second = client.next_command().unwrap().expect("second command");
        assert_eq!(second.len(), 2);
        assert_eq!(client.next_command().unwrap(), None);
    }

    #[test]
    fn peer_close_is_reported() {
        let (mut client, peer) = connected_pair();
        drop(peer);
        thread::sleep(Duration::from_millis(50));
        let (_, state) = client.read_from_socket().unwrap();
        assert_eq!(state, SocketState::Closed);
    }
}
