//! Reply frames.
//!
//! Every reply the server emits is prebuilt here as a byte frame and pushed
//! onto the client's queue; the writer only moves bytes, it never
//! re-serializes.

use crate::protocol::CRLF;
use bytes::{BufMut, Bytes, BytesMut};

/// `+OK\r\n`
pub fn ok() -> Bytes {
    Bytes::from_static(b"+OK\r\n")
}

/// `$-1\r\n` — the null bulk, for missing keys.
pub fn null_bulk() -> Bytes {
    Bytes::from_static(b"$-1\r\n")
}

/// `-ERR: <message>\r\n`
pub fn error(message: &str) -> Bytes {
    let mut frame = BytesMut::with_capacity(message.len() + 9);
    frame.put_slice(b"-ERR: ");
    frame.put_slice(message.as_bytes());
    frame.put_slice(CRLF);
    frame.freeze()
}

/// `$<len>\r\n<data>\r\n` — a bulk string reply.
pub fn bulk(data: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(data.len() + 16);
    frame.put_u8(b'$');
    frame.put_slice(data.len().to_string().as_bytes());
    frame.put_slice(CRLF);
    frame.put_slice(data);
    frame.put_slice(CRLF);
    frame.freeze()
}
