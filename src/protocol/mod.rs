//! Wire protocol: request parsing and reply frames.
//!
//! Requests arrive in two shapes. An *inline* request is a plaintext line,
//! split on spaces (`get k\r\n`). A *multi-bulk* request is a `*N` header
//! followed by N length-prefixed bulk strings
//! (`*2\r\n$3\r\nget\r\n$1\r\nk\r\n`), and is binary safe.
//!
//! - [`parser`]: the per-client incremental state machine
//! - [`reply`]: prebuilt reply frames

pub mod parser;
pub mod reply;

pub use parser::{ParseError, QueryParser};

/// Line terminator used throughout the protocol.
pub const CRLF: &[u8] = b"\r\n";

/// Longest accepted inline request line (and any header line).
pub const MAX_INLINE: usize = 4 * 1024;

/// Longest accepted single bulk payload.
pub const MAX_BULK: usize = 4 * 1024;
