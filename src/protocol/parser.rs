//! Incremental request parser.
//!
//! A [`QueryParser`] owns one client's frame state. It is fed the client's
//! read buffer and, per call, either extracts one complete command, suspends
//! without consuming bytes it cannot interpret yet, or reports a protocol
//! violation (which costs the client its connection).
//!
//! The state machine:
//!
//! | State          | Meaning                                             |
//! |----------------|-----------------------------------------------------|
//! | unknown        | first byte of the next request not seen yet         |
//! | inline         | scanning for the end of a plaintext line            |
//! | bulk, no count | `*N` header not complete yet                        |
//! | bulk, counting | reading `$L` headers and payloads until N args done |
//!
//! Arguments are zero-copy slices of the frames split off the read buffer.

use crate::protocol::{MAX_BULK, MAX_INLINE};
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Protocol violations. Any of these closes the client.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("inline request too long")]
    InlineTooLong,
    #[error("bulk payload too long")]
    BulkTooLong,
    #[error("invalid length header")]
    BadLength,
    #[error("expected '$' before bulk length")]
    ExpectedBulkHeader,
    #[error("bulk payload missing trailing CRLF")]
    MissingCrlf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FrameKind {
    #[default]
    Unknown,
    Inline,
    Bulk,
}

/// Per-client frame state machine.
#[derive(Debug, Default)]
pub struct QueryParser {
    kind: FrameKind,
    /// Bulks still expected for the current multi-bulk request; 0 while the
    /// `*N` header is outstanding.
    bulk_remaining: usize,
    /// Payload length of the bulk currently being read.
    bulk_len: Option<usize>,
    /// Arguments assembled so far for the current request.
    args: Vec<Bytes>,
}

impl QueryParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all frame state; the next byte starts a fresh request.
    pub fn reset(&mut self) {
        self.kind = FrameKind::Unknown;
        self.bulk_remaining = 0;
        self.bulk_len = None;
        self.args.clear();
    }

    /// Extracts the next complete command from `buf`.
    ///
    /// `Ok(Some(args))` means a full request was consumed — the vector may
    /// be empty for blank lines and `*0`. `Ok(None)` means more bytes are
    /// needed; nothing partial was consumed beyond frames already stored.
    pub fn next_command(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, ParseError> {
        if buf.is_empty() {
            return Ok(None);
        }
        if self.kind == FrameKind::Unknown {
            self.kind = if buf[0] == b'*' {
                FrameKind::Bulk
            } else {
                FrameKind::Inline
            };
        }
        if self.kind == FrameKind::Bulk {
            self.parse_bulk(buf)
        } else {
            self.parse_inline(buf)
        }
    }

    /// One plaintext line, split on single spaces; empty tokens dropped, so
    /// a blank line is an empty command.
    fn parse_inline(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, ParseError> {
        let Some(line) = take_line(buf)? else {
            return Ok(None);
        };
        let mut args = Vec::new();
        let mut start = 0;
        for i in 0..=line.len() {
            if i == line.len() || line[i] == b' ' {
                if i > start {
                    args.push(line.slice(start..i));
                }
                start = i + 1;
            }
        }
        self.reset();
        Ok(Some(args))
    }

    fn parse_bulk(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, ParseError> {
        if self.bulk_remaining == 0 {
            let Some(line) = take_line(buf)? else {
                return Ok(None);
            };
            // Skip the leading '*'.
            let count = parse_decimal(line.get(1..).ok_or(ParseError::BadLength)?)?;
            if count == 0 {
                self.reset();
                return Ok(Some(Vec::new()));
            }
            if count < 0 {
                return Err(ParseError::BadLength);
            }
            self.bulk_remaining = count as usize;
            self.args.reserve(self.bulk_remaining);
        }

        while self.bulk_remaining > 0 {
            let len = match self.bulk_len {
                Some(len) => len,
                None => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(None);
                    };
                    if line.first() != Some(&b'$') {
                        return Err(ParseError::ExpectedBulkHeader);
                    }
                    let len = parse_decimal(&line[1..])?;
                    if len < 0 {
                        return Err(ParseError::BadLength);
                    }
                    let len = len as usize;
                    if len > MAX_BULK {
                        return Err(ParseError::BulkTooLong);
                    }
                    self.bulk_len = Some(len);
                    len
                }
            };

            // Payload plus its terminator must be buffered in full.
            if buf.len() < len + 2 {
                return Ok(None);
            }
            if &buf[len..len + 2] != b"\r\n" {
                return Err(ParseError::MissingCrlf);
            }
            let frame = buf.split_to(len + 2).freeze();
            self.args.push(frame.slice(..len));
            self.bulk_len = None;
            self.bulk_remaining -= 1;
        }

        let args = std::mem::take(&mut self.args);
        self.reset();
        Ok(Some(args))
    }
}

/// Takes one `\n`-terminated line off the front of `buf`, stripping the
/// newline and an optional preceding `\r`. `None` when no full line is
/// buffered yet; an unterminated line past the inline limit is a violation.
fn take_line(buf: &mut BytesMut) -> Result<Option<Bytes>, ParseError> {
    let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_INLINE {
            return Err(ParseError::InlineTooLong);
        }
        return Ok(None);
    };
    let line = buf.split_to(pos + 1).freeze();
    let mut end = line.len() - 1;
    if end > 0 && line[end - 1] == b'\r' {
        end -= 1;
    }
    Ok(Some(line.slice(..end)))
}

/// ASCII signed decimal, the whole slice.
fn parse_decimal(digits: &[u8]) -> Result<i64, ParseError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ParseError::BadLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(input: &[u8]) -> (QueryParser, BytesMut) {
        let mut buf = BytesMut::with_capacity(input.len().max(64));
        buf.extend_from_slice(input);
        (QueryParser::new(), buf)
    }

    fn args_of(result: Result<Option<Vec<Bytes>>, ParseError>) -> Vec<Vec<u8>> {
        result
            .expect("no parse error")
            .expect("complete command")
            .iter()
            .map(|a| a.to_vec())
            .collect()
    }

    #[test]
    fn inline_command() {
        let (mut parser, mut buf) = feed(b"get k\r\n");
        assert_eq!(
            args_of(parser.next_command(&mut buf)),
            vec![b"get".to_vec(), b"k".to_vec()]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn inline_strips_carriage_return() {
        let (mut parser, mut buf) = feed(b"get k\r\n");
        let args = args_of(parser.next_command(&mut buf));
        assert_eq!(args[1], b"k".to_vec());

        // Bare-newline lines parse the same way.
        let (mut parser, mut buf) = feed(b"get k\n");
        let args = args_of(parser.next_command(&mut buf));
        assert_eq!(args[1], b"k".to_vec());
    }

    #[test]
    fn inline_collapses_repeated_spaces() {
        let (mut parser, mut buf) = feed(b"set  k   v\r\n");
        assert_eq!(
            args_of(parser.next_command(&mut buf)),
            vec![b"set".to_vec(), b"k".to_vec(), b"v".to_vec()]
        );
    }

    #[test]
    fn blank_inline_line_is_an_empty_command() {
        let (mut parser, mut buf) = feed(b"\r\n");
        assert!(args_of(parser.next_command(&mut buf)).is_empty());
    }

    #[test]
    fn inline_waits_for_the_newline() {
        let (mut parser, mut buf) = feed(b"get k");
        assert_eq!(parser.next_command(&mut buf), Ok(None));
        buf.extend_from_slice(b"\r\n");
        assert_eq!(
            args_of(parser.next_command(&mut buf)),
            vec![b"get".to_vec(), b"k".to_vec()]
        );
    }

    #[test]
    fn inline_line_just_under_the_limit_parses() {
        let mut line = vec![b'a'; MAX_INLINE - 1];
        line.extend_from_slice(b"\r\n");
        let (mut parser, mut buf) = feed(&line);
        let args = args_of(parser.next_command(&mut buf));
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].len(), MAX_INLINE - 1);
    }

    #[test]
    fn unterminated_line_past_the_limit_is_rejected() {
        let line = vec![b'a'; MAX_INLINE + 1];
        let (mut parser, mut buf) = feed(&line);
        assert_eq!(
            parser.next_command(&mut buf),
            Err(ParseError::InlineTooLong)
        );
    }

    #[test]
    fn multibulk_command() {
        let (mut parser, mut buf) = feed(b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n");
        assert_eq!(
            args_of(parser.next_command(&mut buf)),
            vec![b"get".to_vec(), b"k".to_vec()]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn multibulk_resumes_across_partial_reads() {
        let (mut parser, mut buf) = feed(b"*2\r\n$3\r\nget\r\n$1\r\n");
        assert_eq!(parser.next_command(&mut buf), Ok(None));
        buf.extend_from_slice(b"k\r\n");
        assert_eq!(
            args_of(parser.next_command(&mut buf)),
            vec![b"get".to_vec(), b"k".to_vec()]
        );
    }

    #[test]
    fn bulk_header_split_from_payload() {
        let (mut parser, mut buf) = feed(b"*1\r\n$5\r\n");
        assert_eq!(parser.next_command(&mut buf), Ok(None));
        buf.extend_from_slice(b"hel");
        assert_eq!(parser.next_command(&mut buf), Ok(None));
        buf.extend_from_slice(b"lo\r\n");
        assert_eq!(
            args_of(parser.next_command(&mut buf)),
            vec![b"hello".to_vec()]
        );
    }

    #[test]
    fn zero_count_is_an_empty_command() {
        let (mut parser, mut buf) = feed(b"*0\r\n");
        assert!(args_of(parser.next_command(&mut buf)).is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn zero_length_bulk_is_an_empty_argument() {
        let (mut parser, mut buf) = feed(b"*1\r\n$0\r\n\r\n");
        assert_eq!(args_of(parser.next_command(&mut buf)), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn oversized_bulk_is_rejected() {
        let header = format!("*1\r\n${}\r\n", MAX_BULK + 1);
        let (mut parser, mut buf) = feed(header.as_bytes());
        assert_eq!(parser.next_command(&mut buf), Err(ParseError::BulkTooLong));
    }

    #[test]
    fn bulk_at_the_limit_parses() {
        let mut input = format!("*1\r\n${MAX_BULK}\r\n").into_bytes();
        input.extend(std::iter::repeat(b'x').take(MAX_BULK));
        input.extend_from_slice(b"\r\n");
        let (mut parser, mut buf) = feed(&input);
        let args = args_of(parser.next_command(&mut buf));
        assert_eq!(args[0].len(), MAX_BULK);
    }

    #[test]
    fn missing_dollar_is_rejected() {
        let (mut parser, mut buf) = feed(b"*1\r\n:3\r\nabc\r\n");
        assert_eq!(
            parser.next_command(&mut buf),
            Err(ParseError::ExpectedBulkHeader)
        );
    }

    #[test]
    fn bad_count_is_rejected() {
        let (mut parser, mut buf) = feed(b"*x\r\n");
        assert_eq!(parser.next_command(&mut buf), Err(ParseError::BadLength));

        let (mut parser, mut buf) = feed(b"*-1\r\n");
        assert_eq!(parser.next_command(&mut buf), Err(ParseError::BadLength));
    }

    #[test]
    fn bulk_without_trailing_crlf_is_rejected() {
        let (mut parser, mut buf) = feed(b"*1\r\n$3\r\nabcXY");
        assert_eq!(parser.next_command(&mut buf), Err(ParseError::MissingCrlf));
    }

    #[test]
    fn pipelined_commands_come_out_one_at_a_time() {
        let (mut parser, mut buf) =
            feed(b"*3\r\n$3\r\nset\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$3\r\nget\r\n$1\r\nk\r\n");
        assert_eq!(
            args_of(parser.next_command(&mut buf)),
            vec![b"set".to_vec(), b"k".to_vec(), b"v".to_vec()]
        );
        assert_eq!(
            args_of(parser.next_command(&mut buf)),
            vec![b"get".to_vec(), b"k".to_vec()]
        );
        assert_eq!(parser.next_command(&mut buf), Ok(None));
    }

    #[test]
    fn inline_after_multibulk_resets_cleanly() {
        let (mut parser, mut buf) = feed(b"*1\r\n$4\r\nping\r\n");
        assert_eq!(args_of(parser.next_command(&mut buf)), vec![b"ping".to_vec()]);
        buf.extend_from_slice(b"get k\r\n");
        assert_eq!(
            args_of(parser.next_command(&mut buf)),
            vec![b"get".to_vec(), b"k".to_vec()]
        );
    }

    #[test]
    fn binary_payloads_survive() {
        let (mut parser, mut buf) = feed(b"*1\r\n$6\r\na\x00b\r c\r\n");
        let args = args_of(parser.next_command(&mut buf));
        assert_eq!(args[0], b"a\x00b\r c".to_vec());
    }
}
