//! # RESP2 Framing
//!
//! Purpose: Parse client request arrays incrementally from a growing
//! buffer and encode typed replies back into wire bytes.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: A partial frame leaves the buffer untouched
//!    and reports "not yet"; the reactor keeps reading.
//! 2. **Binary-Safe**: Bulk strings are raw bytes until the dispatch layer
//!    asks for UTF-8.
//! 3. **Fail Fast**: Malformed framing is a protocol error that closes the
//!    connection.

use bytes::{Buf, BytesMut};

use ccache_common::Reply;

/// Framing errors surfaced by the parser.
#[derive(Debug, PartialEq, Eq)]
pub enum RespError {
    Protocol,
}

/// Incremental RESP2 request parser.
///
/// Parsing is stateless between frames; the struct exists so the server
/// can hold one per connection and extend it later without changing
/// call sites.
#[derive(Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Attempts to parse one complete command array. Returns `Ok(None)`
    /// when more bytes are needed; consumed bytes are advanced past only
    /// for complete frames.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let mut pos = 0;

        let Some(header) = read_line(buf, &mut pos) else {
            return Ok(None);
        };
        if header.first() != Some(&b'*') {
            return Err(RespError::Protocol);
        }
        let count = parse_usize(&header[1..])?;

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(len_line) = read_line(buf, &mut pos) else {
                return Ok(None);
            };
            if len_line.first() != Some(&b'$') {
                return Err(RespError::Protocol);
            }
            let len = parse_usize(&len_line[1..])?;

            if buf.len() < pos + len + 2 {
                return Ok(None);
            }
            let arg = buf[pos..pos + len].to_vec();
            if &buf[pos + len..pos + len + 2] != b"\r\n" {
                return Err(RespError::Protocol);
            }
            pos += len + 2;
            args.push(arg);
        }

        buf.advance(pos);
        Ok(Some(args))
    }
}

/// Reads one `\r\n`-terminated line starting at `*pos`, advancing it past
/// the terminator. Returns None when the line is still incomplete.
fn read_line<'a>(buf: &'a BytesMut, pos: &mut usize) -> Option<&'a [u8]> {
    let start = *pos;
    let end = buf[start..]
        .windows(2)
        .position(|window| window == b"\r\n")?;
    *pos = start + end + 2;
    Some(&buf[start..start + end])
}

fn parse_usize(digits: &[u8]) -> Result<usize, RespError> {
    if digits.is_empty() {
        return Err(RespError::Protocol);
    }
    let mut value = 0usize;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as usize))
            .ok_or(RespError::Protocol)?;
    }
    Ok(value)
}

/// Encodes one reply into RESP2 wire bytes.
pub fn encode_reply(reply: &Reply, out: &mut Vec<u8>) {
    match reply {
        Reply::Simple(text) => {
            out.push(b'+');
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Error(text) => {
            out.push(b'-');
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Int(value) => {
            out.push(b':');
            out.extend_from_slice(value.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Bulk(data) => {
            out.push(b'$');
            out.extend_from_slice(data.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(data.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Null => out.extend_from_slice(b"$-1\r\n"),
        Reply::NullArray => out.extend_from_slice(b"*-1\r\n"),
        Reply::Array(items) => {
            out.push(b'*');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode_reply(item, out);
            }
        }
    }
}
