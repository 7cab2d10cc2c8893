//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server responses without
//! external dependencies, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Responses are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.

use std::io::BufRead;

use crate::client::{ClientError, ClientResult};

/// Decoded RESP response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK` style responses.
    Simple(Vec<u8>),
    /// `-ERR ...` responses.
    Error(Vec<u8>),
    /// `:123` responses.
    Integer(i64),
    /// `$...` bulk strings, None for null.
    Bulk(Option<Vec<u8>>),
    /// `*...` arrays; None for the null array (aborted EXEC).
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Bulk or simple payload as UTF-8 text, when that is what arrived.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::Simple(data) | RespValue::Error(data) => {
                Some(String::from_utf8_lossy(data).into_owned())
            }
            RespValue::Bulk(Some(data)) => Some(String::from_utf8_lossy(data).into_owned()),
            _ => None,
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(ClientError::Protocol);
    }

    match line_buf[0] {
        b'+' => Ok(RespValue::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(RespValue::Error(line_buf[1..].to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            read_array(reader, len, line_buf)
        }
        _ => Err(ClientError::Protocol),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> ClientResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(ClientError::Protocol);
    }
    Ok(RespValue::Bulk(Some(data)))
}

fn read_array<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> ClientResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Array(None));
    }
    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(read_response(reader, line_buf)?);
    }
    Ok(RespValue::Array(Some(items)))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        // EOF before a terminator: the server went away mid-reply.
        return Err(ClientError::Protocol);
    }
    match buf.as_slice() {
        [.., b'\r', b'\n'] => {
            buf.truncate(buf.len() - 2);
            Ok(())
        }
        _ => Err(ClientError::Protocol),
    }
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    if data.is_empty() {
        return Err(ClientError::Protocol);
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(ClientError::Protocol);
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }
    Ok(if negative { -value } else { value })
}

fn push_usize(out: &mut Vec<u8>, value: usize) {
    out.extend_from_slice(Decimal::from(value as u64).as_bytes());
}

/// Stack-allocated decimal rendering of a u64: digits are written from the
/// tail of a fixed buffer, so no heap allocation is involved. Shared by the
/// command encoder and the TTL-argument paths in the client facade.
pub(crate) struct Decimal {
    digits: [u8; 20],
    start: usize,
}

impl Decimal {
    pub(crate) fn from(value: u64) -> Decimal {
        let mut digits = [0u8; 20];
        let mut at = digits.len();
        let mut rest = value;
        loop {
            at -= 1;
            digits[at] = b'0' + (rest % 10) as u8;
            rest /= 10;
            if rest == 0 {
                break;
            }
        }
        Decimal { digits, start: at }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.digits[self.start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[b"SET", b"key", b"value"], &mut buf);
        assert_eq!(&buf, b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n");
    }

    #[test]
    fn decimal_renders_boundaries() {
        assert_eq!(Decimal::from(0).as_bytes(), b"0");
        assert_eq!(Decimal::from(7).as_bytes(), b"7");
        assert_eq!(Decimal::from(90210).as_bytes(), b"90210");
        assert_eq!(
            Decimal::from(u64::MAX).as_bytes(),
            b"18446744073709551615"
        );
    }

    #[test]
    fn parses_scalar_responses() {
        let mut line = Vec::new();

        let mut reader = Cursor::new(b"+OK\r\n".to_vec());
        assert_eq!(
            read_response(&mut reader, &mut line).unwrap(),
            RespValue::Simple(b"OK".to_vec())
        );

        let mut reader = Cursor::new(b":-42\r\n".to_vec());
        assert_eq!(
            read_response(&mut reader, &mut line).unwrap(),
            RespValue::Integer(-42)
        );

        let mut reader = Cursor::new(b"-ERR nope\r\n".to_vec());
        assert_eq!(
            read_response(&mut reader, &mut line).unwrap(),
            RespValue::Error(b"ERR nope".to_vec())
        );
    }

    #[test]
    fn parses_bulk_and_null() {
        let mut line = Vec::new();
        let mut reader = Cursor::new(b"$5\r\nhello\r\n$-1\r\n".to_vec());
        assert_eq!(
            read_response(&mut reader, &mut line).unwrap(),
            RespValue::Bulk(Some(b"hello".to_vec()))
        );
        assert_eq!(
            read_response(&mut reader, &mut line).unwrap(),
            RespValue::Bulk(None)
        );
    }

    #[test]
    fn parses_nested_arrays_and_null_array() {
        let mut line = Vec::new();
        let mut reader = Cursor::new(b"*2\r\n:1\r\n*1\r\n$1\r\nx\r\n".to_vec());
        let value = read_response(&mut reader, &mut line).unwrap();
        assert_eq!(
            value,
            RespValue::Array(Some(vec![
                RespValue::Integer(1),
                RespValue::Array(Some(vec![RespValue::Bulk(Some(b"x".to_vec()))])),
            ]))
        );

        let mut reader = Cursor::new(b"*-1\r\n".to_vec());
        assert_eq!(
            read_response(&mut reader, &mut line).unwrap(),
            RespValue::Array(None)
        );
    }
}
