//! Incremental RESP Reply Decoder
//!
//! Replies arrive over TCP in arbitrary chunks. The decoder is handed the
//! connection's read buffer after every read and either:
//! - returns `Ok(Some(value))` and removes exactly one reply from the buffer,
//! - returns `Ok(None)` and leaves the buffer untouched (reply incomplete),
//! - returns `Err(ParseError)` when the bytes cannot be RESP.
//!
//! Pipelined replies and pub/sub pushes that share one TCP segment are
//! decoded one at a time by calling [`ReplyDecoder::decode`] in a loop.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, nesting too deep, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The reply exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// Decodes RESP replies out of a growing read buffer.
///
/// # Example
///
/// ```
/// use kvkit::protocol::{ReplyDecoder, RespValue};
/// use bytes::BytesMut;
///
/// let mut decoder = ReplyDecoder::new();
/// let mut buffer = BytesMut::from(&b"+OK\r\n:4"[..]);
///
/// assert_eq!(
///     decoder.decode(&mut buffer).unwrap(),
///     Some(RespValue::SimpleString("OK".to_string()))
/// );
/// // The integer reply is not terminated yet.
/// assert_eq!(decoder.decode(&mut buffer).unwrap(), None);
///
/// buffer.extend_from_slice(b"2\r\n");
/// assert_eq!(decoder.decode(&mut buffer).unwrap(), Some(RespValue::Integer(42)));
/// assert!(buffer.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct ReplyDecoder {
    /// Replies decoded over the lifetime of this decoder
    decoded: u64,
}

impl ReplyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the first complete reply in `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> ParseResult<Option<RespValue>> {
        match parse_value(&buf[..], 0)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                self.decoded += 1;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Number of replies decoded so far.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }
}

/// Parses one value at the start of `buf`, returning it with the byte count used.
fn parse_value(buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ParseError::ProtocolError(format!(
            "maximum nesting depth exceeded: {}",
            MAX_NESTING_DEPTH
        )));
    }

    let Some(&type_byte) = buf.first() else {
        return Ok(None);
    };
    let Some((line, header_len)) = read_line(buf)? else {
        return Ok(None);
    };

    match type_byte {
        prefix::SIMPLE_STRING => Ok(Some((
            RespValue::SimpleString(utf8(line)?.to_string()),
            header_len,
        ))),
        prefix::ERROR => Ok(Some((RespValue::Error(utf8(line)?.to_string()), header_len))),
        prefix::INTEGER => Ok(Some((RespValue::Integer(integer(line)?), header_len))),
        prefix::BULK_STRING => parse_bulk(buf, integer(line)?, header_len),
        prefix::ARRAY => parse_array(buf, integer(line)?, header_len, depth),
        other => Err(ParseError::UnknownPrefix(other)),
    }
}

/// Parses `$<length>\r\n<data>\r\n` once the header line has been read.
fn parse_bulk(
    buf: &[u8],
    length: i64,
    header_len: usize,
) -> ParseResult<Option<(RespValue, usize)>> {
    if length == -1 {
        return Ok(Some((RespValue::Null, header_len)));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total = header_len + length + CRLF.len();
    if buf.len() < total {
        return Ok(None);
    }
    if &buf[header_len + length..total] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[header_len..header_len + length]);
    Ok(Some((RespValue::BulkString(data), total)))
}

/// Parses `*<count>\r\n<elements...>` once the header line has been read.
fn parse_array(
    buf: &[u8],
    count: i64,
    header_len: usize,
    depth: usize,
) -> ParseResult<Option<(RespValue, usize)>> {
    if count == -1 {
        return Ok(Some((RespValue::Null, header_len)));
    }
    if count < 0 {
        return Err(ParseError::InvalidArrayLength(count));
    }

    // Cap the preallocation; a hostile count must not reserve gigabytes.
    let mut elements = Vec::with_capacity((count as usize).min(1024));
    let mut consumed = header_len;

    for _ in 0..count {
        match parse_value(&buf[consumed..], depth + 1)? {
            Some((value, used)) => {
                elements.push(value);
                consumed += used;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((RespValue::Array(elements), consumed)))
}

/// Returns the content of the first line (without type byte and CRLF)
/// together with the number of bytes the whole line occupies.
fn read_line(buf: &[u8]) -> ParseResult<Option<(&[u8], usize)>> {
    match buf.windows(2).position(|w| w == CRLF) {
        Some(0) => Err(ParseError::ProtocolError("empty line".to_string())),
        Some(pos) => Ok(Some((&buf[1..pos], pos + CRLF.len()))),
        None => Ok(None),
    }
}

fn utf8(bytes: &[u8]) -> ParseResult<&str> {
    std::str::from_utf8(bytes).map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

fn integer(bytes: &[u8]) -> ParseResult<i64> {
    utf8(bytes)?
        .parse()
        .map_err(|e: std::num::ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> ParseResult<Option<RespValue>> {
        let mut buf = BytesMut::from(input);
        ReplyDecoder::new().decode(&mut buf)
    }

    #[test]
    fn test_decode_status() {
        assert_eq!(
            decode_all(b"+PONG\r\n").unwrap(),
            Some(RespValue::SimpleString("PONG".to_string()))
        );
    }

    #[test]
    fn test_decode_error_reply() {
        assert_eq!(
            decode_all(b"-WRONGTYPE Operation against a key\r\n").unwrap(),
            Some(RespValue::Error("WRONGTYPE Operation against a key".to_string()))
        );
    }

    #[test]
    fn test_decode_negative_integer() {
        assert_eq!(decode_all(b":-2\r\n").unwrap(), Some(RespValue::Integer(-2)));
    }

    #[test]
    fn test_decode_null_bulk_and_null_array() {
        assert_eq!(decode_all(b"$-1\r\n").unwrap(), Some(RespValue::Null));
        assert_eq!(decode_all(b"*-1\r\n").unwrap(), Some(RespValue::Null));
    }

    #[test]
    fn test_decode_empty_bulk_string() {
        assert_eq!(
            decode_all(b"$0\r\n\r\n").unwrap(),
            Some(RespValue::BulkString(Bytes::new()))
        );
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        assert_eq!(
            decode_all(b"$6\r\n\x00\r\n\xffab\r\n").unwrap(),
            Some(RespValue::BulkString(Bytes::from_static(b"\x00\r\n\xffab")))
        );
    }

    #[test]
    fn test_incomplete_bulk_leaves_buffer_untouched() {
        let mut buf = BytesMut::from(&b"$5\r\nhel"[..]);
        let mut decoder = ReplyDecoder::new();
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"$5\r\nhel");

        buf.extend_from_slice(b"lo\r\n");
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(RespValue::BulkString(Bytes::from("hello")))
        );
        assert_eq!(decoder.decoded(), 1);
    }

    #[test]
    fn test_decode_blpop_reply() {
        let reply = decode_all(b"*2\r\n$10\r\nqueue:jobs\r\n$2\r\n{}\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(
            reply,
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from("queue:jobs")),
                RespValue::BulkString(Bytes::from("{}")),
            ])
        );
    }

    #[test]
    fn test_incomplete_array_waits_for_every_element() {
        let mut buf = BytesMut::from(&b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n"[..]);
        let mut decoder = ReplyDecoder::new();
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b":1\r\n");
        let reply = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(reply.into_array().unwrap().len(), 3);
    }

    #[test]
    fn test_pipelined_replies_decode_in_order() {
        let mut buf = BytesMut::from(&b"+OK\r\n$-1\r\n:7\r\n"[..]);
        let mut decoder = ReplyDecoder::new();
        assert!(decoder.decode(&mut buf).unwrap().unwrap().is_ok());
        assert!(decoder.decode(&mut buf).unwrap().unwrap().is_null());
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(RespValue::Integer(7))
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_unknown_prefix_is_rejected() {
        assert_eq!(
            decode_all(b"@invalid\r\n"),
            Err(ParseError::UnknownPrefix(b'@'))
        );
    }

    #[test]
    fn test_invalid_integer() {
        assert!(matches!(
            decode_all(b":not_a_number\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_bulk_missing_trailing_crlf() {
        assert!(matches!(
            decode_all(b"$3\r\nabcXY"),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_excessive_nesting_is_rejected() {
        let input = b"*1\r\n".repeat(MAX_NESTING_DEPTH + 2);
        assert!(matches!(
            decode_all(&input),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_request_encoding_decodes_back() {
        let request = crate::protocol::Command::new("GET").arg("name").to_resp();
        assert_eq!(decode_all(&request.serialize()).unwrap(), Some(request));
    }
}
