//! RESP (Redis Serialization Protocol) Data Types
//!
//! Requests are always arrays of bulk strings; replies can be any RESP2 type.
//!
//! ## Protocol Format
//!
//! Each RESP type starts with a type prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Array
//!
//! All types are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Request: `*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n`
//! Status reply: `+OK\r\n`
//! Null reply (missing key, BLPOP timeout): `$-1\r\n` or `*-1\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single RESP value, either a request being sent or a reply being read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status line such as `OK` or `PONG`.
    SimpleString(String),

    /// Error reply, e.g. `WRONGTYPE Operation against a key holding the wrong kind of value`.
    Error(String),

    /// 64-bit signed integer.
    Integer(i64),

    /// Binary-safe string.
    BulkString(Bytes),

    /// Null bulk string or null array.
    Null,

    /// Array of values; pub/sub pushes arrive as arrays too.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Serializes the value to its wire representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    /// Returns true if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Returns true if this value is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Returns true for the `+OK` status reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::SimpleString(s) if s == "OK")
    }

    /// Attempts to extract the inner string from SimpleString or BulkString.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Attempts to extract the inner integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Consumes self and returns the payload of a BulkString.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Consumes self and returns the inner array if this is an Array variant.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

fn write_line(buf: &mut Vec<u8>, prefix: u8, content: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(content);
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Builder for a request: the command name followed by its arguments,
/// each sent as a bulk string.
///
/// # Example
///
/// ```
/// use kvkit::protocol::Command;
///
/// let set = Command::new("SET").arg("name").arg("Ariz").arg("NX");
/// assert_eq!(set.name(), "SET");
/// assert_eq!(
///     set.to_resp().serialize(),
///     b"*4\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n$2\r\nNX\r\n".to_vec()
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends an argument rendered with `Display` (numbers, durations in text form).
    pub fn arg_display(self, arg: impl fmt::Display) -> Self {
        self.arg(arg.to_string())
    }

    /// Appends every argument of an iterator.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Converts the command into the RESP array sent on the wire.
    pub fn to_resp(&self) -> RespValue {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(RespValue::BulkString(Bytes::from_static(self.name.as_bytes())));
        parts.extend(self.args.iter().cloned().map(RespValue::BulkString));
        RespValue::Array(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_string_serialize() {
        let value = RespValue::SimpleString("OK".to_string());
        assert_eq!(value.serialize(), b"+OK\r\n");
        assert!(value.is_ok());
    }

    #[test]
    fn test_error_serialize() {
        let value = RespValue::Error("ERR unknown command".to_string());
        assert_eq!(value.serialize(), b"-ERR unknown command\r\n");
        assert!(value.is_error());
    }

    #[test]
    fn test_null_serialize() {
        assert_eq!(RespValue::Null.serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_nested_array_serialize() {
        let value = RespValue::Array(vec![
            RespValue::Integer(1),
            RespValue::Array(vec![RespValue::Integer(2), RespValue::Integer(-3)]),
        ]);
        assert_eq!(value.serialize(), b"*2\r\n:1\r\n*2\r\n:2\r\n:-3\r\n");
    }

    #[test]
    fn test_command_encodes_binary_arguments() {
        let cmd = Command::new("RPUSH")
            .arg("queue:jobs")
            .arg(Bytes::from_static(b"\x00\xffraw"));
        assert_eq!(
            cmd.to_resp().serialize(),
            b"*3\r\n$5\r\nRPUSH\r\n$10\r\nqueue:jobs\r\n$5\r\n\x00\xffraw\r\n".to_vec()
        );
    }

    #[test]
    fn test_command_display_arguments() {
        let cmd = Command::new("BLPOP").arg("queue:jobs").arg_display(1.5);
        let parts = cmd.to_resp().into_array().unwrap();
        assert_eq!(parts[2].as_str(), Some("1.5"));
    }

    #[test]
    fn test_display_array() {
        let value = RespValue::Array(vec![
            RespValue::BulkString(Bytes::from("message")),
            RespValue::Null,
        ]);
        assert_eq!(value.to_string(), "[\"message\", (nil)]");
    }
}
