//! RESP Protocol Implementation (client side)
//!
//! This module speaks the Redis Serialization Protocol (RESP2) from the
//! client's point of view: commands are encoded as arrays of bulk strings,
//! replies are decoded incrementally from the connection's read buffer.
//!
//! ## Modules
//!
//! - `types`: The `RespValue` enum, its serialization, and the `Command` builder
//! - `parser`: Incremental reply decoder
//!
//! ## Example
//!
//! ```
//! use kvkit::protocol::{Command, ReplyDecoder, RespValue};
//! use bytes::BytesMut;
//!
//! // Encoding a request
//! let request = Command::new("GET").arg("name").to_resp().serialize();
//! assert_eq!(request, b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n".to_vec());
//!
//! // Decoding the reply
//! let mut buffer = BytesMut::from(&b"$4\r\nAriz\r\n"[..]);
//! let reply = ReplyDecoder::new().decode(&mut buffer).unwrap().unwrap();
//! assert_eq!(reply.as_str(), Some("Ariz"));
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{ParseError, ParseResult, ReplyDecoder};
pub use types::{Command, RespValue};
