//! A single RESP connection to the store.
//!
//! ## Request Lifecycle
//!
//! ```text
//! Command ──serialize──▶ BufWriter<TcpStream> ──flush──▶ server
//!                                                          │
//! RespValue ◀──ReplyDecoder◀── BytesMut buffer ◀──read_buf─┘
//! ```
//!
//! TCP is a stream: one read may hold half a reply or several replies, so
//! bytes accumulate in the buffer until the decoder can take a whole frame.

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::protocol::{Command, ReplyDecoder, RespValue};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

pub struct Connection {
    stream: BufWriter<TcpStream>,

    /// Bytes read from the socket that are not yet decoded
    buffer: BytesMut,

    decoder: ReplyDecoder,

    /// Set while a reply is outstanding and once the connection can no longer
    /// be trusted (I/O error, timeout, protocol violation). Broken
    /// connections are never returned to the pool.
    broken: bool,

    response_timeout: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.stream.get_ref().peer_addr().ok())
            .field("buffered", &self.buffer.len())
            .field("broken", &self.broken)
            .finish()
    }
}

impl Connection {
    /// Opens a TCP connection and runs the AUTH / SELECT handshake.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let address = config.address();
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                StoreError::connection(format!(
                    "timed out connecting to {} after {:?}",
                    address, config.connect_timeout
                ))
            })?
            .map_err(|e| StoreError::connection(format!("failed to connect to {}: {}", address, e)))?;
        stream.set_nodelay(true)?;

        let mut conn = Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            decoder: ReplyDecoder::new(),
            broken: false,
            response_timeout: config.response_timeout,
        };

        if let Some(password) = &config.password {
            conn.request(Command::new("AUTH").arg(password.clone()))
                .await?
                .expect_ok("AUTH")?;
        }
        if config.db != 0 {
            conn.request(Command::new("SELECT").arg_display(config.db))
                .await?
                .expect_ok("SELECT")?;
        }

        debug!(address = %address, db = config.db, "Connection established");
        Ok(conn)
    }

    /// Returns true once the connection must be discarded.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Sends a command and waits up to the response timeout for its reply.
    ///
    /// Error replies are turned into [`StoreError::Server`].
    pub async fn request(&mut self, command: Command) -> Result<RespValue> {
        let timeout = self.response_timeout;
        self.request_within(command, Some(timeout)).await
    }

    /// Sends a command and waits up to `limit` for its reply, or forever
    /// when `limit` is `None` (BLPOP with no timeout).
    pub async fn request_within(
        &mut self,
        command: Command,
        limit: Option<Duration>,
    ) -> Result<RespValue> {
        let name = command.name();

        // Set from the first written byte until the reply is read, so a
        // future dropped halfway leaves the connection out of the pool.
        self.broken = true;
        self.send(&command).await?;

        let reply = match limit {
            Some(limit) => match tokio::time::timeout(limit, self.read_reply()).await {
                Ok(reply) => reply?,
                Err(_) => {
                    return Err(StoreError::connection(format!(
                        "{} timed out after {:?}",
                        name, limit
                    )))
                }
            },
            None => self.read_reply().await?,
        };
        self.broken = false;

        match reply {
            RespValue::Error(message) => Err(StoreError::Server(message)),
            reply => Ok(reply),
        }
    }

    pub(crate) fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Writes a command without waiting for a reply.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        let bytes = command.to_resp().serialize();
        let written = async {
            self.stream.write_all(&bytes).await?;
            self.stream.flush().await
        }
        .await;

        if let Err(e) = written {
            self.broken = true;
            return Err(e.into());
        }
        trace!(command = command.name(), bytes = bytes.len(), "Sent command");
        Ok(())
    }

    /// Reads one complete reply, failing if the server closes the connection.
    pub async fn read_reply(&mut self) -> Result<RespValue> {
        match self.read_frame().await? {
            Some(reply) => Ok(reply),
            None => {
                self.broken = true;
                Err(StoreError::connection("connection closed by server"))
            }
        }
    }

    /// Reads one complete frame.
    ///
    /// Returns `None` if the server closed the connection cleanly between
    /// frames.
    pub async fn read_frame(&mut self) -> Result<Option<RespValue>> {
        loop {
            match self.decoder.decode(&mut self.buffer) {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => {}
                Err(e) => {
                    self.broken = true;
                    return Err(e.into());
                }
            }

            let read = match self.stream.get_mut().read_buf(&mut self.buffer).await {
                Ok(n) => n,
                Err(e) => {
                    self.broken = true;
                    return Err(e.into());
                }
            };

            if read == 0 {
                self.broken = true;
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(StoreError::connection(
                    "connection closed in the middle of a reply",
                ));
            }
            trace!(bytes = read, buffered = self.buffer.len(), "Read data");
        }
    }
}

impl RespValue {
    /// Accepts only the `+OK` status reply.
    pub(crate) fn expect_ok(self, command: &str) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(StoreError::protocol(format!(
                "unexpected reply to {}: {}",
                command, self
            )))
        }
    }

    /// Accepts an integer reply.
    pub(crate) fn expect_integer(self, command: &str) -> Result<i64> {
        match self {
            RespValue::Integer(n) => Ok(n),
            other => Err(StoreError::protocol(format!(
                "expected integer reply to {}, got {}",
                command, other
            ))),
        }
    }

    /// Accepts a bulk string or null.
    pub(crate) fn expect_optional_bytes(self, command: &str) -> Result<Option<bytes::Bytes>> {
        match self {
            RespValue::Null => Ok(None),
            RespValue::BulkString(data) => Ok(Some(data)),
            other => Err(StoreError::protocol(format!(
                "expected bulk reply to {}, got {}",
                command, other
            ))),
        }
    }
}
