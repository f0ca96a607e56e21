//! Channel subscriptions over RESP.
//!
//! After SUBSCRIBE a connection only receives pushes, so every subscription
//! dials its own connection. It never enters the pool and does not count
//! against `max_connections`; dropping the subscription closes it.
//!
//! ```text
//! *3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n        confirmation
//! *3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$5\r\nhello\r\n  delivery
//! ```

use super::Connection;
use crate::error::{Result, StoreError};
use crate::protocol::{Command, RespValue};
use crate::store::{Message, Subscription};
use async_trait::async_trait;
use tracing::{debug, trace};

/// A subscription holding a dedicated connection.
pub struct RespSubscription {
    conn: Connection,
}

impl std::fmt::Debug for RespSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespSubscription").finish_non_exhaustive()
    }
}

impl RespSubscription {
    /// Sends SUBSCRIBE and waits for one confirmation per channel.
    pub(crate) async fn open(mut conn: Connection, channels: &[&str]) -> Result<Self> {
        if channels.is_empty() {
            return Err(StoreError::protocol("SUBSCRIBE needs at least one channel"));
        }

        let command = Command::new("SUBSCRIBE").args(channels.iter().map(|c| c.to_string()));
        conn.send(&command).await?;

        let timeout = conn.response_timeout();
        for _ in channels {
            let frame = tokio::time::timeout(timeout, conn.read_frame())
                .await
                .map_err(|_| StoreError::connection("SUBSCRIBE confirmation timed out"))??;

            match frame.map(classify) {
                Some(Push::Subscribed(channel)) => trace!(channel = %channel, "Subscription confirmed"),
                Some(Push::Error(message)) => return Err(StoreError::Server(message)),
                Some(_) => {
                    return Err(StoreError::protocol("unexpected frame before SUBSCRIBE confirmation"))
                }
                None => return Err(StoreError::connection("connection closed during SUBSCRIBE")),
            }
        }

        Ok(Self { conn })
    }
}

enum Push {
    Subscribed(String),
    Message(Message),
    Error(String),
    Other,
}

fn classify(frame: RespValue) -> Push {
    let parts = match frame {
        RespValue::Error(message) => return Push::Error(message),
        RespValue::Array(parts) => parts,
        _ => return Push::Other,
    };

    let mut parts = parts.into_iter();
    let kind = parts.next();
    let channel = parts.next().and_then(|c| c.as_str().map(str::to_string));

    match (kind.as_ref().and_then(RespValue::as_str), channel) {
        (Some("subscribe"), Some(channel)) => Push::Subscribed(channel),
        (Some("message"), Some(channel)) => match parts.next().and_then(RespValue::into_bytes) {
            Some(payload) => Push::Message(Message { channel, payload }),
            None => Push::Other,
        },
        _ => Push::Other,
    }
}

#[async_trait]
impl Subscription for RespSubscription {
    async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            let Some(frame) = self.conn.read_frame().await? else {
                debug!("Subscription connection closed");
                return Ok(None);
            };

            match classify(frame) {
                Push::Message(message) => return Ok(Some(message)),
                Push::Error(message) => return Err(StoreError::Server(message)),
                Push::Subscribed(_) | Push::Other => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn bulk(s: &'static str) -> RespValue {
        RespValue::BulkString(Bytes::from(s))
    }

    #[test]
    fn test_classify_message() {
        let frame = RespValue::Array(vec![bulk("message"), bulk("news"), bulk("hello")]);
        match classify(frame) {
            Push::Message(message) => {
                assert_eq!(message.channel, "news");
                assert_eq!(message.payload, Bytes::from("hello"));
            }
            _ => panic!("expected a message"),
        }
    }

    #[test]
    fn test_classify_confirmation_and_noise() {
        let confirm = RespValue::Array(vec![bulk("subscribe"), bulk("news"), RespValue::Integer(1)]);
        assert!(matches!(classify(confirm), Push::Subscribed(c) if c == "news"));

        let pong = RespValue::Array(vec![bulk("pong"), bulk("")]);
        assert!(matches!(classify(pong), Push::Other));

        let truncated = RespValue::Array(vec![bulk("message"), bulk("news")]);
        assert!(matches!(classify(truncated), Push::Other));

        assert!(matches!(
            classify(RespValue::Error("ERR nope".into())),
            Push::Error(_)
        ));
    }
}
