//! The Store Seam
//!
//! Every component talks to the key-value store through [`Store`], a small
//! async trait covering the primitives they need. Two implementations ship
//! with the crate:
//!
//! - [`ConnectionPool`](crate::pool::ConnectionPool): RESP2 over TCP
//! - [`MemoryStore`](crate::storage::MemoryStore): in-process, for tests and
//!   embedded use
//!
//! Atomic operations (NX sets, increments, compare-and-delete) must be atomic
//! in the implementation itself; callers never lock around them.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use crate::error::Result;

/// When a `set` is allowed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    /// Always write (plain SET).
    #[default]
    Always,
    /// Write only if the key does not exist (NX).
    IfAbsent,
    /// Write only if the key already exists (XX).
    IfPresent,
}

/// Options for [`Store::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    /// Expiry applied atomically with the write. `None` stores the key without TTL.
    pub expiry: Option<Duration>,
    pub condition: SetCondition,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expire_in(mut self, ttl: Duration) -> Self {
        self.expiry = Some(ttl);
        self
    }

    pub fn if_absent(mut self) -> Self {
        self.condition = SetCondition::IfAbsent;
        self
    }

    pub fn if_present(mut self) -> Self {
        self.condition = SetCondition::IfPresent;
        self
    }
}

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: Bytes,
}

/// A live channel subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next published message.
    ///
    /// Returns `None` once the subscription is closed by the store.
    async fn next_message(&mut self) -> Result<Option<Message>>;
}

/// Server metadata as reported by INFO, grouped by section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl ServerInfo {
    /// Parses the INFO text format:
    ///
    /// ```text
    /// # Server
    /// redis_version:7.2.4
    /// uptime_in_seconds:42
    /// ```
    ///
    /// Fields that appear before any section header land in `default`.
    pub fn parse(text: &str) -> Self {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current = "default".to_string();

        for line in text.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix('#') {
                current = header.trim().to_lowercase();
                sections.entry(current.clone()).or_default();
                continue;
            }
            if let Some((field, value)) = line.split_once(':') {
                sections
                    .entry(current.clone())
                    .or_default()
                    .insert(field.to_string(), value.to_string());
            }
        }

        Self { sections }
    }

    /// Looks a field up in every section.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.sections
            .values()
            .find_map(|fields| fields.get(field))
            .map(String::as_str)
    }

    /// Returns the fields of one section (section names are lower-cased).
    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(&name.to_lowercase())
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.values().all(BTreeMap::is_empty)
    }
}

/// The atomic primitives every component is built on.
///
/// A store is shared behind an `Arc<dyn Store>`; each call is one short round
/// trip except for [`Store::blpop`] and [`Subscription::next_message`], which
/// may suspend. Implementations must execute every method as a single
/// indivisible operation on the store; the lock and the rate limiter rely on it.
#[async_trait]
pub trait Store: Send + Sync {
    /// A name for logs.
    ///
    /// # Example
    /// - "resp"
    /// - "memory"
    fn name(&self) -> &'static str;

    /// Returns the value of a key, or `None` if it is missing or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Writes a value. Returns `false` when the condition prevented the write.
    async fn set(&self, key: &str, value: Bytes, options: SetOptions) -> Result<bool>;

    /// Deletes keys, returning how many existed.
    async fn delete(&self, keys: &[&str]) -> Result<u64>;

    /// Deletes `key` only if its current value equals `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Atomically adds `delta` to an integer value (missing keys count as 0)
    /// and returns the new value. An existing TTL is preserved.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Sets a relative expiry. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Sets an absolute expiry. A time in the past deletes the key.
    async fn expire_at(&self, key: &str, at: SystemTime) -> Result<bool>;

    /// Appends values to the tail of a list, returning the new length.
    async fn rpush(&self, key: &str, values: Vec<Bytes>) -> Result<u64>;

    /// Removes the head of a list, waiting up to `timeout` for one to appear.
    /// `Duration::ZERO` waits indefinitely.
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>>;

    /// Returns the length of a list (0 if missing).
    async fn llen(&self, key: &str) -> Result<u64>;

    /// Publishes a payload, returning how many subscribers received it.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<u64>;

    /// Opens a subscription. The subscription is active when this returns:
    /// messages published afterwards are delivered to it.
    async fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn Subscription>>;

    /// Liveness check.
    async fn ping(&self) -> Result<()>;

    /// Server metadata.
    async fn info(&self) -> Result<ServerInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_options_builder() {
        let options = SetOptions::new()
            .expire_in(Duration::from_secs(10))
            .if_absent();
        assert_eq!(options.expiry, Some(Duration::from_secs(10)));
        assert_eq!(options.condition, SetCondition::IfAbsent);
        assert_eq!(SetOptions::new().condition, SetCondition::Always);
    }

    #[test]
    fn test_server_info_parse() {
        let info = ServerInfo::parse(
            "# Server\r\nredis_version:7.2.4\r\nos:Linux\r\n\r\n# Keyspace\r\ndb0:keys=3,expires=1\r\n",
        );
        assert_eq!(info.get("redis_version"), Some("7.2.4"));
        assert_eq!(info.get("db0"), Some("keys=3,expires=1"));
        assert_eq!(
            info.section("Server").and_then(|s| s.get("os")).map(String::as_str),
            Some("Linux")
        );
        assert_eq!(info.section_names().collect::<Vec<_>>(), vec!["keyspace", "server"]);
    }

    #[test]
    fn test_server_info_without_sections() {
        let info = ServerInfo::parse("role:master\n");
        assert_eq!(info.get("role"), Some("master"));
        assert!(!info.is_empty());
        assert!(ServerInfo::parse("").is_empty());
    }
}
