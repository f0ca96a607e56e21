//! In-Memory Store with Expiry Support
//!
//! `MemoryStore` implements every primitive of the [`Store`] trait inside the
//! process. It backs the test suites of all components and the demo binary's
//! embedded mode, and it follows the same atomicity rules a real server does:
//! each primitive runs under a single shard write lock.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Keys are spread over 64 shards to reduce contention.
//! 2. **Lazy Expiry**: Keys are checked for expiry on access, plus background cleanup.
//! 3. **Separate List Storage**: Lists live beside strings; a key holds one or the other.
//! 4. **Parked Pops**: `blpop` parks on a `Notify` that every push signals.
//! 5. **Channel Fan-out**: Each subscription owns an unbounded mpsc receiver;
//!    publishing clones the payload into every live sender.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MemoryStore                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ strings │ │ strings │ │ strings │ │ strings │           │
//! │  │ lists   │ │ lists   │ │ lists   │ │ lists   │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! │  channels: name -> [mpsc::UnboundedSender<Message>]         │
//! │  list_pushed: Notify                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{Result, StoreError};
use crate::store::{Message, ServerInfo, SetCondition, SetOptions, Store, Subscription};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{mpsc, Notify};
use tracing::trace;

/// Number of shards for the store.
const NUM_SHARDS: usize = 64;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// The instant `ttl` from now, or `None` when that lies beyond what
/// `Instant` can represent (treated as no expiry).
fn deadline_after(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

type ChannelRegistry = HashMap<String, Vec<mpsc::UnboundedSender<Message>>>;

/// Drops senders whose subscription is gone, and channels left empty.
fn prune_closed(registry: &mut ChannelRegistry) {
    registry.retain(|_, senders| {
        senders.retain(|sender| !sender.is_closed());
        !senders.is_empty()
    });
}

/// A stored string value with optional expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.and_then(deadline_after),
        }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

/// A stored list with optional expiry time.
#[derive(Debug, Clone, Default)]
struct ListEntry {
    data: VecDeque<Bytes>,
    expires_at: Option<Instant>,
}

impl ListEntry {
    #[inline]
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct ShardData {
    strings: HashMap<String, Entry>,
    lists: HashMap<String, ListEntry>,
}

impl ShardData {
    /// Drops `key` from both maps if it has expired. Returns how many entries went away.
    fn purge_if_expired(&mut self, key: &str) -> u64 {
        let mut purged = 0;
        if self.strings.get(key).is_some_and(Entry::is_expired) {
            self.strings.remove(key);
            purged += 1;
        }
        if self.lists.get(key).is_some_and(ListEntry::is_expired) {
            self.lists.remove(key);
            purged += 1;
        }
        purged
    }
}

/// Store statistics, reported through INFO.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageStats {
    /// Number of live string and list keys
    pub keys: u64,
    /// Total commands served
    pub commands: u64,
    /// Total expired keys removed (lazily or by the sweeper)
    pub expired: u64,
    /// Total messages delivered to subscribers
    pub messages_delivered: u64,
}

/// The in-process implementation of [`Store`].
///
/// Wrap it in an `Arc` and hand it to components as `Arc<dyn Store>`.
///
/// # Example
///
/// ```
/// use kvkit::storage::MemoryStore;
/// use kvkit::SetOptions;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let store = MemoryStore::new();
///
/// assert!(store.set_value("lock:report", Bytes::from("token-a"),
///     SetOptions::new().if_absent().expire_in(Duration::from_secs(10))));
/// // A second NX write loses.
/// assert!(!store.set_value("lock:report", Bytes::from("token-b"),
///     SetOptions::new().if_absent()));
///
/// assert!(!store.delete_value_if_equals("lock:report", b"token-b"));
/// assert!(store.delete_value_if_equals("lock:report", b"token-a"));
/// ```
pub struct MemoryStore {
    shards: Vec<RwLock<ShardData>>,

    /// Subscribers per channel
    channels: RwLock<ChannelRegistry>,

    /// Signalled on every list push so parked pops can retry
    list_pushed: Notify,

    started_at: Instant,
    command_count: AtomicU64,
    expired_count: AtomicU64,
    delivered_count: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("shards", &self.shards.len())
            .field("keys", &self.len())
            .field("commands", &self.command_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS)
                .map(|_| RwLock::new(ShardData::default()))
                .collect(),
            channels: RwLock::new(HashMap::new()),
            list_pushed: Notify::new(),
            started_at: Instant::now(),
            command_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
            delivered_count: AtomicU64::new(0),
        }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard(&self, key: &str) -> &RwLock<ShardData> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Locks the shard for writing with `key` already purged if expired.
    fn write_shard(&self, key: &str) -> parking_lot::RwLockWriteGuard<'_, ShardData> {
        self.command_count.fetch_add(1, Ordering::Relaxed);
        let mut shard = self.shard(key).write();
        let purged = shard.purge_if_expired(key);
        if purged > 0 {
            self.expired_count.fetch_add(purged, Ordering::Relaxed);
        }
        shard
    }

    // ========================================================================
    // STRING OPERATIONS
    // ========================================================================

    /// Writes a string value. Returns `false` if the condition prevented the write.
    ///
    /// Overwriting replaces any previous value and TTL, including a list.
    pub fn set_value(&self, key: &str, value: Bytes, options: SetOptions) -> bool {
        let mut shard = self.write_shard(key);
        let exists = shard.strings.contains_key(key) || shard.lists.contains_key(key);

        match options.condition {
            SetCondition::IfAbsent if exists => return false,
            SetCondition::IfPresent if !exists => return false,
            _ => {}
        }

        shard.lists.remove(key);
        shard
            .strings
            .insert(key.to_string(), Entry::new(value, options.expiry));
        true
    }

    /// Gets a string value, or `None` if missing or expired.
    pub fn get_value(&self, key: &str) -> Result<Option<Bytes>> {
        self.command_count.fetch_add(1, Ordering::Relaxed);

        // Fast path: read lock for live keys
        {
            let shard = self.shard(key).read();
            match shard.strings.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None if shard.lists.get(key).is_some_and(|l| !l.is_expired()) => {
                    return Err(StoreError::Server(WRONGTYPE.to_string()))
                }
                None => return Ok(None),
            }
        }

        // Expired: take the write lock to remove it
        let shard = self.write_shard(key);
        Ok(shard.strings.get(key).map(|entry| entry.value.clone()))
    }

    /// Deletes keys of any type. Returns how many existed.
    pub fn delete_values(&self, keys: &[&str]) -> u64 {
        keys.iter()
            .filter(|key| {
                let mut shard = self.write_shard(key);
                let string = shard.strings.remove(**key).is_some();
                let list = shard.lists.remove(**key).is_some();
                string || list
            })
            .count() as u64
    }

    /// Deletes `key` only if it holds exactly `expected`.
    pub fn delete_value_if_equals(&self, key: &str, expected: &[u8]) -> bool {
        let mut shard = self.write_shard(key);
        match shard.strings.get(key) {
            Some(entry) if entry.value.as_ref() == expected => {
                shard.strings.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Adds `delta` to an integer value, creating it at 0 first if missing.
    /// The TTL of an existing key is preserved.
    pub fn incr_value_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut shard = self.write_shard(key);
        if shard.lists.contains_key(key) {
            return Err(StoreError::Server(WRONGTYPE.to_string()));
        }

        let (current, expires_at) = match shard.strings.get(key) {
            Some(entry) => {
                let current = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| {
                        StoreError::Server("ERR value is not an integer or out of range".to_string())
                    })?;
                (current, entry.expires_at)
            }
            None => (0, None),
        };

        let updated = current.checked_add(delta).ok_or_else(|| {
            StoreError::Server("ERR increment or decrement would overflow".to_string())
        })?;

        shard.strings.insert(
            key.to_string(),
            Entry {
                value: Bytes::from(updated.to_string()),
                expires_at,
            },
        );
        Ok(updated)
    }

    /// Sets a relative expiry on a key of any type.
    pub fn expire_value(&self, key: &str, ttl: Duration) -> bool {
        let deadline = deadline_after(ttl);
        let mut shard = self.write_shard(key);
        if let Some(entry) = shard.strings.get_mut(key) {
            entry.expires_at = deadline;
            return true;
        }
        if let Some(list) = shard.lists.get_mut(key) {
            list.expires_at = deadline;
            return true;
        }
        false
    }

    /// Sets an absolute expiry. A deadline in the past deletes the key.
    pub fn expire_value_at(&self, key: &str, at: SystemTime) -> bool {
        match at.duration_since(SystemTime::now()) {
            Ok(remaining) => self.expire_value(key, remaining),
            Err(_) => self.delete_values(&[key]) > 0,
        }
    }

    /// Remaining time to live, `Some(None)` for a key without expiry,
    /// `None` for a missing key.
    pub fn ttl(&self, key: &str) -> Option<Option<Duration>> {
        let shard = self.write_shard(key);
        let expires_at = match (shard.strings.get(key), shard.lists.get(key)) {
            (Some(entry), _) => entry.expires_at,
            (None, Some(list)) => list.expires_at,
            (None, None) => return None,
        };
        Some(expires_at.map(|exp| exp.saturating_duration_since(Instant::now())))
    }

    // ========================================================================
    // LIST OPERATIONS
    // ========================================================================

    /// Appends values to the tail of a list, creating it if needed.
    pub fn rpush_values(&self, key: &str, values: Vec<Bytes>) -> Result<u64> {
        let len = {
            let mut shard = self.write_shard(key);
            if shard.strings.contains_key(key) {
                return Err(StoreError::Server(WRONGTYPE.to_string()));
            }
            let list = shard.lists.entry(key.to_string()).or_default();
            list.data.extend(values);
            list.data.len() as u64
        };

        self.list_pushed.notify_waiters();
        Ok(len)
    }

    /// Removes and returns the head of a list.
    pub fn lpop_value(&self, key: &str) -> Result<Option<Bytes>> {
        let mut shard = self.write_shard(key);
        if shard.strings.contains_key(key) {
            return Err(StoreError::Server(WRONGTYPE.to_string()));
        }
        let Some(list) = shard.lists.get_mut(key) else {
            return Ok(None);
        };
        let value = list.data.pop_front();

        // Remove the key if the list is now empty
        if list.data.is_empty() {
            shard.lists.remove(key);
        }
        Ok(value)
    }

    /// Waits for the head of a list. `Duration::ZERO` waits forever.
    pub async fn blpop_value(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>> {
        // Zero, or a timeout too large to represent, waits forever.
        let deadline = (!timeout.is_zero())
            .then(|| tokio::time::Instant::now().checked_add(timeout))
            .flatten();

        loop {
            // Register interest before checking, so a push between the
            // check and the await still wakes us.
            let pushed = self.list_pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            if let Some(value) = self.lpop_value(key)? {
                return Ok(Some(value));
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                        trace!(key, "blocking pop timed out");
                        return Ok(None);
                    }
                }
                None => pushed.await,
            }
        }
    }

    /// Length of a list, 0 if missing.
    pub fn llen_value(&self, key: &str) -> Result<u64> {
        let shard = self.write_shard(key);
        if shard.strings.contains_key(key) {
            return Err(StoreError::Server(WRONGTYPE.to_string()));
        }
        Ok(shard.lists.get(key).map_or(0, |list| list.data.len() as u64))
    }

    // ========================================================================
    // PUB/SUB
    // ========================================================================

    /// Delivers a payload to every live subscriber of `channel`.
    pub fn publish_message(&self, channel: &str, payload: Bytes) -> u64 {
        self.command_count.fetch_add(1, Ordering::Relaxed);

        let mut channels = self.channels.write();
        let Some(senders) = channels.get_mut(channel) else {
            return 0;
        };

        let message = Message {
            channel: channel.to_string(),
            payload,
        };
        // Senders whose receiver was dropped are pruned here.
        senders.retain(|sender| sender.send(message.clone()).is_ok());
        let delivered = senders.len() as u64;
        if senders.is_empty() {
            channels.remove(channel);
        }

        self.delivered_count.fetch_add(delivered, Ordering::Relaxed);
        delivered
    }

    /// Registers a new subscription on every channel in `channels`.
    ///
    /// A channel named twice is registered once, so each message arrives
    /// once per subscription.
    pub fn subscribe_channels(&self, channels: &[&str]) -> MemorySubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.channels.write();
        prune_closed(&mut registry);

        let unique: HashSet<&str> = channels.iter().copied().collect();
        for channel in unique {
            registry
                .entry(channel.to_string())
                .or_default()
                .push(tx.clone());
        }
        MemorySubscription { receiver: rx }
    }

    /// Number of live subscriptions on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let mut registry = self.channels.write();
        prune_closed(&mut registry);
        registry.get(channel).map_or(0, Vec::len)
    }

    /// Number of channels with at least one live subscription.
    pub fn channel_count(&self) -> usize {
        let mut registry = self.channels.write();
        prune_closed(&mut registry);
        registry.len()
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Returns the number of live-or-not-yet-swept keys.
    pub fn len(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| {
                let shard = shard.read();
                (shard.strings.len() + shard.lists.len()) as u64
            })
            .sum()
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every key and subscription.
    pub fn flush(&self) {
        for shard in &self.shards {
            let mut shard = shard.write();
            shard.strings.clear();
            shard.lists.clear();
        }
        self.channels.write().clear();
    }

    /// Removes expired keys from all shards.
    ///
    /// This is called by the background expiry sweeper. Returns the number
    /// of keys removed.
    pub fn cleanup_expired(&self) -> u64 {
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut shard = shard.write();
            let before = shard.strings.len() + shard.lists.len();
            shard.strings.retain(|_, entry| !entry.is_expired());
            shard.lists.retain(|_, list| !list.is_expired());
            cleaned += (before - shard.strings.len() - shard.lists.len()) as u64;
        }

        if cleaned > 0 {
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }
        cleaned
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len(),
            commands: self.command_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
            messages_delivered: self.delivered_count.load(Ordering::Relaxed),
        }
    }

    /// Renders INFO text in the same layout a Redis server uses.
    pub fn info_text(&self) -> String {
        let stats = self.stats();
        let channels = self.channel_count();
        format!(
            "# Server\r\n\
             kvkit_version:{}\r\n\
             mode:embedded\r\n\
             uptime_in_seconds:{}\r\n\
             \r\n\
             # Stats\r\n\
             total_commands_processed:{}\r\n\
             expired_keys:{}\r\n\
             pubsub_messages_delivered:{}\r\n\
             pubsub_channels:{}\r\n\
             \r\n\
             # Keyspace\r\n\
             db0:keys={}\r\n",
            crate::VERSION,
            self.started_at.elapsed().as_secs(),
            stats.commands,
            stats.expired,
            stats.messages_delivered,
            channels,
            stats.keys,
        )
    }
}

/// Subscription handed out by [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySubscription {
    receiver: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<Option<Message>> {
        Ok(self.receiver.recv().await)
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.get_value(key)
    }

    async fn set(&self, key: &str, value: Bytes, options: SetOptions) -> Result<bool> {
        Ok(self.set_value(key, value, options))
    }

    async fn delete(&self, keys: &[&str]) -> Result<u64> {
        Ok(self.delete_values(keys))
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        Ok(self.delete_value_if_equals(key, expected))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.incr_value_by(key, delta)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(self.expire_value(key, ttl))
    }

    async fn expire_at(&self, key: &str, at: SystemTime) -> Result<bool> {
        Ok(self.expire_value_at(key, at))
    }

    async fn rpush(&self, key: &str, values: Vec<Bytes>) -> Result<u64> {
        self.rpush_values(key, values)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>> {
        self.blpop_value(key, timeout).await
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        self.llen_value(key)
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<u64> {
        Ok(self.publish_message(channel, payload))
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(self.subscribe_channels(channels)))
    }

    async fn ping(&self) -> Result<()> {
        self.command_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn info(&self) -> Result<ServerInfo> {
        Ok(ServerInfo::parse(&self.info_text()))
    }
}
