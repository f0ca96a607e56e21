//! Fixed-Window Rate Limiting
//!
//! Each identifier gets a counter at `<prefix>:<identifier>` that lives for
//! one window, starting with the identifier's first request.
//!
//! ```text
//! GET counter
//!   ├── absent       ──▶ SET counter 1 NX PX window ──▶ allowed
//!   │                      (lost the NX race? treat as present)
//!   ├── n <  limit   ──▶ INCR counter               ──▶ allowed
//!   └── n >= limit   ──────────────────────────────────▶ rejected
//! ```
//!
//! Windows are anchored per identifier, not aligned to the clock, so a client
//! can spend its full limit at the end of one window and again at the start
//! of the next.

use crate::error::{Result, StoreError};
use crate::store::{SetOptions, Store};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
    prefix: String,
    limit: u64,
    window: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("prefix", &self.prefix)
            .field("limit", &self.limit)
            .field("window", &self.window)
            .finish()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, prefix: &str, limit: u64, window: Duration) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// The counter key for `identifier`.
    pub fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.prefix, identifier)
    }

    /// Records a request from `identifier` and reports whether it is allowed.
    ///
    /// Rejected requests are not counted.
    ///
    /// # Example
    ///
    /// ```
    /// use kvkit::{MemoryStore, RateLimiter};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> kvkit::Result<()> {
    /// let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), "api", 2, Duration::from_secs(60));
    ///
    /// assert!(limiter.is_allowed("user_123").await?);
    /// assert!(limiter.is_allowed("user_123").await?);
    /// assert!(!limiter.is_allowed("user_123").await?);
    /// assert!(limiter.is_allowed("user_456").await?);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn is_allowed(&self, identifier: &str) -> Result<bool> {
        let key = self.key(identifier);

        let current = match self.store.get(&key).await? {
            Some(raw) => parse_count(&key, &raw)?,
            None => {
                let options = SetOptions::new().if_absent().expire_in(self.window);
                if self.store.set(&key, Bytes::from_static(b"1"), options).await? {
                    debug!(key = %key, "Rate window opened");
                    return Ok(true);
                }
                // Another request opened the window first.
                match self.store.get(&key).await? {
                    Some(raw) => parse_count(&key, &raw)?,
                    None => 0,
                }
            }
        };

        if current >= self.limit {
            debug!(key = %key, count = current, limit = self.limit, "Rate limit exceeded");
            return Ok(false);
        }

        let count = self.store.incr_by(&key, 1).await?;
        if count == 1 {
            // The window expired between GET and INCR, which recreated the
            // key without a TTL.
            self.store.expire(&key, self.window).await?;
        }
        Ok(true)
    }
}

fn parse_count(key: &str, raw: &[u8]) -> Result<u64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| StoreError::protocol(format!("rate counter {} is not an integer", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("k", b"3").unwrap(), 3);
        assert!(parse_count("k", b"three").is_err());
        assert!(parse_count("k", b"-1").is_err());
    }

    #[tokio::test]
    async fn test_boundary_and_window_reset() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), "api_calls", 3, Duration::from_millis(200));

        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(limiter.is_allowed("user_123").await.unwrap());
        }
        assert_eq!(results, vec![true, true, true, false]);
        assert_eq!(store.get_value("api_calls:user_123").unwrap(), Some(Bytes::from("3")));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(limiter.is_allowed("user_123").await.unwrap());
        assert_eq!(store.get_value("api_calls:user_123").unwrap(), Some(Bytes::from("1")));
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), "api", 1, Duration::from_secs(60));

        assert!(limiter.is_allowed("a").await.unwrap());
        assert!(!limiter.is_allowed("a").await.unwrap());
        assert!(limiter.is_allowed("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_counter_keeps_window_ttl() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), "api", 10, Duration::from_secs(60));

        limiter.is_allowed("a").await.unwrap();
        limiter.is_allowed("a").await.unwrap();

        let ttl = store.ttl("api:a").unwrap().unwrap();
        assert!(ttl > Duration::from_secs(50));
    }

    #[tokio::test]
    async fn test_recreated_counter_gets_ttl() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), "api", 10, Duration::from_secs(60));

        // A counter left without TTL, as INCR on a just-expired key would leave it.
        store.set_value("api:a", Bytes::from("0"), SetOptions::new());
        assert_eq!(store.ttl("api:a"), Some(None));

        assert!(limiter.is_allowed("a").await.unwrap());
        assert!(store.ttl("api:a").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_zero_limit_still_admits_first_request() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), "api", 0, Duration::from_secs(60));

        assert!(limiter.is_allowed("a").await.unwrap());
        assert!(!limiter.is_allowed("a").await.unwrap());
    }
}
