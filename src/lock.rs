//! Distributed Mutual Exclusion
//!
//! A lock is a key `lock:<name>` holding a random token, written with
//! "set if absent" and a lease. Only the holder of the token may delete it.
//!
//! ## Acquire / Release
//!
//! ```text
//! acquire:  SET lock:<name> <token> NX PX <lease>   ──▶ OK   => held
//!                                                   ──▶ nil  => retry / give up
//!
//! release:  delete lock:<name> if value == <token>  ──▶ 1    => released
//!                                                   ──▶ 0    => lease expired and
//!                                                              someone else owns it
//! ```
//!
//! The lease bounds how long a crashed holder can block others. If the
//! critical section outlives the lease a second holder may enter; release
//! stays safe because it compares the token.

use crate::error::Result;
use crate::store::{SetOptions, Store};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default lease for a lock.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(10);

/// Default pause between attempts of a blocking acquire.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A named lock. Each successful acquire gets its own token.
#[derive(Clone)]
pub struct Lock {
    store: Arc<dyn Store>,
    key: String,
    lease: Duration,
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.key)
            .field("lease", &self.lease)
            .finish()
    }
}

impl Lock {
    pub fn new(store: Arc<dyn Store>, name: &str, lease: Duration) -> Self {
        Self {
            store,
            key: format!("lock:{}", name),
            lease,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// One attempt; `None` if somebody else holds the lock.
    pub async fn try_acquire(&self) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4().simple().to_string();
        let options = SetOptions::new().if_absent().expire_in(self.lease);

        let acquired = self
            .store
            .set(&self.key, Bytes::from(token.clone()), options)
            .await?;
        if !acquired {
            return Ok(None);
        }

        debug!(key = %self.key, lease_ms = self.lease.as_millis() as u64, "Lock acquired");
        Ok(Some(LockGuard {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            token,
            released: false,
        }))
    }

    /// Acquires the lock.
    ///
    /// With `blocking` set this retries every `retry_delay` until it
    /// succeeds, with no upper bound. Use [`acquire_timeout`](Self::acquire_timeout)
    /// or wrap the future in `tokio::time::timeout` to bound the wait.
    pub async fn acquire(&self, blocking: bool, retry_delay: Duration) -> Result<Option<LockGuard>> {
        loop {
            if let Some(guard) = self.try_acquire().await? {
                return Ok(Some(guard));
            }
            if !blocking {
                return Ok(None);
            }
            tokio::time::sleep(retry_delay).await;
        }
    }

    /// Retries until acquired or until `wait` has passed.
    pub async fn acquire_timeout(
        &self,
        wait: Duration,
        retry_delay: Duration,
    ) -> Result<Option<LockGuard>> {
        // A wait too large to represent is no bound at all.
        let Some(deadline) = Instant::now().checked_add(wait) else {
            return self.acquire(true, retry_delay).await;
        };
        loop {
            if let Some(guard) = self.try_acquire().await? {
                return Ok(Some(guard));
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(key = %self.key, "Lock wait timed out");
                return Ok(None);
            }
            tokio::time::sleep(retry_delay.min(deadline - now)).await;
        }
    }

    /// Runs `f` while holding the lock and releases it afterwards.
    ///
    /// Returns `None` without running `f` when `blocking` is false and the
    /// lock is taken. If `f` panics or the future is dropped, the guard's
    /// drop schedules the release.
    ///
    /// # Example
    ///
    /// ```
    /// use kvkit::{Lock, MemoryStore};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> kvkit::Result<()> {
    /// let lock = Lock::new(Arc::new(MemoryStore::new()), "report", Duration::from_secs(10));
    ///
    /// let total = lock
    ///     .scoped(true, Duration::from_millis(50), || async { 40 + 2 })
    ///     .await?;
    /// assert_eq!(total, Some(42));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn scoped<F, Fut, T>(
        &self,
        blocking: bool,
        retry_delay: Duration,
        f: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(guard) = self.acquire(blocking, retry_delay).await? else {
            return Ok(None);
        };

        let output = f().await;
        guard.release().await?;
        Ok(Some(output))
    }
}

/// Proof of holding a lock.
///
/// Release it explicitly with [`release`](Self::release). A guard dropped
/// without release spawns the release on the current Tokio runtime.
pub struct LockGuard {
    store: Arc<dyn Store>,
    key: String,
    token: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Deletes the lock if it still holds this guard's token.
    ///
    /// Returns `false` when the lease had already expired and the key was
    /// gone or re-acquired by someone else.
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        let released = self
            .store
            .delete_if_equals(&self.key, self.token.as_bytes())
            .await?;

        if released {
            debug!(key = %self.key, "Lock released");
        } else {
            debug!(key = %self.key, "Lock no longer held, release skipped");
        }
        Ok(released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            warn!(key = %self.key, "Lock guard dropped outside a runtime; lease will expire");
            return;
        };

        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            match store.delete_if_equals(&key, token.as_bytes()).await {
                Ok(released) => debug!(key = %key, released, "Dropped lock guard released"),
                Err(e) => warn!(key = %key, error = %e, "Failed to release dropped lock guard"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn lock(store: &Arc<MemoryStore>, lease: Duration) -> Lock {
        Lock::new(store.clone(), "job", lease)
    }

    #[tokio::test]
    async fn test_try_acquire_excludes_second_holder() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock(&store, DEFAULT_LEASE);

        let guard = lock.try_acquire().await.unwrap().unwrap();
        assert_eq!(guard.key(), "lock:job");
        assert_eq!(
            store.get_value("lock:job").unwrap().as_deref(),
            Some(guard.token().as_bytes())
        );
        assert!(lock.try_acquire().await.unwrap().is_none());

        assert!(guard.release().await.unwrap());
        assert!(lock.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock(&store, DEFAULT_LEASE);

        let first = lock.try_acquire().await.unwrap().unwrap();
        let first_token = first.token().to_string();
        first.release().await.unwrap();

        let second = lock.try_acquire().await.unwrap().unwrap();
        assert_ne!(first_token, second.token());
    }

    #[tokio::test]
    async fn test_non_blocking_acquire_returns_none() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock(&store, DEFAULT_LEASE);

        let _held = lock.try_acquire().await.unwrap().unwrap();
        let started = Instant::now();
        assert!(lock.acquire(false, DEFAULT_RETRY_DELAY).await.unwrap().is_none());
        assert!(started.elapsed() < DEFAULT_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_blocking_acquire_waits_for_lease_expiry() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock(&store, Duration::from_millis(100));

        let _abandoned = lock.try_acquire().await.unwrap().unwrap();
        let started = Instant::now();
        let guard = lock
            .acquire(true, Duration::from_millis(10))
            .await
            .unwrap();

        assert!(guard.is_some());
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_acquire_timeout_gives_up() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock(&store, DEFAULT_LEASE);

        let _held = lock.try_acquire().await.unwrap().unwrap();
        let started = Instant::now();
        let guard = lock
            .acquire_timeout(Duration::from_millis(100), Duration::from_millis(20))
            .await
            .unwrap();

        assert!(guard.is_none());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(100) && waited < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unbounded_wait_and_lease() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock(&store, Duration::MAX);

        let guard = lock
            .acquire_timeout(Duration::MAX, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.ttl("lock:job"), Some(None));
        assert!(guard.release().await.unwrap());
    }

    #[tokio::test]
    async fn test_scoped_releases_after_body() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock(&store, DEFAULT_LEASE);

        let seen = lock
            .scoped(false, DEFAULT_RETRY_DELAY, || async {
                store.get_value("lock:job").unwrap().is_some()
            })
            .await
            .unwrap();

        assert_eq!(seen, Some(true));
        assert!(store.get_value("lock:job").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scoped_skips_body_when_taken() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock(&store, DEFAULT_LEASE);
        let _held = lock.try_acquire().await.unwrap().unwrap();

        let ran = lock
            .scoped(false, DEFAULT_RETRY_DELAY, || async { true })
            .await
            .unwrap();
        assert_eq!(ran, None);
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_in_background() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock(&store, DEFAULT_LEASE);

        drop(lock.try_acquire().await.unwrap().unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(store.get_value("lock:job").unwrap().is_none());
    }
}
