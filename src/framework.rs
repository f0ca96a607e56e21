//! One entry point wiring every component to the same store.

use crate::cache::Cache;
use crate::config::StoreConfig;
use crate::data::DataManager;
use crate::error::Result;
use crate::health::HealthCheck;
use crate::lock::Lock;
use crate::pool::ConnectionPool;
use crate::pubsub::PubSub;
use crate::queue::Queue;
use crate::rate_limit::RateLimiter;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;

/// Shared components over one store, plus factories for the per-name ones.
///
/// # Example
///
/// ```
/// use kvkit::{Framework, MemoryStore};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> kvkit::Result<()> {
/// let kv = Framework::new(Arc::new(MemoryStore::new()));
///
/// assert!(kv.health_check.check_connection().await);
///
/// let queue = kv.create_queue("my_queue");
/// queue.enqueue(&"process_data").await?;
/// assert_eq!(queue.size().await?, 1);
///
/// let limiter = kv.create_rate_limiter("api_calls", 100, Duration::from_secs(3600));
/// assert!(limiter.is_allowed("user_123").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Framework {
    store: Arc<dyn Store>,
    pub cache: Cache,
    pub data_manager: DataManager,
    pub pubsub: PubSub,
    pub health_check: HealthCheck,
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

impl Framework {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            cache: Cache::new(Arc::clone(&store)),
            data_manager: DataManager::new(Arc::clone(&store)),
            pubsub: PubSub::new(Arc::clone(&store)),
            health_check: HealthCheck::new(Arc::clone(&store)),
            store,
        }
    }

    /// Builds a framework over the process-wide pool for `config`'s endpoint.
    pub fn connect(config: StoreConfig) -> Result<Self> {
        let pool = ConnectionPool::shared(config)?;
        Ok(Self::new(Arc::new(pool)))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn create_lock(&self, name: &str, lease: Duration) -> Lock {
        Lock::new(Arc::clone(&self.store), name, lease)
    }

    pub fn create_queue(&self, name: &str) -> Queue {
        Queue::new(Arc::clone(&self.store), name)
    }

    pub fn create_rate_limiter(&self, prefix: &str, limit: u64, window: Duration) -> RateLimiter {
        RateLimiter::new(Arc::clone(&self.store), prefix, limit, window)
    }
}
