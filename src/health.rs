//! Store liveness and metadata.

use crate::error::Result;
use crate::store::{ServerInfo, Store};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct HealthCheck {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheck")
            .field("store", &self.store.name())
            .finish()
    }
}

impl HealthCheck {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// PINGs the store. Any failure counts as unhealthy.
    pub async fn check_connection(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(store = self.store.name(), error = %e, "Health check failed");
                false
            }
        }
    }

    /// Server metadata from INFO. Errors are returned, not swallowed.
    pub async fn get_info(&self) -> Result<ServerInfo> {
        self.store.info().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_memory_store_is_healthy() {
        let health = HealthCheck::new(Arc::new(MemoryStore::new()));

        assert!(health.check_connection().await);
        let info = health.get_info().await.unwrap();
        assert_eq!(info.get("mode"), Some("embedded"));
        assert!(info.section("keyspace").is_some());
    }
}
