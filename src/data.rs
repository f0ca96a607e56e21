//! Plain typed records, counters and expiries.

use crate::codec;
use crate::error::Result;
use crate::store::{SetOptions, Store};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Clone)]
pub struct DataManager {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for DataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataManager")
            .field("store", &self.store.name())
            .finish()
    }
}

impl DataManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Stores a value, optionally expiring after `expire`.
    pub async fn set_data<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expire: Option<Duration>,
    ) -> Result<()> {
        let payload = codec::encode(value)?;
        let options = match expire {
            Some(ttl) => SetOptions::new().expire_in(ttl),
            None => SetOptions::new(),
        };
        self.store.set(key, payload, options).await?;
        Ok(())
    }

    /// Reads a value stored with [`set_data`](Self::set_data).
    pub async fn get_data<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(payload) => Ok(Some(codec::decode(&payload)?)),
            None => Ok(None),
        }
    }

    /// Adds `amount` to an integer counter and returns the new value.
    ///
    /// Counters are stored as decimal text, which is also valid JSON, so
    /// `get_data::<i64>` reads them back.
    pub async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.store.incr_by(key, amount).await
    }

    /// Expires `key` at an absolute time (second precision on a server).
    /// Returns `false` if the key does not exist.
    pub async fn expire_at(&self, key: &str, at: SystemTime) -> Result<bool> {
        self.store.expire_at(key, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        user_id: u32,
        name: String,
    }

    #[tokio::test]
    async fn test_set_and_get_data() {
        let data = DataManager::new(Arc::new(MemoryStore::new()));
        let user = User {
            user_id: 1,
            name: "Test User".into(),
        };

        data.set_data("user:1", &user, None).await.unwrap();
        assert_eq!(data.get_data::<User>("user:1").await.unwrap(), Some(user));
        assert_eq!(data.get_data::<User>("user:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_data_with_expiry() {
        let data = DataManager::new(Arc::new(MemoryStore::new()));

        data.set_data("temp", &"soon gone", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(data.get_data::<String>("temp").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(data.get_data::<String>("temp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_reads_back_as_json() {
        let data = DataManager::new(Arc::new(MemoryStore::new()));

        assert_eq!(data.increment("visits", 5).await.unwrap(), 5);
        assert_eq!(data.increment("visits", -2).await.unwrap(), 3);
        assert_eq!(data.get_data::<i64>("visits").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_expire_at() {
        let store = Arc::new(MemoryStore::new());
        let data = DataManager::new(store.clone());
        data.set_data("report", &1, None).await.unwrap();

        let later = SystemTime::now() + Duration::from_secs(3600);
        assert!(data.expire_at("report", later).await.unwrap());
        assert!(store.ttl("report").unwrap().is_some());

        assert!(!data.expire_at("missing", later).await.unwrap());
    }
}
