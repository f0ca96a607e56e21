//! Durable FIFO work queue backed by a list at `queue:<name>`.

use crate::codec;
use crate::error::Result;
use crate::store::Store;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn Store>,
    key: String,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("key", &self.key).finish()
    }
}

impl Queue {
    pub fn new(store: Arc<dyn Store>, name: &str) -> Self {
        Self {
            store,
            key: format!("queue:{}", name),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Appends an item to the tail. Returns the queue length after the push.
    ///
    /// The item is encoded before anything is written, so an item that
    /// cannot be serialized leaves the queue untouched.
    pub async fn enqueue<T: Serialize + ?Sized>(&self, item: &T) -> Result<u64> {
        let payload = codec::encode(item)?;
        let len = self.store.rpush(&self.key, vec![payload]).await?;
        trace!(queue = %self.key, len, "Item enqueued");
        Ok(len)
    }

    /// Removes the head item, waiting up to `timeout` for one.
    ///
    /// `Duration::ZERO` waits indefinitely. Returns `None` on timeout.
    ///
    /// # Example
    ///
    /// ```
    /// use kvkit::{MemoryStore, Queue};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> kvkit::Result<()> {
    /// let queue = Queue::new(Arc::new(MemoryStore::new()), "emails");
    /// queue.enqueue(&"welcome:42").await?;
    ///
    /// let next: Option<String> = queue.dequeue(Duration::from_secs(1)).await?;
    /// assert_eq!(next.as_deref(), Some("welcome:42"));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn dequeue<T: DeserializeOwned>(&self, timeout: Duration) -> Result<Option<T>> {
        match self.store.blpop(&self.key, timeout).await? {
            Some(payload) => Ok(Some(codec::decode(&payload)?)),
            None => {
                trace!(queue = %self.key, "Dequeue timed out");
                Ok(None)
            }
        }
    }

    /// Number of items waiting.
    pub async fn size(&self) -> Result<u64> {
        self.store.llen(&self.key).await
    }
}
