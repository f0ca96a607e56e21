//! Publish / Subscribe Messaging
//!
//! Messages are fire-and-forget: a publish reaches only subscriptions that are
//! open at that moment, nothing is stored for later subscribers.
//!
//! Two ways to consume:
//!
//! ```text
//! subscribe(channel, callback)   background task ──▶ callback(msg) per message
//!                                 stopped by dropping the SubscriptionHandle
//!
//! start_listening(channels)      Listener::next().await ──▶ one message at a time
//! ```
//!
//! A payload that does not decode into the expected type is logged and
//! skipped; it never ends the subscription.

use crate::codec;
use crate::error::Result;
use crate::store::{Message, Store, Subscription};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct PubSub {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for PubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSub")
            .field("store", &self.store.name())
            .finish()
    }
}

impl PubSub {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Publishes a message. Returns how many subscribers received it; zero
    /// is not an error.
    pub async fn publish<T: Serialize + ?Sized>(&self, channel: &str, message: &T) -> Result<u64> {
        let payload = codec::encode(message)?;
        let receivers = self.store.publish(channel, payload).await?;
        debug!(channel, receivers, "Message published");
        Ok(receivers)
    }

    /// Calls `callback` for every message published on `channel` from now on.
    ///
    /// The subscription is confirmed by the store before this returns, so a
    /// message published after it is delivered.
    ///
    /// # Example
    ///
    /// ```
    /// use kvkit::{MemoryStore, PubSub};
    /// use std::sync::Arc;
    /// use tokio::sync::mpsc;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> kvkit::Result<()> {
    /// let pubsub = PubSub::new(Arc::new(MemoryStore::new()));
    /// let (tx, mut rx) = mpsc::unbounded_channel();
    ///
    /// let _handle = pubsub
    ///     .subscribe("updates", move |event: String| {
    ///         let _ = tx.send(event);
    ///     })
    ///     .await?;
    ///
    /// pubsub.publish("updates", "rebuilt").await?;
    /// assert_eq!(rx.recv().await.as_deref(), Some("rebuilt"));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn subscribe<T, F>(&self, channel: &str, mut callback: F) -> Result<SubscriptionHandle>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let mut subscription = self.store.subscribe(&[channel]).await?;
        let name = channel.to_string();

        let task = tokio::spawn(async move {
            loop {
                match subscription.next_message().await {
                    Ok(Some(message)) => {
                        if let Some(decoded) = decode_or_skip::<T>(&message) {
                            callback(decoded);
                        }
                    }
                    Ok(None) => {
                        debug!(channel = %name, "Subscription closed by store");
                        break;
                    }
                    Err(e) => {
                        warn!(channel = %name, error = %e, "Subscription failed");
                        break;
                    }
                }
            }
        });

        debug!(channel, "Callback subscription started");
        Ok(SubscriptionHandle {
            channel: channel.to_string(),
            task,
        })
    }

    /// Opens a subscription to `channels` and returns a pull-based listener.
    pub async fn start_listening<T: DeserializeOwned>(&self, channels: &[&str]) -> Result<Listener<T>> {
        let subscription = self.store.subscribe(channels).await?;
        Ok(Listener {
            subscription,
            _marker: PhantomData,
        })
    }
}

fn decode_or_skip<T: DeserializeOwned>(message: &Message) -> Option<T> {
    match codec::decode(&message.payload) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(
                channel = %message.channel,
                bytes = message.payload.len(),
                error = %e,
                "Skipping malformed message"
            );
            None
        }
    }
}

/// Pull-based reader over a subscription.
pub struct Listener<T> {
    subscription: Box<dyn Subscription>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener").finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> Listener<T> {
    /// Waits for the next message that decodes as `T`.
    ///
    /// Returns `None` once the subscription is closed.
    pub async fn next(&mut self) -> Result<Option<T>> {
        Ok(self.next_with_channel().await?.map(|(_, decoded)| decoded))
    }

    /// Like [`next`](Self::next), also returning the channel it arrived on.
    pub async fn next_with_channel(&mut self) -> Result<Option<(String, T)>> {
        loop {
            let Some(message) = self.subscription.next_message().await? else {
                return Ok(None);
            };
            if let Some(decoded) = decode_or_skip(&message) {
                return Ok(Some((message.channel, decoded)));
            }
        }
    }
}

/// Keeps a callback subscription alive. Dropping it stops delivery.
#[derive(Debug)]
pub struct SubscriptionHandle {
    channel: String,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// False once the subscription ended, by unsubscribe or by the store.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops delivery.
    pub fn unsubscribe(self) {
        debug!(channel = %self.channel, "Unsubscribed");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde::Deserialize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Event {
        event: String,
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let pubsub = PubSub::new(Arc::new(MemoryStore::new()));
        assert_eq!(pubsub.publish("empty", &1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_callback_receives_messages() {
        let pubsub = PubSub::new(Arc::new(MemoryStore::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = pubsub
            .subscribe("events", move |event: Event| {
                let _ = tx.send(event);
            })
            .await
            .unwrap();
        assert_eq!(handle.channel(), "events");
        assert!(handle.is_active());

        let receivers = pubsub
            .publish("events", &Event { event: "update".into() })
            .await
            .unwrap();
        assert_eq!(receivers, 1);

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event, "update");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let store = Arc::new(MemoryStore::new());
        let pubsub = PubSub::new(store.clone());
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();

        let handle = pubsub
            .subscribe("numbers", move |n: u32| {
                let _ = tx.send(n);
            })
            .await
            .unwrap();
        handle.unsubscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(pubsub.publish("numbers", &1).await.unwrap(), 0);
        // The aborted task dropped the callback and with it the sender.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_listener_skips_malformed_payloads() {
        let store = Arc::new(MemoryStore::new());
        let pubsub = PubSub::new(store.clone());
        let mut listener: Listener<Event> = pubsub.start_listening(&["events"]).await.unwrap();

        store.publish_message("events", bytes::Bytes::from_static(b"\xff not json"));
        pubsub.publish("events", &42).await.unwrap();
        pubsub
            .publish("events", &Event { event: "ok".into() })
            .await
            .unwrap();

        let (channel, event) = listener.next_with_channel().await.unwrap().unwrap();
        assert_eq!(channel, "events");
        assert_eq!(event.event, "ok");
    }
}
