//! Background Expiry Sweeper
//!
//! `MemoryStore` expires keys lazily when they are touched. Keys that are
//! written once and never read again (rate-limit windows of clients that went
//! away, abandoned cache entries) would otherwise sit in memory until the
//! process exits, so a long-lived embedded store runs this sweeper beside it.
//!
//! The sweeper holds only a `Weak` reference: it stops by itself once the
//! last `Arc<MemoryStore>` is gone, or when its handle is dropped.
//!
//! ## Adaptive Frequency
//!
//! ```text
//!   expired / scanned > speedup_threshold   ->  interval / 2  (>= min)
//!   nothing expired                         ->  interval * 2  (<= max)
//!   otherwise                               ->  unchanged
//! ```

use crate::storage::MemoryStore;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval before the first sweep (default: 100ms)
    pub base_interval: Duration,

    /// Fastest the sweeper will ever run (default: 10ms)
    pub min_interval: Duration,

    /// Slowest the sweeper will ever run (default: 1s)
    pub max_interval: Duration,

    /// Fraction of expired keys above which sweeping speeds up
    pub speedup_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
        }
    }
}

impl ExpiryConfig {
    /// Picks the interval for the next sweep from the outcome of the last one.
    pub fn next_interval(&self, current: Duration, scanned: u64, expired: u64) -> Duration {
        if scanned == 0 {
            return current;
        }

        let rate = expired as f64 / scanned as f64;
        if rate > self.speedup_threshold {
            (current / 2).max(self.min_interval)
        } else if expired == 0 {
            (current * 2).min(self.max_interval)
        } else {
            current
        }
    }
}

/// Handle to a running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    ///
    /// # Example
    ///
    /// ```
    /// use kvkit::storage::{ExpiryConfig, ExpirySweeper, MemoryStore};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let store = Arc::new(MemoryStore::new());
    /// let sweeper = ExpirySweeper::start(&store, ExpiryConfig::default());
    ///
    /// // ... the store is swept in the background ...
    ///
    /// drop(sweeper);
    /// # }
    /// ```
    pub fn start(store: &Arc<MemoryStore>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(Arc::downgrade(store), config, shutdown_rx));
        info!("Background expiry sweeper started");

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    store: Weak<MemoryStore>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let Some(store) = store.upgrade() else {
            debug!("Store dropped, expiry sweeper exiting");
            return;
        };

        let scanned = store.len();
        let expired = store.cleanup_expired();
        let next = config.next_interval(interval, scanned, expired);

        if expired > 0 {
            debug!(
                expired,
                keys_remaining = store.len(),
                next_interval_ms = next.as_millis() as u64,
                "Expired keys cleaned up"
            );
        } else if next != interval {
            trace!(next_interval_ms = next.as_millis() as u64, "Sweeper backing off");
        }
        interval = next;
    }
}

/// Starts a sweeper with the default configuration.
pub fn start_expiry_sweeper(store: &Arc<MemoryStore>) -> ExpirySweeper {
    ExpirySweeper::start(store, ExpiryConfig::default())
}
