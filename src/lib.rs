//! # kvkit - Coordination Primitives over a Redis-Compatible Store
//!
//! kvkit packages the usual things services build on a shared key-value
//! store: result caching with expiry, distributed locks, durable work
//! queues, publish/subscribe messaging and rate limiting.
//!
//! ## Features
//!
//! - **One Seam**: every component talks to an `Arc<dyn Store>`
//! - **RESP Client**: bounded connection pool speaking RESP2 over Tokio
//! - **Embedded Store**: sharded in-process store with lazy and active expiry
//! - **Typed Payloads**: values travel as JSON via serde
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Framework                                  │
//! │                                                                         │
//! │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ ┌───────────┐ ┌────────┐   │
//! │  │ Cache  │ │  Lock  │ │ Queue  │ │ PubSub │ │RateLimiter│ │ Health │   │
//! │  └───┬────┘ └───┬────┘ └───┬────┘ └───┬────┘ └─────┬─────┘ └───┬────┘   │
//! │      └──────────┴──────────┴────┬─────┴────────────┴───────────┘        │
//! │                                 ▼                                       │
//! │                        ┌─────────────────┐                              │
//! │                        │ Arc<dyn Store>  │                              │
//! │                        └────────┬────────┘                              │
//! │               ┌─────────────────┴──────────────────┐                    │
//! │               ▼                                    ▼                    │
//! │  ┌──────────────────────────┐        ┌──────────────────────────┐      │
//! │  │     ConnectionPool       │        │       MemoryStore        │      │
//! │  │  RESP2 over TCP, bounded │        │ 64 shards + ExpirySweeper│      │
//! │  └──────────────────────────┘        └──────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use kvkit::{Framework, StoreConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> kvkit::Result<()> {
//!     let kv = Framework::connect(StoreConfig::default())?;
//!
//!     let user = kv.cache.wrap("get_user_data", Duration::from_secs(300), |id: u32| async move {
//!         format!("user {}", id)
//!     });
//!     println!("{}", user.call(42).await?);
//!
//!     let lock = kv.create_lock("my_lock", Duration::from_secs(10));
//!     lock.scoped(true, Duration::from_millis(100), || async {
//!         // critical section
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP types, command encoding and the incremental reply decoder
//! - [`pool`]: Bounded connection pool implementing [`Store`] over TCP
//! - [`storage`]: In-process [`Store`] with TTL support
//! - [`cache`], [`lock`], [`queue`], [`pubsub`], [`rate_limit`], [`health`],
//!   [`data`]: the components
//! - [`framework`]: All components over one store
//!
//! ## Atomicity
//!
//! Components never lock on the client side. Mutual exclusion and counting
//! rest on single store operations: set-if-absent with expiry,
//! increment, and compare-and-delete.

pub mod cache;
pub mod codec;
pub mod config;
pub mod data;
pub mod error;
pub mod framework;
pub mod health;
pub mod lock;
pub mod pool;
pub mod protocol;
pub mod pubsub;
pub mod queue;
pub mod rate_limit;
pub mod storage;
pub mod store;

// Re-export commonly used types for convenience
pub use cache::{Cache, CachedFn, CallArgs};
pub use config::StoreConfig;
pub use data::DataManager;
pub use error::{Result, StoreError};
pub use framework::Framework;
pub use health::HealthCheck;
pub use lock::{Lock, LockGuard};
pub use pool::{ConnectionPool, PooledConnection};
pub use pubsub::{Listener, PubSub, SubscriptionHandle};
pub use queue::Queue;
pub use rate_limit::RateLimiter;
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, MemoryStore};
pub use store::{Message, ServerInfo, SetCondition, SetOptions, Store, Subscription};

/// The default store port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default store host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of kvkit
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
