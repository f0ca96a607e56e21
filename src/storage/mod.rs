//! Embedded Store
//!
//! An in-process implementation of [`Store`](crate::Store) used by the test
//! suites and by the demo binary when no server is available.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      MemoryStore                            │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ Weak
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use kvkit::storage::MemoryStore;
//! use kvkit::SetOptions;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let store = MemoryStore::new();
//!
//! store.set_value("name", Bytes::from("alice"), SetOptions::new());
//! assert_eq!(store.get_value("name").unwrap(), Some(Bytes::from("alice")));
//!
//! store.set_value(
//!     "session",
//!     Bytes::from("token123"),
//!     SetOptions::new().expire_in(Duration::from_secs(3600)),
//! );
//! assert!(store.ttl("session").unwrap().is_some());
//! ```

pub mod engine;
pub mod expiry;

pub use engine::{Entry, MemoryStore, MemorySubscription, StorageStats};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
