//! Bounded RESP Connection Pool
//!
//! `ConnectionPool` is the networked implementation of [`Store`]. Every call
//! checks a connection out, runs one request and hands the connection back.
//!
//! ## Checkout
//!
//! ```text
//!  get_connection()
//!        │
//!        ▼
//!  acquire permit  ── at most max_connections checked out at once,
//!        │              waiting up to pool_timeout
//!        ▼
//!  idle connection? ──yes──▶ reuse
//!        │ no
//!        ▼
//!  dial + AUTH + SELECT
//!        │
//!        ▼
//!  PooledConnection ──drop──▶ back to idle (unless broken)
//! ```
//!
//! Blocking pops keep their connection for as long as they run, so they
//! count against `max_connections`. When every connection stays busy for
//! `pool_timeout`, checkout fails with [`StoreError::Connection`] instead of
//! waiting on. Subscriptions dial a dedicated connection outside the pool.

pub mod connection;
pub mod subscription;

pub use connection::Connection;
pub use subscription::RespSubscription;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::protocol::{Command, RespValue};
use crate::store::{ServerInfo, SetCondition, SetOptions, Store, Subscription};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Deletes a key only if it still holds the caller's token.
pub const COMPARE_AND_DELETE_SCRIPT: &str = r#"if redis.call("get",KEYS[1]) == ARGV[1] then return redis.call("del",KEYS[1]) else return 0 end"#;

struct PoolInner {
    config: StoreConfig,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
}

/// A bounded pool of connections to one store endpoint.
///
/// Cloning is cheap; clones share the same connections.
///
/// # Example
///
/// ```no_run
/// use kvkit::{ConnectionPool, Store, StoreConfig};
///
/// # async fn demo() -> kvkit::Result<()> {
/// let pool = ConnectionPool::new(StoreConfig::default().with_max_connections(4))?;
/// pool.ping().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.inner.config.address())
            .field("db", &self.inner.config.db)
            .field("idle", &self.idle_connections())
            .field("available", &self.inner.permits.available_permits())
            .finish()
    }
}

type Registry = Mutex<HashMap<(String, u16, u32), ConnectionPool>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl ConnectionPool {
    /// Builds a pool. No connection is opened until the first request.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        info!(
            address = %config.address(),
            db = config.db,
            max_connections = config.max_connections,
            "Connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(config.max_connections)),
                idle: Mutex::new(Vec::with_capacity(config.max_connections)),
                config,
            }),
        })
    }

    /// Returns the process-wide pool for the config's host, port and db,
    /// creating it on first use. Later calls with the same endpoint get the
    /// same pool even if the rest of their config differs.
    pub fn shared(config: StoreConfig) -> Result<Self> {
        let mut pools = registry().lock();
        let endpoint = config.endpoint();
        if let Some(pool) = pools.get(&endpoint) {
            return Ok(pool.clone());
        }

        let pool = Self::new(config)?;
        pools.insert(endpoint, pool.clone());
        Ok(pool)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Number of connections currently parked in the pool.
    pub fn idle_connections(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Checks a connection out, waiting up to `pool_timeout` while all of
    /// them are in use.
    pub async fn get_connection(&self) -> Result<PooledConnection> {
        let config = &self.inner.config;
        let permit = tokio::time::timeout(
            config.pool_timeout,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            warn!(
                max_connections = config.max_connections,
                "Connection pool exhausted"
            );
            StoreError::connection(format!(
                "no pooled connection free after {:?} (max_connections = {})",
                config.pool_timeout, config.max_connections
            ))
        })?
        .map_err(|_| StoreError::connection("connection pool closed"))?;

        let parked = self.inner.idle.lock().pop();
        let conn = match parked {
            Some(conn) => conn,
            None => Connection::connect(&self.inner.config).await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    async fn request(&self, command: Command) -> Result<RespValue> {
        self.get_connection().await?.request(command).await
    }

    fn decode_text(&self, data: Bytes) -> Result<String> {
        if self.inner.config.decode_responses {
            String::from_utf8(data.to_vec())
                .map_err(|e| StoreError::protocol(format!("reply is not valid UTF-8: {}", e)))
        } else {
            Ok(String::from_utf8_lossy(&data).into_owned())
        }
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Dropping it returns the connection to the pool, unless it broke.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn connection(&mut self) -> Result<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::connection("connection already returned to the pool"))
    }

    pub async fn request(&mut self, command: Command) -> Result<RespValue> {
        self.connection()?.request(command).await
    }

    /// Waits up to `limit` for the reply, or forever when `limit` is `None`.
    pub async fn request_within(
        &mut self,
        command: Command,
        limit: Option<Duration>,
    ) -> Result<RespValue> {
        self.connection()?.request_within(command, limit).await
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if conn.is_broken() {
            warn!("Dropping broken connection");
            return;
        }
        self.pool.idle.lock().push(conn);
    }
}

/// Milliseconds for PX / PEXPIRE. The store rejects 0, so round up to 1.
fn millis(ttl: Duration) -> u128 {
    ttl.as_millis().max(1)
}

#[async_trait]
impl Store for ConnectionPool {
    fn name(&self) -> &'static str {
        "resp"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.request(Command::new("GET").arg(key.to_owned()))
            .await?
            .expect_optional_bytes("GET")
    }

    async fn set(&self, key: &str, value: Bytes, options: SetOptions) -> Result<bool> {
        let mut command = Command::new("SET").arg(key.to_owned()).arg(value);
        if let Some(ttl) = options.expiry {
            command = command.arg("PX").arg_display(millis(ttl));
        }
        command = match options.condition {
            SetCondition::Always => command,
            SetCondition::IfAbsent => command.arg("NX"),
            SetCondition::IfPresent => command.arg("XX"),
        };

        match self.request(command).await? {
            reply if reply.is_ok() => Ok(true),
            RespValue::Null => Ok(false),
            other => Err(StoreError::protocol(format!("unexpected reply to SET: {}", other))),
        }
    }

    async fn delete(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let command = Command::new("DEL").args(keys.iter().map(|key| key.to_string()));
        let removed = self.request(command).await?.expect_integer("DEL")?;
        Ok(removed as u64)
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let command = Command::new("EVAL")
            .arg(COMPARE_AND_DELETE_SCRIPT)
            .arg("1")
            .arg(key.to_owned())
            .arg(Bytes::copy_from_slice(expected));
        Ok(self.request(command).await?.expect_integer("EVAL")? == 1)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let command = Command::new("INCRBY").arg(key.to_owned()).arg_display(delta);
        self.request(command).await?.expect_integer("INCRBY")
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let command = Command::new("PEXPIRE")
            .arg(key.to_owned())
            .arg_display(millis(ttl));
        Ok(self.request(command).await?.expect_integer("PEXPIRE")? == 1)
    }

    async fn expire_at(&self, key: &str, at: SystemTime) -> Result<bool> {
        // A time before the epoch is simply "in the past".
        let seconds = at.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
        let command = Command::new("EXPIREAT")
            .arg(key.to_owned())
            .arg_display(seconds);
        Ok(self.request(command).await?.expect_integer("EXPIREAT")? == 1)
    }

    async fn rpush(&self, key: &str, values: Vec<Bytes>) -> Result<u64> {
        let command = Command::new("RPUSH").arg(key.to_owned()).args(values);
        Ok(self.request(command).await?.expect_integer("RPUSH")? as u64)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>> {
        let command = Command::new("BLPOP")
            .arg(key.to_owned())
            .arg_display(timeout.as_secs_f64());

        // The server answers by `timeout`; allow one response timeout more
        // before treating the connection as dead.
        let limit = if timeout.is_zero() {
            None
        } else {
            timeout.checked_add(self.inner.config.response_timeout)
        };

        let mut conn = self.get_connection().await?;
        match conn.request_within(command, limit).await? {
            RespValue::Null => Ok(None),
            RespValue::Array(mut parts) if parts.len() == 2 => {
                parts.pop().and_then(RespValue::into_bytes).map(Some).ok_or_else(|| {
                    StoreError::protocol("BLPOP reply did not carry a bulk value")
                })
            }
            other => Err(StoreError::protocol(format!(
                "unexpected reply to BLPOP: {}",
                other
            ))),
        }
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let command = Command::new("LLEN").arg(key.to_owned());
        Ok(self.request(command).await?.expect_integer("LLEN")? as u64)
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<u64> {
        let command = Command::new("PUBLISH").arg(channel.to_owned()).arg(payload);
        Ok(self.request(command).await?.expect_integer("PUBLISH")? as u64)
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn Subscription>> {
        let conn = Connection::connect(&self.inner.config).await?;
        let subscription = RespSubscription::open(conn, channels).await?;
        debug!(channels = ?channels, "Subscribed");
        Ok(Box::new(subscription))
    }

    async fn ping(&self) -> Result<()> {
        match self.request(Command::new("PING")).await? {
            RespValue::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(StoreError::protocol(format!("unexpected reply to PING: {}", other))),
        }
    }

    async fn info(&self) -> Result<ServerInfo> {
        let text = match self.request(Command::new("INFO")).await? {
            RespValue::BulkString(data) => self.decode_text(data)?,
            RespValue::SimpleString(s) => s,
            other => {
                return Err(StoreError::protocol(format!(
                    "unexpected reply to INFO: {}",
                    other
                )))
            }
        };
        Ok(ServerInfo::parse(&text))
    }
}
