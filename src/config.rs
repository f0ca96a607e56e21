//! Store connection configuration.

use crate::error::{Result, StoreError};
use std::time::Duration;

/// Connection settings for one key-value store endpoint.
///
/// Built once at startup and treated as read-only afterwards.
///
/// # Example
///
/// ```
/// use kvkit::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::default()
///     .with_host("10.0.0.5")
///     .with_db(15)
///     .with_password("secret")
///     .with_connect_timeout(Duration::from_secs(2));
///
/// assert_eq!(config.address(), "10.0.0.5:6379");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Host name or IP of the store
    pub host: String,
    /// TCP port of the store
    pub port: u16,
    /// Logical database index selected after connecting
    pub db: u32,
    /// Credential sent with AUTH, if any
    pub password: Option<String>,
    /// How long to wait for a TCP connection to be established
    pub connect_timeout: Duration,
    /// How long to wait for a reply to a non-blocking command
    pub response_timeout: Duration,
    /// Upper bound on simultaneously open pooled connections
    pub max_connections: usize,
    /// How long a checkout waits for a free pooled connection before failing
    pub pool_timeout: Duration,
    /// Decode textual replies (INFO, status lines) strictly as UTF-8.
    /// When false, invalid UTF-8 is replaced instead of rejected.
    pub decode_responses: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            db: 0,
            password: None,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            max_connections: 10,
            pool_timeout: Duration::from_secs(5),
            decode_responses: true,
        }
    }
}

impl StoreConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = timeout;
        self
    }

    pub fn with_decode_responses(mut self, decode: bool) -> Self {
        self.decode_responses = decode;
        self
    }

    /// Returns the `host:port` address to dial.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the `(host, port, db)` triple identifying the endpoint.
    pub fn endpoint(&self) -> (String, u16, u32) {
        (self.host.clone(), self.port, self.db)
    }

    /// Checks that the settings can be used to build a pool.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(StoreError::Config("host must not be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(StoreError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout.is_zero()
            || self.response_timeout.is_zero()
            || self.pool_timeout.is_zero()
        {
            return Err(StoreError::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}
