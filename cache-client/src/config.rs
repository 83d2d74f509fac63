//! # Configuration
//!
//! Pool, retry and client settings. Every struct deserializes with
//! `#[serde(default)]` so an embedding application only spells out what it
//! changes. Durations travel as integer milliseconds (`*_ms` fields).

use std::num::NonZeroU32;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Bounded retry discipline used by `ConnectionPool::acquire`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total acquisition attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between failed attempts.
    #[serde(rename = "backoff_ms", with = "millis")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Pool configuration, supplied to `ConnectionPool::open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:6379" or "cache.internal:6379".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use); 0 means unbounded.
    pub max_total: usize,
    /// Idle connections older than this are closed instead of reused;
    /// zero keeps them forever.
    #[serde(rename = "idle_timeout_ms", with = "millis")]
    pub idle_timeout: Duration,
    /// Optional TCP connect timeout.
    #[serde(rename = "connect_timeout_ms", with = "opt_millis")]
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    #[serde(rename = "read_timeout_ms", with = "opt_millis")]
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    #[serde(rename = "write_timeout_ms", with = "opt_millis")]
    pub write_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: 8,
            max_total: 16,
            idle_timeout: Duration::from_secs(240),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Shorthand for the three settings every deployment chooses.
    pub fn new(addr: impl Into<String>, max_idle: usize, idle_timeout: Duration) -> Self {
        PoolConfig {
            addr: addr.into(),
            max_idle,
            idle_timeout,
            ..PoolConfig::default()
        }
    }

    pub(crate) fn validate(&self) -> CacheResult<()> {
        if self.addr.trim().is_empty() {
            return Err(CacheError::InvalidConfig("address is empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(CacheError::InvalidConfig("retry.max_attempts must be at least 1"));
        }
        if self.retry.backoff.is_zero() {
            return Err(CacheError::InvalidConfig("retry.backoff must be non-zero"));
        }
        Ok(())
    }
}

/// Client configuration: the pool plus per-operation behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub pool: PoolConfig,
    /// Report `KeyNotFound` when a single-key delete removes nothing.
    pub fail_on_missing_delete: bool,
    /// COUNT hint sent with every SCAN. The store rejects `COUNT 0`.
    pub scan_count: Option<NonZeroU32>,
    /// Deadline applied to operations issued without an explicit context.
    #[serde(rename = "operation_timeout_ms", with = "opt_millis")]
    pub operation_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            pool: PoolConfig::default(),
            fail_on_missing_delete: false,
            scan_count: None,
            operation_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Parses a JSON document and validates it; absent fields keep their
    /// defaults.
    pub fn from_json(text: &str) -> CacheResult<Self> {
        let config: ClientConfig = serde_json::from_str(text)?;
        config.pool.validate()?;
        Ok(config)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
