//! # Cache Client API
//!
//! Purpose: Expose a compact, blocking cache API (single-key reads and writes,
//! TTL management, batches and key enumeration) over a pooled RESP2
//! connection.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` hides pooling and protocol details.
//! 2. **Validate First**: Arguments are checked before a connection is leased.
//! 3. **Always Release**: Every lease is an RAII guard, so the connection goes
//!    back (or is closed) on every exit path.
//! 4. **Absence Is Data**: Missing keys come back as `None`.
//!
//! Batch operations live in `batch.rs`, key enumeration in `scan.rs`.

use std::num::NonZeroU32;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::context::OpContext;
use crate::error::{CacheError, CacheResult};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::resp::{encode_u64, RespValue};
use crate::value::{require_value, validate_key, CacheValue};

/// TTL state of a key, mirroring the store's TTL reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// Per-client behavior taken from `ClientConfig`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ClientPolicy {
    pub(crate) fail_on_missing_delete: bool,
    pub(crate) scan_count: Option<NonZeroU32>,
    pub(crate) operation_timeout: Option<Duration>,
}

impl From<&ClientConfig> for ClientPolicy {
    fn from(config: &ClientConfig) -> Self {
        ClientPolicy {
            fail_on_missing_delete: config.fail_on_missing_delete,
            scan_count: config.scan_count,
            operation_timeout: config.operation_timeout,
        }
    }
}

/// Pooled cache client.
///
/// Cloning is cheap; clones share the pool. Each call leases its own
/// connection, so one client can be used from many threads at once.
#[derive(Clone)]
pub struct CacheClient {
    pool: ConnectionPool,
    pub(crate) policy: ClientPolicy,
    context: Option<OpContext>,
}

impl CacheClient {
    /// Wraps an existing pool. The pool settings inside `config` are ignored;
    /// the pool keeps whatever it was opened with.
    pub fn new(pool: ConnectionPool, config: &ClientConfig) -> Self {
        CacheClient {
            pool,
            policy: ClientPolicy::from(config),
            context: None,
        }
    }

    /// Creates a pool, opens it with `config.pool` and wraps it.
    pub fn open(config: ClientConfig) -> CacheResult<Self> {
        let pool = ConnectionPool::new();
        pool.open(config.pool.clone())?;
        Ok(Self::new(pool, &config))
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Returns a client whose operations all run under `ctx`.
    ///
    /// A deadline inside `ctx` is absolute; operations issued after it passes
    /// fail with `Timeout`.
    pub fn with_context(&self, ctx: OpContext) -> CacheClient {
        CacheClient {
            pool: self.pool.clone(),
            policy: self.policy,
            context: Some(ctx),
        }
    }

    /// Context for one operation.
    pub(crate) fn context(&self) -> OpContext {
        match (&self.context, self.policy.operation_timeout) {
            (Some(ctx), _) => ctx.clone(),
            (None, Some(timeout)) => OpContext::with_timeout(timeout),
            (None, None) => OpContext::new(),
        }
    }

    pub(crate) fn lease(&self, ctx: &OpContext) -> CacheResult<PooledConnection> {
        self.pool.acquire(ctx)
    }

    /// Pings the store through a pooled connection.
    pub fn ping(&self) -> CacheResult<()> {
        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        conn.request(&ctx, &[b"PING"], |reply| match reply.into_result()? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(CacheError::UnexpectedResponse("PING")),
        })
    }

    /// Fetches a value as raw bytes. Returns `Ok(None)` when the key is missing.
    pub fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let key = validate_key(key)?;
        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        conn.request(&ctx, &[b"GET", key], |reply| match reply.into_result()? {
            RespValue::Bulk(data) => Ok(data),
            _ => Err(CacheError::UnexpectedResponse("GET")),
        })
    }

    /// Fetches a value as UTF-8 text. Returns `Ok(None)` when the key is missing.
    pub fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        match self.get_bytes(key)? {
            Some(data) => Ok(Some(String::from_utf8(data)?)),
            None => Ok(None),
        }
    }

    /// Sets a value for a key without expiration, overwriting any old value.
    pub fn set<V: CacheValue + ?Sized>(&self, key: &str, value: &V) -> CacheResult<()> {
        let key = validate_key(key)?;
        let value = require_value(value)?;
        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        conn.request(&ctx, &[b"SET", key, value], |reply| expect_ok(reply, "SET"))
    }

    /// Sets a value and its expiration in one SETEX round trip.
    pub fn set_with_expiration<V: CacheValue + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl_seconds: u64,
    ) -> CacheResult<()> {
        let key = validate_key(key)?;
        let value = require_value(value)?;
        validate_ttl(ttl_seconds)?;
        let (seconds, len) = encode_u64(ttl_seconds);
        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        conn.request(&ctx, &[b"SETEX", key, &seconds[..len], value], |reply| {
            expect_ok(reply, "SETEX")
        })
    }

    /// Deletes a key. Returns true when a key was removed.
    ///
    /// With `fail_on_missing_delete` set, removing nothing is `KeyNotFound`.
    pub fn delete(&self, key: &str) -> CacheResult<bool> {
        let key = validate_key(key)?;
        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        let removed = conn.request(&ctx, &[b"DEL", key], |reply| expect_count(reply, "DEL"))?;
        if removed == 0 && self.policy.fail_on_missing_delete {
            return Err(CacheError::KeyNotFound);
        }
        Ok(removed > 0)
    }

    /// Checks whether a key exists.
    pub fn exists(&self, key: &str) -> CacheResult<bool> {
        let key = validate_key(key)?;
        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        conn.request(&ctx, &[b"EXISTS", key], |reply| {
            expect_count(reply, "EXISTS").map(|count| count > 0)
        })
    }

    /// Returns TTL status for a key.
    pub fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        let key = validate_key(key)?;
        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        conn.request(&ctx, &[b"TTL", key], |reply| match reply.into_result()? {
            RespValue::Integer(-2) => Ok(KeyTtl::Missing),
            RespValue::Integer(-1) => Ok(KeyTtl::NoExpiry),
            RespValue::Integer(value) if value >= 0 => {
                Ok(KeyTtl::ExpiresIn(Duration::from_secs(value as u64)))
            }
            _ => Err(CacheError::UnexpectedResponse("TTL")),
        })
    }

    /// Sets a time-to-live on a key. Returns true when the key exists.
    pub fn expire(&self, key: &str, ttl_seconds: u64) -> CacheResult<bool> {
        let key = validate_key(key)?;
        validate_ttl(ttl_seconds)?;
        let (seconds, len) = encode_u64(ttl_seconds);
        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        conn.request(&ctx, &[b"EXPIRE", key, &seconds[..len]], |reply| {
            expect_count(reply, "EXPIRE").map(|count| count == 1)
        })
    }
}

pub(crate) fn validate_ttl(ttl_seconds: u64) -> CacheResult<()> {
    if ttl_seconds == 0 {
        return Err(CacheError::InvalidArgument("ttl must be at least one second"));
    }
    Ok(())
}

pub(crate) fn expect_ok(reply: RespValue, command: &'static str) -> CacheResult<()> {
    match reply.into_result()? {
        reply if reply.is_ok() => Ok(()),
        _ => Err(CacheError::UnexpectedResponse(command)),
    }
}

/// Decodes a non-negative integer reply such as a DEL or EXISTS count.
pub(crate) fn expect_count(reply: RespValue, command: &'static str) -> CacheResult<u64> {
    match reply.into_result()? {
        RespValue::Integer(value) if value >= 0 => Ok(value as u64),
        _ => Err(CacheError::UnexpectedResponse(command)),
    }
}
