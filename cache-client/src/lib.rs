//! # Pooled Cache Client
//!
//! Purpose: Provide a blocking cache API (get/set/delete, batches, TTLs and
//! prefix enumeration) over a RESP2 key-value store, with a connection pool
//! that verifies liveness and retries transient failures within a bound.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Explicit Ownership**: The pool is a handle owned by the application and
//!    passed into the client, never process-global state.
//! 3. **Positional Batches**: Batch results line up with their input keys.
//! 4. **Bounded Blocking**: Every operation runs under an `OpContext` that
//!    can carry a deadline and a cancellation token.
//!
//! ```no_run
//! use std::time::Duration;
//! use cache_client::{CacheClient, ClientConfig, PoolConfig};
//!
//! let config = ClientConfig {
//!     pool: PoolConfig::new("127.0.0.1:6379", 1, Duration::from_secs(5)),
//!     ..ClientConfig::default()
//! };
//! let client = CacheClient::open(config)?;
//! client.mset(&["a", "b"], &["1", "2"])?;
//! let values = client.mget_strings(&["a", "b", "c"])?;
//! assert_eq!(values, vec![Some("1".to_string()), Some("2".to_string()), None]);
//! # Ok::<(), cache_client::CacheError>(())
//! ```

mod batch;
mod client;
mod config;
mod context;
mod error;
mod pool;
mod resp;
mod scan;
mod value;

pub use client::{CacheClient, KeyTtl};
pub use config::{ClientConfig, PoolConfig, RetryPolicy};
pub use context::{CancelToken, OpContext};
pub use error::{CacheError, CacheResult, ErrorKind};
pub use pool::{ConnectionPool, PooledConnection};
pub use resp::RespValue;
pub use scan::{ScanKeys, ScanPage};
pub use value::CacheValue;
