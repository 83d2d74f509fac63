//! # Error Taxonomy
//!
//! Purpose: Give every failure a stable kind so callers can branch on
//! `ErrorKind` instead of matching on message text.
//!
//! ## Design Principles
//! 1. **Absence Is Not An Error**: Missing keys surface as `None`, never here.
//! 2. **Validate Before IO**: Argument errors are raised before a connection
//!    is leased, so a rejected batch never touches the store.
//! 3. **Retry Only Transport**: The pool retries dial/probe failures; protocol
//!    errors surface immediately.

use std::io;

use thiserror::Error;

/// Result type for the cache client.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the pool and the cache client.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The pool was used before `open` (or after `close`).
    #[error("connection pool is not open")]
    NotConfigured,
    /// `open` was called with an unusable configuration.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(&'static str),
    /// Configuration document could not be parsed.
    #[error("malformed configuration: {0}")]
    MalformedConfig(#[from] serde_json::Error),
    /// Address did not resolve to any socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Rejected input; nothing was sent to the store.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// No healthy connection could be obtained within the retry budget.
    #[error("no usable connection after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },
    /// Every connection allowed by `max_total` is leased.
    #[error("all {max_total} connections in use")]
    PoolFull { max_total: usize },
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    /// Reply type did not match the command that was sent.
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),
    /// Store returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Value could not be decoded as UTF-8 by a string accessor.
    #[error("value is not valid utf-8")]
    Decode(#[from] std::string::FromUtf8Error),
    /// Delete of a missing key while `fail_on_missing_delete` is set.
    #[error("key not found")]
    KeyNotFound,
    /// Operation deadline elapsed.
    #[error("operation timed out")]
    Timeout,
    /// Operation was cancelled through its `CancelToken`.
    #[error("operation cancelled")]
    Cancelled,
}

/// Coarse classification of `CacheError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Unavailable,
    Protocol,
    Io,
    NotFound,
    Interrupted,
}

impl CacheError {
    /// Returns the kind callers should branch on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::NotConfigured
            | CacheError::InvalidConfig(_)
            | CacheError::MalformedConfig(_)
            | CacheError::InvalidAddress(_) => ErrorKind::Configuration,
            CacheError::InvalidArgument(_) => ErrorKind::Validation,
            CacheError::Unavailable { .. } | CacheError::PoolFull { .. } => {
                ErrorKind::Unavailable
            }
            CacheError::Protocol(_)
            | CacheError::UnexpectedResponse(_)
            | CacheError::Server { .. }
            | CacheError::Decode(_) => ErrorKind::Protocol,
            CacheError::Io(_) => ErrorKind::Io,
            CacheError::KeyNotFound => ErrorKind::NotFound,
            CacheError::Timeout | CacheError::Cancelled => ErrorKind::Interrupted,
        }
    }

    /// True when repeating the whole operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::Unavailable { .. }
                | CacheError::PoolFull { .. }
                | CacheError::Io(_)
                | CacheError::Timeout
        )
    }

    /// Maps socket timeouts onto `Timeout`, keeping other IO errors as-is.
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => CacheError::Timeout,
            _ => CacheError::Io(err),
        }
    }
}
