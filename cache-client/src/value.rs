//! # Value Encodings
//!
//! Purpose: Let one write API accept strings, byte buffers and optional values
//! while keeping "value is missing" a checkable condition.
//!
//! `Option<T>` implements `CacheValue` so batches assembled from lookups can
//! be handed over as-is; a `None` anywhere rejects the whole write before any
//! network traffic.

use bytes::Bytes;

use crate::error::{CacheError, CacheResult};

/// A value that can be written to the cache.
pub trait CacheValue {
    /// Encoded bytes, or `None` when the value is missing.
    fn as_value(&self) -> Option<&[u8]>;
}

impl CacheValue for [u8] {
    fn as_value(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl<const N: usize> CacheValue for [u8; N] {
    fn as_value(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl CacheValue for Vec<u8> {
    fn as_value(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl CacheValue for Bytes {
    fn as_value(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl CacheValue for str {
    fn as_value(&self) -> Option<&[u8]> {
        Some(self.as_bytes())
    }
}

impl CacheValue for String {
    fn as_value(&self) -> Option<&[u8]> {
        Some(self.as_bytes())
    }
}

impl<T: CacheValue> CacheValue for Option<T> {
    fn as_value(&self) -> Option<&[u8]> {
        self.as_ref().and_then(CacheValue::as_value)
    }
}

impl<T: CacheValue + ?Sized> CacheValue for &T {
    fn as_value(&self) -> Option<&[u8]> {
        (**self).as_value()
    }
}

/// Rejects empty keys.
pub(crate) fn validate_key(key: &str) -> CacheResult<&[u8]> {
    if key.is_empty() {
        return Err(CacheError::InvalidArgument("key must not be empty"));
    }
    Ok(key.as_bytes())
}

/// Rejects missing values.
pub(crate) fn require_value<V: CacheValue + ?Sized>(value: &V) -> CacheResult<&[u8]> {
    value
        .as_value()
        .ok_or(CacheError::InvalidArgument("value must not be missing"))
}

/// Validates every key of a batch.
pub(crate) fn validate_keys<K: AsRef<str>>(keys: &[K]) -> CacheResult<Vec<&[u8]>> {
    keys.iter().map(|key| validate_key(key.as_ref())).collect()
}
