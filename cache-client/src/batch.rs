//! # Batch Operations
//!
//! Multi-key reads and writes. Results are strictly positional: slot `i`
//! always answers key `i`, duplicates included. A batch either passes
//! validation as a whole or is rejected before any network call.

use crate::client::{expect_count, expect_ok, validate_ttl, CacheClient};
use crate::error::{CacheError, CacheResult};
use crate::resp::{encode_u64, RespValue};
use crate::value::{require_value, validate_keys, CacheValue};

impl CacheClient {
    /// Fetches many keys in one MGET. Missing keys yield `None` in their slot.
    pub fn mget_bytes<K: AsRef<str>>(&self, keys: &[K]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys = validate_keys(keys)?;
        let expected = keys.len();

        let mut args: Vec<&[u8]> = Vec::with_capacity(expected + 1);
        args.push(b"MGET");
        args.extend(keys);

        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        conn.request(&ctx, &args, |reply| match reply.into_result()? {
            RespValue::Array(Some(items)) if items.len() == expected => items
                .into_iter()
                .map(|item| match item {
                    RespValue::Bulk(data) => Ok(data),
                    _ => Err(CacheError::UnexpectedResponse("MGET")),
                })
                .collect(),
            RespValue::Array(Some(_)) => {
                Err(CacheError::Protocol("MGET reply length does not match key count"))
            }
            _ => Err(CacheError::UnexpectedResponse("MGET")),
        })
    }

    /// Like `mget_bytes`, decoding each present value as UTF-8.
    pub fn mget_strings<K: AsRef<str>>(&self, keys: &[K]) -> CacheResult<Vec<Option<String>>> {
        self.mget_bytes(keys)?
            .into_iter()
            .map(|slot| slot.map(String::from_utf8).transpose().map_err(CacheError::from))
            .collect()
    }

    /// Writes every key/value pair in one MSET.
    ///
    /// Mismatched lengths, an empty key or a missing value reject the whole
    /// batch before anything is sent.
    pub fn mset<K: AsRef<str>, V: CacheValue>(&self, keys: &[K], values: &[V]) -> CacheResult<()> {
        if keys.len() != values.len() {
            return Err(CacheError::InvalidArgument(
                "keys and values must have the same length",
            ));
        }
        if keys.is_empty() {
            return Ok(());
        }
        let keys = validate_keys(keys)?;
        let values = values
            .iter()
            .map(|value| require_value(value))
            .collect::<CacheResult<Vec<_>>>()?;

        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() * 2 + 1);
        args.push(b"MSET");
        for (key, value) in keys.into_iter().zip(values) {
            args.push(key);
            args.push(value);
        }

        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        conn.request(&ctx, &args, |reply| expect_ok(reply, "MSET"))
    }

    /// Deletes many keys in one DEL. Missing keys are not an error.
    /// Returns the number of keys actually removed.
    pub fn mdel<K: AsRef<str>>(&self, keys: &[K]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys = validate_keys(keys)?;

        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend(keys);

        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        conn.request(&ctx, &args, |reply| expect_count(reply, "DEL"))
    }

    /// Applies `ttls[i]` seconds to `keys[i]` inside one MULTI/EXEC group,
    /// pipelined in a single round trip.
    ///
    /// Returns one flag per key: true when the key existed and got its TTL.
    pub fn update_expiration<K: AsRef<str>>(
        &self,
        keys: &[K],
        ttls: &[u64],
    ) -> CacheResult<Vec<bool>> {
        if keys.len() != ttls.len() {
            return Err(CacheError::InvalidArgument(
                "keys and ttls must have the same length",
            ));
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys = validate_keys(keys)?;
        for &ttl in ttls {
            validate_ttl(ttl)?;
        }
        let seconds: Vec<([u8; 20], usize)> = ttls.iter().map(|&ttl| encode_u64(ttl)).collect();

        let mut commands: Vec<Vec<&[u8]>> = Vec::with_capacity(keys.len() + 2);
        commands.push(vec![&b"MULTI"[..]]);
        for (key, (buf, len)) in keys.iter().zip(&seconds) {
            commands.push(vec![&b"EXPIRE"[..], *key, &buf[..*len]]);
        }
        commands.push(vec![&b"EXEC"[..]]);
        let commands: Vec<&[&[u8]]> = commands.iter().map(Vec::as_slice).collect();

        let queued = keys.len();
        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        conn.request_pipeline(&ctx, &commands, |replies| {
            decode_expire_transaction(replies, queued)
        })
    }
}

fn decode_expire_transaction(mut replies: Vec<RespValue>, queued: usize) -> CacheResult<Vec<bool>> {
    if replies.len() != queued + 2 {
        return Err(CacheError::Protocol("missing transaction replies"));
    }
    let exec = replies.pop().ok_or(CacheError::Protocol("missing EXEC reply"))?;

    let mut replies = replies.into_iter();
    if let Some(multi) = replies.next() {
        expect_ok(multi, "MULTI")?;
    }
    for reply in replies {
        match reply.into_result()? {
            RespValue::Simple(text) if text.as_slice() == b"QUEUED" => {}
            _ => return Err(CacheError::UnexpectedResponse("EXPIRE")),
        }
    }

    match exec.into_result()? {
        RespValue::Array(Some(items)) if items.len() == queued => items
            .into_iter()
            .map(|item| expect_count(item, "EXPIRE").map(|count| count == 1))
            .collect(),
        RespValue::Array(Some(_)) => Err(CacheError::Protocol(
            "EXEC reply length does not match queued commands",
        )),
        RespValue::Array(None) => Err(CacheError::Protocol("transaction aborted")),
        _ => Err(CacheError::UnexpectedResponse("EXEC")),
    }
}
