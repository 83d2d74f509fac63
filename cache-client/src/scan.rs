//! # Key Enumeration
//!
//! Cursor-based SCAN with the store's glob matching. The client keeps no scan
//! state: the caller threads the cursor through, and a returned cursor of 0
//! means the walk is complete. Pages may be empty and keys may repeat across
//! pages; both are passed through untouched.

use crate::client::CacheClient;
use crate::error::{CacheError, CacheResult};
use crate::resp::{encode_u64, parse_u64, RespValue};

/// One SCAN reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanPage {
    /// Cursor for the next call; 0 when enumeration is complete.
    pub cursor: u64,
    pub keys: Vec<String>,
}

impl ScanPage {
    pub fn is_last(&self) -> bool {
        self.cursor == 0
    }
}

impl CacheClient {
    /// Runs one SCAN step from `cursor` for keys matching `pattern`.
    ///
    /// Start with cursor 0 and keep feeding back the returned cursor until it
    /// is 0 again. A nonzero starting cursor resumes an earlier walk.
    pub fn list_keys(&self, cursor: u64, pattern: &str) -> CacheResult<ScanPage> {
        if pattern.is_empty() {
            return Err(CacheError::InvalidArgument("scan pattern must not be empty"));
        }
        let (cursor_buf, cursor_len) = encode_u64(cursor);
        let count = self.policy.scan_count.map(|count| encode_u64(u64::from(count.get())));

        let mut args: Vec<&[u8]> = Vec::with_capacity(6);
        args.push(b"SCAN");
        args.push(&cursor_buf[..cursor_len]);
        args.push(b"MATCH");
        args.push(pattern.as_bytes());
        if let Some((buf, len)) = &count {
            args.push(b"COUNT");
            args.push(&buf[..*len]);
        }

        let ctx = self.context();
        let mut conn = self.lease(&ctx)?;
        conn.request(&ctx, &args, decode_scan_reply)
    }

    /// Iterates over every key matching `pattern`, issuing SCAN calls lazily.
    pub fn scan_keys(&self, pattern: &str) -> ScanKeys {
        ScanKeys {
            client: self.clone(),
            pattern: pattern.to_string(),
            cursor: 0,
            buffered: Vec::new().into_iter(),
            finished: false,
        }
    }
}

fn decode_scan_reply(reply: RespValue) -> CacheResult<ScanPage> {
    let items = match reply.into_result()? {
        RespValue::Array(Some(items)) if items.len() == 2 => items,
        _ => return Err(CacheError::UnexpectedResponse("SCAN")),
    };
    let mut items = items.into_iter();

    let cursor = match items.next() {
        Some(RespValue::Bulk(Some(data))) => parse_u64(&data)?,
        _ => return Err(CacheError::UnexpectedResponse("SCAN")),
    };
    let keys = match items.next() {
        Some(RespValue::Array(Some(keys))) => keys
            .into_iter()
            .map(|key| -> CacheResult<String> {
                match key {
                    RespValue::Bulk(Some(data)) => Ok(String::from_utf8(data)?),
                    _ => Err(CacheError::UnexpectedResponse("SCAN")),
                }
            })
            .collect::<CacheResult<Vec<_>>>()?,
        _ => return Err(CacheError::UnexpectedResponse("SCAN")),
    };

    Ok(ScanPage { cursor, keys })
}

/// Iterator returned by `CacheClient::scan_keys`.
///
/// Yields each matching key; an error is yielded once and ends the iteration.
pub struct ScanKeys {
    client: CacheClient,
    pattern: String,
    cursor: u64,
    buffered: std::vec::IntoIter<String>,
    finished: bool,
}

impl ScanKeys {
    /// Cursor of the next SCAN call; 0 before the first call and after the last.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }
}

impl Iterator for ScanKeys {
    type Item = CacheResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(key) = self.buffered.next() {
                return Some(Ok(key));
            }
            if self.finished {
                return None;
            }
            match self.client.list_keys(self.cursor, &self.pattern) {
                Ok(page) => {
                    self.cursor = page.cursor;
                    self.finished = page.is_last();
                    self.buffered = page.keys.into_iter();
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
