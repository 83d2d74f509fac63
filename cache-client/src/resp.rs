//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode cache commands and parse store replies without pulling in
//! a full client library, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Null Is Data**: `$-1` and `*-1` decode to `None`, never to an error.
//! 5. **Distrust Headers**: Buffers grow with the data that actually arrives,
//!    never with a length the peer merely announced.

use std::io::{BufRead, Read};

use bytes::{BufMut, BytesMut};

use crate::error::{CacheError, CacheResult};

/// Largest bulk string or array length accepted from the store (512 MiB,
/// the store's own proto-max-bulk-len default).
const MAX_FRAME_LEN: i64 = 512 * 1024 * 1024;

/// Upper bound on array slots reserved from a length header alone.
const MAX_PREALLOC: usize = 1024;

/// Deepest array nesting accepted in one reply. Cache replies nest at most
/// two levels (SCAN, EXEC).
const MAX_DEPTH: usize = 32;

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK, +PONG, +QUEUED.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays, with None for a null array (aborted EXEC).
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Converts an error reply into `CacheError::Server`, passing others through.
    pub fn into_result(self) -> CacheResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(CacheError::Server { message }),
            other => Ok(other),
        }
    }

    /// True for a `+OK` status reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::Simple(text) if text.as_slice() == b"OK")
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut BytesMut) {
    out.put_u8(b'*');
    push_usize(out, args.len());
    out.put_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.put_u8(b'$');
        push_usize(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> CacheResult<RespValue> {
    read_value(reader, line_buf, 0)
}

fn read_value<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> CacheResult<RespValue> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(CacheError::Protocol("empty reply line"));
    }

    match line_buf[0] {
        b'+' => Ok(RespValue::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(RespValue::Error(line_buf[1..].to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf, depth)
        }
        _ => Err(CacheError::Protocol("unknown reply type")),
    }
}

fn parse_bulk_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> CacheResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    if len > MAX_FRAME_LEN {
        return Err(CacheError::Protocol("bulk length out of range"));
    }
    let len = len as usize;
    let mut data = Vec::with_capacity(len.min(64 * 1024));
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() != len {
        return Err(CacheError::Protocol("connection closed inside bulk string"));
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(CacheError::Protocol("bulk string missing crlf"));
    }

    line_buf.clear();
    Ok(RespValue::Bulk(Some(data)))
}

fn parse_array_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> CacheResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Array(None));
    }
    if len > MAX_FRAME_LEN {
        return Err(CacheError::Protocol("array length out of range"));
    }
    if depth >= MAX_DEPTH {
        return Err(CacheError::Protocol("reply nested too deeply"));
    }

    let mut items = Vec::with_capacity((len as usize).min(MAX_PREALLOC));
    for _ in 0..len {
        items.push(read_value(reader, line_buf, depth + 1)?);
    }
    Ok(RespValue::Array(Some(items)))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> CacheResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(CacheError::Protocol("connection closed by peer"));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(CacheError::Protocol("reply line missing crlf"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

/// Parses a signed decimal as sent in RESP headers and integer replies.
pub fn parse_i64(data: &[u8]) -> CacheResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(CacheError::Protocol("empty integer"));
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(CacheError::Protocol("invalid integer"));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as i64))
            .ok_or(CacheError::Protocol("integer overflow"))?;
    }

    Ok(if negative { -value } else { value })
}

/// Parses an unsigned decimal, as used for SCAN cursors.
pub fn parse_u64(data: &[u8]) -> CacheResult<u64> {
    if data.is_empty() {
        return Err(CacheError::Protocol("empty integer"));
    }
    let mut value: u64 = 0;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(CacheError::Protocol("invalid integer"));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as u64))
            .ok_or(CacheError::Protocol("integer overflow"))?;
    }
    Ok(value)
}

/// Formats an unsigned integer into a stack buffer for use as a command arg.
pub fn encode_u64(mut value: u64) -> ([u8; 20], usize) {
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        return (buf, 1);
    }
    while value > 0 {
        buf[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
    }
    buf[..len].reverse();
    (buf, len)
}

fn push_usize(out: &mut BytesMut, value: usize) {
    let (buf, len) = encode_u64(value as u64);
    out.put_slice(&buf[..len]);
}
