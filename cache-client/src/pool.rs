//! # Connection Pool
//!
//! Purpose: Hand out live connections to the store and absorb transient
//! connection failures so call sites only see them once retries run out.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Probe Before Use**: Every leased connection answers a PING first.
//! 4. **Bounded Retry**: A fixed number of attempts with a non-zero pause;
//!    an unopened pool fails at once because retrying cannot fix it.
//! 5. **Never Recycle Unknown State**: Any IO or protocol failure discards the
//!    connection instead of returning it to the idle set.
//!
//! ## Lifecycle
//! A pool starts unopened. `open` activates it (a second `open` is a no-op),
//! `close` drops idle connections and returns it to the unopened state.
//! Callers must let in-flight operations finish before calling `close`;
//! connections leased across a close are discarded when they are dropped.

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::context::OpContext;
use crate::error::{CacheError, CacheResult};
use crate::resp::{encode_command, read_response, RespValue};

struct IdleConnection {
    conn: Connection,
    since: Instant,
}

#[derive(Default)]
struct PoolState {
    /// `None` while the pool is unopened.
    config: Option<Arc<PoolConfig>>,
    /// Most recently returned connection at the front.
    idle: VecDeque<IdleConnection>,
    total: usize,
    /// Bumped by `close` so leases from before the close are not recycled.
    generation: u64,
}

#[derive(Default)]
struct PoolInner {
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // No code path panics while holding the lock, so a poisoned state is
        // still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Connection pool handle. Clones share the same pool.
#[derive(Clone, Default)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

/// Outcome of one failed acquisition attempt.
enum AttemptError {
    /// Worth another attempt after backoff.
    Retry(CacheError),
    /// Retrying cannot help.
    Fatal(CacheError),
}

impl ConnectionPool {
    /// Creates an unopened pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures and activates the pool. Does nothing if already open.
    pub fn open(&self, config: PoolConfig) -> CacheResult<()> {
        config.validate()?;
        let mut state = self.inner.lock();
        if let Some(current) = &state.config {
            debug!(addr = %current.addr, "connection pool already open");
            return Ok(());
        }
        debug!(
            addr = %config.addr,
            max_idle = config.max_idle,
            max_total = config.max_total,
            "connection pool open"
        );
        state.idle = VecDeque::with_capacity(config.max_idle);
        state.total = 0;
        state.config = Some(Arc::new(config));
        Ok(())
    }

    /// Closes idle connections and marks the pool unopened.
    pub fn close(&self) {
        let drained = {
            let mut state = self.inner.lock();
            if state.config.take().is_none() {
                return;
            }
            state.generation = state.generation.wrapping_add(1);
            state.total = 0;
            std::mem::take(&mut state.idle)
        };
        debug!(closed = drained.len(), "connection pool closed");
        drop(drained);
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().config.is_some()
    }

    /// The active configuration, if open.
    pub fn config(&self) -> Option<PoolConfig> {
        self.inner.lock().config.as_deref().cloned()
    }

    /// Number of connections currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.inner.lock().idle.len()
    }

    /// Number of connections owned by the pool, idle or leased.
    pub fn total_count(&self) -> usize {
        self.inner.lock().total
    }

    /// Acquires a healthy connection, retrying transient failures.
    pub fn acquire(&self, ctx: &OpContext) -> CacheResult<PooledConnection> {
        let mut attempts = 0u32;
        loop {
            let (config, generation) = self.snapshot()?;
            ctx.check()?;
            attempts += 1;

            let failure = match self.attempt(&config, generation, ctx) {
                Ok(conn) => return Ok(conn),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retry(err)) => {
                    // A socket timeout caused by the operation deadline is final.
                    ctx.check()?;
                    err
                }
            };

            if attempts >= config.retry.max_attempts {
                warn!(addr = %config.addr, attempts, error = %failure, "connection pool exhausted");
                return Err(CacheError::Unavailable {
                    attempts,
                    reason: failure.to_string(),
                });
            }
            warn!(
                addr = %config.addr,
                attempt = attempts,
                error = %failure,
                backoff_ms = config.retry.backoff.as_millis() as u64,
                "connection attempt failed, backing off"
            );
            ctx.sleep(config.retry.backoff)?;
        }
    }

    fn snapshot(&self) -> CacheResult<(Arc<PoolConfig>, u64)> {
        let state = self.inner.lock();
        match &state.config {
            Some(config) => Ok((config.clone(), state.generation)),
            None => Err(CacheError::NotConfigured),
        }
    }

    fn attempt(
        &self,
        config: &Arc<PoolConfig>,
        generation: u64,
        ctx: &OpContext,
    ) -> Result<PooledConnection, AttemptError> {
        let conn = match self.pop_idle(generation, config.idle_timeout) {
            Some(conn) => conn,
            None => self.dial(config, generation, ctx)?,
        };

        let mut pooled = PooledConnection::new(self.inner.clone(), conn, generation, config.clone());
        match pooled.probe(ctx) {
            Ok(()) => Ok(pooled),
            Err(err) => {
                // Dropping a discarded lease closes it and frees its slot.
                pooled.discard();
                Err(AttemptError::Retry(err))
            }
        }
    }

    fn dial(
        &self,
        config: &PoolConfig,
        generation: u64,
        ctx: &OpContext,
    ) -> Result<Connection, AttemptError> {
        if !self.try_reserve(generation, config.max_total) {
            return Err(AttemptError::Retry(CacheError::PoolFull {
                max_total: config.max_total,
            }));
        }

        match Connection::connect(config, ctx) {
            Ok(conn) => {
                debug!(addr = %config.addr, "dialed new connection");
                Ok(conn)
            }
            Err(err) => {
                self.release_slot(generation);
                match err {
                    CacheError::InvalidAddress(_) => Err(AttemptError::Fatal(err)),
                    other => Err(AttemptError::Retry(other)),
                }
            }
        }
    }

    fn pop_idle(&self, generation: u64, idle_timeout: Duration) -> Option<Connection> {
        let mut stale = Vec::new();
        let conn = {
            let mut state = self.inner.lock();
            if state.generation != generation {
                return None;
            }
            if !idle_timeout.is_zero() {
                // Oldest connections sit at the back.
                while state
                    .idle
                    .back()
                    .is_some_and(|idle| idle.since.elapsed() > idle_timeout)
                {
                    if let Some(idle) = state.idle.pop_back() {
                        stale.push(idle.conn);
                        state.total = state.total.saturating_sub(1);
                    }
                }
            }
            state.idle.pop_front().map(|idle| idle.conn)
        };
        if !stale.is_empty() {
            trace!(closed = stale.len(), "closed idle connections past idle timeout");
        }
        conn
    }

    fn try_reserve(&self, generation: u64, max_total: usize) -> bool {
        let mut state = self.inner.lock();
        if state.generation != generation {
            return false;
        }
        if max_total != 0 && state.total >= max_total {
            return false;
        }
        state.total += 1;
        true
    }

    fn release_slot(&self, generation: u64) {
        let mut state = self.inner.lock();
        if state.generation == generation {
            state.total = state.total.saturating_sub(1);
        }
    }
}

impl PoolInner {
    fn return_connection(&self, conn: Connection, generation: u64, max_idle: usize) {
        let mut state = self.lock();
        if state.config.is_none() || state.generation != generation {
            // Leased before a close; the slot was already reset.
            return;
        }
        if state.idle.len() < max_idle {
            state.idle.push_front(IdleConnection {
                conn,
                since: Instant::now(),
            });
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }

    fn discard_connection(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// RAII lease returning the connection to the pool on drop.
///
/// The connection is closed instead of returned once any IO or protocol
/// failure has been seen on it.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    config: Arc<PoolConfig>,
    generation: u64,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection, generation: u64, config: Arc<PoolConfig>) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            config,
            generation,
            valid: true,
        }
    }

    /// Executes one command and returns the raw reply.
    pub fn exec(&mut self, ctx: &OpContext, args: &[&[u8]]) -> CacheResult<RespValue> {
        let mut replies = self.round_trip(ctx, std::slice::from_ref(&args))?;
        replies
            .pop()
            .ok_or(CacheError::Protocol("missing reply"))
    }

    /// Executes one command and decodes its reply. A decode failure other than
    /// a server error reply leaves the connection in an unknown state, so it
    /// is discarded.
    pub fn request<T>(
        &mut self,
        ctx: &OpContext,
        args: &[&[u8]],
        decode: impl FnOnce(RespValue) -> CacheResult<T>,
    ) -> CacheResult<T> {
        let reply = self.exec(ctx, args)?;
        let result = decode(reply);
        self.settle(result)
    }

    /// Writes all commands in one flush, reads one reply per command and
    /// decodes them together. Failure handling matches `request`.
    pub fn request_pipeline<T>(
        &mut self,
        ctx: &OpContext,
        commands: &[&[&[u8]]],
        decode: impl FnOnce(Vec<RespValue>) -> CacheResult<T>,
    ) -> CacheResult<T> {
        let replies = self.round_trip(ctx, commands)?;
        let result = decode(replies);
        self.settle(result)
    }

    /// Marks the connection so it is closed instead of reused.
    pub fn discard(&mut self) {
        self.valid = false;
    }

    fn settle<T>(&mut self, result: CacheResult<T>) -> CacheResult<T> {
        if let Err(err) = &result {
            if !matches!(err, CacheError::Server { .. }) {
                self.valid = false;
            }
        }
        result
    }

    fn probe(&mut self, ctx: &OpContext) -> CacheResult<()> {
        self.request(ctx, &[b"PING"], |reply| match reply.into_result()? {
            RespValue::Simple(text) if text.as_slice() == b"PONG" => Ok(()),
            _ => Err(CacheError::UnexpectedResponse("PING")),
        })
    }

    fn round_trip(&mut self, ctx: &OpContext, commands: &[&[&[u8]]]) -> CacheResult<Vec<RespValue>> {
        let conn = match self.conn.as_mut() {
            Some(conn) if self.valid => conn,
            _ => return Err(CacheError::Protocol("connection already failed")),
        };
        let response = conn.round_trip(&self.config, ctx, commands);
        if response.is_err() {
            // If IO/protocol fails, do not return this connection to the pool.
            self.valid = false;
        }
        response
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if self.valid {
            self.pool
                .return_connection(conn, self.generation, self.config.max_idle);
        } else {
            drop(conn);
            self.pool.discard_connection(self.generation);
        }
    }
}

/// Single TCP connection with reusable buffers.
struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: BytesMut,
    // Last applied socket timeouts, to skip redundant setsockopt calls.
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Connection {
    fn connect(config: &PoolConfig, ctx: &OpContext) -> CacheResult<Self> {
        let stream = connect_stream(config, ctx)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: BytesMut::with_capacity(256),
            read_timeout: None,
            write_timeout: None,
        })
    }

    fn round_trip(
        &mut self,
        config: &PoolConfig,
        ctx: &OpContext,
        commands: &[&[&[u8]]],
    ) -> CacheResult<Vec<RespValue>> {
        self.apply_timeouts(
            ctx.clamp(config.read_timeout)?,
            ctx.clamp(config.write_timeout)?,
        )?;

        self.write_buf.clear();
        for args in commands {
            if let Some(name) = args.first() {
                trace!(command = %String::from_utf8_lossy(name), "send");
            }
            encode_command(*args, &mut self.write_buf);
        }

        let stream = self.reader.get_mut();
        stream
            .write_all(&self.write_buf)
            .and_then(|()| stream.flush())
            .map_err(CacheError::from_io)?;

        let mut replies = Vec::with_capacity(commands.len());
        for _ in commands {
            let reply = read_response(&mut self.reader, &mut self.line_buf).map_err(|err| match err {
                CacheError::Io(io) => CacheError::from_io(io),
                other => other,
            })?;
            replies.push(reply);
        }
        Ok(replies)
    }

    fn apply_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> CacheResult<()> {
        let stream = self.reader.get_ref();
        if read != self.read_timeout {
            stream.set_read_timeout(read)?;
            self.read_timeout = read;
        }
        if write != self.write_timeout {
            stream.set_write_timeout(write)?;
            self.write_timeout = write;
        }
        Ok(())
    }
}

fn connect_stream(config: &PoolConfig, ctx: &OpContext) -> CacheResult<TcpStream> {
    let addrs: Vec<_> = config.addr.to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(CacheError::InvalidAddress(config.addr.clone()));
    }

    let timeout = ctx.clamp(config.connect_timeout)?;
    let mut last_err = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err
        .map(CacheError::from_io)
        .unwrap_or_else(|| CacheError::InvalidAddress(config.addr.clone())))
}
