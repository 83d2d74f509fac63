//! # Operation Context
//!
//! Purpose: Bound how long one logical operation may block, across pool
//! acquisition, retry backoff and every wire round trip.
//!
//! A context carries an absolute deadline and/or a shared cancellation flag.
//! The pool checks it before each acquisition attempt and while backing off;
//! connections check it before each round trip and clamp socket timeouts to
//! the time that is left.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{CacheError, CacheResult};

/// Backoff sleeps are split into slices of this length so cancellation is
/// noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Shared flag used to cancel in-flight operations from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every operation holding a clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Deadline and cancellation for one operation.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl OpContext {
    /// A context with no deadline and no cancellation.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline(Instant::now() + timeout)
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails with `Cancelled` or `Timeout` when the operation must stop.
    pub fn check(&self) -> CacheResult<()> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(CacheError::Cancelled);
        }
        match self.remaining() {
            Some(left) if left.is_zero() => Err(CacheError::Timeout),
            _ => Ok(()),
        }
    }

    /// Combines a configured socket timeout with the remaining time.
    pub(crate) fn clamp(&self, configured: Option<Duration>) -> CacheResult<Option<Duration>> {
        self.check()?;
        Ok(match (configured, self.remaining()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }

    /// Sleeps for `duration`, returning early with an error on cancellation or
    /// when the deadline would pass first.
    pub(crate) fn sleep(&self, duration: Duration) -> CacheResult<()> {
        self.check()?;
        if self.remaining().is_some_and(|left| left <= duration) {
            return Err(CacheError::Timeout);
        }

        let until = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            thread::sleep(SLEEP_SLICE.min(until - now));
            self.check()?;
        }
    }
}
