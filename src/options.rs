//! # Per-Call Options
//!
//! Most facade APIs accept an [`Options`] record controlling blocking
//! behavior and delivery mode. Two knobs exist and they may be combined:
//!
//! - **Timeout** — a microsecond bound on how long the call may block.
//!   [`TIMEOUT_NONBLOCK`] (zero) turns the call into a poll,
//!   [`TIMEOUT_INFINITE`] waits without bound, and any other value is a
//!   bounded wait, clamped to [`TIMEOUT_MAX_US`].
//! - **Sync mode** — for event posting only: deliver all matching callbacks
//!   in the caller's thread before the post returns, instead of queueing for
//!   the dispatcher worker.
//!
//! An absent options record (i.e. [`Options::default()`]) means asynchronous,
//! possibly-blocking, infinite-timeout behavior.

use std::time::Duration;

/// Timeout value meaning "do not block; poll once".
pub const TIMEOUT_NONBLOCK: u64 = 0;

/// Timeout value meaning "wait without bound".
pub const TIMEOUT_INFINITE: u64 = u64::MAX;

/// Upper clamp for bounded waits: 24 hours, in microseconds.
pub const TIMEOUT_MAX_US: u64 = 24 * 60 * 60 * 1_000_000;

/// How long a blocking call is allowed to wait.
///
/// Derived from the raw microsecond field of [`Options`]; backends branch on
/// this instead of re-interpreting magic values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Poll once and return immediately.
    NonBlock,
    /// Wait at most this long.
    Bounded(Duration),
    /// Wait until the operation completes.
    Forever,
}

/// Options accepted by the facade APIs.
///
/// Value type, cheap to copy. Builders compose:
///
/// ```
/// use ioc_runtime::options::Options;
///
/// let opt = Options::new().sync().timeout_us(1_000_000);
/// assert!(opt.is_sync());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    timeout_us: Option<u64>,
    sync_mode: bool,
}

impl Options {
    /// Default options: asynchronous delivery, infinite timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request synchronous in-caller delivery (event posting).
    pub fn sync(mut self) -> Self {
        self.sync_mode = true;
        self
    }

    /// Bound blocking waits to `us` microseconds.
    ///
    /// `0` is [`TIMEOUT_NONBLOCK`]; `u64::MAX` is [`TIMEOUT_INFINITE`].
    /// Values above [`TIMEOUT_MAX_US`] are clamped when the wait is derived.
    pub fn timeout_us(mut self, us: u64) -> Self {
        self.timeout_us = Some(us);
        self
    }

    /// Shorthand for a non-blocking poll.
    pub fn nonblock() -> Self {
        Self::new().timeout_us(TIMEOUT_NONBLOCK)
    }

    /// Whether synchronous in-caller delivery was requested.
    pub fn is_sync(&self) -> bool {
        self.sync_mode
    }

    /// Whether the call must not block at all.
    pub fn is_nonblock(&self) -> bool {
        self.timeout_us == Some(TIMEOUT_NONBLOCK)
    }

    /// The blocking bound this record implies.
    pub fn wait(&self) -> Wait {
        match self.timeout_us {
            Some(TIMEOUT_NONBLOCK) => Wait::NonBlock,
            None | Some(TIMEOUT_INFINITE) => Wait::Forever,
            Some(us) => Wait::Bounded(Duration::from_micros(us.min(TIMEOUT_MAX_US))),
        }
    }
}
