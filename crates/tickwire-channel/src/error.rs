//! Channel-engine error type.
//!
//! Every error carries a stable sub-code and, where a syscall failed,
//! the OS errno. Transient kinds (`NoBuffers`, `WouldBlock`) ask the
//! caller to retry after a flush; everything else either kills the
//! message or the channel, per the session layer's classification.

use thiserror::Error;
use tickwire_session::SessionError;

/// Result alias used throughout the channel engine.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors surfaced by the channel engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Output buffer pool exhausted; retry after a flush completes.
    #[error("no output buffers available")]
    NoBuffers,

    /// Non-blocking operation deferred; retry on the next readiness.
    #[error("operation would block")]
    WouldBlock,

    /// A previous flush failed; the channel may still be usable.
    #[error("write flush failed: {0}")]
    WriteFlushFailed(String),

    /// An OS call failed.
    #[error("system failure: {text}")]
    SystemFailure {
        /// OS errno when the syscall reported one.
        errno: Option<i32>,
        /// One line describing where and why.
        text: String,
    },

    /// The framing/session layer rejected something.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The channel is closed; no further operations are possible.
    #[error("channel is closed")]
    Closed,

    /// An argument violated the call contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Anything else.
    #[error("failure: {0}")]
    Failure(String),
}

impl ChannelError {
    /// Stable numeric sub-code for programmatic discrimination.
    #[must_use]
    pub fn sub_code(&self) -> i32 {
        match self {
            Self::NoBuffers => -61,
            Self::WouldBlock => -62,
            Self::WriteFlushFailed(_) => -63,
            Self::SystemFailure { .. } => -64,
            Self::Session(e) => e.sub_code(),
            Self::Closed => -65,
            Self::InvalidArgument(_) => -66,
            Self::Failure(_) => -67,
        }
    }

    /// True when retrying the same call later can succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoBuffers | Self::WouldBlock)
    }

    /// Wrap an I/O error, keeping the errno.
    #[must_use]
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        Self::SystemFailure { errno: err.raw_os_error(), text: format!("{context}: {err}") }
    }
}

/// Escalation counter for per-message decode failures.
///
/// A malformed message kills that message, not the channel — but a
/// peer producing a stream of them is misbehaving. The embedder feeds
/// each decode failure in; once the budget sees more than `limit`
/// failures inside one `window`, it says close.
#[derive(Debug, Clone)]
pub struct ErrorBudget {
    limit: u32,
    window: std::time::Duration,
    window_start: Option<std::time::Instant>,
    count: u32,
}

impl ErrorBudget {
    /// Default: ten failures in ten seconds.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(10, std::time::Duration::from_secs(10))
    }

    /// A budget of `limit` failures per `window`.
    #[must_use]
    pub fn with_limits(limit: u32, window: std::time::Duration) -> Self {
        Self { limit, window, window_start: None, count: 0 }
    }

    /// Record one decode failure. Returns true when the channel should
    /// be closed as misbehaving.
    pub fn record(&mut self, now: std::time::Instant) -> bool {
        match self.window_start {
            Some(start) if now.duration_since(start) <= self.window => {
                self.count += 1;
            }
            _ => {
                self.window_start = Some(now);
                self.count = 1;
            }
        }
        self.count > self.limit
    }
}

impl Default for ErrorBudget {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_escalates_inside_the_window() {
        let mut budget = ErrorBudget::with_limits(3, std::time::Duration::from_secs(10));
        let t0 = std::time::Instant::now();
        assert!(!budget.record(t0));
        assert!(!budget.record(t0));
        assert!(!budget.record(t0));
        assert!(budget.record(t0), "fourth failure crosses the limit");
    }

    #[test]
    fn budget_resets_after_the_window() {
        let mut budget = ErrorBudget::with_limits(1, std::time::Duration::from_secs(1));
        let t0 = std::time::Instant::now();
        assert!(!budget.record(t0));
        // A failure well past the window opens a fresh one.
        assert!(!budget.record(t0 + std::time::Duration::from_secs(5)));
    }

    #[test]
    fn transient_kinds() {
        assert!(ChannelError::NoBuffers.is_transient());
        assert!(ChannelError::WouldBlock.is_transient());
        assert!(!ChannelError::Closed.is_transient());
    }

    #[test]
    fn errno_is_preserved() {
        let io = std::io::Error::from_raw_os_error(111);
        let err = ChannelError::from_io("connect", &io);
        let ChannelError::SystemFailure { errno, text } = err else { unreachable!() };
        assert_eq!(errno, Some(111));
        assert!(text.starts_with("connect: "));
    }
}
