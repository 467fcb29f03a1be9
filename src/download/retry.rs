//! Retry budget for transient transport failures.
//!
//! Only connection-level failures are replayed: a dropped connection or a
//! read timeout mid-stream may succeed on a fresh attempt, while bad
//! status codes, authentication failures, and local IO errors will not.
//! Backoff is a fixed configured pause between attempts: the goal is to
//! ride out brief network hiccups, not to shape load.

use std::time::Duration;

use tracing::debug;

use super::DownloadError;

/// Decision on whether to replay a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the fetch after the backoff pause.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed).
        attempt: u32,
    },

    /// Do not retry the fetch.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Per-resource retry budget with fixed backoff.
///
/// A fresh budget applies to every resource; the counter is owned by the
/// orchestrator's attempt loop, not by this policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,
    /// Fixed pause between attempts.
    backoff: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether the failed attempt should be replayed.
    ///
    /// # Arguments
    ///
    /// * `error` - the failure from the attempt that just ran
    /// * `attempt` - the attempt number that just failed (1-indexed)
    #[must_use]
    pub fn should_retry(&self, error: &DownloadError, attempt: u32) -> RetryDecision {
        if !is_transient(error) {
            return RetryDecision::DoNotRetry {
                reason: "failure is not connection-level - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "attempt budget exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("attempt budget ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry {
            delay: self.backoff,
            attempt: attempt + 1,
        }
    }
}

/// Returns true for connection-level transport failures worth replaying.
///
/// Everything else (bad status, IO, authentication, interruption) is
/// fatal and must propagate.
#[must_use]
pub fn is_transient(error: &DownloadError) -> bool {
    matches!(
        error,
        DownloadError::Network { .. } | DownloadError::Timeout { .. }
    )
}
