//! Interruptible sleeps for graceful shutdown.
//!
//! Every pause in the pipeline (throttle stall, relogin delay, retry
//! backoff) races against a shared [`CancellationToken`] so that Ctrl-C
//! ends the run at the next suspension point instead of waiting out a
//! potentially multi-minute sleep.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The run was interrupted by the shutdown signal mid-pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted by shutdown signal")]
pub struct Interrupted;

/// Sleeps for `duration` unless the shutdown token fires first.
///
/// # Errors
///
/// Returns [`Interrupted`] when the token is cancelled before the sleep
/// completes.
pub async fn interruptible_sleep(
    duration: Duration,
    shutdown: &CancellationToken,
) -> Result<(), Interrupted> {
    tokio::select! {
        () = shutdown.cancelled() => Err(Interrupted),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}
