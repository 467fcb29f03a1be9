//! Rolling-window chunk throttle.
//!
//! The [`Throttle`] keeps downloads under a conservative throughput ceiling
//! by counting consumed chunk units inside a rolling time window and
//! stalling the pipeline when the window's budget is spent. It is a
//! leaky-window limiter, not a token bucket: bursts up to the limit are
//! allowed before the stall, which is the right trade for "do not get
//! banned by the data host" rather than precise QoS.
//!
//! The throttle is owned by the orchestrator and passed by reference into
//! the fetch path; there is no process-wide throttle state.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::shutdown::{Interrupted, interruptible_sleep};

/// Rolling-window chunk budget.
///
/// Single-threaded by design: the sequential orchestration is the only
/// mutator, so the counters need no synchronization.
#[derive(Debug)]
pub struct Throttle {
    /// Length of one throttle window.
    window: Duration,
    /// Chunk budget per window.
    max_units: u64,
    /// Units consumed in the current window.
    units_consumed: u64,
    /// Start of the current window.
    window_start: Instant,
    /// Shutdown signal observed during stalls.
    shutdown: CancellationToken,
}

impl Throttle {
    /// Creates a throttle with a fresh window starting now.
    #[must_use]
    pub fn new(window: Duration, max_units: u64, shutdown: CancellationToken) -> Self {
        Self {
            window,
            max_units,
            units_consumed: 0,
            window_start: Instant::now(),
            shutdown,
        }
    }

    /// Enforces the window budget before the next resource fetch.
    ///
    /// When the window has fully elapsed, a fresh window starts and the
    /// counter resets, exactly once per elapsed window. When the budget is
    /// exceeded inside a live window, the call stalls for the remainder of
    /// the window and returns without resetting; the next call observes the
    /// elapsed window and performs the reset.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] when shutdown fires during the stall.
    pub async fn wait(&mut self) -> Result<(), Interrupted> {
        match self.window.checked_sub(self.window_start.elapsed()) {
            None => self.start_fresh_window(),
            Some(remaining) if self.units_consumed > self.max_units => {
                info!(
                    units = self.units_consumed,
                    budget = self.max_units,
                    pause_secs = remaining.as_secs(),
                    "chunk budget exceeded, pausing until window ends"
                );
                interruptible_sleep(remaining, &self.shutdown).await?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Records one consumed chunk unit.
    pub fn count(&mut self) {
        self.units_consumed += 1;
    }

    /// Units consumed in the current window.
    #[must_use]
    pub fn units_consumed(&self) -> u64 {
        self.units_consumed
    }

    fn start_fresh_window(&mut self) {
        debug!(
            previous_units = self.units_consumed,
            "starting fresh throttle window"
        );
        self.units_consumed = 0;
        self.window_start = Instant::now();
    }
}
