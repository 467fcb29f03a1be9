//! Streamed archive downloading with throttling and retry classification.
//!
//! This module contains the download side of the pipeline:
//!
//! - [`Throttle`] - rolling-window chunk budget enforcing a conservative
//!   throughput ceiling
//! - [`ResourceLocator`] - pure derivation of remote URL and local path for
//!   a (resource, variant) pair
//! - [`Downloader`] - one streamed fetch with per-chunk sentinel detection
//! - [`RetryPolicy`] - fixed-backoff retry budget for transport failures

mod error;
mod fetcher;
mod locator;
mod retry;
mod throttle;

pub use error::DownloadError;
pub use fetcher::{Downloader, NOT_FOUND_SENTINEL};
pub use locator::{DownloadTarget, ResourceLocator};
pub use retry::{RetryDecision, RetryPolicy, is_transient};
pub use throttle::Throttle;
