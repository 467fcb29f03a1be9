//! Sequential batch driver.
//!
//! The orchestrator walks the catalog in order, applies the resource and
//! variant filters, paces each resource through the throttle, wraps every
//! fetch in the per-resource retry budget, and hands completed archives to
//! the extractor. One fetch is in flight at a time; the throttle and the
//! live session are owned here and passed down by reference.

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::download::{
    DownloadError, DownloadTarget, Downloader, ResourceLocator, RetryDecision, RetryPolicy,
    Throttle,
};
use crate::extract::{ArchiveExtractor, ExtractError};
use crate::session::{SessionClient, SessionError};
use crate::shutdown::{Interrupted, interruptible_sleep};

/// Fatal errors that abort a batch run.
///
/// Everything recoverable (not-found resources, transport retries, corrupt
/// archives) is handled inside the loop; what escapes here ends the run.
#[derive(Debug, Error)]
pub enum RunError {
    /// A fetch failed with a non-retryable error.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Archive handling hit a filesystem or runtime fault.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Login or re-authentication failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The run was interrupted by the shutdown signal.
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// Counters aggregated over one batch run.
#[derive(Debug, Default)]
pub struct BatchStats {
    downloaded: usize,
    not_found: usize,
    extracted: usize,
    skipped: usize,
    retries: usize,
}

impl BatchStats {
    /// Archives successfully downloaded.
    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.downloaded
    }

    /// Resources the remote signalled as absent.
    #[must_use]
    pub fn not_found(&self) -> usize {
        self.not_found
    }

    /// Archives successfully extracted.
    #[must_use]
    pub fn extracted(&self) -> usize {
        self.extracted
    }

    /// Resources skipped after exhausting the transport retry budget.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Backoff retries performed across the run.
    #[must_use]
    pub fn retries(&self) -> usize {
        self.retries
    }
}

/// Outcome of one resource fetch after retry wrapping.
enum FetchOutcome {
    /// Archive downloaded (or reachable, in dry-run mode).
    Found,
    /// Remote signalled the resource is absent.
    NotFound,
    /// Transport retry budget exhausted; resource skipped.
    Exhausted,
}

/// Drives one batch run over a catalog.
pub struct Orchestrator {
    session: SessionClient,
    throttle: Throttle,
    locator: ResourceLocator,
    downloader: Downloader,
    retry: RetryPolicy,
    resource_filter: Option<HashSet<String>>,
    variant_filter: Option<Vec<String>>,
    overwrite: bool,
    dry_run: bool,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Builds an orchestrator and its components from the run
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Client`] when the HTTP client cannot be
    /// constructed.
    pub fn new(
        config: &Config,
        resource_filter: Option<HashSet<String>>,
        shutdown: CancellationToken,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            session: SessionClient::new(config, shutdown.clone())?,
            throttle: Throttle::new(
                config.period_duration,
                config.chunks_per_period,
                shutdown.clone(),
            ),
            locator: ResourceLocator::new(&config.base_url, config.downloads_dir.clone()),
            downloader: Downloader::new(config.chunk_length, config.dry_run),
            retry: RetryPolicy::new(config.max_attempts, config.retry_backoff),
            resource_filter,
            variant_filter: config.variant_filter.clone(),
            overwrite: config.overwrite,
            dry_run: config.dry_run,
            shutdown,
        })
    }

    /// Runs the batch: logs in once, then processes the catalog in order.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] on login failure, non-retryable fetch errors,
    /// filesystem faults, or shutdown.
    #[instrument(skip(self, catalog))]
    pub async fn run(&mut self, catalog: &Catalog) -> Result<BatchStats, RunError> {
        let mut stats = BatchStats::default();

        self.session.login().await?;

        for entry in catalog.entries() {
            self.throttle.wait().await?;

            if !self.resource_selected(&entry.resource_id) {
                debug!(resource = %entry.resource_id, "resource filtered out");
                continue;
            }
            info!(
                resource = %entry.resource_id,
                variants = entry.variants.len(),
                "processing resource"
            );

            let resource_dir = self.locator.resource_dir(&entry.resource_id);
            if !self.dry_run {
                self.prepare_resource_dir(&resource_dir).await?;
            }

            let mut extractor = ArchiveExtractor::new(&resource_dir);
            for variant in &entry.variants {
                if !self.variant_selected(variant) {
                    debug!(resource = %entry.resource_id, variant = %variant, "variant filtered out");
                    continue;
                }

                let target = self.locator.target(&entry.resource_id, variant);
                match self.fetch_with_retry(&target, &mut stats).await? {
                    FetchOutcome::Found => {
                        stats.downloaded += 1;
                        if !self.dry_run {
                            extractor.extract(&target.local_path).await?;
                        }
                    }
                    FetchOutcome::NotFound => stats.not_found += 1,
                    FetchOutcome::Exhausted => stats.skipped += 1,
                }
            }

            if !self.dry_run {
                extractor.tidy_up().await?;
                stats.extracted += extractor.extracted();
            }
        }

        info!(
            downloaded = stats.downloaded,
            not_found = stats.not_found,
            extracted = stats.extracted,
            skipped = stats.skipped,
            retries = stats.retries,
            "batch finished"
        );
        Ok(stats)
    }

    /// Attempts one fetch within the retry budget.
    ///
    /// Connection-level failures sleep the fixed backoff and retry; budget
    /// exhaustion skips the resource; every other error is fatal and
    /// propagates: authentication and URL-construction failures are never
    /// swallowed.
    async fn fetch_with_retry(
        &mut self,
        target: &DownloadTarget,
        stats: &mut BatchStats,
    ) -> Result<FetchOutcome, RunError> {
        let mut attempt = 1;
        loop {
            let error = match self
                .downloader
                .fetch(target, &mut self.session, &mut self.throttle)
                .await
            {
                Ok(true) => return Ok(FetchOutcome::Found),
                Ok(false) => return Ok(FetchOutcome::NotFound),
                Err(error) => error,
            };

            match self.retry.should_retry(&error, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    warn!(
                        %error,
                        attempt,
                        backoff_secs = delay.as_secs(),
                        "transport failure, backing off before retry"
                    );
                    stats.retries += 1;
                    interruptible_sleep(delay, &self.shutdown).await?;
                    attempt = next_attempt;
                }
                RetryDecision::DoNotRetry { reason } => {
                    if crate::download::is_transient(&error) {
                        warn!(%error, %reason, url = %target.remote_url, "skipping resource");
                        return Ok(FetchOutcome::Exhausted);
                    }
                    return Err(error.into());
                }
            }
        }
    }

    /// Applies the overwrite policy and creates the resource directory.
    async fn prepare_resource_dir(&self, dir: &Path) -> Result<(), DownloadError> {
        if tokio::fs::metadata(dir).await.is_ok() {
            if !self.overwrite {
                return Err(DownloadError::destination_exists(dir.to_path_buf()));
            }
            debug!(dir = %dir.display(), "overwriting existing resource directory");
            tokio::fs::remove_dir_all(dir)
                .await
                .map_err(|e| DownloadError::io(dir.to_path_buf(), e))?;
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DownloadError::io(dir.to_path_buf(), e))
    }

    fn resource_selected(&self, resource_id: &str) -> bool {
        self.resource_filter
            .as_ref()
            .is_none_or(|filter| filter.contains(resource_id))
    }

    fn variant_selected(&self, variant: &str) -> bool {
        self.variant_filter
            .as_ref()
            .is_none_or(|filter| filter.iter().any(|wanted| wanted == variant))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config() -> Config {
        Config {
            credentials: Credentials::new("alice", "secret").unwrap(),
            catalog_file: PathBuf::from("datasets.csv"),
            downloads_dir: PathBuf::from("/tmp"),
            login_url: "http://localhost/".to_string(),
            base_url: "http://localhost/download/".to_string(),
            period_duration: Duration::from_secs(600),
            chunks_per_period: 1000,
            chunk_length: 1024,
            relogin_delay: Duration::from_millis(10),
            max_relogin_attempts: 3,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            variant_filter: None,
            resources_file: None,
            overwrite: false,
            dry_run: false,
            connect_timeout_secs: 30,
            read_timeout_secs: 30,
        }
    }

    fn orchestrator(config: &Config, resource_filter: Option<HashSet<String>>) -> Orchestrator {
        Orchestrator::new(config, resource_filter, CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn test_no_filters_select_everything() {
        let orchestrator = orchestrator(&test_config(), None);
        assert!(orchestrator.resource_selected("site-01"));
        assert!(orchestrator.variant_selected("cam"));
    }

    #[tokio::test]
    async fn test_resource_filter_restricts_selection() {
        let filter: HashSet<String> = ["site-01".to_string()].into();
        let orchestrator = orchestrator(&test_config(), Some(filter));
        assert!(orchestrator.resource_selected("site-01"));
        assert!(!orchestrator.resource_selected("site-02"));
    }

    #[tokio::test]
    async fn test_variant_filter_restricts_selection() {
        let config = Config {
            variant_filter: Some(vec!["cam".to_string()]),
            ..test_config()
        };
        let orchestrator = orchestrator(&config, None);
        assert!(orchestrator.variant_selected("cam"));
        assert!(!orchestrator.variant_selected("lidar"));
    }

    #[tokio::test]
    async fn test_prepare_resource_dir_creates_fresh_directory() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&test_config(), None);

        let dir = temp_dir.path().join("site-01");
        orchestrator.prepare_resource_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_prepare_resource_dir_rejects_existing_without_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = orchestrator(&test_config(), None);

        let dir = temp_dir.path().join("site-01");
        std::fs::create_dir(&dir).unwrap();

        match orchestrator.prepare_resource_dir(&dir).await {
            Err(DownloadError::DestinationExists { .. }) => {}
            other => panic!("Expected DestinationExists, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prepare_resource_dir_overwrite_replaces_contents() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            overwrite: true,
            ..test_config()
        };
        let orchestrator = orchestrator(&config, None);

        let dir = temp_dir.path().join("site-01");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("stale.txt"), b"old run").unwrap();

        orchestrator.prepare_resource_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert!(!dir.join("stale.txt").exists());
    }
}
