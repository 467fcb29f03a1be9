//! Streamed fetch of one archive resource.
//!
//! One [`Downloader::fetch`] call drives a single resource: it issues the
//! GET through the authenticated session, re-authenticates when the
//! session-expiry heuristic trips, re-chunks the body into fixed-size
//! units for the throttle, watches every unit for the remote "not found"
//! sentinel, and streams the payload to the destination path with
//! guaranteed cleanup on every early exit.
//!
//! Partial-write strategy: written-then-discarded. The destination file is
//! created as soon as the stream opens and deleted before `fetch` returns
//! `false` (sentinel) or an error, so a negative outcome never leaves
//! partial bytes behind.

use std::path::Path;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::Response;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use super::error::DownloadError;
use super::locator::DownloadTarget;
use super::throttle::Throttle;
use crate::session::{SessionClient, SessionError};

/// Marker the remote API streams in place of a missing archive.
///
/// The server signals absence with HTTP success and this literal in the
/// body, so it must be watched for during streaming, not after.
pub const NOT_FOUND_SENTINEL: &[u8] = b"File not found.";

/// What happened to one re-chunked unit of the response body.
#[derive(Debug, PartialEq, Eq)]
enum UnitOutcome {
    /// Unit was counted and appended to the destination.
    Written,
    /// Unit carried the not-found sentinel; the fetch must abort.
    Sentinel,
}

/// Outcome of consuming a full response stream.
#[derive(Debug, PartialEq, Eq)]
enum StreamOutcome {
    /// Clean end of stream; destination is complete and flushed.
    Complete,
    /// Not-found sentinel seen; destination must be discarded.
    NotFound,
}

/// Drives single-resource fetches through the session and throttle.
///
/// The downloader holds no session or throttle state of its own; both are
/// owned by the orchestrator and passed in by reference, so one fetch is
/// in flight at a time.
#[derive(Debug, Clone)]
pub struct Downloader {
    /// Size of one throttle unit in bytes.
    chunk_len: usize,
    /// Check URLs without writing anything.
    dry_run: bool,
}

impl Downloader {
    /// Creates a downloader with the configured chunk unit size.
    #[must_use]
    pub fn new(chunk_len: usize, dry_run: bool) -> Self {
        Self {
            chunk_len: chunk_len.max(1),
            dry_run,
        }
    }

    /// Fetches one resource to its destination path.
    ///
    /// Returns `Ok(true)` when the archive was downloaded (or, in dry-run
    /// mode, when the URL is reachable), and `Ok(false)` when the remote
    /// signalled the resource is absent, which is a legitimate negative result,
    /// not an error.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::BadStatus`] on a non-success response
    /// - [`DownloadError::Session`] when re-authentication fails or the
    ///   relogin budget is exhausted
    /// - [`DownloadError::Network`] / [`DownloadError::Timeout`] on
    ///   connection-level failures (retryable by the orchestrator)
    /// - [`DownloadError::Io`] on filesystem failures
    #[instrument(skip(self, session, throttle), fields(url = %target.remote_url))]
    pub async fn fetch(
        &self,
        target: &DownloadTarget,
        session: &mut SessionClient,
        throttle: &mut Throttle,
    ) -> Result<bool, DownloadError> {
        let response = self.request_with_relogin(target, session).await?;

        if self.dry_run {
            info!("dry run: resource URL is reachable");
            return Ok(true);
        }

        debug!(path = %target.local_path.display(), "downloading");
        let file = File::create(&target.local_path)
            .await
            .map_err(|e| DownloadError::io(target.local_path.clone(), e))?;
        let mut writer = BufWriter::new(file);

        let outcome = self
            .consume_stream(response, &mut writer, throttle, target)
            .await;

        // Close the handle before deciding the file's fate.
        drop(writer);
        match outcome {
            Ok(StreamOutcome::Complete) => {
                info!(path = %target.local_path.display(), "download complete");
                Ok(true)
            }
            Ok(StreamOutcome::NotFound) => {
                info!("resource not found at this URL");
                tokio::fs::remove_file(&target.local_path)
                    .await
                    .map_err(|e| DownloadError::io(target.local_path.clone(), e))?;
                Ok(false)
            }
            Err(error) => {
                debug!(path = %target.local_path.display(), "discarding partial file after error");
                let _ = tokio::fs::remove_file(&target.local_path).await;
                Err(error)
            }
        }
    }

    /// Issues the GET, re-authenticating while the expiry heuristic trips.
    ///
    /// One replay per detection; the detection loop itself is bounded by
    /// the session's relogin budget so a broken login can never spin
    /// forever.
    async fn request_with_relogin(
        &self,
        target: &DownloadTarget,
        session: &mut SessionClient,
    ) -> Result<Response, DownloadError> {
        let mut response = issue_request(session, &target.remote_url).await?;

        let mut relogins = 0;
        while SessionClient::is_session_expired(&response) {
            relogins += 1;
            if relogins > session.max_relogin_attempts() {
                return Err(SessionError::ReloginExhausted {
                    attempts: session.max_relogin_attempts(),
                }
                .into());
            }
            warn!(attempt = relogins, "session expired, re-authenticating");
            session.relogin().await?;
            response = issue_request(session, &target.remote_url).await?;
        }
        Ok(response)
    }

    /// Re-chunks the body into fixed-size units and feeds them through the
    /// sentinel check, the throttle, and the writer.
    async fn consume_stream(
        &self,
        response: Response,
        writer: &mut BufWriter<File>,
        throttle: &mut Throttle,
        target: &DownloadTarget,
    ) -> Result<StreamOutcome, DownloadError> {
        let mut stream = response.bytes_stream();
        let mut pending = BytesMut::new();

        while let Some(next) = stream.next().await {
            let bytes = next.map_err(|e| DownloadError::from_reqwest(&target.remote_url, e))?;
            pending.extend_from_slice(&bytes);

            while pending.len() >= self.chunk_len {
                let unit = pending.split_to(self.chunk_len).freeze();
                if self.consume_unit(&unit, writer, throttle, &target.local_path).await?
                    == UnitOutcome::Sentinel
                {
                    return Ok(StreamOutcome::NotFound);
                }
            }
        }

        // Trailing partial unit.
        if !pending.is_empty() {
            let unit = pending.freeze();
            if self.consume_unit(&unit, writer, throttle, &target.local_path).await?
                == UnitOutcome::Sentinel
            {
                return Ok(StreamOutcome::NotFound);
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(target.local_path.clone(), e))?;
        Ok(StreamOutcome::Complete)
    }

    /// Processes one unit: sentinel check first, then throttle count, then
    /// append (empty keep-alive units are counted but not written).
    async fn consume_unit(
        &self,
        unit: &Bytes,
        writer: &mut BufWriter<File>,
        throttle: &mut Throttle,
        path: &Path,
    ) -> Result<UnitOutcome, DownloadError> {
        if contains_sentinel(unit) {
            return Ok(UnitOutcome::Sentinel);
        }

        throttle.count();

        if !unit.is_empty() {
            writer
                .write_all(unit)
                .await
                .map_err(|e| DownloadError::io(path.to_path_buf(), e))?;
        }
        Ok(UnitOutcome::Written)
    }
}

/// Issues a streamed GET through the session, rejecting non-success
/// statuses.
async fn issue_request(
    session: &SessionClient,
    url: &str,
) -> Result<Response, DownloadError> {
    let response = session
        .inner()
        .get(url)
        .send()
        .await
        .map_err(|e| DownloadError::from_reqwest(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::bad_status(url, status.as_u16()));
    }
    Ok(response)
}

/// Returns true when the unit carries the not-found sentinel.
fn contains_sentinel(unit: &[u8]) -> bool {
    unit.windows(NOT_FOUND_SENTINEL.len())
        .any(|window| window == NOT_FOUND_SENTINEL)
}
