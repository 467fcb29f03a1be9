//! Tar extraction and per-resource cleanup.
//!
//! One [`ArchiveExtractor`] is scoped to a single resource's variant loop.
//! Each completed archive is unpacked into the resource directory and then
//! deleted; a malformed archive is a skippable per-resource failure, not a
//! fatal one, so a single corrupt file never halts a multi-resource batch.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors raised by archive extraction.
///
/// Unpack failures are handled internally (logged, archive discarded);
/// only filesystem and runtime faults surface.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Filesystem error while deleting an archive or pruning a directory.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The blocking extraction task failed to run to completion.
    #[error("extraction task failed: {0}")]
    Task(#[source] tokio::task::JoinError),
}

impl ExtractError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Extracts one resource's archives and tracks batch success.
#[derive(Debug)]
pub struct ArchiveExtractor {
    /// Directory archives are unpacked into.
    dest_dir: PathBuf,
    /// Number of archives successfully unpacked in this batch.
    extracted: usize,
}

impl ArchiveExtractor {
    /// Creates an extractor for one resource's batch.
    #[must_use]
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            extracted: 0,
        }
    }

    /// Unpacks a downloaded tar archive into the batch directory, then
    /// deletes the archive.
    ///
    /// A malformed or unreadable archive is logged at WARN and skipped;
    /// the archive file is deleted in all cases so retries of the batch
    /// start clean.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Io`] when the archive cannot be deleted and
    /// [`ExtractError::Task`] when the blocking unpack task is cancelled
    /// or panics.
    #[instrument(skip(self), fields(path = %archive_path.display()))]
    pub async fn extract(&mut self, archive_path: &Path) -> Result<(), ExtractError> {
        debug!(dest = %self.dest_dir.display(), "unpacking archive");

        let archive = archive_path.to_path_buf();
        let dest = self.dest_dir.clone();
        let unpacked = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = std::fs::File::open(&archive)?;
            tar::Archive::new(file).unpack(&dest)
        })
        .await
        .map_err(ExtractError::Task)?;

        match unpacked {
            Ok(()) => {
                self.extracted += 1;
                info!("archive unpacked");
            }
            Err(error) => {
                warn!(%error, "failed to unpack archive, discarding it");
            }
        }

        tokio::fs::remove_file(archive_path)
            .await
            .map_err(|e| ExtractError::io(archive_path.to_path_buf(), e))?;
        Ok(())
    }

    /// Number of archives successfully unpacked in this batch.
    #[must_use]
    pub fn extracted(&self) -> usize {
        self.extracted
    }

    /// End-of-batch hook: prunes the resource directory when the batch
    /// produced nothing.
    ///
    /// Extraction writes directly into the final directory, so there is no
    /// staging to unwind; an empty batch just removes the directory that
    /// was created for it.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Io`] when the directory cannot be removed.
    pub async fn tidy_up(&self) -> Result<(), ExtractError> {
        if self.extracted != 0 {
            return Ok(());
        }
        if !self.dest_dir.exists() {
            return Ok(());
        }

        info!(
            dir = %self.dest_dir.display(),
            "no archives extracted, pruning resource directory"
        );
        tokio::fs::remove_dir_all(&self.dest_dir)
            .await
            .map_err(|e| ExtractError::io(self.dest_dir.clone(), e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Builds an in-memory tar archive holding one file.
    fn tar_bytes(name: &str, contents: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents).unwrap();
        builder.into_inner().unwrap()
    }

    #[tokio::test]
    async fn test_extract_unpacks_and_deletes_archive() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("site-01");
        std::fs::create_dir(&dest).unwrap();

        let archive_path = dest.join("site-01_cam.tar");
        std::fs::write(&archive_path, tar_bytes("frames.txt", b"frame data")).unwrap();

        let mut extractor = ArchiveExtractor::new(&dest);
        extractor.extract(&archive_path).await.unwrap();

        assert_eq!(extractor.extracted(), 1);
        assert!(!archive_path.exists(), "archive must be deleted");
        assert_eq!(
            std::fs::read(dest.join("frames.txt")).unwrap(),
            b"frame data"
        );
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_skipped_and_deleted() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("site-01");
        std::fs::create_dir(&dest).unwrap();

        let archive_path = dest.join("site-01_cam.tar");
        std::fs::write(&archive_path, b"this is not a tar archive").unwrap();

        let mut extractor = ArchiveExtractor::new(&dest);
        let result = extractor.extract(&archive_path).await;

        assert!(result.is_ok(), "corrupt archive is non-fatal: {result:?}");
        assert_eq!(extractor.extracted(), 0);
        assert!(!archive_path.exists(), "corrupt archive must still be deleted");
    }

    #[tokio::test]
    async fn test_tidy_up_prunes_directory_when_nothing_extracted() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("site-01");
        std::fs::create_dir(&dest).unwrap();

        let extractor = ArchiveExtractor::new(&dest);
        extractor.tidy_up().await.unwrap();

        assert!(!dest.exists(), "empty batch directory must be pruned");
    }

    #[tokio::test]
    async fn test_tidy_up_keeps_directory_with_extractions() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("site-01");
        std::fs::create_dir(&dest).unwrap();

        let archive_path = dest.join("site-01_cam.tar");
        std::fs::write(&archive_path, tar_bytes("frames.txt", b"data")).unwrap();

        let mut extractor = ArchiveExtractor::new(&dest);
        extractor.extract(&archive_path).await.unwrap();
        extractor.tidy_up().await.unwrap();

        assert!(dest.exists());
        assert!(dest.join("frames.txt").exists());
    }

    #[tokio::test]
    async fn test_tidy_up_tolerates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let extractor = ArchiveExtractor::new(temp_dir.path().join("never-created"));
        assert!(extractor.tidy_up().await.is_ok());
    }

    #[tokio::test]
    async fn test_mixed_batch_counts_only_successes() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("site-01");
        std::fs::create_dir(&dest).unwrap();

        let good = dest.join("site-01_cam.tar");
        std::fs::write(&good, tar_bytes("cam.txt", b"cam")).unwrap();
        let bad = dest.join("site-01_lidar.tar");
        std::fs::write(&bad, b"garbage").unwrap();

        let mut extractor = ArchiveExtractor::new(&dest);
        extractor.extract(&good).await.unwrap();
        extractor.extract(&bad).await.unwrap();

        assert_eq!(extractor.extracted(), 1);
        extractor.tidy_up().await.unwrap();
        assert!(dest.exists(), "batch with one success keeps its directory");
    }
}
