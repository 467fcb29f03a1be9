//! Derivation of remote URLs and local paths for catalog resources.
//!
//! Pure functions of the configured endpoints: the same (resource, variant)
//! pair always resolves to the same target, recomputed per attempt.

use std::path::{Path, PathBuf};

/// Remote URL and local destination for one (resource, variant) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// Archive URL on the remote host.
    pub remote_url: String,
    /// Transient local path the archive is streamed to.
    pub local_path: PathBuf,
}

/// Resolves download targets under a base URL and download root.
#[derive(Debug, Clone)]
pub struct ResourceLocator {
    base_url: String,
    downloads_dir: PathBuf,
}

impl ResourceLocator {
    /// Creates a locator. A trailing slash on `base_url` is normalized away
    /// so concatenation is unambiguous.
    #[must_use]
    pub fn new(base_url: &str, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            downloads_dir: downloads_dir.into(),
        }
    }

    /// Resolves the target for one (resource, variant) pair.
    ///
    /// The remote layout is `{base_url}/{resource_id}/{resource_id}_{variant}.tar`;
    /// the archive lands in the resource's own directory under the download
    /// root, named `{resource_id}_{variant}.tar`.
    #[must_use]
    pub fn target(&self, resource_id: &str, variant: &str) -> DownloadTarget {
        let file_name = archive_file_name(resource_id, variant);
        DownloadTarget {
            remote_url: format!("{}/{resource_id}/{file_name}", self.base_url),
            local_path: self.resource_dir(resource_id).join(file_name),
        }
    }

    /// Directory that one resource's archives are downloaded and extracted
    /// into.
    #[must_use]
    pub fn resource_dir(&self, resource_id: &str) -> PathBuf {
        self.downloads_dir.join(resource_id)
    }

    /// The configured download root.
    #[must_use]
    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }
}

/// Archive file name for a (resource, variant) pair.
#[must_use]
pub fn archive_file_name(resource_id: &str, variant: &str) -> String {
    format!("{resource_id}_{variant}.tar")
}
