//! Catalog loading and generation.
//!
//! A catalog is a delimited text file listing one resource per line:
//! `resource_id,variant_1,variant_2,...`. The catalog is loaded once,
//! order-preserving, and consumed read-only by the orchestrator; line
//! order and variant order are a correctness requirement, not cosmetic.

mod builder;

pub use builder::CatalogBuilder;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading or building catalogs.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// I/O error reading or writing a catalog file.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A catalog line carries no resource id.
    #[error("{path}:{line_number}: catalog line has no resource id")]
    Malformed {
        /// The catalog file path.
        path: PathBuf,
        /// 1-based line number of the offending line.
        line_number: usize,
    },

    /// The HTTP client for the catalog builder could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Network-level failure fetching a listing page.
    #[error("network error reaching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// A listing page answered with a non-success status.
    #[error("listing request failed for {url} (HTTP {status})")]
    BadStatus {
        /// The URL that failed.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
}

impl CatalogError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a network error with URL context.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }
}

/// One downloadable resource and its available variants, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Identifier of the resource (URL-path-safe in practice).
    pub resource_id: String,
    /// Variant tokens in catalog order.
    pub variants: Vec<String>,
}

/// An ordered, immutable list of catalog entries.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Loads a catalog file, preserving line and variant order.
    ///
    /// Blank lines are skipped; surrounding whitespace and empty variant
    /// fields are trimmed away.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] when the file cannot be read and
    /// [`CatalogError::Malformed`] when a non-blank line has no resource
    /// id.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| CatalogError::io(path.to_path_buf(), e))?;
        let mut entries = Vec::new();

        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split(',').map(str::trim);
            let resource_id = fields.next().unwrap_or_default();
            if resource_id.is_empty() {
                return Err(CatalogError::Malformed {
                    path: path.to_path_buf(),
                    line_number: index + 1,
                });
            }

            entries.push(CatalogEntry {
                resource_id: resource_id.to_string(),
                variants: fields
                    .filter(|field| !field.is_empty())
                    .map(str::to_string)
                    .collect(),
            });
        }

        info!(path = %path.display(), resources = entries.len(), "catalog loaded");
        Ok(Self { entries })
    }

    /// Entries in catalog order.
    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the catalog holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Loads a resource-id filter file: one id per line.
///
/// Lines in full catalog format are accepted too: only the text before
/// the first comma is taken, so a catalog file doubles as a filter file.
///
/// # Errors
///
/// Returns [`CatalogError::Io`] when the file cannot be read.
pub fn load_resource_filter(path: &Path) -> Result<HashSet<String>, CatalogError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| CatalogError::io(path.to_path_buf(), e))?;
    let ids: HashSet<String> = contents
        .lines()
        .filter_map(|line| line.split(',').next())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    debug!(path = %path.display(), ids = ids.len(), "resource filter loaded");
    Ok(ids)
}
