//! Catalog generation from the public dataset listing.
//!
//! The listing site publishes one page per dataset, each linking the
//! downloadable archives. The builder walks the listing with HTML-tree
//! queries (anchor hrefs, not string-position arithmetic) and writes the
//! resulting `resource_id,variant,...` lines to a catalog file ready for
//! the downloader.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument};

use super::CatalogError;
use crate::config::CONNECT_TIMEOUT_SECS;

/// Path marker identifying archive download links on a dataset page.
const DOWNLOAD_HREF_MARKER: &str = "download/?filename=datasets";

// Resource ids are capture timestamps, e.g. `2014-05-06-12-54-54`.
#[allow(clippy::expect_used)]
static RESOURCE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2}$").expect("static pattern is valid")
});

#[allow(clippy::expect_used)]
static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector is valid"));

/// Scrapes the public dataset listing into a catalog file.
#[derive(Debug)]
pub struct CatalogBuilder {
    client: Client,
    listing_url: String,
}

impl CatalogBuilder {
    /// Creates a builder against the given listing URL.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Client`] when the HTTP client cannot be
    /// constructed.
    pub fn new(listing_url: &str) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(60))
            .gzip(true)
            .user_agent(concat!("datashare-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(CatalogError::Client)?;
        Ok(Self {
            client,
            listing_url: format!("{}/", listing_url.trim_end_matches('/')),
        })
    }

    /// Walks the listing and writes the catalog file.
    ///
    /// Returns the number of discovered resources.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] on transport failures, non-success listing
    /// responses, or when the output file cannot be written.
    #[instrument(skip(self), fields(listing = %self.listing_url))]
    pub async fn build(&self, output: &Path) -> Result<usize, CatalogError> {
        let ids = self.discover_resources().await?;
        info!(resources = ids.len(), "discovered resources on listing");

        let mut lines = String::new();
        for id in &ids {
            let variants = self.discover_variants(id).await?;
            debug!(resource = %id, variants = variants.len(), "discovered variants");
            if variants.is_empty() {
                lines.push_str(id);
            } else {
                lines.push_str(&format!("{id},{}", variants.join(",")));
            }
            lines.push('\n');
        }

        tokio::fs::write(output, lines)
            .await
            .map_err(|e| CatalogError::io(output.to_path_buf(), e))?;
        info!(path = %output.display(), "catalog written");
        Ok(ids.len())
    }

    /// Fetches the listing page and extracts the sorted, deduplicated
    /// resource ids.
    async fn discover_resources(&self) -> Result<Vec<String>, CatalogError> {
        let page = self.get_text(&self.listing_url).await?;
        Ok(parse_listing(&page))
    }

    /// Fetches one dataset page and extracts its variant tokens.
    async fn discover_variants(&self, resource_id: &str) -> Result<Vec<String>, CatalogError> {
        let url = format!("{}{resource_id}", self.listing_url);
        let page = self.get_text(&url).await?;
        Ok(parse_variants(&page, resource_id))
    }

    async fn get_text(&self, url: &str) -> Result<String, CatalogError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::network(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::BadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(|e| CatalogError::network(url, e))
    }
}

/// Extracts resource ids from listing-page anchors.
///
/// Any href with a `/datasets/<id>` component counts; ids are validated
/// against the timestamp pattern, deduplicated, and sorted.
fn parse_listing(page: &str) -> Vec<String> {
    let document = Html::parse_document(page);
    let ids: BTreeSet<String> = document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter_map(resource_id_from_href)
        .collect();
    ids.into_iter().collect()
}

/// Pulls a valid resource id out of a listing href, if present.
fn resource_id_from_href(href: &str) -> Option<String> {
    let (_, tail) = href.split_once("/datasets/")?;
    let candidate = tail.trim_end_matches('/').split('/').next()?;
    RESOURCE_ID_RE
        .is_match(candidate)
        .then(|| candidate.to_string())
}

/// Extracts variant tokens from a dataset page's download anchors.
///
/// Archive filenames follow `{resource_id}_{variant}.tar`; variants keep
/// their on-page order, deduplicated.
fn parse_variants(page: &str, resource_id: &str) -> Vec<String> {
    let document = Html::parse_document(page);
    let prefix = format!("{resource_id}_");
    let mut variants = Vec::new();

    for href in document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter(|href| href.contains(DOWNLOAD_HREF_MARKER))
    {
        let Some(file_name) = href.rsplit('/').next() else {
            continue;
        };
        let Some(variant) = file_name
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_suffix(".tar"))
        else {
            continue;
        };
        if !variant.is_empty() && !variants.iter().any(|known| known == variant) {
            variants.push(variant.to_string());
        }
    }
    variants
}
