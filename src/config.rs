//! Runtime configuration for a download run.
//!
//! All recognized options are collected into an immutable [`Config`] that is
//! validated once at startup and then passed by reference into component
//! constructors. Components never consult the CLI layer directly.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Default login portal URL.
pub const DEFAULT_LOGIN_URL: &str = "https://mrgdatashare.robots.ox.ac.uk/";

/// Default base URL that archive URLs are derived from.
pub const DEFAULT_DOWNLOAD_BASE_URL: &str =
    "http://mrgdatashare.robots.ox.ac.uk:80/download/?filename=datasets/";

/// Default public dataset listing used by the catalog builder.
pub const DEFAULT_LISTING_URL: &str = "https://robotcar-dataset.robots.ox.ac.uk/datasets/";

/// Default length of one throttle window.
pub const DEFAULT_PERIOD_DURATION: Duration = Duration::from_secs(10 * 60);

/// Default chunk budget per throttle window.
pub const DEFAULT_CHUNKS_PER_PERIOD: u64 = 1000;

/// Default size of one streamed chunk unit in bytes.
pub const DEFAULT_CHUNK_LENGTH: usize = 1024;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout between stream chunks (5 minutes).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Login credentials for the remote portal.
///
/// The password is intentionally redacted in Debug output to prevent
/// accidental logging of sensitive data.
#[derive(Clone)]
pub struct Credentials {
    /// Registered account name.
    pub username: String,
    /// Account password (sensitive, never log).
    password: String,
}

impl Credentials {
    /// Creates credentials, rejecting empty fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when either field is empty.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, ConfigError> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() {
            return Err(ConfigError::invalid("username", "must not be empty"));
        }
        if password.is_empty() {
            return Err(ConfigError::invalid("password", "must not be empty"));
        }
        Ok(Self { username, password })
    }

    /// Returns the password.
    ///
    /// The return value is sensitive; avoid logging it.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

// Custom Debug impl that redacts the password.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Errors raised while validating configuration.
///
/// All variants are fatal and reported before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An option value fails validation.
    #[error("invalid value for {option}: {reason}")]
    Invalid {
        /// The offending option name.
        option: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A configured endpoint is not a parseable URL.
    #[error("invalid URL for {option}: {url}")]
    InvalidUrl {
        /// The offending option name.
        option: &'static str,
        /// The rejected URL string.
        url: String,
    },
}

impl ConfigError {
    /// Creates a validation error for a named option.
    pub fn invalid(option: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            option,
            reason: reason.into(),
        }
    }
}

/// Immutable configuration for one download run.
///
/// Construct with struct syntax and seal with [`Config::validated`]; the
/// orchestrator and its components take this by reference.
#[derive(Debug, Clone)]
pub struct Config {
    /// Portal login credentials.
    pub credentials: Credentials,
    /// Path to the catalog file (`resource_id,variant,...` per line).
    pub catalog_file: PathBuf,
    /// Root directory that resources are downloaded and extracted into.
    pub downloads_dir: PathBuf,
    /// Login portal URL.
    pub login_url: String,
    /// Base URL that archive URLs are derived from.
    pub base_url: String,
    /// Length of one throttle window.
    pub period_duration: Duration,
    /// Chunk budget per throttle window.
    pub chunks_per_period: u64,
    /// Size of one streamed chunk unit in bytes.
    pub chunk_length: usize,
    /// Pause before re-running the login protocol after expiry detection.
    pub relogin_delay: Duration,
    /// Upper bound on consecutive relogin attempts for one request.
    pub max_relogin_attempts: u32,
    /// Attempt budget per resource, including the initial attempt.
    pub max_attempts: u32,
    /// Fixed pause between transport-failure retries.
    pub retry_backoff: Duration,
    /// Variants to fetch; `None` fetches all.
    pub variant_filter: Option<Vec<String>>,
    /// Optional file restricting which resource ids are fetched.
    pub resources_file: Option<PathBuf>,
    /// Replace existing resource directories instead of failing.
    pub overwrite: bool,
    /// Check URLs without downloading or extracting.
    pub dry_run: bool,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout between stream chunks in seconds.
    pub read_timeout_secs: u64,
}

impl Config {
    /// Validates cross-field constraints and seals the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an option value is out of range or an
    /// endpoint URL does not parse.
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.period_duration.is_zero() {
            return Err(ConfigError::invalid("period-duration", "must be non-zero"));
        }
        if self.chunks_per_period == 0 {
            return Err(ConfigError::invalid("chunks-per-period", "must be at least 1"));
        }
        if self.chunk_length == 0 {
            return Err(ConfigError::invalid("chunk-length", "must be at least 1 byte"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("retries", "must allow at least 1 attempt"));
        }
        if self.max_relogin_attempts == 0 {
            return Err(ConfigError::invalid(
                "max-relogin-attempts",
                "must allow at least 1 attempt",
            ));
        }
        for (option, value) in [("login-url", &self.login_url), ("base-url", &self.base_url)] {
            if Url::parse(value).is_err() {
                return Err(ConfigError::InvalidUrl {
                    option,
                    url: value.clone(),
                });
            }
        }
        Ok(self)
    }
}

/// Resolves the default download root: the user downloads directory, or a
/// `Downloads` folder under the home directory.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when neither directory can be resolved.
pub fn default_downloads_dir() -> Result<PathBuf, ConfigError> {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .ok_or_else(|| {
            ConfigError::invalid(
                "downloads-dir",
                "no user downloads directory found; pass --downloads-dir",
            )
        })
}
