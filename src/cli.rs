//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use datashare_core::config::{self, Config, ConfigError, Credentials};

/// Rate-limited bulk downloader for session-gated dataset archives.
#[derive(Parser, Debug)]
#[command(name = "datashare-dl")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download and extract the catalog's resources
    Fetch(FetchArgs),
    /// Build a catalog file from the public dataset listing
    Catalog(CatalogArgs),
}

/// Options for a download run.
#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Registered username for the download portal
    #[arg(short, long)]
    pub username: String,

    /// Registered password for the download portal
    #[arg(short, long)]
    pub password: String,

    /// Catalog file listing resource ids and variants
    #[arg(short, long)]
    pub catalog: PathBuf,

    /// Root download directory (default: the user downloads directory)
    #[arg(short, long)]
    pub downloads_dir: Option<PathBuf>,

    /// Login portal URL
    #[arg(long, default_value = config::DEFAULT_LOGIN_URL)]
    pub login_url: String,

    /// Base URL that archive URLs are derived from
    #[arg(long, default_value = config::DEFAULT_DOWNLOAD_BASE_URL)]
    pub base_url: String,

    /// Length of one throttle window in seconds
    #[arg(long, default_value_t = 600)]
    pub period_duration: u64,

    /// Maximum chunks per throttle window
    #[arg(long, default_value_t = 1000)]
    pub chunks_per_period: u64,

    /// Size of one streamed chunk in bytes
    #[arg(long, default_value_t = 1024)]
    pub chunk_length: usize,

    /// Pause before re-login after session expiry, in seconds
    #[arg(long, default_value_t = 30)]
    pub relogin_delay: u64,

    /// Maximum consecutive re-login attempts per request
    #[arg(long, default_value_t = 3)]
    pub max_relogin_attempts: u32,

    /// Attempts per resource for transport failures (1-10)
    #[arg(short = 'r', long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub retries: u32,

    /// Fixed pause between retries, in seconds
    #[arg(long, default_value_t = 10)]
    pub retry_backoff: u64,

    /// Comma-separated subset of variants to fetch (default: all)
    #[arg(long)]
    pub variants: Option<String>,

    /// File restricting which resource ids are fetched (default: all)
    #[arg(long)]
    pub resources_file: Option<PathBuf>,

    /// Replace existing resource directories instead of failing
    #[arg(long)]
    pub overwrite: bool,

    /// Check resource URLs without downloading or extracting
    #[arg(long)]
    pub dry_run: bool,
}

impl FetchArgs {
    /// Resolves the argument surface into a validated [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on empty credentials, out-of-range values,
    /// malformed endpoint URLs, or an unresolvable default download
    /// directory.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let downloads_dir = match self.downloads_dir {
            Some(dir) => dir,
            None => config::default_downloads_dir()?,
        };

        let variant_filter = self
            .variants
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|variant| !variant.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|variants| !variants.is_empty());

        Config {
            credentials: Credentials::new(self.username, self.password)?,
            catalog_file: self.catalog,
            downloads_dir,
            login_url: self.login_url,
            base_url: self.base_url,
            period_duration: std::time::Duration::from_secs(self.period_duration),
            chunks_per_period: self.chunks_per_period,
            chunk_length: self.chunk_length,
            relogin_delay: std::time::Duration::from_secs(self.relogin_delay),
            max_relogin_attempts: self.max_relogin_attempts,
            max_attempts: self.retries,
            retry_backoff: std::time::Duration::from_secs(self.retry_backoff),
            variant_filter,
            resources_file: self.resources_file,
            overwrite: self.overwrite,
            dry_run: self.dry_run,
            connect_timeout_secs: config::CONNECT_TIMEOUT_SECS,
            read_timeout_secs: config::READ_TIMEOUT_SECS,
        }
        .validated()
    }
}

/// Options for building a catalog from the public listing.
#[derive(Args, Debug)]
pub struct CatalogArgs {
    /// Public dataset listing URL
    #[arg(long, default_value = config::DEFAULT_LISTING_URL)]
    pub datasets_url: String,

    /// Output catalog file
    #[arg(short, long, default_value = "datasets.csv")]
    pub output: PathBuf,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fetch_args(extra: &[&str]) -> Result<Cli, clap::Error> {
        let mut argv = vec![
            "datashare-dl",
            "fetch",
            "--username",
            "alice",
            "--password",
            "secret",
            "--catalog",
            "datasets.csv",
        ];
        argv.extend_from_slice(extra);
        Cli::try_parse_from(argv)
    }

    #[test]
    fn test_fetch_defaults() {
        let cli = fetch_args(&[]).unwrap();
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch subcommand");
        };
        assert_eq!(args.period_duration, 600);
        assert_eq!(args.chunks_per_period, 1000);
        assert_eq!(args.chunk_length, 1024);
        assert_eq!(args.retries, 3);
        assert!(!args.overwrite);
        assert!(!args.dry_run);
        assert!(args.variants.is_none());
    }

    #[test]
    fn test_fetch_requires_credentials() {
        let result = Cli::try_parse_from(["datashare-dl", "fetch", "--catalog", "x.csv"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn test_fetch_rejects_zero_retries() {
        let result = fetch_args(&["--retries", "0"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_variant_filter_is_split_and_trimmed() {
        let cli = fetch_args(&["--variants", "cam, lidar ,", "--downloads-dir", "/tmp/d"]).unwrap();
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch subcommand");
        };
        let config = args.into_config().unwrap();
        assert_eq!(
            config.variant_filter,
            Some(vec!["cam".to_string(), "lidar".to_string()])
        );
    }

    #[test]
    fn test_empty_variant_list_means_all() {
        let cli = fetch_args(&["--variants", " , ", "--downloads-dir", "/tmp/d"]).unwrap();
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch subcommand");
        };
        let config = args.into_config().unwrap();
        assert!(config.variant_filter.is_none());
    }

    #[test]
    fn test_catalog_subcommand_defaults() {
        let cli = Cli::try_parse_from(["datashare-dl", "catalog"]).unwrap();
        let Command::Catalog(args) = cli.command else {
            panic!("expected catalog subcommand");
        };
        assert_eq!(args.datasets_url, config::DEFAULT_LISTING_URL);
        assert_eq!(args.output, PathBuf::from("datasets.csv"));
    }

    #[test]
    fn test_verbose_and_quiet_flags() {
        let cli = fetch_args(&["-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);

        let cli = Cli::try_parse_from(["datashare-dl", "-q", "catalog"]).unwrap();
        assert!(cli.quiet);
    }
}
