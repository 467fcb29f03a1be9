//! CLI entry point for the datashare downloader.

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use datashare_core::catalog::{self, Catalog, CatalogBuilder};
use datashare_core::orchestrator::Orchestrator;

mod cli;

use cli::{CatalogArgs, Cli, Command, FetchArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Fetch(args) => run_fetch(args).await,
        Command::Catalog(args) => run_catalog(args).await,
    }
}

/// Runs a download batch over the configured catalog.
async fn run_fetch(args: FetchArgs) -> Result<()> {
    let config = args.into_config()?;
    // Credentials redact the password in Debug output.
    debug!(?config, "configuration resolved");

    let catalog = Catalog::load(&config.catalog_file)?;
    if catalog.is_empty() {
        info!("catalog is empty, nothing to do");
        return Ok(());
    }

    let resource_filter = config
        .resources_file
        .as_deref()
        .map(catalog::load_resource_filter)
        .transpose()?;

    let mut orchestrator = Orchestrator::new(&config, resource_filter, shutdown_token())?;
    let stats = orchestrator.run(&catalog).await?;

    info!(
        downloaded = stats.downloaded(),
        not_found = stats.not_found(),
        extracted = stats.extracted(),
        skipped = stats.skipped(),
        retries = stats.retries(),
        "run complete"
    );
    Ok(())
}

/// Builds a catalog file from the public dataset listing.
async fn run_catalog(args: CatalogArgs) -> Result<()> {
    let builder = CatalogBuilder::new(&args.datasets_url)?;
    let count = builder.build(&args.output).await?;
    info!(
        resources = count,
        path = %args.output.display(),
        "catalog build complete"
    );
    Ok(())
}

/// Installs the Ctrl-C handler and returns the token every pause point
/// observes.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown signal received, stopping at the next pause point");
            signal_token.cancel();
        }
    });
    token
}
