//! ftrepo-ingest - one ingestion run
//!
//! Scans the configured channels for new .ipa announcements, infers their
//! metadata, publishes the packages and rewrites the catalog documents.
//! Ctrl+C or SIGTERM cancels the run without touching the catalog.

use anyhow::{Context, Result};
use clap::Parser;
use ftrepo_common::config::load_config;
use ftrepo_ingest::config;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ftrepo-ingest")]
#[command(about = "Ingest .ipa announcements into an AltStore-style source")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "FTREPO_CONFIG")]
    config: Option<PathBuf>,

    /// Attachments fetched per channel or topic (overrides config)
    #[arg(long)]
    max_items: Option<usize>,

    /// Concurrent downloads (overrides config)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut toml_config =
        load_config(args.config.as_deref()).context("Failed to load configuration")?;
    config::apply_env_overrides(&mut toml_config);
    if let Some(max_items) = args.max_items {
        toml_config.source.max_items_per_source = max_items;
    }
    if let Some(concurrency) = args.concurrency {
        toml_config.source.max_concurrent_downloads = concurrency;
    }

    ftrepo_ingest::init_tracing(&toml_config.logging.level);
    info!("Starting ftrepo-ingest v{}", env!("CARGO_PKG_VERSION"));

    config::validate(&toml_config)?;
    let api_key = config::resolve_api_key(&toml_config)?;

    info!(
        "Source: {} ({} channels configured), packages: {}",
        toml_config.source.root.display(),
        toml_config.source.channels.len(),
        toml_config.blob_store.root.display()
    );

    let orchestrator = ftrepo_ingest::build_orchestrator(&toml_config, api_key)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let report = orchestrator.run(cancel).await.context("Ingestion run failed")?;

    info!("{}", report.scan.display_string());
    info!("{}", report.tally.display_string());
    info!(
        "Extractor: {} cache hits, {} primary, {} fallback, {} failed",
        report.extractor.cache_hits,
        report.extractor.primary_successes,
        report.extractor.fallback_successes,
        report.extractor.failures
    );
    for item in report.failures() {
        warn!(
            "{} {} [{}]: {}",
            item.outcome.as_str(),
            item.filename,
            item.source,
            item.detail.as_deref().unwrap_or("")
        );
    }
    for conflict in &report.conflicts {
        warn!("Derivation conflict: {}", conflict);
    }
    info!(
        "Catalog: {} entries, derived: {} entries",
        report.catalog_size, report.derived_size
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling run");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling run");
        },
    }
}
