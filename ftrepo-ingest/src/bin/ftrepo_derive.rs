//! ftrepo-derive - rebuild the derived catalog from the primary one
//!
//! Reads the primary document and the variant list, gives every entry with
//! a recognized variant its own bundle identifier and writes the derived
//! document. No packages are downloaded and no inference is done.

use anyhow::{Context, Result};
use clap::Parser;
use ftrepo_common::config::load_config;
use ftrepo_ingest::models::VariantRegistry;
use ftrepo_ingest::services::identifier_deriver;
use ftrepo_ingest::workflow::persistence::{load_catalog, render_derived, write_document};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ftrepo-derive")]
#[command(about = "Derive variant-safe bundle identifiers for an AltStore-style source")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "FTREPO_CONFIG")]
    config: Option<PathBuf>,

    /// Primary catalog document (default: catalog.path)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Derived catalog document (default: catalog.derived_path)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Variant list (default: variants.path)
    #[arg(long)]
    variants: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config =
        load_config(args.config.as_deref()).context("Failed to load configuration")?;
    ftrepo_ingest::init_tracing(&toml_config.logging.level);

    let input = args.input.unwrap_or_else(|| toml_config.catalog.path.clone());
    let output = args
        .output
        .unwrap_or_else(|| toml_config.catalog.derived_path.clone());
    let variants = args
        .variants
        .unwrap_or_else(|| toml_config.variants.path.clone());

    let registry = VariantRegistry::load(&variants).context("Failed to load variant list")?;
    let catalog = load_catalog(
        &input,
        &toml_config.catalog.name,
        &toml_config.catalog.identifier,
    )
    .context("Failed to load catalog")?;

    let exported = catalog.store.export();
    let derived = identifier_deriver::derive(&exported, &registry);
    let renamed = derived
        .entries
        .iter()
        .filter(|d| d.derived_key != d.entry.key)
        .count();

    write_document(&output, &render_derived(&catalog.header, &derived))?;

    info!(
        "Derived {} of {} entries ({} with variant identifiers)",
        derived.entries.len(),
        exported.len(),
        renamed
    );
    for conflict in &derived.conflicts {
        warn!("Derivation conflict: {}", conflict);
    }

    Ok(())
}
