//! The render command: ingest, index, instantiate, render.

use crate::ingest;
use anyhow::{Context, Result};
use clap::Args;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tessera_core::{expand_generated, Index, Selector};
use tessera_engine::{default_factory, RenderOptions, Resource, DEFAULT_CONCURRENCY};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Directories containing manifest files.
    #[arg(long = "load", short = 'l', value_name = "DIR")]
    pub load: Vec<PathBuf>,

    /// Root path for binary asset sources.
    #[arg(long = "asset", short = 'a', value_name = "DIR", default_value = ".")]
    pub asset: PathBuf,

    /// Path for rendered output.
    #[arg(long = "output", short = 'o', value_name = "DIR")]
    pub output: PathBuf,

    /// How many units of render work may run in parallel.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Working directory for the artifact cache.
    #[arg(long, value_name = "DIR", default_value = ".cache")]
    pub cache: PathBuf,

    /// The manifest to render.
    #[arg(value_name = "SELECTOR")]
    pub selector: String,
}

pub async fn run(args: RenderArgs, cancel: CancellationToken) -> Result<()> {
    let mut manifests = Vec::new();
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        manifests.extend(ingest::from_reader(stdin.lock())?);
    }
    for dir in &args.load {
        manifests.extend(ingest::from_directory(dir)?);
    }
    let manifests = expand_generated(manifests)?;
    tracing::info!(count = manifests.len(), "ingested manifests");

    let mut index = Index::new();
    index.insert(manifests)?;
    index.collate().context("collating manifest index")?;

    let selector = Selector::parse(&args.selector)?;
    let options = RenderOptions {
        source_dir: args.asset.clone(),
        dest_dir: args.output.clone(),
        cache_dir: args.cache.clone(),
    };
    let root = Resource::build(
        &selector,
        Arc::new(index),
        Arc::new(default_factory()),
        &options,
    )?;
    tracing::info!(root = %root, concurrency = args.concurrency, "resource graph ready");

    root.render(args.concurrency, cancel).await?;
    tracing::info!(output = %args.output.display(), "render complete");
    Ok(())
}
