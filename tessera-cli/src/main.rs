//! # tessera CLI
//!
//! Command-line interface for the tessera static-site generator.

use clap::{Parser, Subcommand};
use tessera_cli::commands;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a target manifest and everything it depends on
    Render(commands::render::RenderArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Interrupt and terminate flip the cancellation token; in-flight work
    // observes it at the next suspension point and cleans up.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received, cleaning up...");
            signal_cancel.cancel();
        }
    });

    match cli.command {
        Commands::Render(args) => commands::render::run(args, cancel).await,
    }
}
