use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gls_sync::{TrackerConfig, TrackerPipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "gls-cli")]
#[command(about = "Government Land Sales tracker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Track the GLS listing and enrich awarded sites
    Gls,
    /// Track the vacant-sites listing
    Vacant,
}

fn init_tracing() -> Result<()> {
    let log_path =
        std::env::var("GLS_LOG_PATH").unwrap_or_else(|_| "gls_tracker.log".to_string());
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening log file {log_path}"))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let pipeline = TrackerPipeline::new(TrackerConfig::from_env())?;
    let summary = match cli.command.unwrap_or(Commands::Gls) {
        Commands::Gls => pipeline.run_gls_once().await?,
        Commands::Vacant => pipeline.run_vacant_once().await?,
    };

    println!(
        "{} complete: run_id={} listed={} added={} updated={} rows={} output={}",
        summary.job,
        summary.run_id,
        summary.listed,
        summary.added,
        summary.updated,
        summary.rows_total,
        summary.output_path
    );

    Ok(())
}
