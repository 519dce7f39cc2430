//! ARBX execution engine - Entry Point
//!
//! Reads trade requests as JSON lines on stdin and writes one JSON execution
//! result per request to stdout. Venues are in-memory paper venues.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// ARBX cross-venue execution engine
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via ARBX_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Determine config path: CLI arg > ARBX_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("ARBX_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    // Logging comes after config so the file can set the default filter.
    let config = arbx_bot::AppConfig::from_file(&config_path)?;
    arbx_telemetry::init_logging(config.log_filter.as_deref())?;

    info!("Starting ARBX v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        mode = ?config.engine.mode,
        venues = config.venues.len(),
        "Configuration loaded"
    );

    let app = arbx_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
