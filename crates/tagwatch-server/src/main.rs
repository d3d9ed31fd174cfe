//! # tagwatch
//!
//! Contactless tag presence monitor.
//!
//! This binary provides:
//! - One monitor per configured reader, printing arrivals and departures
//! - A read-only status API with an OpenAPI document
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, with the simulated reader
//! cargo run --package tagwatch-server -- --config config.example.toml
//!
//! # Production
//! tagwatch --production
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tagwatch_core::{start_all, ChannelSink, Config, EventSink, TagwatchError};
use tagwatch_server::{api, daemon, logging, state::AppState};
use tracing::{error, info, warn};

/// Monitor contactless readers for tag arrivals and departures.
#[derive(Debug, Parser)]
#[command(name = "tagwatch", version, about)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "TAGWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// JSON logs to rolling files plus compact stdout.
    #[arg(long)]
    production: bool,

    /// Validate the configuration, print it, and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .map_err(TagwatchError::from)
        .with_context(|| format!("loading {}", config_path.display()))?;

    if cli.check {
        println!("{}", config.to_toml_string().map_err(TagwatchError::from)?);
        println!("Configuration OK ({} reader(s))", config.readers.len());
        return Ok(());
    }

    logging::init(&config.logging, cli.production)?;

    println!("tagwatch starting...");
    info!(config = %config_path.display(), readers = config.readers.len(), "Starting tagwatch");

    // Bound before any monitor starts; a failure here leaves nothing running.
    let listener = daemon::bind_api(&config.api).await?;

    let (sink, rx) = ChannelSink::new();
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    let monitors = start_all(&config, &sink)?;
    // Monitors hold their own clones; the consumer ends once they all exit.
    drop(sink);

    let state = AppState::new(monitors.iter().map(|m| m.status_handle()).collect()).shared();
    let consumer = tokio::spawn(daemon::consume_events(rx, Arc::clone(&state)));

    if let Some(listener) = listener {
        let app = api::create_router(Arc::clone(&state));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Status API stopped");
            }
        });
    }

    daemon::shutdown_signal().await;
    println!("\nShutting down...");

    let stragglers = daemon::stop_monitors(monitors, config.polling.shutdown_grace()).await;
    if !stragglers.is_empty() {
        warn!(readers = ?stragglers, "Monitors still busy after grace period, exiting anyway");
        // The runtime would otherwise wait for their blocking threads on drop.
        std::process::exit(1);
    }

    if let Err(e) = consumer.await {
        warn!(error = %e, "Event consumer exited abnormally");
    }

    info!("tagwatch stopped");
    Ok(())
}
