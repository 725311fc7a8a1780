//! # Courier Server
//!
//! Realtime presence and room relay server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! courier
//!
//! # Run with a specific config file, layered under COURIER_* variables
//! COURIER_CONFIG=/path/to/courier.toml courier
//!
//! # Run with exactly one config file, ignoring the environment
//! courier --config /path/to/courier.toml
//!
//! # Run with environment variables
//! COURIER_PORT=8080 COURIER_HOST=0.0.0.0 COURIER_AUTH__ENABLED=true courier
//! ```

use anyhow::{bail, Result};
use std::path::PathBuf;
use courier_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_arg()? {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    tracing::info!("Starting Courier server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

/// Path given with `--config <path>` or `--config=<path>`, if any.
fn config_arg() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let Some(path) = args.next() else {
                bail!("--config requires a path");
            };
            return Ok(Some(PathBuf::from(shellexpand::tilde(&path).as_ref())));
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Ok(Some(PathBuf::from(shellexpand::tilde(path).as_ref())));
        }
    }
    Ok(None)
}
