//! # Syncpad Server
//!
//! Realtime room relay for the Syncpad collaborative editor.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! syncpad
//!
//! # Run with environment variables
//! SYNCPAD_PORT=8080 SYNCPAD_HOST=0.0.0.0 syncpad
//! ```
//!
//! Clients connect to `ws://host:port/ws?roomId=<room>&username=<name>`.

mod config;
mod handlers;
mod heartbeat;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syncpad=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Syncpad relay on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
