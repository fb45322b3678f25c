//! Standalone gateway daemon.
//!
//! Usage: `server [config.toml]` (defaults to `reel-recs.toml`). Serves until
//! Ctrl-C, then drains the recorders.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use server::{GatewayConfig, build_gateway};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("reel-recs.toml"));

    let config = GatewayConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let gateway = build_gateway(&config).context("Failed to build gateway")?;
    info!(
        "Serving experiment {} with {} variants",
        gateway.experiment_key(),
        gateway.registry().len()
    );

    server::serve(gateway, config.listen_addr, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
    })
    .await
    .context("Gateway server failed")?;

    Ok(())
}
