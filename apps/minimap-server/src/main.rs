//! Minimap host entry point.
//!
//! Reads position samples from stdin and serves the minimap over HTTP and
//! WebSocket until stdin closes or Ctrl-C is pressed.

mod app;
mod config;
mod feed;

use std::time::Duration;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting minimap server");

    let config = config::Config::load()?;
    tracing::info!(port = config.port, content_root = %config.content_root.display(), "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(app::run(config));
    // A stdin read may still be parked on a blocking thread after Ctrl-C.
    rt.shutdown_timeout(Duration::from_millis(500));
    result?;

    tracing::info!("minimap server shut down cleanly");
    Ok(())
}
