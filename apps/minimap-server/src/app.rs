//! Application orchestrator: feed → tracker → web server.

use chrono::Utc;
use minimap_tracker::{CalibrationTable, Tracker};
use minimap_web_server::WebServer;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::feed;

/// Counters reported when the feed loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub samples: u64,
    pub published: u64,
    pub rejected: u64,
}

/// Runs until Ctrl-C or the end of stdin.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT received, shutting down");
        }
        on_signal.cancel();
    });

    let stats = run_with_feed(config, BufReader::new(tokio::io::stdin()), shutdown).await?;
    tracing::info!(
        samples = stats.samples,
        published = stats.published,
        rejected = stats.rejected,
        "feed finished"
    );
    Ok(())
}

/// Serves snapshots derived from `feed` until it ends or `shutdown` fires.
pub async fn run_with_feed<R>(
    config: Config,
    feed: R,
    shutdown: CancellationToken,
) -> anyhow::Result<FeedStats>
where
    R: AsyncBufRead + Unpin,
{
    let table = match &config.calibration_file {
        Some(path) => CalibrationTable::load(path)?,
        None => CalibrationTable::builtin(),
    };
    tracing::info!(levels = table.len(), "calibration table ready");

    let mut tracker = Tracker::new(table);
    tracker.set_scale(config.scale);

    // The minimap keeps tracking without the server; only the browser view is lost.
    let server = WebServer::new(config.server_config());
    match server.start().await {
        Ok(addr) => tracing::info!(%addr, "minimap available at http://{addr}/"),
        Err(e) => tracing::error!("web server unavailable: {e}"),
    }

    let mut stats = FeedStats::default();
    let mut lines = feed.lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("position feed closed");
                break;
            }
            Err(e) => {
                tracing::error!("position feed read error: {e}");
                break;
            }
        };

        match feed::parse_line(&line) {
            Ok(Some(sample)) => {
                stats.samples += 1;
                if let Some(snapshot) = tracker.observe(&sample, Utc::now()) {
                    server.publish(snapshot);
                    stats.published += 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                stats.rejected += 1;
                tracing::warn!(%line, "skipping feed line: {e}");
            }
        }
    }

    server.stop().await;
    Ok(stats)
}
