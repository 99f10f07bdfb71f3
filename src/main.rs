//! Chroma: live dominant-colour analysis on a camera preview

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chroma::capture::{Camera, SyntheticConfig, SyntheticSource};
use chroma::display::LogSink;
use chroma::Config;
use color_eyre::{eyre::WrapErr, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chroma=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Chroma Launching...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).wrap_err("invalid configuration")?;
    info!(
        size = %config.stream_config().size,
        format = ?config.capture.format,
        top_n = config.pipeline.top_n,
        "configuration loaded"
    );

    let capture_every = config.display.capture_interval_secs;
    let sink = Arc::new(LogSink::new(config.display.log_every));
    let camera = Arc::new(Camera::new(
        SyntheticSource::new(SyntheticConfig::default()),
        config,
        sink,
    ));

    {
        let camera = Arc::clone(&camera);
        tokio::task::spawn_blocking(move || camera.open())
            .await?
            .wrap_err("failed to open camera")?;
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(capture_every.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick(), if capture_every > 0 => {
                if let Err(e) = camera.take_picture() {
                    warn!("Failed to take picture: {}", e);
                }
                if let Some(stats) = camera.stats() {
                    info!(
                        processed = stats.processed,
                        dropped = stats.queue.dropped,
                        "pipeline stats"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || camera.teardown())
        .await?
        .wrap_err("camera teardown failed")?;
    Ok(())
}
