//! NanoNVR Backend - recording retention and indexing service
//!
//! Runs the daily retention sweep and serves the recording index over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nanonvr::config::Config;
use nanonvr::jobs::{self, RetentionSweeper};
use nanonvr::services::{FfmpegService, RecordingIndex, TimeExtractor};
use nanonvr::{AppState, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nanonvr=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting NanoNVR Backend");

    let config = Arc::new(Config::from_env()?);
    tracing::info!(
        record_root = %config.record_root.display(),
        keep_segments = config.keep_segments,
        media_server = %config.media_server_url,
        secret_loaded = config.media_server_secret.is_some(),
        "Configuration loaded"
    );

    let ffmpeg = FfmpegService::new(
        config.ffprobe_path.clone(),
        config.ffprobe_timeout,
        config.record_tz_offset,
    );
    if !ffmpeg.is_available().await {
        tracing::warn!(
            ffprobe = %config.ffprobe_path,
            "ffprobe not available - segment durations will be unknown"
        );
    }
    let extractor = TimeExtractor::new(Arc::new(ffmpeg), config.record_tz_offset);
    let index = RecordingIndex::new(config.record_root.clone(), config.keep_segments, extractor);

    let sweeper = RetentionSweeper::new(
        config.record_root.clone(),
        config.retention_policy()?,
        config.sweep_concurrency,
    );

    let mut scheduler = jobs::start_scheduler(
        sweeper.clone(),
        &config.retention_schedule,
        config.record_tz_offset,
    )
    .await?;

    let state = AppState {
        config: config.clone(),
        index,
        sweeper,
    };
    let app = build_app(state);

    let host = config.host.as_deref().unwrap_or("0.0.0.0");
    let addr: SocketAddr = format!("{host}:{}", config.port)
        .parse()
        .context("Invalid HOST")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    scheduler.shutdown().await?;
    tracing::info!("Job scheduler stopped");

    Ok(())
}
