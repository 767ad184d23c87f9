use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lectern_hw::Camera;
use tokio::sync::{oneshot, watch};
use tracing_subscriber::EnvFilter;

mod capture;
mod config;
mod engine;

use config::Config;
use engine::ServiceEndpoints;

#[derive(Parser)]
#[command(name = "lecternd", about = "Lectern venue presence-tracking daemon")]
struct Cli {
    /// Recognition service host
    #[arg(long, default_value = "http://localhost")]
    host: String,

    /// Recognition service port
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Recognition service API key
    #[arg(long, env = "LECTERN_API_KEY")]
    api_key: String,

    /// Venue identifier attached to outgoing attendance reports
    #[arg(long, env = "LECTERN_VENUE")]
    venue: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    tracing::info!(venue = %cli.venue, "lecternd starting");

    let camera = Camera::open(&config.camera_device).map_err(|err| {
        for dev in Camera::list_devices() {
            tracing::info!(path = %dev.path, name = %dev.name, "available capture device");
        }
        err
    })
    .with_context(|| format!("failed to open camera {}", config.camera_device))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let (frame_tx, frame_rx) = watch::channel(None);
    let (done_tx, done_rx) = oneshot::channel();

    let capture_handle = capture::spawn_capture(
        camera,
        frame_tx,
        shutdown.clone(),
        config.warmup_frames,
    )?;

    let endpoints = ServiceEndpoints {
        recognition_base_url: format!("{}:{}", cli.host, cli.port),
        api_key: cli.api_key,
        recognition_timeout: Duration::from_secs(config.recognition_timeout_secs),
        liveness_url: config.liveness_url.clone(),
        liveness_timeout: Duration::from_secs(config.liveness_timeout_secs),
        report_url: config.report_url.clone(),
        venue: cli.venue,
        report_token: config.report_token.clone(),
    };

    let engine_handle = engine::spawn_engine(
        endpoints,
        config.engine_config(),
        config.recog_interval(),
        Duration::from_millis(config.tick_interval_ms),
        frame_rx,
        shutdown.clone(),
        done_tx,
    )?;

    tracing::info!("lecternd ready");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
        _ = done_rx => {
            tracing::warn!("engine stopped; shutting down");
        }
    }

    // stop both loops; the camera is released when the capture thread exits
    shutdown.store(true, Ordering::Relaxed);
    let _ = capture_handle.join();
    let _ = engine_handle.join();

    tracing::info!("lecternd stopped");
    Ok(())
}
