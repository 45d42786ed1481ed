use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod models;
mod session;

use config::Config;
use dbus_interface::{AppState, FaceGateService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facegated starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        camera = %config.camera_device,
        width = config.camera_width,
        height = config.camera_height,
        model_dir = %config.model_dir.display(),
        sensitivity = %config.sensitivity,
        interval_ms = config.sample_interval_ms,
        "configuration loaded"
    );

    // Missing models are not fatal: the daemon serves Status and ReloadModels
    // and rejects sessions with ModelUnavailable until a reload succeeds.
    let models = models::load(config.model_dir.clone()).await.map_err(|e| {
        tracing::warn!(error = %e, "face models unavailable; starting in degraded mode");
        e.to_string()
    });

    let session_bus = config.session_bus;
    let state = Arc::new(Mutex::new(AppState::new(config, models)));
    let service = FaceGateService {
        state: Arc::clone(&state),
    };

    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = if session_bus { "session" } else { "system" }, name = BUS_NAME, "facegated ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    if let Some(session) = state.lock().await.session.take() {
        session.stop().await;
    }

    Ok(())
}
