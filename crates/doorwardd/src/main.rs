use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use doorward_core::DoorController;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

mod bus;
mod config;
mod engine;
mod frames;
mod spool;

use bus::MqttPublisher;
use config::Config;
use frames::FrameLoopSettings;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    init_tracing(config.log_file.as_deref())?;

    tracing::info!(
        broker = %format!("{}:{}", config.broker_host, config.broker_port),
        client_id = %config.client_id,
        tags = config.authorized_tags.len(),
        "doorwardd starting"
    );
    if config.authorized_tags.is_empty() {
        tracing::warn!("no authorized RFID tags configured; every tag will be denied");
    }

    let (client, eventloop) = bus::connect(&config);
    let (door, _engine) = engine::spawn_door_engine(
        DoorController::new(config.access_policy()),
        MqttPublisher::new(client.clone()),
    );
    let adapter = tokio::spawn(bus::run_adapter(client, eventloop, door.clone()));

    let shutdown = Arc::new(AtomicBool::new(false));
    let frame_thread = match config.analyzer_url.as_deref() {
        Some(url) => {
            let settings = FrameLoopSettings::from_config(&config, url);
            Some(
                frames::start(settings, door.clone(), shutdown.clone())
                    .await
                    .context("failed to start frame loop")?,
            )
        }
        None => {
            tracing::warn!("no analyzer_url configured; face recognition disabled");
            None
        }
    };

    tracing::info!("doorwardd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("doorwardd shutting down");

    shutdown.store(true, Ordering::Relaxed);
    adapter.abort();
    if let Some(thread) = frame_thread {
        let joined = tokio::task::spawn_blocking(move || thread.join()).await;
        if !matches!(joined, Ok(Ok(()))) {
            tracing::error!("frame thread panicked");
        }
    }
    if let Ok(snapshot) = door.snapshot().await {
        tracing::info!(
            state = %snapshot.state,
            session = snapshot.session_active,
            pending_relock = ?snapshot.pending_relock,
            "final door state"
        );
    }

    Ok(())
}

/// Console output always; a plain-text copy goes to `log_file` when set.
fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}
