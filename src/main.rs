//! PowerMate Bridge
//!
//! Griffin PowerMate rotary controller bridge for Roon zone transport control.

use powermate_bridge::adapters::{roon::RoonAdapter, Startable};
use powermate_bridge::{api, bus, config, device, settings, supervisor};

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "powermate_bridge=debug,tower_http=info,roon_api=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting PowerMate Bridge v{} ({})",
        env!("PMB_VERSION"),
        env!("PMB_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    tracing::info!("Configuration loaded, port: {}", config.port);

    let bus = bus::create_bus();
    let shutdown = CancellationToken::new();

    // Control loop
    let settings_path = config::get_config_file_path(settings::SETTINGS_FILE);
    tracing::info!("Settings file: {}", settings_path.display());
    let store = settings::JsonFileStore::new(settings_path);
    let backend = Arc::new(device::HidrawBackend::new(config.hid_device.clone()));
    let (supervisor, handle) =
        supervisor::Supervisor::new(Box::new(store), backend, bus.clone(), config.poll_interval());
    let supervisor_task = tokio::spawn(supervisor.run(shutdown.clone()));

    // Roon pairing
    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    let display_name = config.roon.display_name.clone().or(Some(hostname));
    let roon = RoonAdapter::new(bus.clone(), handle.clone(), config.roon.enabled, display_name);
    let mut state = api::AppState::new(handle);
    if roon.can_start().await {
        roon.start().await?;
        tracing::info!("{} adapter started", roon.name());
        state = state.with_roon(roon.clone());
    } else {
        tracing::info!("{} adapter disabled", roon.name());
    }

    let app = api::router(state);

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Shutting down...");
    shutdown.cancel();
    roon.stop().await;
    if let Err(e) = supervisor_task.await {
        tracing::warn!("Supervisor task ended abnormally: {}", e);
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
