//! fleetd
//!
//! Runs the fleet coordinator: health probe, stats sync, expiry sweep and
//! reconciliation workers, plus the read-only dashboard API.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vpnfleet_coordinator::{
    api,
    config::{ConfigHandle, CoordinatorConfig},
    db::{Database, Stores},
    state::AppState,
    Coordinator,
};
use vpnfleet_panel::{MockPanel, PanelApi, PanelClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = CoordinatorConfig::load()?;

    // Initialize tracing (prefer RUST_LOG, fallback to FLEET_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting fleetd");
    info!(
        listen_addr = %config.listen_addr,
        persistent = config.database.is_some(),
        dev_mode = config.dev_mode,
        "Configuration loaded"
    );

    let stores = match &config.database {
        Some(db_config) => {
            let db = match Database::connect(db_config).await {
                Ok(db) => db,
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };
            if let Err(e) = db.run_migrations().await {
                error!(error = %e, "Failed to run migrations");
                return Err(e.into());
            }
            Stores::postgres(&db)
        }
        None => {
            warn!("No database configured; fleet state is kept in memory");
            Stores::in_memory()
        }
    };

    let panel: Arc<dyn PanelApi> = if config.dev_mode {
        let mock = MockPanel::new();
        for node in &config.nodes {
            mock.add_node(node.panel_url.trim().trim_end_matches('/'));
        }
        warn!(nodes = config.nodes.len(), "Dev mode: using the in-process panel fake");
        Arc::new(mock)
    } else {
        Arc::new(PanelClient::new()?)
    };

    let listen_addr = config.listen_addr;
    let seed_nodes = config.nodes.clone();
    let config = ConfigHandle::new(config);
    let coordinator = Coordinator::new(config.clone(), stores, panel);
    coordinator.seed_nodes(&seed_nodes).await?;

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let workers = coordinator.spawn_workers(&shutdown_rx);
    let reload_handle = spawn_reload_on_hangup(config.clone(), shutdown_rx.clone())?;

    // Build and run the server
    let app = api::create_router(AppState::new(coordinator));

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Wait for workers to finish
    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    for (name, handle) in workers {
        if tokio::time::timeout(shutdown_timeout, handle).await.is_err() {
            warn!(worker = name, "Worker did not shut down in time");
        }
    }
    if let Some(handle) = reload_handle {
        let _ = tokio::time::timeout(shutdown_timeout, handle).await;
    }

    info!("fleetd shutdown complete");
    Ok(())
}

/// Reload configuration on SIGHUP until shutdown.
#[cfg(unix)]
fn spawn_reload_on_hangup(
    config: ConfigHandle,
    mut shutdown: watch::Receiver<bool>,
) -> Result<Option<JoinHandle<()>>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("Received SIGHUP, reloading configuration");
                    if let Err(e) = config.reload() {
                        error!(error = %e, "Configuration reload failed; keeping previous values");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })))
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(
    _config: ConfigHandle,
    _shutdown: watch::Receiver<bool>,
) -> Result<Option<JoinHandle<()>>> {
    Ok(None)
}
