//! Cuberse relay server
//!
//! Accepts WebSocket connections from collaboration clients, relays cube edits
//! within each space and serves a small HTTP status API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use cuberse::api;
use cuberse::config::ServerConfig;
use cuberse::net::accept_connections;
use cuberse::state::AppState;
use cuberse::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Load configuration before logging so `debug` can raise the filter
    let config = ServerConfig::load().await?;
    init_logging(config.log_filter());

    info!("╔══════════════════════════════════════════════╗");
    info!("║          Cuberse Relay Server v{}         ║", VERSION);
    info!("╚══════════════════════════════════════════════╝");

    if config.config_path.exists() {
        info!(
            "Configuration loaded from: {}",
            config.config_path.display()
        );
    } else {
        warn!(
            "Config file not found at {}, using defaults",
            config.config_path.display()
        );
    }

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let state = Arc::new(AppState::new(config.clone(), shutdown_tx.clone()));
    info!("Application state initialized");

    // Start WebSocket listener for collaboration clients
    let ws_addr: SocketAddr = config.websocket_addr().parse()?;
    let ws_listener = TcpListener::bind(ws_addr).await?;
    info!("WebSocket server listening on: {}", ws_addr);

    let ws_state = state.clone();
    let mut ws_shutdown_rx = shutdown_tx.subscribe();
    let ws_handle = tokio::spawn(async move {
        accept_connections(ws_listener, ws_state, &mut ws_shutdown_rx).await;
    });

    // Start HTTP status API if enabled
    let api_handle = if config.http_enabled {
        let api_addr: SocketAddr = config.http_addr().parse()?;
        let api_listener = TcpListener::bind(api_addr).await?;
        info!("HTTP status API listening on: {}", api_addr);

        let api_state = state.clone();
        let api_shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            run_api_server(api_listener, api_state, api_shutdown_rx).await;
        }))
    } else {
        info!("HTTP status API disabled");
        None
    };

    info!("{} is ready for connections", config.server_name);

    // Wait for shutdown signal
    wait_for_shutdown(shutdown_tx.clone()).await;

    info!("Shutting down server...");

    let _ = ws_handle.await;
    if let Some(handle) = api_handle {
        let _ = handle.await;
    }

    // Wake every writer so sockets close
    state.session_manager.disconnect_all();
    info!("All sessions disconnected");

    info!("Server shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();
}

/// Run the HTTP status API
async fn run_api_server(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let router = api::create_router(state);

    let shutdown_signal = async move {
        let _ = shutdown_rx.recv().await;
        info!("HTTP status API shutting down");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .unwrap_or_else(|e| error!("API server error: {}", e));
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
