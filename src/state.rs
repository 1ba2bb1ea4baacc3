//! Application state module
//!
//! Contains the shared state injected into every connection handler and HTTP
//! route. There is one instance per server process.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::ServerConfig;
use crate::net::session::SessionManager;
use crate::space::{RelayEngine, SpaceRegistry};

/// Application state shared across all connections
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Session manager for tracking connected sockets
    pub session_manager: Arc<SessionManager>,
    /// Space membership and ownership
    pub registry: Arc<SpaceRegistry>,
    /// Event fan-out
    pub relay: RelayEngine,
    /// Process start, for uptime reporting
    pub started_at: Instant,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(config: ServerConfig, shutdown_tx: broadcast::Sender<()>) -> Self {
        let session_manager = Arc::new(SessionManager::with_limits(
            config.max_connections_per_ip,
            config.outbound_queue_capacity,
            config.overflow_policy,
        ));
        let registry = Arc::new(SpaceRegistry::new());
        let relay = RelayEngine::new(session_manager.clone(), registry.clone());

        info!(
            queue_capacity = config.outbound_queue_capacity,
            overflow_policy = ?config.overflow_policy,
            max_per_ip = config.max_connections_per_ip,
            "Relay state initialized"
        );

        Self {
            config,
            session_manager,
            registry,
            relay,
            started_at: Instant::now(),
            shutdown_tx,
        }
    }
}
