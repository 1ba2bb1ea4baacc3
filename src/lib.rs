//! Cuberse collaboration library
//!
//! This library provides a real-time relay for collaborative voxel editing:
//! clients join a named space, exchange cube edits through the relay, and sync
//! late joiners from the space owner's scene snapshot.
//!
//! ## Modules
//!
//! - `api` - HTTP status endpoints
//! - `client` - Sync client state machine and WebSocket driver
//! - `config` - Server and client configuration
//! - `error` - Error types and result definitions
//! - `net` - WebSocket transport, sessions and connection handling
//! - `protocol` - Wire events and the scene snapshot format
//! - `space` - Space membership, ownership and event relay
//! - `zone` - Zone coordinates and per-zone voxel storage

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod space;
pub mod state;
pub mod zone;

// Re-export commonly used types
pub use config::{ClientConfig, ServerConfig};
pub use error::{CuberseError, Result};
pub use state::AppState;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
