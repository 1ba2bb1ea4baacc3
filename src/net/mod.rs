//! Networking module
//!
//! This module handles all network-related functionality for the relay:
//! - WebSocket framing of events
//! - Session management and bounded outbound queues
//! - Connection lifecycle and event dispatch

pub mod handler;
pub mod session;
pub mod transport;

pub use handler::{accept_connections, ConnectionHandler};
pub use session::{ConnectionId, ConnectionSession, OverflowPolicy, SessionManager};
