//! Collaboration client
//!
//! `sync` holds the transport-free state machine that keeps a local
//! `ZoneManager` in step with the rest of a space; `connection` drives it over
//! a WebSocket.

pub mod connection;
pub mod seed;
pub mod sync;

pub use connection::{connect, connect_with, ClientHandle, ClientStatus};
pub use seed::parse_cube_specs;
pub use sync::{SyncClient, SyncState};
