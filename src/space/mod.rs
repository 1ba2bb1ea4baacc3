//! Space module
//!
//! Server-side collaboration state:
//! - `registry`: membership and ownership per space
//! - `relay`: event fan-out to a space, a connection or the owner

pub mod registry;
pub mod relay;

pub use registry::{Departure, JoinOutcome, SpaceRegistry, SpaceSummary};
pub use relay::RelayEngine;
