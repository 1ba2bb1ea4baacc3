//! Protocol module
//!
//! Wire formats shared by the relay server and the sync client:
//! - Events (one JSON object per WebSocket text frame)
//! - Scene snapshots (the `sceneData` payload)

pub mod events;
pub mod scene;

pub use events::{ClientEvent, ServerEvent};
pub use scene::{SceneCube, SceneSnapshot};
