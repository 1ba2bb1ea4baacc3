//! Zone module
//!
//! Spatial partitioning of the voxel world:
//! - `coords`: world ↔ zone ↔ grid transforms
//! - `store`: sparse voxels of a single zone
//! - `manager`: the whole client-side world

pub mod coords;
pub mod manager;
pub mod store;

pub use coords::{GridCoord, VoxelKey, WorldPos, ZoneCoord, ZoneLayout, ZONE_DIVISIONS, ZONE_SIZE};
pub use manager::{NoopObserver, ZoneManager, ZoneObserver};
pub use store::{VoxelRecord, ZoneStore};
