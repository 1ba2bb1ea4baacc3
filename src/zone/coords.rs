//! Zone coordinate module
//!
//! The ground plane is tiled by square zones centred on their origin. Each zone
//! is divided into `divisions × divisions` columns of cubes; the vertical axis is
//! unbounded upward. This module converts between:
//! - world space (floating point, shared with renderers and the `sceneData` blob)
//! - zone coordinates (which tile)
//! - grid coordinates (which cube inside the tile)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ZoneError};

/// Edge length of a zone in world units
pub const ZONE_SIZE: f64 = 20.0;

/// Cubes per zone edge
pub const ZONE_DIVISIONS: i32 = 20;

/// Integer address of a zone tile
///
/// A missing field deserialises as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneCoord {
    pub x: i32,
    pub y: i32,
}

impl ZoneCoord {
    pub const ORIGIN: ZoneCoord = ZoneCoord { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The `"x,y"` key used in `sceneData`
    pub fn key(&self) -> String {
        format!("{},{}", self.x, self.y)
    }

    /// This zone followed by its neighbours; neighbours past the `i32` range are skipped
    pub fn neighborhood(self) -> impl Iterator<Item = ZoneCoord> {
        std::iter::once(self).chain((-1..=1).flat_map(move |dx| {
            (-1..=1)
                .filter(move |&dy| dx != 0 || dy != 0)
                .filter_map(move |dy| {
                    Some(ZoneCoord::new(
                        self.x.checked_add(dx)?,
                        self.y.checked_add(dy)?,
                    ))
                })
        }))
    }
}

impl fmt::Display for ZoneCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for ZoneCoord {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| ProtocolError::InvalidZoneKey(s.to_string()))?;
        let x = x
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidZoneKey(s.to_string()))?;
        let y = y
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidZoneKey(s.to_string()))?;
        Ok(Self { x, y })
    }
}

/// Cube position local to a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GridCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Identity of a voxel across clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoxelKey {
    pub zone: ZoneCoord,
    pub grid: GridCoord,
}

impl VoxelKey {
    pub fn new(zone: ZoneCoord, grid: GridCoord) -> Self {
        Self { zone, grid }
    }
}

/// World-space position (cube centre)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPos {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl WorldPos {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Zone size and subdivision shared by every client in a space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneLayout {
    pub zone_size: f64,
    pub divisions: i32,
}

impl Default for ZoneLayout {
    fn default() -> Self {
        Self {
            zone_size: ZONE_SIZE,
            divisions: ZONE_DIVISIONS,
        }
    }
}

impl ZoneLayout {
    pub fn new(zone_size: f64, divisions: i32) -> Self {
        Self {
            zone_size,
            divisions,
        }
    }

    /// Edge length of a single cube
    pub fn cube_size(&self) -> f64 {
        self.zone_size / self.divisions as f64
    }

    /// Whether `grid` addresses a cell inside a zone
    pub fn contains(&self, grid: GridCoord) -> bool {
        (0..self.divisions).contains(&grid.x)
            && (0..self.divisions).contains(&grid.z)
            && grid.y >= 0
    }

    pub fn check(&self, grid: GridCoord) -> Result<(), ZoneError> {
        if self.contains(grid) {
            Ok(())
        } else {
            Err(ZoneError::GridOutOfBounds {
                x: grid.x,
                y: grid.y,
                z: grid.z,
                divisions: self.divisions,
            })
        }
    }

    /// Zone containing the world-space column `(x, z)`
    pub fn zone_at(&self, x: f64, z: f64) -> ZoneCoord {
        let half = self.zone_size / 2.0;
        ZoneCoord::new(
            ((x + half) / self.zone_size).floor() as i32,
            ((z + half) / self.zone_size).floor() as i32,
        )
    }

    /// Lower corner `(x, z)` of a zone in world space
    fn zone_min(&self, zone: ZoneCoord) -> (f64, f64) {
        let half = self.zone_size / 2.0;
        (
            zone.x as f64 * self.zone_size - half,
            zone.y as f64 * self.zone_size - half,
        )
    }

    /// Centre of the cube at `grid` inside `zone`
    pub fn grid_to_world(&self, zone: ZoneCoord, grid: GridCoord) -> WorldPos {
        let cube = self.cube_size();
        let (min_x, min_z) = self.zone_min(zone);
        WorldPos {
            x: min_x + (grid.x as f64 + 0.5) * cube,
            y: (grid.y as f64 + 0.5) * cube,
            z: min_z + (grid.z as f64 + 0.5) * cube,
        }
    }

    /// Voxel identity of the cell containing `pos`
    pub fn world_to_grid(&self, pos: WorldPos) -> Result<VoxelKey, ZoneError> {
        if !pos.is_finite() {
            return Err(ZoneError::NonFinitePosition);
        }

        let cube = self.cube_size();
        let zone = self.zone_at(pos.x, pos.z);
        let (min_x, min_z) = self.zone_min(zone);
        let last = self.divisions - 1;

        // Float error at the far edge of a zone can land one cell past the end.
        let grid = GridCoord {
            x: (((pos.x - min_x) / cube).floor() as i32).clamp(0, last),
            y: (pos.y / cube).floor() as i32,
            z: (((pos.z - min_z) / cube).floor() as i32).clamp(0, last),
        };
        self.check(grid)?;

        Ok(VoxelKey { zone, grid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_key_format() {
        assert_eq!(ZoneCoord::new(3, -2).key(), "3,-2");
        assert_eq!("3,-2".parse::<ZoneCoord>().unwrap(), ZoneCoord::new(3, -2));
        assert_eq!(" 4, 5".parse::<ZoneCoord>().unwrap(), ZoneCoord::new(4, 5));
        assert!("currentZone".parse::<ZoneCoord>().is_err());
        assert!("1,x".parse::<ZoneCoord>().is_err());
    }

    #[test]
    fn test_neighborhood() {
        let zones: Vec<_> = ZoneCoord::new(2, 2).neighborhood().collect();
        assert_eq!(zones.len(), 9);
        assert_eq!(zones[0], ZoneCoord::new(2, 2));
        assert!(zones.contains(&ZoneCoord::new(1, 1)));
        assert!(zones.contains(&ZoneCoord::new(3, 3)));
        assert!(zones.contains(&ZoneCoord::new(2, 1)));
    }

    #[test]
    fn test_neighborhood_at_range_edges() {
        let zones: Vec<_> = ZoneCoord::new(i32::MAX, 0).neighborhood().collect();
        assert_eq!(zones.len(), 6);
        assert!(zones.iter().all(|z| z.x >= i32::MAX - 1));

        let zones: Vec<_> = ZoneCoord::new(i32::MAX, i32::MIN).neighborhood().collect();
        assert_eq!(zones.len(), 4);
        assert_eq!(zones[0], ZoneCoord::new(i32::MAX, i32::MIN));
        assert!(zones.contains(&ZoneCoord::new(i32::MAX - 1, i32::MIN + 1)));
    }

    #[test]
    fn test_grid_to_world_matches_centered_layout() {
        let layout = ZoneLayout::default();
        let pos = layout.grid_to_world(ZoneCoord::ORIGIN, GridCoord::new(0, 0, 0));
        assert_eq!(pos, WorldPos::new(-9.5, 0.5, -9.5));

        let pos = layout.grid_to_world(ZoneCoord::new(1, -1), GridCoord::new(19, 2, 10));
        assert_eq!(pos, WorldPos::new(29.5, 2.5, -19.5));
    }

    #[test]
    fn test_round_trip_all_cells() {
        let layout = ZoneLayout::default();
        for zx in -3..=3 {
            for zy in -3..=3 {
                let zone = ZoneCoord::new(zx, zy);
                for gx in 0..layout.divisions {
                    for gz in 0..layout.divisions {
                        for gy in [0, 1, 7, 250] {
                            let grid = GridCoord::new(gx, gy, gz);
                            let pos = layout.grid_to_world(zone, grid);
                            let key = layout.world_to_grid(pos).unwrap();
                            assert_eq!(key, VoxelKey::new(zone, grid));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_round_trip_non_unit_cubes() {
        let layout = ZoneLayout::new(20.0, 16);
        assert_eq!(layout.cube_size(), 1.25);
        let zone = ZoneCoord::new(-7, 12);
        for gx in 0..16 {
            let grid = GridCoord::new(gx, 3, 15 - gx);
            let key = layout.world_to_grid(layout.grid_to_world(zone, grid)).unwrap();
            assert_eq!(key, VoxelKey::new(zone, grid));
        }
    }

    #[test]
    fn test_zone_at_boundaries() {
        let layout = ZoneLayout::default();
        assert_eq!(layout.zone_at(0.0, 0.0), ZoneCoord::new(0, 0));
        assert_eq!(layout.zone_at(-10.0, 9.99), ZoneCoord::new(0, 0));
        assert_eq!(layout.zone_at(10.0, -10.01), ZoneCoord::new(1, -1));
    }

    #[test]
    fn test_bounds_check() {
        let layout = ZoneLayout::default();
        assert!(layout.contains(GridCoord::new(0, 0, 19)));
        assert!(layout.contains(GridCoord::new(19, 1000, 0)));
        assert!(!layout.contains(GridCoord::new(20, 0, 0)));
        assert!(!layout.contains(GridCoord::new(0, -1, 0)));
        assert!(!layout.contains(GridCoord::new(0, 0, -1)));

        let below_ground = WorldPos::new(0.5, -0.5, 0.5);
        assert!(matches!(
            layout.world_to_grid(below_ground),
            Err(ZoneError::GridOutOfBounds { y: -1, .. })
        ));
        assert_eq!(
            layout.world_to_grid(WorldPos::new(f64::NAN, 0.0, 0.0)),
            Err(ZoneError::NonFinitePosition)
        );
    }
}
