//! Sparse voxel storage for a single zone

use std::collections::BTreeMap;

use super::coords::GridCoord;

/// A single cube inside a zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelRecord {
    pub grid: GridCoord,
    pub color: String,
}

impl VoxelRecord {
    pub fn new(grid: GridCoord, color: impl Into<String>) -> Self {
        Self {
            grid,
            color: color.into(),
        }
    }
}

/// Voxels of one zone keyed by grid coordinate
///
/// At most one record exists per grid coordinate. Iteration is ordered by
/// `(x, y, z)` so exports are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneStore {
    voxels: BTreeMap<GridCoord, String>,
}

impl ZoneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a voxel if the cell is empty. Returns `true` if it was created.
    pub fn insert(&mut self, grid: GridCoord, color: impl Into<String>) -> bool {
        use std::collections::btree_map::Entry;

        match self.voxels.entry(grid) {
            Entry::Vacant(slot) => {
                slot.insert(color.into());
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Remove the voxel at `grid`. Returns `true` if one was present.
    pub fn remove(&mut self, grid: GridCoord) -> bool {
        self.voxels.remove(&grid).is_some()
    }

    pub fn contains(&self, grid: GridCoord) -> bool {
        self.voxels.contains_key(&grid)
    }

    pub fn color(&self, grid: GridCoord) -> Option<&str> {
        self.voxels.get(&grid).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = VoxelRecord> + '_ {
        self.voxels
            .iter()
            .map(|(grid, color)| VoxelRecord::new(*grid, color.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut store = ZoneStore::new();
        let grid = GridCoord::new(1, 0, 2);

        assert!(store.insert(grid, "#ff0000"));
        let once = store.clone();
        assert!(!store.insert(grid, "#ff0000"));
        assert_eq!(store, once);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_insert_keeps_first_color() {
        let mut store = ZoneStore::new();
        let grid = GridCoord::new(4, 4, 4);

        store.insert(grid, "#00ff00");
        store.insert(grid, "#0000ff");
        assert_eq!(store.color(grid), Some("#00ff00"));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut store = ZoneStore::new();
        let grid = GridCoord::new(3, 1, 3);

        assert!(!store.remove(grid));
        store.insert(grid, "#123456");
        assert!(store.remove(grid));
        assert!(!store.remove(grid));
        assert!(store.is_empty());
    }

    #[test]
    fn test_iteration_order() {
        let mut store = ZoneStore::new();
        store.insert(GridCoord::new(2, 0, 0), "#a");
        store.insert(GridCoord::new(0, 5, 0), "#b");
        store.insert(GridCoord::new(0, 0, 9), "#c");

        let grids: Vec<_> = store.iter().map(|r| r.grid).collect();
        assert_eq!(
            grids,
            vec![
                GridCoord::new(0, 0, 9),
                GridCoord::new(0, 5, 0),
                GridCoord::new(2, 0, 0),
            ]
        );
    }
}
