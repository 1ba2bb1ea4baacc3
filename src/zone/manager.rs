//! Zone manager
//!
//! Owns the sparse voxel world of one client:
//! - per-zone `ZoneStore`s for every zone that holds voxels
//! - the current zone pointer and the set of materialised placeholder zones
//! - snapshot export/import in the `sceneData` format
//!
//! The manager is plain data. Rendering and collision layers hook in through a
//! `ZoneObserver`; the manager never touches the network.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, warn};

use super::coords::{GridCoord, VoxelKey, WorldPos, ZoneCoord, ZoneLayout};
use super::store::{VoxelRecord, ZoneStore};
use crate::error::ZoneError;
use crate::protocol::scene::{SceneCube, SceneSnapshot};

/// Receives structural changes of a `ZoneManager`
///
/// All methods default to no-ops so implementors only pick what they need.
pub trait ZoneObserver: Send {
    /// A voxel was created by `add_voxel` or a snapshot import
    fn voxel_added(&mut self, _key: VoxelKey, _color: &str) {}

    /// A voxel was deleted by `remove_voxel`
    fn voxel_removed(&mut self, _key: VoxelKey) {}

    /// Placeholder visuals for a zone should be created
    fn zone_materialized(&mut self, _zone: ZoneCoord) {}

    /// Every voxel and placeholder was dropped
    fn cleared(&mut self) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ZoneObserver for NoopObserver {}

/// Sparse voxel world with zone bookkeeping
pub struct ZoneManager {
    layout: ZoneLayout,
    zones: BTreeMap<ZoneCoord, ZoneStore>,
    current_zone: ZoneCoord,
    materialized: BTreeSet<ZoneCoord>,
    observer: Box<dyn ZoneObserver>,
}

impl ZoneManager {
    /// Create an empty world positioned at zone `(0,0)`
    pub fn new(layout: ZoneLayout) -> Self {
        let mut manager = Self {
            layout,
            zones: BTreeMap::new(),
            current_zone: ZoneCoord::ORIGIN,
            materialized: BTreeSet::new(),
            observer: Box::new(NoopObserver),
        };
        manager.materialize_around(ZoneCoord::ORIGIN);
        manager
    }

    /// Attach an observer, replaying the placeholders that already exist
    pub fn with_observer(mut self, observer: impl ZoneObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        for zone in &self.materialized {
            self.observer.zone_materialized(*zone);
        }
        self
    }

    pub fn layout(&self) -> ZoneLayout {
        self.layout
    }

    pub fn current_zone(&self) -> ZoneCoord {
        self.current_zone
    }

    /// Zones whose placeholders have been created
    pub fn materialized_zones(&self) -> impl Iterator<Item = ZoneCoord> + '_ {
        self.materialized.iter().copied()
    }

    pub fn is_materialized(&self, zone: ZoneCoord) -> bool {
        self.materialized.contains(&zone)
    }

    /// Insert a voxel if its identity key is absent
    ///
    /// Returns `Ok(true)` when created and `Ok(false)` when the cell was
    /// already occupied.
    pub fn add_voxel(
        &mut self,
        zone: ZoneCoord,
        grid: GridCoord,
        color: &str,
    ) -> Result<bool, ZoneError> {
        self.layout.check(grid)?;

        let created = self.zones.entry(zone).or_default().insert(grid, color);
        if created {
            self.observer.voxel_added(VoxelKey::new(zone, grid), color);
        }
        Ok(created)
    }

    /// Delete a voxel if present
    pub fn remove_voxel(&mut self, zone: ZoneCoord, grid: GridCoord) -> Result<bool, ZoneError> {
        self.layout.check(grid)?;

        let Some(store) = self.zones.get_mut(&zone) else {
            return Ok(false);
        };
        let removed = store.remove(grid);
        if store.is_empty() {
            self.zones.remove(&zone);
        }
        if removed {
            self.observer.voxel_removed(VoxelKey::new(zone, grid));
        }
        Ok(removed)
    }

    /// Insert the voxel whose cell contains a world-space point
    pub fn add_voxel_at(&mut self, pos: WorldPos, color: &str) -> Result<bool, ZoneError> {
        let key = self.layout.world_to_grid(pos)?;
        self.add_voxel(key.zone, key.grid, color)
    }

    pub fn contains(&self, key: VoxelKey) -> bool {
        self.zones
            .get(&key.zone)
            .is_some_and(|store| store.contains(key.grid))
    }

    pub fn color(&self, key: VoxelKey) -> Option<&str> {
        self.zones.get(&key.zone).and_then(|store| store.color(key.grid))
    }

    pub fn zone(&self, zone: ZoneCoord) -> Option<&ZoneStore> {
        self.zones.get(&zone)
    }

    /// Zones currently holding at least one voxel
    pub fn populated_zones(&self) -> impl Iterator<Item = (ZoneCoord, usize)> + '_ {
        self.zones.iter().map(|(zone, store)| (*zone, store.len()))
    }

    pub fn voxel_count(&self) -> usize {
        self.zones.values().map(ZoneStore::len).sum()
    }

    /// Every voxel with its identity key, ordered by zone then grid
    pub fn voxels(&self) -> impl Iterator<Item = (VoxelKey, VoxelRecord)> + '_ {
        self.zones.iter().flat_map(|(zone, store)| {
            store
                .iter()
                .map(move |record| (VoxelKey::new(*zone, record.grid), record))
        })
    }

    /// Move the current zone pointer
    ///
    /// Materialises placeholders for the target and its neighbours. Returns
    /// `false` without side effects when already there.
    pub fn switch_zone(&mut self, zone: ZoneCoord) -> bool {
        if zone == self.current_zone {
            return false;
        }

        debug!(from = %self.current_zone, to = %zone, "Switching zone");
        self.current_zone = zone;
        self.materialize_around(zone);
        true
    }

    /// Serialise every populated zone plus the current zone marker
    pub fn export_snapshot(&self) -> SceneSnapshot {
        let mut snapshot = SceneSnapshot::new(self.current_zone);
        for (zone, store) in &self.zones {
            if store.is_empty() {
                continue;
            }
            let cubes = store
                .iter()
                .map(|record| {
                    let pos = self.layout.grid_to_world(*zone, record.grid);
                    SceneCube::new(pos.x, pos.y, pos.z, record.color)
                })
                .collect();
            snapshot.zones.insert(*zone, cubes);
        }
        snapshot
    }

    /// Replace the whole world with a snapshot
    ///
    /// The observer sees `cleared()` first and then `voxel_added` for every
    /// voxel that ends up in the store; `apply` is called alongside it. Records
    /// whose position does not map to a valid cell are skipped.
    pub fn import_snapshot<F>(&mut self, snapshot: &SceneSnapshot, mut apply: F)
    where
        F: FnMut(VoxelKey, &str),
    {
        self.reset_to(snapshot.current_zone);

        for (zone, cubes) in &snapshot.zones {
            for cube in cubes {
                let pos = WorldPos::new(cube.x, cube.y, cube.z);
                let key = match self.layout.world_to_grid(pos) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(zone = %zone, error = %e, "Skipping snapshot cube");
                        continue;
                    }
                };
                if key.zone != *zone {
                    debug!(listed = %zone, actual = %key.zone, "Snapshot cube listed under another zone");
                }

                if self.zones.entry(key.zone).or_default().insert(key.grid, &cube.color) {
                    self.observer.voxel_added(key, &cube.color);
                    apply(key, &cube.color);
                }
            }
        }

        debug!(
            voxels = self.voxel_count(),
            zones = self.zones.len(),
            current_zone = %self.current_zone,
            "Imported snapshot"
        );
    }

    /// Drop all voxels and placeholders and return to zone `(0,0)`
    pub fn clear(&mut self) {
        self.reset_to(ZoneCoord::ORIGIN);
    }

    fn reset_to(&mut self, zone: ZoneCoord) {
        self.zones.clear();
        self.materialized.clear();
        self.observer.cleared();
        self.current_zone = zone;
        self.materialize_around(zone);
    }

    fn materialize_around(&mut self, zone: ZoneCoord) {
        for neighbor in zone.neighborhood() {
            if self.materialized.insert(neighbor) {
                self.observer.zone_materialized(neighbor);
            }
        }
    }
}

impl Default for ZoneManager {
    fn default() -> Self {
        Self::new(ZoneLayout::default())
    }
}

impl fmt::Debug for ZoneManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZoneManager")
            .field("layout", &self.layout)
            .field("current_zone", &self.current_zone)
            .field("zones", &self.zones.len())
            .field("voxels", &self.voxel_count())
            .field("materialized", &self.materialized.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Added(VoxelKey, String),
        Removed(VoxelKey),
        Materialized(ZoneCoord),
        Cleared,
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Seen>>>);

    impl Recorder {
        fn take(&self) -> Vec<Seen> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl ZoneObserver for Recorder {
        fn voxel_added(&mut self, key: VoxelKey, color: &str) {
            self.0.lock().unwrap().push(Seen::Added(key, color.to_string()));
        }
        fn voxel_removed(&mut self, key: VoxelKey) {
            self.0.lock().unwrap().push(Seen::Removed(key));
        }
        fn zone_materialized(&mut self, zone: ZoneCoord) {
            self.0.lock().unwrap().push(Seen::Materialized(zone));
        }
        fn cleared(&mut self) {
            self.0.lock().unwrap().push(Seen::Cleared);
        }
    }

    fn key(zx: i32, zy: i32, x: i32, y: i32, z: i32) -> VoxelKey {
        VoxelKey::new(ZoneCoord::new(zx, zy), GridCoord::new(x, y, z))
    }

    #[test]
    fn test_idempotent_add() {
        let recorder = Recorder::default();
        let mut manager = ZoneManager::default().with_observer(recorder.clone());
        recorder.take();

        let k = key(0, 0, 1, 0, 2);
        assert_eq!(manager.add_voxel(k.zone, k.grid, "#ff0000"), Ok(true));
        let once = manager.export_snapshot();
        assert_eq!(manager.add_voxel(k.zone, k.grid, "#ff0000"), Ok(false));

        assert_eq!(manager.export_snapshot(), once);
        assert_eq!(manager.voxel_count(), 1);
        assert_eq!(recorder.take(), vec![Seen::Added(k, "#ff0000".into())]);
    }

    #[test]
    fn test_idempotent_remove() {
        let recorder = Recorder::default();
        let mut manager = ZoneManager::default().with_observer(recorder.clone());
        recorder.take();

        let k = key(2, -1, 5, 3, 7);
        assert_eq!(manager.remove_voxel(k.zone, k.grid), Ok(false));
        manager.add_voxel(k.zone, k.grid, "#00ff00").unwrap();
        assert_eq!(manager.remove_voxel(k.zone, k.grid), Ok(true));
        assert_eq!(manager.remove_voxel(k.zone, k.grid), Ok(false));

        assert_eq!(manager.voxel_count(), 0);
        assert!(manager.zone(k.zone).is_none());
        assert_eq!(
            recorder.take(),
            vec![Seen::Added(k, "#00ff00".into()), Seen::Removed(k)]
        );
    }

    #[test]
    fn test_rejects_out_of_bounds() {
        let mut manager = ZoneManager::default();
        let err = manager
            .add_voxel(ZoneCoord::ORIGIN, GridCoord::new(20, 0, 0), "#fff")
            .unwrap_err();
        assert!(matches!(err, ZoneError::GridOutOfBounds { x: 20, .. }));
        assert!(manager
            .remove_voxel(ZoneCoord::ORIGIN, GridCoord::new(0, -1, 0))
            .is_err());
        assert_eq!(manager.voxel_count(), 0);
    }

    #[test]
    fn test_switch_zone_materializes_neighbors() {
        let recorder = Recorder::default();
        let mut manager = ZoneManager::default().with_observer(recorder.clone());
        assert_eq!(recorder.take().len(), 9);

        assert!(!manager.switch_zone(ZoneCoord::ORIGIN));
        assert!(recorder.take().is_empty());

        assert!(manager.switch_zone(ZoneCoord::new(1, 0)));
        assert_eq!(manager.current_zone(), ZoneCoord::new(1, 0));
        // (0..=2, -1..=1) minus the 6 already present around the origin
        let fresh = recorder.take();
        assert_eq!(fresh.len(), 3);
        for zone in [ZoneCoord::new(2, -1), ZoneCoord::new(2, 0), ZoneCoord::new(2, 1)] {
            assert!(fresh.contains(&Seen::Materialized(zone)));
        }
        assert_eq!(manager.materialized_zones().count(), 12);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut manager = ZoneManager::default();
        manager.add_voxel(ZoneCoord::new(0, 0), GridCoord::new(0, 0, 0), "#a00000").unwrap();
        manager.add_voxel(ZoneCoord::new(0, 0), GridCoord::new(19, 4, 19), "#00a000").unwrap();
        manager.add_voxel(ZoneCoord::new(-3, 7), GridCoord::new(10, 0, 1), "#0000a0").unwrap();
        manager.switch_zone(ZoneCoord::new(-3, 7));

        let before: Vec<_> = manager.voxels().collect();
        let snapshot = manager.export_snapshot();

        let mut applied = Vec::new();
        manager.import_snapshot(&snapshot, |key, color| applied.push((key, color.to_string())));

        assert_eq!(manager.voxels().collect::<Vec<_>>(), before);
        assert_eq!(manager.current_zone(), ZoneCoord::new(-3, 7));
        assert_eq!(applied.len(), 3);
    }

    #[test]
    fn test_import_is_full_replace() {
        let mut source = ZoneManager::default();
        source.add_voxel(ZoneCoord::new(1, 1), GridCoord::new(3, 0, 3), "#111111").unwrap();
        let snapshot = source.export_snapshot();

        let recorder = Recorder::default();
        let mut target = ZoneManager::default().with_observer(recorder.clone());
        target.add_voxel(ZoneCoord::ORIGIN, GridCoord::new(5, 5, 5), "#999999").unwrap();
        target.switch_zone(ZoneCoord::new(4, 4));
        recorder.take();

        target.import_snapshot(&snapshot, |_, _| {});

        assert_eq!(target.voxel_count(), 1);
        assert!(target.contains(key(1, 1, 3, 0, 3)));
        assert!(!target.contains(key(0, 0, 5, 5, 5)));
        assert_eq!(target.current_zone(), ZoneCoord::ORIGIN);
        assert!(!target.is_materialized(ZoneCoord::new(4, 4)));

        let events = recorder.take();
        assert_eq!(events[0], Seen::Cleared);
        assert_eq!(events.len(), 11);
        assert_eq!(
            events.last(),
            Some(&Seen::Added(key(1, 1, 3, 0, 3), "#111111".into()))
        );
    }

    #[test]
    fn test_import_skips_invalid_cubes() {
        let mut snapshot = SceneSnapshot::new(ZoneCoord::ORIGIN);
        snapshot.zones.insert(
            ZoneCoord::ORIGIN,
            vec![
                SceneCube::new(0.5, 0.5, 0.5, "#ok"),
                SceneCube::new(0.5, -3.5, 0.5, "#below"),
                SceneCube::new(f64::INFINITY, 0.5, 0.5, "#inf"),
                SceneCube::new(0.5, 0.5, 0.5, "#dup"),
            ],
        );

        let mut manager = ZoneManager::default();
        let mut applied = 0;
        manager.import_snapshot(&snapshot, |_, _| applied += 1);

        assert_eq!(applied, 1);
        assert_eq!(manager.voxel_count(), 1);
        assert_eq!(manager.color(key(0, 0, 10, 0, 10)), Some("#ok"));
    }

    #[test]
    fn test_clear_returns_to_origin() {
        let mut manager = ZoneManager::default();
        manager.add_voxel(ZoneCoord::new(2, 2), GridCoord::new(1, 1, 1), "#fff").unwrap();
        manager.switch_zone(ZoneCoord::new(2, 2));

        manager.clear();
        assert_eq!(manager.voxel_count(), 0);
        assert_eq!(manager.current_zone(), ZoneCoord::ORIGIN);
        assert_eq!(manager.materialized_zones().count(), 9);
    }

    #[test]
    fn test_add_voxel_at_world_position() {
        let mut manager = ZoneManager::default();
        assert_eq!(manager.add_voxel_at(WorldPos::new(21.2, 0.9, -0.1), "#abc"), Ok(true));
        assert!(manager.contains(key(1, 0, 11, 0, 9)));
    }
}
