//! Sync client state machine
//!
//! Transport-agnostic client half of the protocol. Feed it connection events
//! and `ServerEvent`s; it updates its `ZoneManager` and returns the
//! `ClientEvent`s to send. Per space the client moves through:
//!
//! ```text
//! Disconnected -> Joining -> Syncing -> Synced
//!                        \____________/
//!                          (owner)
//! ```
//!
//! A non-owner asks the owner for a snapshot exactly once per connection and
//! stays in `Syncing` until `room-info` arrives. With a retry interval set the
//! request is repeated while waiting.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::events::{
    ClientEvent, CubeEvent, Login, MemberInfo, ModelCube, ModelPlacement, OwnerRequest,
    RoomInfoReply, SceneLoad, ServerEvent, SpaceRef,
};
use crate::protocol::scene::SceneSnapshot;
use crate::zone::{GridCoord, ZoneCoord, ZoneManager};

/// Protocol state of a client in its space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Disconnected,
    /// `login` sent, waiting for the member list
    Joining,
    /// Waiting for the owner's snapshot
    Syncing,
    /// Scene is authoritative or received
    Synced,
}

impl SyncState {
    pub fn name(&self) -> &'static str {
        match self {
            SyncState::Disconnected => "Disconnected",
            SyncState::Joining => "Joining",
            SyncState::Syncing => "Syncing",
            SyncState::Synced => "Synced",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Client-side synchronisation of one space
#[derive(Debug)]
pub struct SyncClient {
    user_id: String,
    space_id: String,
    owned_space_ids: Vec<String>,
    state: SyncState,
    is_owner: bool,
    members: Vec<MemberInfo>,
    /// A snapshot was requested on this connection
    requested_snapshot: bool,
    requested_at: Option<Instant>,
    snapshot_retry: Option<Duration>,
    zones: ZoneManager,
}

impl SyncClient {
    pub fn new(
        user_id: impl Into<String>,
        space_id: impl Into<String>,
        owned_space_ids: Vec<String>,
        zones: ZoneManager,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            space_id: space_id.into(),
            owned_space_ids,
            state: SyncState::Disconnected,
            is_owner: false,
            members: Vec::new(),
            requested_snapshot: false,
            requested_at: None,
            snapshot_retry: None,
            zones,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.user_id.clone(),
            config.space_id.clone(),
            config.owned_space_ids.clone(),
            ZoneManager::new(config.layout),
        )
        .with_snapshot_retry(config.snapshot_retry)
    }

    /// Repeat unanswered snapshot requests after `interval`
    pub fn with_snapshot_retry(mut self, interval: Option<Duration>) -> Self {
        self.snapshot_retry = interval;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    pub fn members(&self) -> &[MemberInfo] {
        &self.members
    }

    pub fn zones(&self) -> &ZoneManager {
        &self.zones
    }

    /// Local-only zone operations such as `switch_zone`
    pub fn zones_mut(&mut self) -> &mut ZoneManager {
        &mut self.zones
    }

    fn set_state(&mut self, state: SyncState) {
        if self.state != state {
            debug!(
                user_id = %self.user_id,
                space_id = %self.space_id,
                old_state = %self.state,
                new_state = %state,
                "Sync state changed"
            );
            self.state = state;
        }
    }

    /// Transport connected: returns the `login` to send
    pub fn on_connected(&mut self) -> ClientEvent {
        self.requested_snapshot = false;
        self.requested_at = None;
        self.set_state(SyncState::Joining);
        ClientEvent::Login(
            Login::new(self.user_id.clone(), self.space_id.clone())
                .with_owned_spaces(self.owned_space_ids.clone()),
        )
    }

    /// Transport lost
    pub fn on_disconnected(&mut self) {
        self.requested_snapshot = false;
        self.requested_at = None;
        self.is_owner = false;
        self.set_state(SyncState::Disconnected);
    }

    /// Apply one server event, returning the events to send in response
    pub fn handle(&mut self, event: ServerEvent) -> Vec<ClientEvent> {
        match event {
            ServerEvent::UserList(list) => {
                if list.space_id != self.space_id {
                    debug!(space_id = %list.space_id, "Ignoring user list for another space");
                    return Vec::new();
                }
                self.update_members(list.user_list);
                self.after_user_list().into_iter().collect()
            }
            ServerEvent::UserJoined(notice) | ServerEvent::UserLeft(notice) => {
                self.update_members(notice.user_list);
                Vec::new()
            }
            ServerEvent::RequestRoomInfo(request) => self.answer_room_info(request).into_iter().collect(),
            ServerEvent::RoomInfo(info) => {
                if self.is_owner {
                    debug!("Owner ignoring room info");
                    return Vec::new();
                }
                if self.import_scene(&info.scene_data) {
                    self.set_state(SyncState::Synced);
                }
                Vec::new()
            }
            ServerEvent::AddCube(cube) => {
                if self.in_space(&cube.space_id) {
                    self.apply_add(&cube);
                }
                Vec::new()
            }
            ServerEvent::RemoveCube(cube) => {
                if self.in_space(&cube.space_id) {
                    if let Err(e) = self.zones.remove_voxel(cube.zone(), cube.grid()) {
                        warn!(error = %e, "Ignoring remote remove-cube");
                    }
                }
                Vec::new()
            }
            ServerEvent::PlaceModel(model) => {
                if self.in_space(&model.space_id) {
                    for cube in &model.cubes {
                        if let Err(e) = self.zones.add_voxel(cube.zone(), cube.grid(), &cube.color) {
                            warn!(error = %e, "Ignoring model cube");
                        }
                    }
                }
                Vec::new()
            }
            ServerEvent::ResetScene(reset) => {
                if self.in_space(&reset.space_id) {
                    debug!(space_id = %reset.space_id, "Scene reset");
                    self.zones.clear();
                }
                Vec::new()
            }
            ServerEvent::LoadNewScene(load) => {
                if self.in_space(&load.space_id) && self.import_scene(&load.scene_data) {
                    if self.state == SyncState::Syncing {
                        self.set_state(SyncState::Synced);
                    }
                }
                Vec::new()
            }
        }
    }

    fn in_space(&self, space_id: &str) -> bool {
        if space_id == self.space_id {
            true
        } else {
            debug!(space_id = %space_id, "Ignoring event for another space");
            false
        }
    }

    fn update_members(&mut self, members: Vec<MemberInfo>) {
        let was_owner = self.is_owner;
        self.is_owner = members
            .iter()
            .any(|m| m.is_owner && m.user_id == self.user_id);
        self.members = members;

        if self.is_owner && !was_owner {
            info!(user_id = %self.user_id, space_id = %self.space_id, "Now space owner");
        }
        if self.is_owner && matches!(self.state, SyncState::Joining | SyncState::Syncing) {
            self.set_state(SyncState::Synced);
        }
    }

    fn after_user_list(&mut self) -> Option<ClientEvent> {
        if self.is_owner || self.requested_snapshot || self.state == SyncState::Disconnected {
            return None;
        }

        self.requested_snapshot = true;
        self.requested_at = Some(Instant::now());
        if self.state == SyncState::Joining {
            self.set_state(SyncState::Syncing);
        }
        Some(ClientEvent::RequestRoomInfo(SpaceRef::new(self.space_id.clone())))
    }

    fn answer_room_info(&self, request: OwnerRequest) -> Option<ClientEvent> {
        if !self.is_owner || request.space_id != self.space_id {
            debug!(
                requester = %request.requester_socket_id,
                space_id = %request.space_id,
                "Not answering room info request"
            );
            return None;
        }

        let snapshot = self.zones.export_snapshot();
        debug!(
            requester = %request.requester_socket_id,
            voxels = snapshot.voxel_count(),
            "Sending room info"
        );
        Some(ClientEvent::SendRoomInfo(RoomInfoReply {
            to: Some(request.requester_socket_id),
            space_id: Some(self.space_id.clone()),
            scene_data: Some(snapshot.to_value()),
        }))
    }

    fn import_scene(&mut self, scene_data: &serde_json::Value) -> bool {
        match SceneSnapshot::from_value(scene_data) {
            Ok(snapshot) => {
                self.zones.import_snapshot(&snapshot, |_, _| {});
                true
            }
            Err(e) => {
                warn!(error = %e, "Ignoring scene data");
                false
            }
        }
    }

    fn apply_add(&mut self, cube: &CubeEvent) {
        let Some(color) = cube.color.as_deref() else {
            debug!("Ignoring add-cube without color");
            return;
        };
        if let Err(e) = self.zones.add_voxel(cube.zone(), cube.grid(), color) {
            warn!(error = %e, "Ignoring remote add-cube");
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state == SyncState::Disconnected {
            return Err(ClientError::NotConnected.into());
        }
        Ok(())
    }

    /// Add a cube locally; returns the event to send if it was created
    pub fn add_cube(
        &mut self,
        zone: ZoneCoord,
        grid: GridCoord,
        color: &str,
    ) -> Result<Option<ClientEvent>> {
        self.ensure_connected()?;
        let created = self.zones.add_voxel(zone, grid, color)?;
        Ok(created.then(|| ClientEvent::AddCube(CubeEvent::add(self.space_id.clone(), zone, grid, color))))
    }

    /// Remove a cube locally; returns the event to send if one was removed
    pub fn remove_cube(&mut self, zone: ZoneCoord, grid: GridCoord) -> Result<Option<ClientEvent>> {
        self.ensure_connected()?;
        let removed = self.zones.remove_voxel(zone, grid)?;
        Ok(removed.then(|| ClientEvent::RemoveCube(CubeEvent::remove(self.space_id.clone(), zone, grid))))
    }

    /// Add a batch of cubes; the event carries those that were created
    pub fn place_model(&mut self, cubes: Vec<ModelCube>) -> Result<Option<ClientEvent>> {
        self.ensure_connected()?;
        let layout = self.zones.layout();
        for cube in &cubes {
            layout.check(cube.grid())?;
        }

        let mut placed = Vec::with_capacity(cubes.len());
        for cube in cubes {
            if self.zones.add_voxel(cube.zone(), cube.grid(), &cube.color)? {
                placed.push(cube);
            }
        }

        if placed.is_empty() {
            return Ok(None);
        }
        Ok(Some(ClientEvent::PlaceModel(ModelPlacement::new(
            self.space_id.clone(),
            placed,
        ))))
    }

    /// Replace the whole scene for everyone in the space (owner only)
    ///
    /// Returns `reset-scene` followed by `load-new-scene`.
    pub fn reset_scene(&mut self, snapshot: &SceneSnapshot) -> Result<Vec<ClientEvent>> {
        self.ensure_connected()?;
        if !self.is_owner {
            return Err(ClientError::NotOwner("reset the scene").into());
        }

        self.zones.import_snapshot(snapshot, |_, _| {});
        info!(
            space_id = %self.space_id,
            voxels = snapshot.voxel_count(),
            "Replacing scene"
        );

        Ok(vec![
            ClientEvent::ResetScene(SpaceRef::new(self.space_id.clone())),
            ClientEvent::LoadNewScene(SceneLoad {
                space_id: self.space_id.clone(),
                scene_data: snapshot.to_value(),
            }),
        ])
    }

    /// Re-request the snapshot if the retry interval elapsed while syncing
    pub fn poll_snapshot_retry(&mut self, now: Instant) -> Option<ClientEvent> {
        let interval = self.snapshot_retry?;
        if self.state != SyncState::Syncing {
            return None;
        }
        let requested_at = self.requested_at?;
        if now.saturating_duration_since(requested_at) < interval {
            return None;
        }

        debug!(space_id = %self.space_id, "Retrying room info request");
        self.requested_at = Some(now);
        Some(ClientEvent::RequestRoomInfo(SpaceRef::new(self.space_id.clone())))
    }

    /// When the next snapshot retry is due, if one is pending
    pub fn next_retry_at(&self) -> Option<Instant> {
        match (self.state, self.snapshot_retry, self.requested_at) {
            (SyncState::Syncing, Some(interval), Some(at)) => Some(at + interval),
            _ => None,
        }
    }
}
