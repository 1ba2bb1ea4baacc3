//! Event definitions
//!
//! Every WebSocket text frame carries exactly one event:
//! `{"event": "<name>", "data": {...}}`. Client→server events are `ClientEvent`,
//! server→client events are `ServerEvent`. Mutation events (`add-cube`,
//! `remove-cube`, `place-model`, `reset-scene`, `load-new-scene`) exist in both
//! directions with the same payload, since the server relays them unchanged.
//!
//! `sceneData` is carried as raw JSON. The relay never interprets it; clients
//! parse it with [`SceneSnapshot`](super::scene::SceneSnapshot).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::net::session::ConnectionId;
use crate::zone::coords::{GridCoord, ZoneCoord};

/// `type` marker carried by `place-model` payloads
pub const MODEL_PLACEMENT: &str = "model_placement";

/// Events sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Login(Login),
    RequestRoomInfo(SpaceRef),
    SendRoomInfo(RoomInfoReply),
    AddCube(CubeEvent),
    RemoveCube(CubeEvent),
    PlaceModel(ModelPlacement),
    ResetScene(SpaceRef),
    LoadNewScene(SceneLoad),
}

/// Events sent by the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    UserList(UserList),
    UserJoined(MembershipNotice),
    UserLeft(MembershipNotice),
    RequestRoomInfo(OwnerRequest),
    RoomInfo(RoomInfo),
    AddCube(CubeEvent),
    RemoveCube(CubeEvent),
    PlaceModel(ModelPlacement),
    ResetScene(SpaceRef),
    LoadNewScene(SceneLoad),
}

/// `login` payload
///
/// Identity fields are optional on the wire; a login missing either one is
/// ignored by the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Login {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub space_id: Option<String>,
    #[serde(default, alias = "userSpaces")]
    pub owned_space_ids: Vec<String>,
}

impl Login {
    pub fn new(user_id: impl Into<String>, space_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            space_id: Some(space_id.into()),
            owned_space_ids: Vec::new(),
        }
    }

    pub fn with_owned_spaces(mut self, spaces: Vec<String>) -> Self {
        self.owned_space_ids = spaces;
        self
    }

    /// Both identity fields, if present and non-empty
    pub fn identity(&self) -> Result<(&str, &str), ProtocolError> {
        let user_id = non_empty(&self.user_id).ok_or(ProtocolError::MissingField {
            event: "login",
            field: "userId",
        })?;
        let space_id = non_empty(&self.space_id).ok_or(ProtocolError::MissingField {
            event: "login",
            field: "spaceId",
        })?;
        Ok((user_id, space_id))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Payload that only names a space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceRef {
    pub space_id: String,
}

impl SpaceRef {
    pub fn new(space_id: impl Into<String>) -> Self {
        Self {
            space_id: space_id.into(),
        }
    }
}

/// `send-room-info`: the owner's answer to a snapshot request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfoReply {
    #[serde(default)]
    pub to: Option<ConnectionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
    #[serde(default)]
    pub scene_data: Option<Value>,
}

/// `add-cube` / `remove-cube`
///
/// `x`, `y`, `z` are grid coordinates inside zone `(zoneX, zoneY)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeEvent {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub zone_x: i32,
    pub zone_y: i32,
    pub space_id: String,
}

impl CubeEvent {
    pub fn add(
        space_id: impl Into<String>,
        zone: ZoneCoord,
        grid: GridCoord,
        color: impl Into<String>,
    ) -> Self {
        Self {
            color: Some(color.into()),
            ..Self::remove(space_id, zone, grid)
        }
    }

    pub fn remove(space_id: impl Into<String>, zone: ZoneCoord, grid: GridCoord) -> Self {
        Self {
            x: grid.x,
            y: grid.y,
            z: grid.z,
            color: None,
            zone_x: zone.x,
            zone_y: zone.y,
            space_id: space_id.into(),
        }
    }

    pub fn zone(&self) -> ZoneCoord {
        ZoneCoord::new(self.zone_x, self.zone_y)
    }

    pub fn grid(&self) -> GridCoord {
        GridCoord::new(self.x, self.y, self.z)
    }
}

/// One cube of a `place-model` batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCube {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub color: String,
    pub zone_x: i32,
    pub zone_y: i32,
}

impl ModelCube {
    pub fn new(zone: ZoneCoord, grid: GridCoord, color: impl Into<String>) -> Self {
        Self {
            x: grid.x,
            y: grid.y,
            z: grid.z,
            color: color.into(),
            zone_x: zone.x,
            zone_y: zone.y,
        }
    }

    pub fn zone(&self) -> ZoneCoord {
        ZoneCoord::new(self.zone_x, self.zone_y)
    }

    pub fn grid(&self) -> GridCoord {
        GridCoord::new(self.x, self.y, self.z)
    }
}

/// `place-model`: a batch of cubes added in one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPlacement {
    #[serde(rename = "type", default = "model_placement")]
    pub kind: String,
    pub cubes: Vec<ModelCube>,
    pub space_id: String,
}

impl ModelPlacement {
    pub fn new(space_id: impl Into<String>, cubes: Vec<ModelCube>) -> Self {
        Self {
            kind: MODEL_PLACEMENT.to_string(),
            cubes,
            space_id: space_id.into(),
        }
    }
}

fn model_placement() -> String {
    MODEL_PLACEMENT.to_string()
}

/// `load-new-scene`: bulk replacement of every client's scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneLoad {
    pub space_id: String,
    pub scene_data: Value,
}

/// A member as listed in `user-list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub user_id: String,
    pub is_owner: bool,
}

impl MemberInfo {
    pub fn new(user_id: impl Into<String>, is_owner: bool) -> Self {
        Self {
            user_id: user_id.into(),
            is_owner,
        }
    }
}

/// `user-list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserList {
    pub space_id: String,
    pub user_list: Vec<MemberInfo>,
}

/// `user-joined` / `user-left`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipNotice {
    pub user_id: String,
    pub user_list: Vec<MemberInfo>,
}

/// `request-room-info` as relayed to the owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRequest {
    pub requester_socket_id: ConnectionId,
    pub space_id: String,
}

/// `room-info`: snapshot delivered to a single requester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub scene_data: Value,
}

impl ClientEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Login(_) => "login",
            ClientEvent::RequestRoomInfo(_) => "request-room-info",
            ClientEvent::SendRoomInfo(_) => "send-room-info",
            ClientEvent::AddCube(_) => "add-cube",
            ClientEvent::RemoveCube(_) => "remove-cube",
            ClientEvent::PlaceModel(_) => "place-model",
            ClientEvent::ResetScene(_) => "reset-scene",
            ClientEvent::LoadNewScene(_) => "load-new-scene",
        }
    }

    /// Space named by a mutation or control event
    pub fn scoped_space(&self) -> Option<&str> {
        match self {
            ClientEvent::AddCube(e) | ClientEvent::RemoveCube(e) => Some(&e.space_id),
            ClientEvent::PlaceModel(e) => Some(&e.space_id),
            ClientEvent::ResetScene(e) => Some(&e.space_id),
            ClientEvent::LoadNewScene(e) => Some(&e.space_id),
            _ => None,
        }
    }

    /// The same mutation as seen by other members, if this is one
    pub fn into_broadcast(self) -> Option<ServerEvent> {
        match self {
            ClientEvent::AddCube(e) => Some(ServerEvent::AddCube(e)),
            ClientEvent::RemoveCube(e) => Some(ServerEvent::RemoveCube(e)),
            ClientEvent::PlaceModel(e) => Some(ServerEvent::PlaceModel(e)),
            ClientEvent::ResetScene(e) => Some(ServerEvent::ResetScene(e)),
            ClientEvent::LoadNewScene(e) => Some(ServerEvent::LoadNewScene(e)),
            _ => None,
        }
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        encode(self)
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        decode(text)
    }
}

impl ServerEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserList(_) => "user-list",
            ServerEvent::UserJoined(_) => "user-joined",
            ServerEvent::UserLeft(_) => "user-left",
            ServerEvent::RequestRoomInfo(_) => "request-room-info",
            ServerEvent::RoomInfo(_) => "room-info",
            ServerEvent::AddCube(_) => "add-cube",
            ServerEvent::RemoveCube(_) => "remove-cube",
            ServerEvent::PlaceModel(_) => "place-model",
            ServerEvent::ResetScene(_) => "reset-scene",
            ServerEvent::LoadNewScene(_) => "load-new-scene",
        }
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        encode(self)
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        decode(text)
    }
}

fn encode<T: Serialize>(event: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(|e| ProtocolError::MalformedEvent(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::MalformedEvent(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_login_wire_format() {
        let text = r#"{"event":"login","data":{"userId":"alice","spaceId":"s1","ownedSpaceIds":["s1"]}}"#;
        let event = ClientEvent::from_text(text).unwrap();
        assert_eq!(
            event,
            ClientEvent::Login(Login::new("alice", "s1").with_owned_spaces(vec!["s1".into()]))
        );
    }

    #[test]
    fn test_login_accepts_user_spaces_alias() {
        let text = r#"{"event":"login","data":{"userId":"bob","spaceId":"s1","userSpaces":["s2"]}}"#;
        let ClientEvent::Login(login) = ClientEvent::from_text(text).unwrap() else {
            panic!("expected login");
        };
        assert_eq!(login.owned_space_ids, vec!["s2".to_string()]);
    }

    #[test]
    fn test_login_identity_checks() {
        let text = r#"{"event":"login","data":{"spaceId":"s1"}}"#;
        let ClientEvent::Login(login) = ClientEvent::from_text(text).unwrap() else {
            panic!("expected login");
        };
        assert!(login.owned_space_ids.is_empty());
        assert!(matches!(
            login.identity(),
            Err(ProtocolError::MissingField { field: "userId", .. })
        ));

        let login = Login::new("carol", "");
        assert!(matches!(
            login.identity(),
            Err(ProtocolError::MissingField { field: "spaceId", .. })
        ));

        let login = Login::new("carol", "s9");
        assert_eq!(login.identity().unwrap(), ("carol", "s9"));
    }

    #[test]
    fn test_add_cube_wire_format() {
        let event = ClientEvent::AddCube(CubeEvent::add(
            "s1",
            ZoneCoord::new(0, 0),
            GridCoord::new(1, 0, 2),
            "#ff0000",
        ));
        let value: Value = serde_json::from_str(&event.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "add-cube",
                "data": {"x": 1, "y": 0, "z": 2, "color": "#ff0000", "zoneX": 0, "zoneY": 0, "spaceId": "s1"}
            })
        );
    }

    #[test]
    fn test_remove_cube_omits_color() {
        let event = ServerEvent::RemoveCube(CubeEvent::remove(
            "s1",
            ZoneCoord::new(-1, 2),
            GridCoord::new(3, 4, 5),
        ));
        let text = event.to_text().unwrap();
        assert!(!text.contains("color"));
        assert!(text.contains("\"zoneX\":-1"));
    }

    #[test]
    fn test_place_model_defaults_type() {
        let text = r##"{"event":"place-model","data":{"cubes":[{"x":1,"y":0,"z":1,"color":"#fff","zoneX":0,"zoneY":0}],"spaceId":"s1"}}"##;
        let ClientEvent::PlaceModel(model) = ClientEvent::from_text(text).unwrap() else {
            panic!("expected place-model");
        };
        assert_eq!(model.kind, MODEL_PLACEMENT);
        assert_eq!(model.cubes[0].grid(), GridCoord::new(1, 0, 1));
    }

    #[test]
    fn test_server_event_names() {
        let event = ServerEvent::RequestRoomInfo(OwnerRequest {
            requester_socket_id: ConnectionId(12),
            space_id: "s1".into(),
        });
        let value: Value = serde_json::from_str(&event.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "request-room-info", "data": {"requesterSocketId": 12, "spaceId": "s1"}})
        );
        assert_eq!(event.name(), "request-room-info");

        let event = ServerEvent::UserList(UserList {
            space_id: "s1".into(),
            user_list: vec![MemberInfo::new("alice", true)],
        });
        let value: Value = serde_json::from_str(&event.to_text().unwrap()).unwrap();
        assert_eq!(value["event"], "user-list");
        assert_eq!(value["data"]["userList"][0]["isOwner"], true);
    }

    #[test]
    fn test_send_room_info_tolerates_missing_fields() {
        let text = r#"{"event":"send-room-info","data":{"sceneData":null}}"#;
        let ClientEvent::SendRoomInfo(reply) = ClientEvent::from_text(text).unwrap() else {
            panic!("expected send-room-info");
        };
        assert_eq!(reply.to, None);
        assert_eq!(reply.scene_data, None);
    }

    #[test]
    fn test_into_broadcast() {
        let event = ClientEvent::ResetScene(SpaceRef::new("s1"));
        assert_eq!(event.scoped_space(), Some("s1"));
        assert_eq!(
            event.into_broadcast(),
            Some(ServerEvent::ResetScene(SpaceRef::new("s1")))
        );
        assert_eq!(ClientEvent::RequestRoomInfo(SpaceRef::new("s1")).into_broadcast(), None);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(
            ClientEvent::from_text("not json"),
            Err(ProtocolError::MalformedEvent(_))
        ));
        assert!(ClientEvent::from_text(r#"{"event":"teleport","data":{}}"#).is_err());
        assert!(ClientEvent::from_text(r#"{"event":"add-cube","data":{"x":1}}"#).is_err());
    }
}
