//! Scene snapshot wire format
//!
//! A snapshot travels as the `sceneData` JSON object:
//!
//! ```json
//! {
//!   "0,0":  [{"x": -9.5, "y": 0.5, "z": -9.5, "color": "#ff0000"}],
//!   "1,-1": [{"x": 10.5, "y": 0.5, "z": -19.5, "color": "#00ff00"}],
//!   "currentZone": {"x": 0, "y": 0}
//! }
//! ```
//!
//! Cube positions are world-space cell centres. Older scenes are a bare array of
//! cubes and are read as zone `(0,0)`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ProtocolError;
use crate::zone::coords::ZoneCoord;

/// Reserved key carrying the exporting client's current zone
pub const CURRENT_ZONE_KEY: &str = "currentZone";

/// One cube as it appears in `sceneData`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneCube {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub color: String,
}

impl SceneCube {
    pub fn new(x: f64, y: f64, z: f64, color: impl Into<String>) -> Self {
        Self {
            x,
            y,
            z,
            color: color.into(),
        }
    }
}

/// Full voxel state of every zone a client knows about
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct SceneSnapshot {
    pub zones: BTreeMap<ZoneCoord, Vec<SceneCube>>,
    pub current_zone: ZoneCoord,
}

impl SceneSnapshot {
    pub fn new(current_zone: ZoneCoord) -> Self {
        Self {
            zones: BTreeMap::new(),
            current_zone,
        }
    }

    /// Total number of cubes across all zones
    pub fn voxel_count(&self) -> usize {
        self.zones.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.voxel_count() == 0
    }

    /// Parse a `sceneData` value
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        match value {
            Value::Array(items) => {
                let mut snapshot = Self::default();
                snapshot
                    .zones
                    .insert(ZoneCoord::ORIGIN, parse_cubes(items));
                Ok(snapshot)
            }
            Value::Object(map) => {
                let mut snapshot = Self::default();
                for (key, entry) in map {
                    if key == CURRENT_ZONE_KEY {
                        snapshot.current_zone =
                            serde_json::from_value(entry.clone()).map_err(|e| {
                                ProtocolError::InvalidSceneData(format!(
                                    "bad {}: {}",
                                    CURRENT_ZONE_KEY, e
                                ))
                            })?;
                        continue;
                    }

                    let zone = match key.parse::<ZoneCoord>() {
                        Ok(zone) => zone,
                        Err(_) => {
                            debug!(key = %key, "Skipping unknown sceneData key");
                            continue;
                        }
                    };
                    let Value::Array(items) = entry else {
                        debug!(zone = %zone, "Skipping non-array zone entry");
                        continue;
                    };
                    snapshot.zones.insert(zone, parse_cubes(items));
                }
                Ok(snapshot)
            }
            other => Err(ProtocolError::InvalidSceneData(format!(
                "expected object or array, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Encode as a `sceneData` value. Empty zones are omitted.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (zone, cubes) in &self.zones {
            if cubes.is_empty() {
                continue;
            }
            let cubes = cubes
                .iter()
                .map(|cube| {
                    serde_json::json!({
                        "x": cube.x,
                        "y": cube.y,
                        "z": cube.z,
                        "color": cube.color,
                    })
                })
                .collect();
            map.insert(zone.key(), Value::Array(cubes));
        }
        map.insert(
            CURRENT_ZONE_KEY.to_string(),
            serde_json::json!({ "x": self.current_zone.x, "y": self.current_zone.y }),
        );
        Value::Object(map)
    }
}

impl TryFrom<Value> for SceneSnapshot {
    type Error = ProtocolError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(&value)
    }
}

impl From<SceneSnapshot> for Value {
    fn from(snapshot: SceneSnapshot) -> Self {
        snapshot.to_value()
    }
}

fn parse_cubes(items: &[Value]) -> Vec<SceneCube> {
    items
        .iter()
        .filter_map(|item| match SceneCube::deserialize(item) {
            Ok(cube) => Some(cube),
            Err(e) => {
                debug!(error = %e, "Skipping malformed cube");
                None
            }
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_zoned_scene() {
        let value = json!({
            "0,0": [{"x": -9.5, "y": 0.5, "z": -9.5, "color": "#ff0000"}],
            "1,-1": [
                {"x": 10.5, "y": 0.5, "z": -19.5, "color": "#00ff00"},
                {"x": 11.5, "y": 1.5, "z": -19.5, "color": "#0000ff"}
            ],
            "currentZone": {"x": 1, "y": -1}
        });

        let snapshot = SceneSnapshot::from_value(&value).unwrap();
        assert_eq!(snapshot.current_zone, ZoneCoord::new(1, -1));
        assert_eq!(snapshot.zones.len(), 2);
        assert_eq!(snapshot.voxel_count(), 3);
        assert_eq!(
            snapshot.zones[&ZoneCoord::new(0, 0)],
            vec![SceneCube::new(-9.5, 0.5, -9.5, "#ff0000")]
        );
    }

    #[test]
    fn test_parse_legacy_array() {
        let value = json!([
            {"x": 0.5, "y": 0.5, "z": 0.5, "color": "#abcdef"},
            {"x": 1.5, "y": 0.5, "z": 0.5, "color": "#abcdef"}
        ]);

        let snapshot = SceneSnapshot::from_value(&value).unwrap();
        assert_eq!(snapshot.current_zone, ZoneCoord::ORIGIN);
        assert_eq!(snapshot.zones[&ZoneCoord::ORIGIN].len(), 2);
    }

    #[test]
    fn test_parse_skips_junk() {
        let value = json!({
            "2,3": "not an array",
            "garbage": [1, 2, 3],
            "0,1": [{"x": 0.5, "y": 0.5}, {"x": 0.5, "y": 0.5, "z": 20.5, "color": "#fff"}]
        });

        let snapshot = SceneSnapshot::from_value(&value).unwrap();
        assert_eq!(snapshot.zones.len(), 1);
        assert_eq!(snapshot.zones[&ZoneCoord::new(0, 1)].len(), 1);
        assert_eq!(snapshot.current_zone, ZoneCoord::ORIGIN);
    }

    #[test]
    fn test_parse_rejects_scalar() {
        assert!(SceneSnapshot::from_value(&json!("scene")).is_err());
        assert!(SceneSnapshot::from_value(&Value::Null).is_err());
        assert!(SceneSnapshot::from_value(&json!({"currentZone": "home"})).is_err());
    }

    #[test]
    fn test_partial_current_zone_defaults_missing_axis() {
        let value = json!({
            "2,0": [{"x": 40.5, "y": 0.5, "z": 0.5, "color": "#123456"}],
            "currentZone": {"x": 2}
        });

        let snapshot = SceneSnapshot::from_value(&value).unwrap();
        assert_eq!(snapshot.current_zone, ZoneCoord::new(2, 0));
        assert_eq!(snapshot.voxel_count(), 1);

        let snapshot = SceneSnapshot::from_value(&json!({"currentZone": {}})).unwrap();
        assert_eq!(snapshot.current_zone, ZoneCoord::ORIGIN);
    }

    #[test]
    fn test_encode_omits_empty_zones() {
        let mut snapshot = SceneSnapshot::new(ZoneCoord::new(0, 0));
        snapshot.zones.insert(ZoneCoord::new(5, 5), Vec::new());
        snapshot
            .zones
            .insert(ZoneCoord::new(0, 0), vec![SceneCube::new(0.5, 0.5, 0.5, "#111111")]);

        let value = snapshot.to_value();
        assert_eq!(
            value,
            json!({
                "0,0": [{"x": 0.5, "y": 0.5, "z": 0.5, "color": "#111111"}],
                "currentZone": {"x": 0, "y": 0}
            })
        );
    }

    #[test]
    fn test_serde_goes_through_scene_data() {
        let mut snapshot = SceneSnapshot::new(ZoneCoord::new(-2, 4));
        snapshot
            .zones
            .insert(ZoneCoord::new(-2, 4), vec![SceneCube::new(-39.5, 0.5, 70.5, "#222222")]);

        let text = serde_json::to_string(&snapshot).unwrap();
        assert!(text.contains("\"-2,4\""));
        assert!(text.contains("\"currentZone\""));

        let decoded: SceneSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, snapshot);
    }
}
