//! Point-in-time copy of the tracked player state.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

/// Immutable snapshot of the producer's state.
///
/// The producer hands over an owned copy on every publish, so the server can
/// serialize it without any synchronization.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub level_name: Option<String>,
    /// Player position in world coordinates.
    pub player_x: f64,
    pub player_y: f64,
    /// Pointer heading in degrees.
    pub angle: f64,
    /// Map image reference, served under `/images/<name>`.
    pub image_path: Option<String>,
    pub map_width: f64,
    pub map_height: f64,
    /// Player position projected onto the map image, in pixels.
    pub pointer_x: f64,
    pub pointer_y: f64,
    pub scale: f64,
    pub updated: DateTime<Utc>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            level_name: None,
            player_x: 0.0,
            player_y: 0.0,
            angle: 0.0,
            image_path: None,
            map_width: 0.0,
            map_height: 0.0,
            pointer_x: 0.0,
            pointer_y: 0.0,
            scale: 1.0,
            updated: DateTime::UNIX_EPOCH,
        }
    }
}

impl StateSnapshot {
    /// Returns `true` once a map image is known.
    pub fn has_data(&self) -> bool {
        self.image_path.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Serializes the snapshot to its JSON wire form.
    pub fn to_json(&self) -> String {
        // Every field is a plain value or a pre-validated raw number, so
        // serialization into a String cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    /// Returns `true` if both snapshots describe the same state, ignoring
    /// the `updated` timestamp.
    pub fn same_state(&self, other: &StateSnapshot) -> bool {
        self.level_name == other.level_name
            && self.player_x == other.player_x
            && self.player_y == other.player_y
            && self.angle == other.angle
            && self.image_path == other.image_path
            && self.map_width == other.map_width
            && self.map_height == other.map_height
            && self.pointer_x == other.pointer_x
            && self.pointer_y == other.pointer_y
            && self.scale == other.scale
    }
}

/// A number rendered with a fixed count of decimal places.
struct Fixed<const DP: usize>(f64);

impl<const DP: usize> Serialize for Fixed<DP> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = if self.0.is_finite() { self.0 } else { 0.0 };
        let raw = RawValue::from_string(format!("{:.*}", DP, value)).map_err(S::Error::custom)?;
        raw.serialize(serializer)
    }
}

/// Field order and names of the JSON document.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotWire<'a> {
    has_data: bool,
    level_name: Option<&'a str>,
    player_x: Fixed<4>,
    player_y: Fixed<4>,
    angle: Fixed<3>,
    image_path: Option<&'a str>,
    map_width: Fixed<3>,
    map_height: Fixed<3>,
    pointer_x: Fixed<3>,
    pointer_y: Fixed<3>,
    scale: Fixed<3>,
    updated: String,
}

impl Serialize for StateSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SnapshotWire {
            has_data: self.has_data(),
            level_name: self.level_name.as_deref(),
            player_x: Fixed(self.player_x),
            player_y: Fixed(self.player_y),
            angle: Fixed(self.angle),
            image_path: self.image_path.as_deref(),
            map_width: Fixed(self.map_width),
            map_height: Fixed(self.map_height),
            pointer_x: Fixed(self.pointer_x),
            pointer_y: Fixed(self.pointer_y),
            scale: Fixed(self.scale),
            updated: self.updated.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
        .serialize(serializer)
    }
}
