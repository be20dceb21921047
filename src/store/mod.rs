//! Records exchanged with the surroundings service and the store seam.
//!
//! Building and terrain records are keyed by project id and name
//! (`TB_<id>`, `SB_<id>`, `TR_<height>`). The service keeps the surface list
//! as an encoded string in `data`; [`json_string`] handles that on the wire.

mod http;
mod memory;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geom::Point3;

pub use http::HttpStore;
pub use memory::MemoryStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The service answered with a non-success status.
    #[error("store responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("store request failed: {0}")]
    Transport(String),
    #[error("could not decode store response: {0}")]
    Decode(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Name prefix of target building records.
pub const TARGET_PREFIX: &str = "TB_";
/// Name prefix of surrounding building records.
pub const SURROUNDING_PREFIX: &str = "SB_";
/// Name prefix of terrain records.
pub const TERRAIN_PREFIX: &str = "TR_";

/// Building name without its `TB_`/`SB_` prefix.
#[must_use]
pub fn strip_prefix(name: &str) -> &str {
    name.strip_prefix(TARGET_PREFIX)
        .or_else(|| name.strip_prefix(SURROUNDING_PREFIX))
        .unwrap_or(name)
}

// ─────────────────────────────────────────────────────────────────────────────
// Buildings
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SurfaceType {
    Ground,
    Wall,
    Roof,
}

impl SurfaceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ground => "GROUND",
            Self::Wall => "WALL",
            Self::Roof => "ROOF",
        }
    }
}

impl fmt::Display for SurfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SurfaceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GROUND" => Ok(Self::Ground),
            "WALL" => Ok(Self::Wall),
            "ROOF" => Ok(Self::Roof),
            other => Err(format!("unknown surface type `{other}`")),
        }
    }
}

/// One planar face of a building, conventionally closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceRecord {
    #[serde(rename = "ID")]
    pub id: String,
    pub surface_type: SurfaceType,
    pub polygon: Vec<Point3>,
}

/// A building as persisted by the surroundings service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBuilding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub project_id: u64,
    pub name: String,
    pub quadrant: String,
    pub latitude: f64,
    pub longitude: f64,
    pub utm_x: f64,
    pub utm_y: f64,
    pub distance: f64,
    pub target: bool,
    #[serde(with = "json_string")]
    pub data: Vec<SurfaceRecord>,
}

impl StoredBuilding {
    pub fn ground_surfaces(&self) -> impl Iterator<Item = &SurfaceRecord> {
        self.data
            .iter()
            .filter(|s| s.surface_type == SurfaceType::Ground)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Terrain
// ─────────────────────────────────────────────────────────────────────────────

/// One closed outline of a height slice, coordinates truncated to integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainSurface {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub polygon: Vec<[i64; 3]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTerrain {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub project_id: u64,
    pub name: String,
    #[serde(with = "json_string")]
    pub data: Vec<TerrainSurface>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store seam
// ─────────────────────────────────────────────────────────────────────────────

/// Request/response access to the surroundings service.
///
/// Calls are synchronous and never retried. `Sync` so buildings and height
/// buckets can be processed from a thread pool.
pub trait SurroundingsStore: Send + Sync {
    /// Buildings of a project, optionally filtered by the target flag.
    fn list_buildings(&self, project_id: u64, target: Option<bool>)
    -> StoreResult<Vec<StoredBuilding>>;

    fn create_building(&self, building: &StoredBuilding) -> StoreResult<StoredBuilding>;

    fn delete_building(&self, id: u64) -> StoreResult<()>;

    fn list_terrain(&self, project_id: u64) -> StoreResult<Vec<StoredTerrain>>;

    fn create_terrain(&self, terrain: &StoredTerrain) -> StoreResult<StoredTerrain>;
}

/// Serializes a value as a JSON document embedded in a string field.
pub(crate) mod json_string {
    use serde::de::{DeserializeOwned, Error as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T: Serialize, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = serde_json::to_string(value).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, T: DeserializeOwned, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<T, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        match raw {
            serde_json::Value::String(encoded) => {
                serde_json::from_str(&encoded).map_err(D::Error::custom)
            }
            other => serde_json::from_value(other).map_err(D::Error::custom),
        }
    }
}
