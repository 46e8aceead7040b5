//! Database models

use crate::geodesy::{EcefPosition, GeoLocation};
use chrono::{DateTime, Duration, Utc};
use monument_common::FileKind;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Columns selected for [`GeodeticPoint`], in struct order
pub const POINT_COLUMNS: &str = "id, station_name, longitude, latitude, description, point_type, \
     network_class, index_name, center_type, status, mark_number, aliases, created_at, updated_at";

/// Columns selected for [`Observation`]
pub const OBSERVATION_COLUMNS: &str = "id, point_id, longitude, latitude, observed_at, duration_us, \
     raw_x, raw_y, raw_z, receiver_number, antenna_height, source_file_id, created_at";

/// Columns selected for [`UploadedFile`]
pub const FILE_COLUMNS: &str = "id, file_hash, storage_path, original_name, base_name, file_kind, \
     upload_group, remarks, uploaded_at";

/// A physical survey monument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GeodeticPoint {
    /// Normalized marker name of the station that created the point
    pub id: String,
    pub station_name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub description: String,
    pub point_type: String,
    pub network_class: String,
    pub index_name: String,
    pub center_type: String,
    pub status: String,
    pub mark_number: String,
    /// Station ids absorbed into this point
    pub aliases: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GeodeticPoint {
    pub fn location(&self) -> GeoLocation {
        GeoLocation::new(self.longitude, self.latitude)
    }
}

/// One occupation of a point, taken from an observation file header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Observation {
    pub id: i64,
    pub point_id: String,
    pub longitude: f64,
    pub latitude: f64,
    pub observed_at: DateTime<Utc>,
    pub duration_us: Option<i64>,
    pub raw_x: f64,
    pub raw_y: f64,
    pub raw_z: f64,
    pub receiver_number: Option<String>,
    pub antenna_height: Option<f64>,
    pub source_file_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    pub fn location(&self) -> GeoLocation {
        GeoLocation::new(self.longitude, self.latitude)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_us.map(Duration::microseconds)
    }
}

/// Observation fields before insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub location: GeoLocation,
    pub observed_at: DateTime<Utc>,
    pub duration: Option<Duration>,
    pub raw: EcefPosition,
    pub receiver_number: Option<String>,
    pub antenna_height: Option<f64>,
    pub source_file_id: Option<Uuid>,
}

/// Stored upload, keyed by the SHA-256 of its bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UploadedFile {
    pub id: Uuid,
    pub file_hash: String,
    pub storage_path: String,
    pub original_name: String,
    pub base_name: String,
    pub file_kind: String,
    pub upload_group: Uuid,
    pub remarks: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl UploadedFile {
    /// Parsed kind; rows are constrained by the schema so this only fails
    /// on a hand-edited database.
    pub fn kind(&self) -> Option<FileKind> {
        self.file_kind.parse().ok()
    }

    /// File name component of the storage path
    pub fn stored_name(&self) -> &str {
        self.storage_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.storage_path)
    }
}

/// Classification of a monument derived from its network class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PointType {
    #[default]
    Default,
    /// Astronomical-geodetic and fundamental networks
    Astro,
    /// State geodetic network
    Ggs,
    /// Urban survey network
    Survey,
    /// Leveling network
    Leveling,
}

impl PointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointType::Default => "default",
            PointType::Astro => "astro",
            PointType::Ggs => "ggs",
            PointType::Survey => "survey",
            PointType::Leveling => "leveling",
        }
    }
}

impl std::fmt::Display for PointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one merge, kept for operator review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MergeAudit {
    pub id: i64,
    pub main_point_id: String,
    pub merged_point_ids: Vec<String>,
    pub candidate_id: String,
    pub candidate_count: i32,
    pub collapsed_observations: i32,
    pub ambiguous: bool,
    pub created_at: DateTime<Utc>,
}
