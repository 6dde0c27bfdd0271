//! Provenance records
//!
//! Rows are immutable once written. The exceptions are a run's
//! `active`/`superseded_by` pair, which an explicit supersede updates, and
//! its outcome, set once when the run finishes.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sda_algorithms::imagery::{ChangeClass, Connectivity, PixelBounds, ValueRange};

/// Tolerance in degrees when comparing scene footprints
pub const FOOTPRINT_TOLERANCE_DEG: f64 = 1e-6;

/// Lon/lat bounding box of a scene
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl Footprint {
    pub fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        }
    }

    /// Whether both boxes agree on every edge within `tolerance` degrees
    pub fn matches(&self, other: &Footprint, tolerance: f64) -> bool {
        (self.lon_min - other.lon_min).abs() <= tolerance
            && (self.lat_min - other.lat_min).abs() <= tolerance
            && (self.lon_max - other.lon_max).abs() <= tolerance
            && (self.lat_max - other.lat_max).abs() <= tolerance
    }

    pub fn wkt(&self) -> String {
        let Footprint {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        } = *self;
        format!(
            "POLYGON(({lon_min} {lat_min}, {lon_max} {lat_min}, {lon_max} {lat_max}, {lon_min} {lat_max}, {lon_min} {lat_min}))"
        )
    }
}

/// A scene about to be ingested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScene {
    /// External product identifier, unique across scenes
    pub product_id: String,
    /// S2A / S2B / S2C
    pub satellite: String,
    /// MGRS tile, e.g. `T21LXH`
    pub tile: String,
    pub acquired_at: DateTime<Utc>,
    pub cloud_cover: Option<f64>,
    /// e.g. `EPSG:32721`
    pub crs: Option<String>,
    pub footprint: Footprint,
    pub processing_level: String,
    pub folder: PathBuf,
}

/// One satellite acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: i64,
    pub product_id: String,
    pub satellite: String,
    pub tile: String,
    pub acquired_at: DateTime<Utc>,
    pub cloud_cover: Option<f64>,
    pub crs: Option<String>,
    pub footprint: Footprint,
    pub processing_level: String,
    pub folder: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// A verified file to attach to a scene
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAsset {
    /// Band or product label, e.g. `B04`, `SCL`
    pub kind: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size: Option<u64>,
}

/// A file belonging to a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub scene_id: i64,
    pub kind: String,
    /// Absolute path
    pub path: PathBuf,
    /// Lowercase hex SHA256 recorded at ingestion
    pub sha256: String,
    pub size: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// One processing pass over a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub scene_id: i64,
    pub processing_version: String,
    /// Acquisition time of the run's scene
    pub acquired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub superseded_by: Option<i64>,
    pub status: RunStatus,
    pub finished_at: Option<DateTime<Utc>>,
    /// Why a failed run stopped
    pub error: Option<String>,
}

impl Run {
    /// Key runs are ordered by in time
    pub fn timestamp(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.acquired_at, self.created_at)
    }
}

/// A computed index artifact registered under a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub id: i64,
    pub run_id: i64,
    pub formula: String,
    pub path: PathBuf,
    pub sha256: String,
    pub range: ValueRange,
    pub rows: usize,
    pub cols: usize,
    pub created_at: DateTime<Utc>,
}

/// Scalar summary of an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFeature {
    pub id: i64,
    pub index_id: i64,
    pub key: String,
    pub value: f64,
    pub units: Option<String>,
}

/// A detected change region between two runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: i64,
    pub baseline_run_id: i64,
    pub comparison_run_id: i64,
    pub baseline_scene_id: i64,
    pub comparison_scene_id: i64,
    pub formula: String,
    pub threshold: f64,
    pub min_pixels: usize,
    pub connectivity: Connectivity,
    /// WKT polygon of the region's map bounding box
    pub geometry: String,
    pub pixel_bounds: PixelBounds,
    pub pixel_count: usize,
    /// Mean index difference over the region
    pub magnitude: f64,
    pub classification: ChangeClass,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_text() {
        for status in [RunStatus::Running, RunStatus::Succeeded, RunStatus::Failed] {
            assert_eq!(status.as_str().parse::<RunStatus>(), Ok(status));
        }
        assert!("done".parse::<RunStatus>().is_err());
        assert_eq!(serde_json::to_string(&RunStatus::Failed).unwrap(), "\"failed\"");
    }

    #[test]
    fn test_footprint_tolerance() {
        let a = Footprint::new(-55.0, -10.0, -54.0, -9.0);
        let b = Footprint::new(-55.0 + 5e-7, -10.0, -54.0, -9.0 - 5e-7);
        let c = Footprint::new(-55.0 + 1e-5, -10.0, -54.0, -9.0);

        assert!(a.matches(&b, FOOTPRINT_TOLERANCE_DEG));
        assert!(!a.matches(&c, FOOTPRINT_TOLERANCE_DEG));
    }

    #[test]
    fn test_footprint_wkt_is_closed() {
        let wkt = Footprint::new(1.0, 2.0, 3.0, 4.0).wkt();
        assert_eq!(wkt, "POLYGON((1 2, 3 2, 3 4, 1 4, 1 2))");
    }
}
