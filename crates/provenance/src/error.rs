//! Error types for the provenance pipeline

use std::path::PathBuf;

use thiserror::Error;

use crate::manifest::AssetCheck;
use crate::model::RunStatus;

/// Main error type for ingestion, runs and change detection
#[derive(Error, Debug)]
pub enum Error {
    /// One or more files do not match their recorded hash.
    #[error("Integrity check failed for {context}: {}", summarize(.failures))]
    Integrity {
        context: String,
        failures: Vec<AssetCheck>,
    },

    #[error("Grid mismatch between '{left}' and '{right}': {reason}")]
    GridMismatch {
        left: String,
        right: String,
        reason: String,
    },

    #[error("Unknown formula: '{0}'")]
    UnknownFormula(String),

    #[error("Formula '{formula}' requires band '{band}'")]
    MissingBand { formula: String, band: String },

    #[error("Scene {scene_id} already has an active run for processing version '{processing_version}'")]
    DuplicateRun {
        scene_id: i64,
        processing_version: String,
    },

    #[error("Scene '{product_id}' is already ingested")]
    DuplicateScene { product_id: String },

    #[error("Run {run_id} already has an index for '{formula}'")]
    DuplicateIndex { run_id: i64, formula: String },

    #[error("Baseline run {baseline} is not older than comparison run {comparison}: {reason}")]
    InvalidRunOrder {
        baseline: i64,
        comparison: i64,
        reason: String,
    },

    #[error("Scenes {baseline_scene} and {comparison_scene} cover different footprints: {reason}")]
    FootprintMismatch {
        baseline_scene: i64,
        comparison_scene: i64,
        reason: String,
    },

    #[error("Run {run_id} is {status}, expected {expected}")]
    UnexpectedRunStatus {
        run_id: i64,
        status: RunStatus,
        expected: RunStatus,
    },

    #[error("Run {run_id} has no '{formula}' index")]
    MissingIndex { run_id: i64, formula: String },

    #[error("No band decoder for {}", .path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Invalid manifest {}: {reason}", .path.display())]
    Manifest { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Raster error: {0}")]
    Raster(#[source] sda_core::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap an I/O error with the path it concerns
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.into();
        move |source| Error::Io { path, source }
    }

    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Error {
        Error::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

impl From<sda_core::Error> for Error {
    fn from(err: sda_core::Error) -> Self {
        match err {
            sda_core::Error::GridMismatch {
                left,
                right,
                reason,
            } => Error::GridMismatch {
                left,
                right,
                reason,
            },
            sda_core::Error::UnknownFormula(id) => Error::UnknownFormula(id),
            sda_core::Error::MissingBand { formula, band } => Error::MissingBand { formula, band },
            other => Error::Raster(other),
        }
    }
}

fn summarize(failures: &[AssetCheck]) -> String {
    match failures {
        [] => "no failures recorded".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more)", first, rest.len()),
    }
}

/// Result type alias for provenance operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_are_lifted() {
        let err: Error = sda_core::Error::UnknownFormula("ndxi".into()).into();
        assert!(matches!(err, Error::UnknownFormula(ref id) if id == "ndxi"));

        let err: Error = sda_core::Error::GridMismatch {
            left: "B04".into(),
            right: "B08".into(),
            reason: "shape 2x2 vs 3x3".into(),
        }
        .into();
        assert!(matches!(err, Error::GridMismatch { ref left, .. } if left == "B04"));

        let err: Error = sda_core::Error::Other("boom".into()).into();
        assert!(matches!(err, Error::Raster(_)));
    }
}
