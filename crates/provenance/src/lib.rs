//! # sda provenance
//!
//! Scene ingestion, run versioning, change detection and the relational
//! provenance store behind them.
//!
//! Data flows leaf-first: the manifest verifier gates ingestion, the band
//! reader feeds the index engine, the run manager registers index
//! artifacts under a run, and the change detector compares two runs and
//! records change events.

pub mod artifacts;
pub mod band_reader;
pub mod config;
pub mod detector;
pub mod error;
pub mod ingest;
pub mod manifest;
pub mod model;
pub mod runs;
pub mod store;

pub use band_reader::{BandDecoder, BandReader, GeoTiffDecoder};
pub use config::{Config, DatabaseConfig, ProcessingConfig};
pub use detector::{ChangeDetector, ChangeSet};
pub use error::{Error, Result};
pub use ingest::{ingest_scene, IngestedScene, SceneMetadata};
pub use manifest::{verify, AssetCheck, CheckStatus, VerificationResult};
pub use model::{Asset, ChangeEvent, Footprint, Index, IndexFeature, Run, RunStatus, Scene};
pub use runs::{ComputeOutcome, RunManager, StartMode};
pub use store::{HealthReport, SceneFilter, Store};
