//! Resolved pipeline configuration
//!
//! The library only consumes an already resolved [`Config`]; loading from
//! files and the environment is the front end's job.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sda_algorithms::imagery::{ChangeParams, Connectivity, Formula};

use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for the database file and index artifacts
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// `error`, `warn`, `info`, `debug` or `trace`
    pub log_level: String,
    pub database: DatabaseConfig,
    pub processing: ProcessingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            cache_dir: PathBuf::from(".cache"),
            log_level: "info".to_string(),
            database: DatabaseConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

/// Database connection parameters.
///
/// The store is SQLite; `name` picks the file under `data_dir`. The
/// network fields are kept so deployments can share one settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "sda".to_string(),
            user: "sda".to_string(),
            password: String::new(),
        }
    }
}

/// Index and change detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Tag shared by runs produced with the same settings
    pub version: String,
    /// Formula ids computed by default
    pub indices: Vec<String>,
    /// Multiplier turning digital numbers into reflectance
    pub reflectance_scale: f64,
    /// Nodata value assumed for bands that declare none
    pub band_nodata: Option<f64>,
    pub threshold: f64,
    pub min_pixels: usize,
    pub connectivity: Connectivity,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            indices: vec!["ndvi".to_string(), "nbr".to_string()],
            reflectance_scale: 1e-4,
            band_nodata: Some(0.0),
            threshold: 0.2,
            min_pixels: 4,
            connectivity: Connectivity::Four,
        }
    }
}

impl Config {
    /// SQLite file backing the store
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.sqlite", self.database.name))
    }

    /// Root of the per-run index artifact folders
    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    /// Configured formulas, validated against the registry
    pub fn formulas(&self) -> Result<Vec<Formula>> {
        Ok(Formula::parse_all(&self.processing.indices)?)
    }

    pub fn change_params(&self) -> Result<ChangeParams> {
        let params = ChangeParams {
            threshold: self.processing.threshold,
            min_pixels: self.processing.min_pixels,
            connectivity: self.processing.connectivity,
        };
        params
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(params)
    }

    /// Check everything that can be checked before touching data
    pub fn validate(&self) -> Result<()> {
        if self.processing.version.trim().is_empty() {
            return Err(Error::Config("processing.version must not be empty".into()));
        }
        if !(self.processing.reflectance_scale.is_finite() && self.processing.reflectance_scale > 0.0)
        {
            return Err(Error::Config(format!(
                "processing.reflectance_scale must be positive, got {}",
                self.processing.reflectance_scale
            )));
        }
        if self.database.name.trim().is_empty() {
            return Err(Error::Config("database.name must not be empty".into()));
        }
        self.formulas()?;
        self.change_params()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.database_path(), PathBuf::from("data/sda.sqlite"));
        assert_eq!(config.formulas().unwrap(), vec![Formula::Ndvi, Formula::Nbr]);
    }

    #[test]
    fn test_unknown_index_fails_validation() {
        let mut config = Config::default();
        config.processing.indices.push("ndxi".into());
        assert!(matches!(config.validate(), Err(Error::UnknownFormula(_))));
    }

    #[test]
    fn test_negative_threshold_fails_validation() {
        let mut config = Config::default();
        config.processing.threshold = -1.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
