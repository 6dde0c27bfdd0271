//! Configuration loading: TOML file, then environment, then flags.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sda_provenance::Config;
use tracing::Level;

/// Looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "sda.toml";

/// Read the config file if any, falling back to defaults.
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => from_file(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.is_file() {
                from_file(default)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn from_file(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

/// Apply environment overrides; `lookup` is `std::env::var` outside tests.
pub fn apply_env<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("SDA_DATA_DIR") {
        config.data_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("SDA_CACHE_DIR") {
        config.cache_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("SDA_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Some(v) = lookup("SDA_PROCESSING_VERSION") {
        config.processing.version = v;
    }
    if let Some(v) = lookup("PG_HOST") {
        config.database.host = v;
    }
    if let Some(v) = lookup("PG_PORT") {
        config.database.port = v
            .trim()
            .parse()
            .with_context(|| format!("PG_PORT must be a port number, got '{v}'"))?;
    }
    if let Some(v) = lookup("PG_DB") {
        config.database.name = v;
    }
    if let Some(v) = lookup("PG_USER") {
        config.database.user = v;
    }
    if let Some(v) = lookup("PG_PASS") {
        config.database.password = v;
    }
    Ok(())
}

pub fn parse_level(level: &str) -> Result<Level> {
    match level.trim().to_ascii_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" | "warning" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        other => bail!("Unknown log level: {}. Use error, warn, info, debug or trace.", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sda.toml");
        std::fs::write(
            &path,
            "data_dir = \"/srv/sda\"\n\n[processing]\nthreshold = 0.35\nindices = [\"ndvi\"]\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/sda"));
        assert_eq!(config.processing.threshold, 0.35);
        assert_eq!(config.processing.indices, vec!["ndvi".to_string()]);
        assert_eq!(config.processing.version, "v1");
        assert_eq!(config.database.port, 5432);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::default();
        apply_env(
            &mut config,
            env(&[
                ("SDA_DATA_DIR", "/data"),
                ("SDA_PROCESSING_VERSION", "v2"),
                ("PG_PORT", "6543"),
                ("PG_DB", "forest"),
            ]),
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.processing.version, "v2");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database_path(), PathBuf::from("/data/forest.sqlite"));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_bad_port_is_rejected() {
        let mut config = Config::default();
        assert!(apply_env(&mut config, env(&[("PG_PORT", "postgres")])).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("warning").unwrap(), Level::WARN);
        assert!(parse_level("loud").is_err());
    }
}
