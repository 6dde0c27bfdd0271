//! Index artifact files
//!
//! An artifact is written before its database row. [`ArtifactGuard`]
//! removes the file again unless the row was committed, so no row points
//! at a missing file and no file outlives a failed registration.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use sda_core::io::{read_geotiff_from_buffer, write_geotiff_to_buffer};
use sda_core::Raster;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::manifest::{sha256_bytes, AssetCheck, CheckStatus};

/// Folder holding one run's artifacts
pub fn run_dir(artifacts_root: &Path, run_id: i64) -> PathBuf {
    artifacts_root.join(format!("run-{run_id}"))
}

/// Removes a freshly written artifact on drop unless committed
#[must_use = "dropping the guard deletes the artifact"]
pub struct ArtifactGuard {
    path: PathBuf,
    armed: bool,
}

impl ArtifactGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file
    pub fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed uncommitted artifact"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove artifact"),
        }
        // Only succeeds when the run folder is now empty.
        if let Some(parent) = self.path.parent() {
            let _ = fs::remove_dir(parent);
        }
    }
}

/// Encode `raster` as GeoTIFF at `dir/file_name`.
///
/// The bytes go to a `.partial` sibling that is synced and then renamed
/// over the final name, so readers never see a torn file and a file left
/// by an interrupted registration is replaced. Callers must hold the store
/// write lock and have checked that no index row owns the name. Returns
/// the armed guard and the SHA256 of the written bytes.
pub fn write_artifact(
    dir: &Path,
    file_name: &str,
    raster: &Raster<f64>,
) -> Result<(ArtifactGuard, String)> {
    fs::create_dir_all(dir).map_err(Error::io(dir))?;
    let bytes = write_geotiff_to_buffer(raster)?;
    let sha256 = sha256_bytes(&bytes);

    let path = dir.join(file_name);
    let partial = dir.join(format!("{file_name}.partial"));
    let written = File::create(&partial).and_then(|mut file| {
        file.write_all(&bytes)?;
        file.sync_all()
    });
    if let Err(source) = written {
        let _ = fs::remove_file(&partial);
        return Err(Error::Io {
            path: partial,
            source,
        });
    }

    if path.exists() {
        warn!(path = %path.display(), "replacing unregistered artifact");
    }
    if let Err(source) = fs::rename(&partial, &path) {
        let _ = fs::remove_file(&partial);
        return Err(Error::Io { path, source });
    }

    let guard = ArtifactGuard { path, armed: true };
    Ok((guard, sha256))
}

/// Read an artifact after checking it still has the recorded hash
pub fn read_verified(path: &Path, expected_sha256: &str) -> Result<Raster<f64>> {
    let failure = |status| Error::Integrity {
        context: format!("artifact {}", path.display()),
        failures: vec![AssetCheck {
            path: path.display().to_string(),
            kind: None,
            status,
            size: None,
        }],
    };

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(failure(CheckStatus::Missing))
        }
        Err(source) => {
            return Err(Error::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let actual = sha256_bytes(&bytes);
    if actual != expected_sha256 {
        return Err(failure(CheckStatus::HashMismatch {
            expected: expected_sha256.to_string(),
            actual,
        }));
    }
    Ok(read_geotiff_from_buffer(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn raster() -> Raster<f64> {
        let mut r = Raster::from_vec(vec![0.1, 0.2, f64::NAN, 0.4], 2, 2).unwrap();
        r.set_nodata(Some(f64::NAN));
        r
    }

    #[test]
    fn test_uncommitted_artifact_is_removed() {
        let root = TempDir::new().unwrap();
        let dir = run_dir(root.path(), 7);
        let (guard, _) = write_artifact(&dir, "ndvi.tif", &raster()).unwrap();
        let path = guard.path().to_path_buf();
        assert!(path.exists());

        drop(guard);
        assert!(!path.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_committed_artifact_reads_back() {
        let root = TempDir::new().unwrap();
        let dir = run_dir(root.path(), 1);
        let (guard, sha) = write_artifact(&dir, "ndvi.tif", &raster()).unwrap();
        let path = guard.path().to_path_buf();
        guard.commit();

        let loaded = read_verified(&path, &sha).unwrap();
        assert_eq!(loaded.get(1, 1).unwrap(), 0.4);
        assert!(loaded.get(1, 0).unwrap().is_nan());
    }

    #[test]
    fn test_stale_file_is_replaced() {
        let root = TempDir::new().unwrap();
        let dir = run_dir(root.path(), 1);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("ndvi.tif"), b"left by a crash").unwrap();

        let (guard, sha) = write_artifact(&dir, "ndvi.tif", &raster()).unwrap();
        guard.commit();

        assert_eq!(sha256_bytes(&fs::read(dir.join("ndvi.tif")).unwrap()), sha);
        assert!(!dir.join("ndvi.tif.partial").exists());
    }

    #[test]
    fn test_modified_artifact_fails_verification() {
        let root = TempDir::new().unwrap();
        let (guard, sha) = write_artifact(root.path(), "nbr.tif", &raster()).unwrap();
        let path = guard.path().to_path_buf();
        guard.commit();
        fs::write(&path, b"overwritten").unwrap();

        assert!(matches!(read_verified(&path, &sha), Err(Error::Integrity { .. })));
    }
}
