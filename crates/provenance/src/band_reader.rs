//! Band reading
//!
//! Assets are re-hashed before they are decoded, so a file changed after
//! ingestion is never read. Decoding goes through [`BandDecoder`]
//! implementations; GeoTIFF is built in and other formats (JP2) plug in.

use std::fs;
use std::io;
use std::path::Path;

use sda_algorithms::imagery::{band_math, BandSet, Formula};
use sda_core::io::read_geotiff_from_buffer;
use sda_core::Raster;
use tracing::debug;

use crate::config::ProcessingConfig;
use crate::error::{Error, Result};
use crate::manifest::{sha256_bytes, AssetCheck, CheckStatus};
use crate::model::Asset;
use crate::store::Store;

/// Turns encoded file bytes into a single-band raster
pub trait BandDecoder: Send + Sync {
    /// Whether this decoder handles the file
    fn supports(&self, path: &Path) -> bool;

    fn decode(&self, bytes: &[u8], path: &Path) -> sda_core::Result<Raster<f64>>;
}

/// GeoTIFF decoder backed by `sda_core::io`
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffDecoder;

impl BandDecoder for GeoTiffDecoder {
    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
    }

    fn decode(&self, bytes: &[u8], _path: &Path) -> sda_core::Result<Raster<f64>> {
        read_geotiff_from_buffer(bytes)
    }
}

/// Reads verified band rasters as reflectance
pub struct BandReader {
    decoders: Vec<Box<dyn BandDecoder>>,
    reflectance_scale: f64,
    nodata_fallback: Option<f64>,
}

impl BandReader {
    pub fn new(reflectance_scale: f64, nodata_fallback: Option<f64>) -> Self {
        Self {
            decoders: vec![Box::new(GeoTiffDecoder)],
            reflectance_scale,
            nodata_fallback,
        }
    }

    pub fn from_config(processing: &ProcessingConfig) -> Self {
        Self::new(processing.reflectance_scale, processing.band_nodata)
    }

    /// Register another decoder, tried after the ones already present
    pub fn with_decoder(mut self, decoder: impl BandDecoder + 'static) -> Self {
        self.decoders.push(Box::new(decoder));
        self
    }

    /// Verify and decode one asset, scaled to reflectance.
    pub fn read_band(&self, asset: &Asset) -> Result<Raster<f64>> {
        let bytes = match fs::read(&asset.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(integrity_error(asset, CheckStatus::Missing));
            }
            Err(source) => {
                return Err(Error::Io {
                    path: asset.path.clone(),
                    source,
                })
            }
        };

        let actual = sha256_bytes(&bytes);
        if actual != asset.sha256.to_ascii_lowercase() {
            return Err(integrity_error(
                asset,
                CheckStatus::HashMismatch {
                    expected: asset.sha256.clone(),
                    actual,
                },
            ));
        }

        let decoder = self
            .decoders
            .iter()
            .find(|d| d.supports(&asset.path))
            .ok_or_else(|| Error::UnsupportedFormat {
                path: asset.path.clone(),
            })?;

        let mut raster = decoder.decode(&bytes, &asset.path)?;
        if raster.nodata().is_none() {
            raster.set_nodata(self.nodata_fallback);
        }

        let scale = self.reflectance_scale;
        let band = band_math(&raster, |v| v * scale)?;
        debug!(
            kind = %asset.kind,
            path = %asset.path.display(),
            rows = band.rows(),
            cols = band.cols(),
            "read band"
        );
        Ok(band)
    }

    /// Read several assets into one band set keyed by kind.
    ///
    /// Fails with a grid mismatch naming both bands when any two differ
    /// in shape or transform.
    pub fn read_aligned(&self, assets: &[Asset]) -> Result<BandSet> {
        let mut bands = BandSet::new();
        for asset in assets {
            let raster = self.read_band(asset)?;
            bands.insert(asset.kind.clone(), raster)?;
        }
        Ok(bands)
    }

    /// Read the bands `formula` needs from a scene's assets
    pub fn read_for_formula(&self, store: &Store, scene_id: i64, formula: Formula) -> Result<BandSet> {
        let mut assets = Vec::new();
        for kind in formula.required_bands() {
            let asset = store
                .asset_by_kind(scene_id, kind)?
                .ok_or_else(|| Error::MissingBand {
                    formula: formula.id().to_string(),
                    band: kind.to_string(),
                })?;
            assets.push(asset);
        }
        self.read_aligned(&assets)
    }
}

fn integrity_error(asset: &Asset, status: CheckStatus) -> Error {
    Error::Integrity {
        context: format!("asset {} ({}) of scene {}", asset.id, asset.kind, asset.scene_id),
        failures: vec![AssetCheck {
            path: asset.path.display().to_string(),
            kind: Some(asset.kind.clone()),
            status,
            size: None,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;
    use sda_core::io::write_geotiff;
    use sda_core::GeoTransform;
    use tempfile::TempDir;

    use crate::manifest::sha256_file;

    fn write_band(dir: &Path, name: &str, values: Vec<f64>, origin_x: f64) -> Asset {
        let mut raster = Raster::from_vec(values, 2, 2).unwrap();
        raster.set_transform(GeoTransform::new(origin_x, 4000020.0, 10.0, -10.0));
        let path = dir.join(name);
        write_geotiff(&raster, &path).unwrap();
        Asset {
            id: 1,
            scene_id: 1,
            kind: name.trim_end_matches(".tif").to_string(),
            sha256: sha256_file(&path).unwrap(),
            size: None,
            path,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_read_band_scales_and_applies_fallback_nodata() {
        let dir = TempDir::new().unwrap();
        let asset = write_band(dir.path(), "B04.tif", vec![1000.0, 0.0, 2500.0, 4000.0], 500000.0);

        let reader = BandReader::new(1e-4, Some(0.0));
        let band = reader.read_band(&asset).unwrap();

        assert_relative_eq!(band.get(0, 0).unwrap(), 0.1, epsilon = 1e-12);
        assert!(band.get(0, 1).unwrap().is_nan());
        assert_relative_eq!(band.get(1, 1).unwrap(), 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_tampered_asset_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut asset = write_band(dir.path(), "B04.tif", vec![1.0; 4], 500000.0);
        asset.sha256 = "0".repeat(64);

        let err = BandReader::new(1.0, None).read_band(&asset).unwrap_err();
        match err {
            Error::Integrity { failures, .. } => {
                assert!(matches!(failures[0].status, CheckStatus::HashMismatch { .. }))
            }
            other => panic!("expected integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_integrity_failure() {
        let dir = TempDir::new().unwrap();
        let mut asset = write_band(dir.path(), "B04.tif", vec![1.0; 4], 500000.0);
        asset.path = dir.path().join("gone.tif");

        let err = BandReader::new(1.0, None).read_band(&asset).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[test]
    fn test_unsupported_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("B04.jp2");
        fs::write(&path, b"jp2 bytes").unwrap();
        let asset = Asset {
            id: 1,
            scene_id: 1,
            kind: "B04".into(),
            sha256: sha256_file(&path).unwrap(),
            size: None,
            path,
            created_at: Utc::now(),
        };

        let err = BandReader::new(1.0, None).read_band(&asset).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_plugged_decoder_is_used() {
        struct ConstantDecoder;
        impl BandDecoder for ConstantDecoder {
            fn supports(&self, path: &Path) -> bool {
                path.extension().map_or(false, |e| e == "jp2")
            }
            fn decode(&self, _bytes: &[u8], _path: &Path) -> sda_core::Result<Raster<f64>> {
                Ok(Raster::filled(3, 3, 2000.0))
            }
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("B08.jp2");
        fs::write(&path, b"jp2 bytes").unwrap();
        let asset = Asset {
            id: 2,
            scene_id: 1,
            kind: "B08".into(),
            sha256: sha256_file(&path).unwrap(),
            size: None,
            path,
            created_at: Utc::now(),
        };

        let reader = BandReader::new(1e-4, None).with_decoder(ConstantDecoder);
        let band = reader.read_band(&asset).unwrap();
        assert_eq!(band.shape(), (3, 3));
        assert_relative_eq!(band.get(1, 1).unwrap(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_read_aligned_rejects_shifted_grid() {
        let dir = TempDir::new().unwrap();
        let red = write_band(dir.path(), "B04.tif", vec![1.0; 4], 500000.0);
        let nir = write_band(dir.path(), "B08.tif", vec![1.0; 4], 500020.0);

        let err = BandReader::new(1.0, None)
            .read_aligned(&[red, nir])
            .unwrap_err();
        match err {
            Error::GridMismatch { left, right, .. } => {
                assert_eq!((left.as_str(), right.as_str()), ("B04", "B08"))
            }
            other => panic!("expected grid mismatch, got {:?}", other),
        }
    }
}
