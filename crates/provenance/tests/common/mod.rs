//! Scene folder fixtures shared by the integration tests.
//!
//! Scenes are 4×4 UTM grids (10 m pixels) with digital numbers scaled by
//! 1e-4 on read, so a DN of 2000 is a reflectance of 0.2.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use sda_core::io::write_geotiff;
use sda_core::{GeoTransform, Raster};
use sda_provenance::manifest::{sha256_file, Manifest, ManifestEntry, MANIFEST_FILE};
use sda_provenance::{Footprint, SceneMetadata};

pub const ROWS: usize = 4;
pub const COLS: usize = 4;
pub const ORIGIN_X: f64 = 500000.0;
pub const ORIGIN_Y: f64 = 4000040.0;
pub const TILE: &str = "T21LXH";

pub fn transform() -> GeoTransform {
    GeoTransform::new(ORIGIN_X, ORIGIN_Y, 10.0, -10.0)
}

/// Every cell set to `dn`
pub fn uniform(dn: f64) -> Vec<f64> {
    vec![dn; ROWS * COLS]
}

/// `base` with the 2×2 block at rows 1..3, cols 1..3 set to `dn`
pub fn with_block(mut base: Vec<f64>, dn: f64) -> Vec<f64> {
    for row in 1..3 {
        for col in 1..3 {
            base[row * COLS + col] = dn;
        }
    }
    base
}

/// `base` with the single cell at (`row`, `col`) set to `dn`
pub fn with_cell(mut base: Vec<f64>, row: usize, col: usize, dn: f64) -> Vec<f64> {
    base[row * COLS + col] = dn;
    base
}

/// Write one band file into `folder`
pub fn write_band(folder: &Path, kind: &str, values: Vec<f64>, transform: GeoTransform) -> PathBuf {
    let mut raster = Raster::from_vec(values, ROWS, COLS).expect("band shape");
    raster.set_transform(transform);
    let path = folder.join(format!("{kind}_10m.tif"));
    write_geotiff(&raster, &path).expect("write band");
    path
}

/// Write `manifest.json` hashing every file currently named in `files`
pub fn write_manifest(folder: &Path, files: &[PathBuf]) {
    write_manifest_with_sizes(folder, files, Some);
}

/// Like [`write_manifest`], declaring `size(actual_len)` for each file
pub fn write_manifest_with_sizes(folder: &Path, files: &[PathBuf], size: impl Fn(u64) -> Option<u64>) {
    let entries = files
        .iter()
        .map(|path| ManifestEntry {
            path: path
                .file_name()
                .expect("file name")
                .to_string_lossy()
                .into_owned(),
            sha256: sha256_file(path).expect("hash"),
            size: size(fs::metadata(path).expect("band metadata").len()),
            kind: None,
        })
        .collect();
    let manifest = Manifest { files: entries };
    fs::write(
        folder.join(MANIFEST_FILE),
        serde_json::to_string_pretty(&manifest).expect("manifest json"),
    )
    .expect("write manifest");
}

/// Create `root/name` holding the given bands and a matching manifest
pub fn write_scene(root: &Path, name: &str, bands: Vec<(&str, Vec<f64>)>) -> PathBuf {
    let folder = root.join(name);
    fs::create_dir_all(&folder).expect("scene folder");
    let files: Vec<PathBuf> = bands
        .into_iter()
        .map(|(kind, values)| write_band(&folder, kind, values, transform()))
        .collect();
    write_manifest(&folder, &files);
    folder
}

/// All six bands with NIR and red set so NDVI is 0 everywhere
pub fn flat_bands() -> Vec<(&'static str, Vec<f64>)> {
    vec![
        ("B02", uniform(800.0)),
        ("B03", uniform(1200.0)),
        ("B04", uniform(2000.0)),
        ("B08", uniform(2000.0)),
        ("B11", uniform(1500.0)),
        ("B12", uniform(1000.0)),
    ]
}

/// Same as [`flat_bands`] except a 2×2 block with NDVI 0.6
pub fn greening_bands() -> Vec<(&'static str, Vec<f64>)> {
    vec![
        ("B02", uniform(800.0)),
        ("B03", uniform(1200.0)),
        ("B04", with_block(uniform(2000.0), 1000.0)),
        ("B08", with_block(uniform(2000.0), 4000.0)),
        ("B11", uniform(1500.0)),
        ("B12", uniform(1000.0)),
    ]
}

/// [`greening_bands`] plus a lone greening cell at (3, 3), touching the
/// block only diagonally
pub fn greening_with_speck_bands() -> Vec<(&'static str, Vec<f64>)> {
    vec![
        ("B02", uniform(800.0)),
        ("B03", uniform(1200.0)),
        ("B04", with_cell(with_block(uniform(2000.0), 1000.0), 3, 3, 1000.0)),
        ("B08", with_cell(with_block(uniform(2000.0), 4000.0), 3, 3, 4000.0)),
        ("B11", uniform(1500.0)),
        ("B12", uniform(1000.0)),
    ]
}

pub fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 14, 0, 51)
        .single()
        .expect("valid date")
}

pub fn metadata(product_id: &str, acquired_at: DateTime<Utc>) -> SceneMetadata {
    SceneMetadata {
        product_id: product_id.to_string(),
        satellite: "S2B".to_string(),
        tile: TILE.to_string(),
        acquired_at,
        cloud_cover: Some(3.5),
        crs: Some("EPSG:32721".to_string()),
        footprint: Footprint::new(-55.0, -10.0, -54.0, -9.0),
        processing_level: "L2A".to_string(),
    }
}
