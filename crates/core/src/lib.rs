//! # sda core
//!
//! Raster types shared by the sda crates.
//!
//! This crate provides:
//! - `Raster<T>`: georeferenced grid with a nodata sentinel
//! - `GeoTransform`: affine pixel-to-map transformation
//! - Native GeoTIFF reading/writing used for band input and index artifacts

pub mod error;
pub mod io;
pub mod raster;

pub use error::{Error, Result};
pub use raster::{GeoTransform, Raster, RasterElement, RasterStatistics};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, Raster, RasterElement, RasterStatistics};
}
