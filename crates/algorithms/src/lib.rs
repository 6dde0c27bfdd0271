//! # sda algorithms
//!
//! Raster algorithms for the deforestation pipeline.
//!
//! ## Available Algorithm Categories
//!
//! - **imagery**: Spectral indices, formula registry, band math, change regions

pub mod imagery;
mod maybe_rayon;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::imagery::{
        band_math, compute, evi, nbr, ndmi, ndvi, ndwi, normalized_difference,
        raster_difference, savi, BandSet, ChangeClass, ChangeParams, ChangeRegion,
        ChangeRegions, Connectivity, EviParams, Formula, IndexOutput, SaviParams, ValueRange,
    };
    pub use sda_core::prelude::*;
}
