//! Imagery analysis algorithms
//!
//! - Spectral indices: NDVI, NBR, NDWI, NDMI, SAVI, EVI
//! - Formula registry: closed set of index ids over labelled bands
//! - Band math: element-wise scaling of digital numbers
//! - Change detection: differencing and connected change regions

mod band_math;
pub mod change_detection;
mod formula;
mod indices;

pub use band_math::band_math;
pub use change_detection::{
    raster_difference, ChangeClass, ChangeParams, ChangeRegion, ChangeRegions, Connectivity,
    PixelBounds, RegionIter,
};
pub use formula::{bands, compute, compute_by_id, BandSet, Formula, IndexOutput, ValueRange};
pub use indices::{
    evi, nbr, ndmi, ndvi, ndwi, normalized_difference, savi, EviParams, SaviParams,
};
