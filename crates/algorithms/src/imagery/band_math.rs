//! Band math operations
//!
//! Element-wise raster algebra. The band reader uses it to turn digital
//! numbers into reflectance before any index is computed.

use ndarray::Array2;
use crate::maybe_rayon::*;
use sda_core::raster::{Raster, RasterElement};
use sda_core::{Error, Result};

/// Apply a unary function to every cell in a raster, producing `f64`.
///
/// Nodata cells (per the input's sentinel, or NaN) become NaN and the
/// output declares NaN as its nodata value.
///
/// # Example
/// ```ignore
/// let reflectance = band_math(&digital_numbers, |v| v * 0.0001)?;
/// ```
pub fn band_math<T, F>(raster: &Raster<T>, f: F) -> Result<Raster<f64>>
where
    T: RasterElement,
    F: Fn(f64) -> f64 + Sync + Send,
{
    let (rows, cols) = raster.shape();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for col in 0..cols {
                let val = unsafe { raster.get_unchecked(row, col) };
                if raster.is_nodata(val) {
                    continue;
                }
                if let Some(v) = num_traits::cast::<T, f64>(val) {
                    row_data[col] = f(v);
                }
            }
            row_data
        })
        .collect();

    let mut output = raster.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;

    Ok(output)
}
