//! Change detection between two index rasters
//!
//! - Raster difference (`after - before`) with nodata propagation
//! - Region grouping: cells whose difference exceeds a threshold are
//!   flood-filled into connected regions of the same sign, each reported
//!   as a loss or gain with its mean difference.
//!
//! Regions are produced lazily by [`ChangeRegions::iter`]; every call starts
//! a fresh scan, so a region sequence can be consumed more than once.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use crate::maybe_rayon::*;
use sda_core::raster::Raster;
use sda_core::{Error, Result};

use super::indices::is_nodata_f64;

/// Edge neighbours
const D4_OFFSETS: [(isize, isize); 4] = [(0, 1), (-1, 0), (0, -1), (1, 0)];

/// Edge and corner neighbours
const D8_OFFSETS: [(isize, isize); 8] = [
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Compute `after - before` cell by cell.
///
/// A cell is NaN (nodata) in the output when either input is nodata.
pub fn raster_difference(before: &Raster<f64>, after: &Raster<f64>) -> Result<Raster<f64>> {
    before.check_same_grid(after, "before", "after")?;

    let (rows, cols) = before.shape();
    let nodata_before = before.nodata();
    let nodata_after = after.nodata();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for col in 0..cols {
                let b = unsafe { before.get_unchecked(row, col) };
                let a = unsafe { after.get_unchecked(row, col) };

                if is_nodata_f64(b, nodata_before) || is_nodata_f64(a, nodata_after) {
                    continue;
                }
                row_data[col] = a - b;
            }
            row_data
        })
        .collect();

    let mut output = before.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}

/// Neighbourhood used to connect changed cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    #[default]
    Four,
    Eight,
}

impl Connectivity {
    /// Number of neighbours a cell connects to (4 or 8)
    pub fn neighbours(self) -> u8 {
        match self {
            Connectivity::Four => 4,
            Connectivity::Eight => 8,
        }
    }

    pub fn from_neighbours(n: u8) -> Option<Self> {
        match n {
            4 => Some(Connectivity::Four),
            8 => Some(Connectivity::Eight),
            _ => None,
        }
    }

    fn offsets(self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &D4_OFFSETS,
            Connectivity::Eight => &D8_OFFSETS,
        }
    }
}

impl FromStr for Connectivity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "4" | "four" => Ok(Connectivity::Four),
            "8" | "eight" => Ok(Connectivity::Eight),
            other => Err(Error::InvalidParameter {
                name: "connectivity",
                value: other.to_string(),
                reason: "expected 4 or 8".to_string(),
            }),
        }
    }
}

/// Parameters for region grouping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeParams {
    /// Cells change when `|difference| > threshold` (strict)
    pub threshold: f64,
    /// Regions with fewer cells are dropped
    pub min_pixels: usize,
    pub connectivity: Connectivity,
}

impl Default for ChangeParams {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            min_pixels: 1,
            connectivity: Connectivity::Four,
        }
    }
}

impl ChangeParams {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(Error::InvalidParameter {
                name: "threshold",
                value: self.threshold.to_string(),
                reason: "must be a finite value >= 0".to_string(),
            });
        }
        if self.min_pixels == 0 {
            return Err(Error::InvalidParameter {
                name: "min_pixels",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Direction of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeClass {
    /// Index decreased
    Loss,
    /// Index increased
    Gain,
}

impl ChangeClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeClass::Loss => "loss",
            ChangeClass::Gain => "gain",
        }
    }

    fn of(difference: f64) -> Self {
        if difference < 0.0 {
            ChangeClass::Loss
        } else {
            ChangeClass::Gain
        }
    }
}

impl FromStr for ChangeClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "loss" => Ok(ChangeClass::Loss),
            "gain" => Ok(ChangeClass::Gain),
            other => Err(Error::InvalidParameter {
                name: "classification",
                value: other.to_string(),
                reason: "expected loss or gain".to_string(),
            }),
        }
    }
}

impl fmt::Display for ChangeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive pixel window of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBounds {
    pub row_min: usize,
    pub col_min: usize,
    pub row_max: usize,
    pub col_max: usize,
}

/// One connected region of changed cells
#[derive(Debug, Clone)]
pub struct ChangeRegion {
    pub class: ChangeClass,
    /// Cells as (row, col), in discovery order
    pub cells: Vec<(usize, usize)>,
    pub pixel_bounds: PixelBounds,
    /// Map bounding box `(min_x, min_y, max_x, max_y)`
    pub bounds: (f64, f64, f64, f64),
    /// Mean difference over the region's cells
    pub magnitude: f64,
}

impl ChangeRegion {
    pub fn pixel_count(&self) -> usize {
        self.cells.len()
    }

    /// Bounding box as a closed WKT polygon
    pub fn wkt(&self) -> String {
        let (min_x, min_y, max_x, max_y) = self.bounds;
        format!(
            "POLYGON(({min_x} {min_y}, {max_x} {min_y}, {max_x} {max_y}, {min_x} {max_y}, {min_x} {min_y}))"
        )
    }
}

/// Connected change regions of a difference raster
#[derive(Debug, Clone)]
pub struct ChangeRegions {
    difference: Raster<f64>,
    params: ChangeParams,
}

impl ChangeRegions {
    /// Difference `after - before` and prepare region grouping.
    pub fn new(before: &Raster<f64>, after: &Raster<f64>, params: ChangeParams) -> Result<Self> {
        let difference = raster_difference(before, after)?;
        Self::from_difference(difference, params)
    }

    pub fn from_difference(difference: Raster<f64>, params: ChangeParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { difference, params })
    }

    pub fn difference(&self) -> &Raster<f64> {
        &self.difference
    }

    pub fn params(&self) -> &ChangeParams {
        &self.params
    }

    /// Scan for regions in row-major order of their first cell.
    pub fn iter(&self) -> RegionIter<'_> {
        RegionIter {
            difference: &self.difference,
            params: &self.params,
            visited: Array2::from_elem(self.difference.shape(), false),
            cursor: 0,
        }
    }
}

impl<'a> IntoIterator for &'a ChangeRegions {
    type Item = ChangeRegion;
    type IntoIter = RegionIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy region scan over a difference raster
pub struct RegionIter<'a> {
    difference: &'a Raster<f64>,
    params: &'a ChangeParams,
    visited: Array2<bool>,
    cursor: usize,
}

impl RegionIter<'_> {
    /// Changed class of a cell, `None` for nodata or sub-threshold cells
    fn class_at(&self, row: usize, col: usize) -> Option<ChangeClass> {
        let d = unsafe { self.difference.get_unchecked(row, col) };
        if d.is_nan() || d.abs() <= self.params.threshold {
            return None;
        }
        Some(ChangeClass::of(d))
    }

    fn flood(&mut self, seed: (usize, usize), class: ChangeClass) -> ChangeRegion {
        let (rows, cols) = self.difference.shape();
        let mut queue = VecDeque::new();
        let mut cells = Vec::new();
        let mut sum = 0.0;
        let mut bounds = PixelBounds {
            row_min: seed.0,
            col_min: seed.1,
            row_max: seed.0,
            col_max: seed.1,
        };

        self.visited[seed] = true;
        queue.push_back(seed);

        while let Some((row, col)) = queue.pop_front() {
            cells.push((row, col));
            sum += unsafe { self.difference.get_unchecked(row, col) };
            bounds.row_min = bounds.row_min.min(row);
            bounds.row_max = bounds.row_max.max(row);
            bounds.col_min = bounds.col_min.min(col);
            bounds.col_max = bounds.col_max.max(col);

            for &(dr, dc) in self.params.connectivity.offsets() {
                let nr = row as isize + dr;
                let nc = col as isize + dc;
                if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                    continue;
                }
                let (nr, nc) = (nr as usize, nc as usize);
                if self.visited[(nr, nc)] || self.class_at(nr, nc) != Some(class) {
                    continue;
                }
                self.visited[(nr, nc)] = true;
                queue.push_back((nr, nc));
            }
        }

        let geo_bounds = self.difference.transform().window_bounds(
            bounds.col_min,
            bounds.row_min,
            bounds.col_max + 1,
            bounds.row_max + 1,
        );
        let magnitude = sum / cells.len() as f64;

        ChangeRegion {
            class,
            cells,
            pixel_bounds: bounds,
            bounds: geo_bounds,
            magnitude,
        }
    }
}

impl Iterator for RegionIter<'_> {
    type Item = ChangeRegion;

    fn next(&mut self) -> Option<ChangeRegion> {
        let cols = self.difference.cols();
        let total = self.difference.len();

        while self.cursor < total {
            let cell = (self.cursor / cols, self.cursor % cols);
            self.cursor += 1;

            if self.visited[cell] {
                continue;
            }
            let Some(class) = self.class_at(cell.0, cell.1) else {
                continue;
            };

            let region = self.flood(cell, class);
            if region.pixel_count() >= self.params.min_pixels {
                return Some(region);
            }
        }
        None
    }
}
