//! Affine geotransformation for rasters

use serde::{Deserialize, Serialize};

/// Tolerance used when deciding whether two transforms describe the same grid.
const GRID_TOLERANCE: f64 = 1e-9;

/// Affine transformation coefficients for georeferencing rasters.
///
/// Converts between pixel coordinates (col, row) and map coordinates (x, y):
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// Sentinel-2 tiles are north-up UTM grids, so rotations are 0 and
/// `pixel_height` is negative (-10 for the 10 m bands).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Pixel width (cell size in X direction)
    pub pixel_width: f64,
    /// Pixel height (cell size in Y direction, usually negative)
    pub pixel_height: f64,
    /// Rotation about X axis (usually 0)
    pub row_rotation: f64,
    /// Rotation about Y axis (usually 0)
    pub col_rotation: f64,
}

impl GeoTransform {
    /// Create a new GeoTransform with no rotation (north-up image)
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// Create from GDAL-style array [origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]
    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            origin_x: coeffs[0],
            pixel_width: coeffs[1],
            row_rotation: coeffs[2],
            origin_y: coeffs[3],
            col_rotation: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    /// Convert to GDAL-style array
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }

    /// Map coordinates of the top-left corner of a pixel
    pub fn pixel_to_geo_corner(&self, col: usize, row: usize) -> (f64, f64) {
        let col_f = col as f64;
        let row_f = row as f64;

        let x = self.origin_x + col_f * self.pixel_width + row_f * self.row_rotation;
        let y = self.origin_y + col_f * self.col_rotation + row_f * self.pixel_height;

        (x, y)
    }

    /// Bounding box `(min_x, min_y, max_x, max_y)` of the pixel window
    /// `[col_start, col_end) x [row_start, row_end)`.
    pub fn window_bounds(
        &self,
        col_start: usize,
        row_start: usize,
        col_end: usize,
        row_end: usize,
    ) -> (f64, f64, f64, f64) {
        let corners = [
            self.pixel_to_geo_corner(col_start, row_start),
            self.pixel_to_geo_corner(col_end, row_start),
            self.pixel_to_geo_corner(col_start, row_end),
            self.pixel_to_geo_corner(col_end, row_end),
        ];

        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        (min_x, min_y, max_x, max_y)
    }

    /// Bounding box for a raster of given dimensions
    pub fn bounds(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        self.window_bounds(0, 0, width, height)
    }

    /// Whether two transforms place pixels at the same map positions
    pub fn same_grid(&self, other: &GeoTransform) -> bool {
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= GRID_TOLERANCE * a.abs().max(b.abs()).max(1.0))
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_window_bounds() {
        let gt = GeoTransform::new(600000.0, 5000000.0, 10.0, -10.0);
        let (min_x, min_y, max_x, max_y) = gt.window_bounds(1, 1, 3, 3);

        assert_relative_eq!(min_x, 600010.0, epsilon = 1e-9);
        assert_relative_eq!(max_x, 600030.0, epsilon = 1e-9);
        assert_relative_eq!(min_y, 4999970.0, epsilon = 1e-9);
        assert_relative_eq!(max_y, 4999990.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bounds() {
        let gt = GeoTransform::new(0.0, 100.0, 1.0, -1.0);
        let (min_x, min_y, max_x, max_y) = gt.bounds(100, 100);

        assert_relative_eq!(min_x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(min_y, 0.0, epsilon = 1e-10);
        assert_relative_eq!(max_x, 100.0, epsilon = 1e-10);
        assert_relative_eq!(max_y, 100.0, epsilon = 1e-10);
    }

    #[test]
    fn test_same_grid() {
        let a = GeoTransform::new(600000.0, 5000000.0, 10.0, -10.0);
        let b = GeoTransform::from_gdal(a.to_gdal());
        let c = GeoTransform::new(600000.0, 5000000.0, 20.0, -20.0);

        assert!(a.same_grid(&b));
        assert!(!a.same_grid(&c));
    }
}
