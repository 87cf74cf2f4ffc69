//! Grid footprint: dimensions, cell size and lower-left cell centre

use crate::crs::Crs;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Approximate length of one degree of arc, in metres.
pub const METERS_PER_DEGREE: f64 = 110_000.0;

/// Georeferencing shared by every grid derived from the same footprint.
///
/// Cells are square with side `dx`. Coordinates refer to cell centres, and
/// `(xllcenter, yllcenter)` is the centre of the lower-left (south-west) cell.
/// Rasters store rows north-up, so raster row `0` is the northernmost row.
///
/// ```text
/// x(col) = xllcenter + col * dx
/// y(row) = yllcenter + (ny - 1 - row) * dx
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
    /// Number of columns
    pub nx: usize,
    /// Number of rows
    pub ny: usize,
    /// Cell size, in projection units (degrees for geographic grids)
    pub dx: f64,
    /// X coordinate of the lower-left cell centre
    pub xllcenter: f64,
    /// Y coordinate of the lower-left cell centre
    pub yllcenter: f64,
    /// Projection tag, if known
    pub projection: Option<Crs>,
}

impl GeoReference {
    /// Create a validated georeference.
    ///
    /// Fails when the grid is empty or the cell size is not a positive,
    /// finite number.
    pub fn new(nx: usize, ny: usize, dx: f64, xllcenter: f64, yllcenter: f64) -> Result<Self> {
        if nx == 0 || ny == 0 {
            return Err(Error::InvalidDimensions {
                width: nx,
                height: ny,
            });
        }
        if !(dx.is_finite() && dx > 0.0) {
            return Err(Error::invalid_parameter("dx", dx, "cell size must be positive"));
        }
        Ok(Self {
            nx,
            ny,
            dx,
            xllcenter,
            yllcenter,
            projection: None,
        })
    }

    /// Unit-spaced georeference anchored at the origin.
    ///
    /// Used for rasters built from bare arrays. Not validated, so an empty
    /// raster can still carry one.
    pub fn unit(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            dx: 1.0,
            xllcenter: 0.0,
            yllcenter: 0.0,
            projection: None,
        }
    }

    /// Build from an upper-left corner description (the GeoTIFF/GDAL convention).
    pub fn from_corner(nx: usize, ny: usize, dx: f64, ulx: f64, uly: f64) -> Result<Self> {
        let xllcenter = ulx + dx / 2.0;
        let yllcenter = uly - dx * (ny as f64 - 0.5);
        Self::new(nx, ny, dx, xllcenter, yllcenter)
    }

    /// Upper-left corner `(ulx, uly)` of the grid.
    pub fn to_corner(&self) -> (f64, f64) {
        let ulx = self.xllcenter - self.dx / 2.0;
        let uly = self.yllcenter + self.dx * (self.ny as f64 - 0.5);
        (ulx, uly)
    }

    /// Attach a projection tag.
    pub fn with_projection(mut self, projection: Crs) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Grid shape as `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.ny, self.nx)
    }

    /// Whether cell sizes are angular.
    pub fn is_geographic(&self) -> bool {
        self.projection.as_ref().is_some_and(Crs::is_geographic)
    }

    /// Cell containing the point `(x, y)`, as raster `(row, col)`.
    ///
    /// Returns `None` when the point falls outside the grid.
    pub fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = ((x - self.xllcenter) / self.dx).round();
        let row_from_bottom = ((y - self.yllcenter) / self.dx).round();
        if !(col.is_finite() && row_from_bottom.is_finite()) {
            return None;
        }
        if col < 0.0 || row_from_bottom < 0.0 {
            return None;
        }
        let (col, row_from_bottom) = (col as usize, row_from_bottom as usize);
        if col >= self.nx || row_from_bottom >= self.ny {
            return None;
        }
        Some((self.ny - 1 - row_from_bottom, col))
    }

    /// Centre coordinates of raster cell `(row, col)`.
    pub fn xy_of(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.xllcenter + col as f64 * self.dx;
        let y = self.yllcenter + (self.ny as f64 - 1.0 - row as f64) * self.dx;
        (x, y)
    }

    /// Metric `(dx, dy)` of a cell in `row`.
    ///
    /// Projected grids use `dx` directly. Geographic grids convert degrees to
    /// metres, narrowing the east-west size with the cosine of latitude.
    pub fn pixel_dimensions(&self, row: usize) -> (f64, f64) {
        if !self.is_geographic() {
            return (self.dx, self.dx);
        }
        let (_, lat) = self.xy_of(row, 0);
        let dy_m = self.dx * METERS_PER_DEGREE;
        let dx_m = dy_m * lat.to_radians().cos().abs();
        (dx_m, dy_m)
    }

    /// Metric area of one cell in `row`.
    pub fn pixel_area(&self, row: usize) -> f64 {
        let (dx_m, dy_m) = self.pixel_dimensions(row);
        dx_m * dy_m
    }

    /// Mean metric side length of one cell in `row`.
    pub fn mean_pixel_dimension(&self, row: usize) -> f64 {
        let (dx_m, dy_m) = self.pixel_dimensions(row);
        (dx_m + dy_m) / 2.0
    }

    /// Bounding box `(min_x, min_y, max_x, max_y)` of the cell edges.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let half = self.dx / 2.0;
        (
            self.xllcenter - half,
            self.yllcenter - half,
            self.xllcenter + (self.nx as f64 - 0.5) * self.dx,
            self.yllcenter + (self.ny as f64 - 0.5) * self.dx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_bad_cell_size() {
        assert!(GeoReference::new(10, 10, 0.0, 0.0, 0.0).is_err());
        assert!(GeoReference::new(10, 10, -5.0, 0.0, 0.0).is_err());
        assert!(GeoReference::new(0, 10, 5.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_cell_of_roundtrip() {
        let g = GeoReference::new(20, 10, 30.0, 500.0, 1000.0).unwrap();
        let (x, y) = g.xy_of(3, 7);
        assert_eq!(g.cell_of(x, y), Some((3, 7)));
        // Lower-left centre is the last raster row
        assert_eq!(g.cell_of(500.0, 1000.0), Some((9, 0)));
        // Within half a cell rounds to the same cell
        assert_eq!(g.cell_of(500.0 + 14.0, 1000.0 - 14.0), Some((9, 0)));
    }

    #[test]
    fn test_cell_of_out_of_bounds() {
        let g = GeoReference::new(20, 10, 30.0, 500.0, 1000.0).unwrap();
        assert_eq!(g.cell_of(500.0 - 30.0, 1000.0), None);
        assert_eq!(g.cell_of(500.0 + 20.0 * 30.0, 1000.0), None);
        assert_eq!(g.cell_of(500.0, 1000.0 + 10.0 * 30.0), None);
        assert_eq!(g.cell_of(f64::NAN, 1000.0), None);
    }

    #[test]
    fn test_corner_conversion() {
        let g = GeoReference::from_corner(4, 3, 10.0, 100.0, 200.0).unwrap();
        assert_relative_eq!(g.xllcenter, 105.0);
        assert_relative_eq!(g.yllcenter, 175.0);
        let (ulx, uly) = g.to_corner();
        assert_relative_eq!(ulx, 100.0);
        assert_relative_eq!(uly, 200.0);
    }

    #[test]
    fn test_geographic_pixel_dimensions() {
        let g = GeoReference::new(10, 10, 1.0 / 240.0, -70.0, -33.5)
            .unwrap()
            .with_projection(Crs::wgs84());
        let (dx_m, dy_m) = g.pixel_dimensions(9);
        assert_relative_eq!(dy_m, METERS_PER_DEGREE / 240.0, epsilon = 1e-9);
        assert_relative_eq!(dx_m, dy_m * 33.5_f64.to_radians().cos(), epsilon = 1e-9);
        assert!(g.mean_pixel_dimension(9) < dy_m);
    }

    #[test]
    fn test_projected_pixel_area() {
        let g = GeoReference::new(10, 10, 30.0, 0.0, 0.0).unwrap();
        assert_relative_eq!(g.pixel_area(0), 900.0);
        assert_relative_eq!(g.mean_pixel_dimension(5), 30.0);
    }
}
