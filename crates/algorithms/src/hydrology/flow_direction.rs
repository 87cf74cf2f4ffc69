//! D8 flow direction and contributing area
//!
//! Routes each cell to its steepest downslope neighbour (D8) and accumulates
//! metric drainage area in the same pass: cells are visited from highest to
//! lowest, so every cell has received all of its upstream area before it
//! hands its total to the cell below.
//!
//! Direction encoding (see [`chiflow_core::d8`]):
//! ```text
//!   32  64  128
//!   16   X    1
//!    8   4    2
//! ```
//! `0` = undrained (outlet, pit, flat or no-data)

use std::cmp::Ordering;

use chiflow_core::raster::{d8, GeoReference, GridAccessor, Raster};
use chiflow_core::{Algorithm, Error, Result};
use tracing::debug;

/// Parameters for D8 routing
#[derive(Debug, Clone, Default)]
pub struct D8Params {
    /// Also return the slope from each cell to its receiver
    pub compute_slope: bool,
}

/// Output of [`d8_flow`]
#[derive(Debug, Clone)]
pub struct D8Routing {
    /// Flow direction codes, `0` where undrained
    pub direction: Raster<u8>,
    /// Contributing area in square metres, own pixel included; NaN off-data
    pub area: Raster<f64>,
    /// Drop per metre towards the receiver; NaN where undefined
    pub slope: Option<Raster<f64>>,
}

/// D8 flow routing algorithm
#[derive(Debug, Clone, Default)]
pub struct FlowDirection;

impl Algorithm for FlowDirection {
    type Input = Raster<f64>;
    type Output = D8Routing;
    type Params = D8Params;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Direction (D8)"
    }

    fn description(&self) -> &'static str {
        "Calculate D8 flow direction and drainage area from a filled DEM"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        d8_flow(&input, params)
    }
}

/// Route a filled DEM with D8 and accumulate drainage area.
///
/// # Algorithm
/// 1. Every valid cell starts with its own metric pixel area
/// 2. Valid cells are sorted by elevation, highest first (stable, so equal
///    elevations keep row-major order)
/// 3. Each cell picks the neighbour with the largest strictly positive drop
///    per unit distance; on equal drops the first neighbour in clockwise
///    order from east wins. Its area is added to the receiver
/// 4. Cells without a downhill neighbour keep direction `0`
///
/// The DEM should be hydrologically conditioned (see
/// [`priority_flood`](super::priority_flood)); unfilled pits simply become
/// additional outlets.
pub fn d8_flow(filled: &Raster<f64>, params: D8Params) -> Result<D8Routing> {
    route(filled, params.compute_slope.then_some(filled))
}

/// D8 routing on `filled`, with slopes measured on the unfilled surface.
///
/// Routing, and therefore area, follow `filled`; the returned slope is the
/// drop along that route on `raw`, which keeps the true (possibly negative)
/// gradient through filled depressions.
pub fn d8_area_slope(filled: &Raster<f64>, raw: &Raster<f64>) -> Result<D8Routing> {
    filled.ensure_same_shape(raw)?;
    route(filled, Some(raw))
}

/// Convenience: D8 direction codes only
pub fn flow_direction(dem: &Raster<f64>) -> Result<Raster<u8>> {
    d8_flow(dem, D8Params::default()).map(|r| r.direction)
}

/// Metric length of one step from a cell in `row` in direction `code`
pub(crate) fn step_length(georef: &GeoReference, row: usize, code: u8) -> f64 {
    d8::distance_factor(code).map_or(f64::NAN, |f| f * georef.mean_pixel_dimension(row))
}

fn route(filled: &Raster<f64>, slope_surface: Option<&Raster<f64>>) -> Result<D8Routing> {
    let (rows, cols) = filled.shape();
    let georef = filled.georef();

    let mut direction: Raster<u8> = filled.with_same_meta(d8::NODATA);
    direction.set_nodata(Some(d8::NODATA));
    let mut area: Raster<f64> = filled.with_same_meta(f64::NAN);
    let mut slope: Option<Raster<f64>> = slope_surface.map(|_| filled.with_same_meta(f64::NAN));

    let mut order: Vec<(usize, usize)> = Vec::with_capacity(filled.len());
    for row in 0..rows {
        let pixel_area = georef.pixel_area(row);
        for col in 0..cols {
            if filled.is_valid(row, col) {
                unsafe { area.set_unchecked(row, col, pixel_area) };
                order.push((row, col));
            }
        }
    }

    // Highest first; sort_by is stable
    order.sort_by(|&(ar, ac), &(br, bc)| {
        let za = unsafe { filled.get_unchecked(ar, ac) };
        let zb = unsafe { filled.get_unchecked(br, bc) };
        zb.partial_cmp(&za).unwrap_or(Ordering::Equal)
    });

    let mut outlets = 0usize;
    for &(row, col) in &order {
        let z = unsafe { filled.get_unchecked(row, col) };

        let mut best_drop = 0.0_f64;
        let mut best: Option<(u8, usize, usize, f64)> = None;
        for (n, zn) in filled.valid_neighbors(row, col) {
            let dist = step_length(georef, row, n.direction);
            let drop = (z - zn) / dist;
            if drop > best_drop {
                best_drop = drop;
                best = Some((n.direction, n.row, n.col, dist));
            }
        }

        let Some((code, tr, tc, dist)) = best else {
            outlets += 1;
            continue;
        };

        unsafe {
            direction.set_unchecked(row, col, code);
            let a = area.get_unchecked(row, col);
            let ta = area.get_unchecked(tr, tc);
            area.set_unchecked(tr, tc, ta + a);
        }

        if let (Some(out), Some(surface)) = (slope.as_mut(), slope_surface) {
            let s = (surface.get(row, col)? - surface.get(tr, tc)?) / dist;
            unsafe { out.set_unchecked(row, col, s) };
        }
    }

    debug!(cells = order.len(), outlets, "d8 routing complete");

    Ok(D8Routing {
        direction,
        area,
        slope,
    })
}

/// Cell that `(row, col)` drains to, `None` for outlets, no-data and
/// directions leaving the grid
pub fn flow_target(direction: &Raster<u8>, row: usize, col: usize) -> Option<(usize, usize)> {
    let (rows, cols) = direction.shape();
    let code = direction.get(row, col).ok()?;
    d8::target(code, row, col, rows, cols)
}

/// Cells visited following the flow from `start` (inclusive) to the first
/// cell that does not drain to another cell of the grid.
///
/// # Errors
/// [`Error::IndexOutOfBounds`] for a start outside the grid, and
/// [`Error::Algorithm`] if the directions loop back on themselves.
pub fn trace_downstream(direction: &Raster<u8>, start: (usize, usize)) -> Result<Vec<(usize, usize)>> {
    direction.get(start.0, start.1)?;

    let mut path = vec![start];
    let mut current = start;
    while let Some(next) = flow_target(direction, current.0, current.1) {
        if path.len() > direction.len() {
            return Err(Error::Algorithm(format!(
                "flow directions form a cycle through ({}, {})",
                next.0, next.1
            )));
        }
        path.push(next);
        current = next;
    }
    Ok(path)
}

/// Slope from each cell to the cell its direction points at.
///
/// NaN where the direction is undrained, leaves the grid, or either
/// elevation is no-data.
pub fn d8_slope(dem: &Raster<f64>, direction: &Raster<u8>) -> Result<Raster<f64>> {
    dem.ensure_same_shape(direction)?;
    let (rows, cols) = dem.shape();
    let mut out: Raster<f64> = dem.with_same_meta(f64::NAN);

    for row in 0..rows {
        for col in 0..cols {
            let Some((tr, tc)) = flow_target(direction, row, col) else {
                continue;
            };
            if !(dem.is_valid(row, col) && dem.is_valid(tr, tc)) {
                continue;
            }
            let code = unsafe { direction.get_unchecked(row, col) };
            let dist = step_length(dem.georef(), row, code);
            let s = unsafe { (dem.get_unchecked(row, col) - dem.get_unchecked(tr, tc)) / dist };
            unsafe { out.set_unchecked(row, col, s) };
        }
    }
    Ok(out)
}

/// Convert a RiverTools direction grid to the encoding used here.
///
/// Undrained and malformed codes become `0`.
pub fn convert_rivertools_directions(direction: &Raster<u8>) -> Raster<u8> {
    let mut out = direction.clone();
    out.data_mut().mapv_inplace(d8::from_rivertools);
    out.set_nodata(Some(d8::NODATA));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn with_cell_size(mut r: Raster<f64>, dx: f64) -> Raster<f64> {
        let (rows, cols) = r.shape();
        let g = GeoReference::new(cols, rows, dx, 0.0, 0.0).unwrap();
        r.set_georef(Arc::new(g)).unwrap();
        r
    }

    fn create_slope_dem() -> Raster<f64> {
        // West-to-east slope: higher on the left, lower on the right
        let mut dem = Raster::new(5, 5);
        for row in 0..5 {
            for col in 0..5 {
                dem.set(row, col, (4 - col) as f64 * 10.0).unwrap();
            }
        }
        dem
    }

    #[test]
    fn test_flow_east_on_slope() {
        let fdir = flow_direction(&create_slope_dem()).unwrap();

        for row in 0..5 {
            for col in 0..4 {
                assert_eq!(fdir.get(row, col).unwrap(), d8::EAST);
            }
            // Last column has nowhere lower to go
            assert_eq!(fdir.get(row, 4).unwrap(), d8::NODATA);
        }
    }

    #[test]
    fn test_area_accumulates_downstream() {
        let dem = with_cell_size(create_slope_dem(), 10.0);
        let routing = d8_flow(&dem, D8Params::default()).unwrap();

        // Each row drains straight east: the outlet column sees 5 pixels
        for row in 0..5 {
            for col in 0..5 {
                let expected = 100.0 * (col + 1) as f64;
                assert_relative_eq!(routing.area.get(row, col).unwrap(), expected);
            }
        }
        assert!(routing.slope.is_none());
    }

    #[test]
    fn test_flat_three_by_three_with_low_bottom_middle() {
        let mut dem: Raster<f64> = Raster::filled(3, 3, 10.0);
        dem.set(2, 1, 9.0).unwrap();
        let dem = with_cell_size(dem, 2.0);

        let routing = d8_flow(&dem, D8Params::default()).unwrap();
        let d = &routing.direction;

        assert_eq!(d.get(1, 0).unwrap(), d8::SOUTH_EAST);
        assert_eq!(d.get(1, 1).unwrap(), d8::SOUTH);
        assert_eq!(d.get(1, 2).unwrap(), d8::SOUTH_WEST);
        assert_eq!(d.get(2, 0).unwrap(), d8::EAST);
        assert_eq!(d.get(2, 2).unwrap(), d8::WEST);
        for col in 0..3 {
            assert_eq!(d.get(0, col).unwrap(), d8::NODATA);
        }
        assert_eq!(d.get(2, 1).unwrap(), d8::NODATA);

        // Itself plus the five neighbours that drain into it
        assert_relative_eq!(routing.area.get(2, 1).unwrap(), 6.0 * 4.0);
    }

    #[test]
    fn test_tie_breaks_to_first_clockwise_from_east() {
        // Centre drops equally to E and S
        let mut dem: Raster<f64> = Raster::filled(3, 3, 10.0);
        dem.set(1, 2, 5.0).unwrap();
        dem.set(2, 1, 5.0).unwrap();
        let fdir = flow_direction(&dem).unwrap();
        assert_eq!(fdir.get(1, 1).unwrap(), d8::EAST);
    }

    #[test]
    fn test_diagonal_distance_is_longer() {
        // Drop of 1 east vs 1.2 south-east: 1.2/sqrt(2) < 1, east wins
        let mut dem: Raster<f64> = Raster::filled(3, 3, 10.0);
        dem.set(1, 2, 9.0).unwrap();
        dem.set(2, 2, 8.8).unwrap();
        let fdir = flow_direction(&dem).unwrap();
        assert_eq!(fdir.get(1, 1).unwrap(), d8::EAST);
    }

    #[test]
    fn test_nodata_cells_excluded() {
        let mut dem = create_slope_dem();
        dem.set(2, 3, f64::NAN).unwrap();
        let routing = d8_flow(&dem, D8Params::default()).unwrap();

        assert_eq!(routing.direction.get(2, 3).unwrap(), d8::NODATA);
        assert!(routing.area.get(2, 3).unwrap().is_nan());
        // (2,2) cannot go east, so it goes to the next best lower cell
        let code = routing.direction.get(2, 2).unwrap();
        assert!(code == d8::SOUTH_EAST || code == d8::NORTH_EAST);
    }

    #[test]
    fn test_targets_in_bounds_and_not_higher() {
        let mut dem: Raster<f64> = Raster::new(8, 8);
        for row in 0..8 {
            for col in 0..8 {
                let (r, c) = (row as f64 - 3.5, col as f64 - 6.0);
                dem.set(row, col, r * r + c * c + 0.1 * row as f64).unwrap();
            }
        }
        let fdir = flow_direction(&dem).unwrap();
        for row in 0..8 {
            for col in 0..8 {
                if let Some((tr, tc)) = flow_target(&fdir, row, col) {
                    assert!(dem.get(tr, tc).unwrap() < dem.get(row, col).unwrap());
                }
            }
        }
    }

    #[test]
    fn test_slope_grid() {
        let dem = with_cell_size(create_slope_dem(), 10.0);
        let routing = d8_flow(&dem, D8Params { compute_slope: true }).unwrap();
        let slope = routing.slope.unwrap();
        assert_relative_eq!(slope.get(0, 0).unwrap(), 1.0);
        assert!(slope.get(0, 4).unwrap().is_nan());

        let again = d8_slope(&dem, &routing.direction).unwrap();
        assert_relative_eq!(again.get(3, 2).unwrap(), 1.0);
        assert!(again.get(3, 4).unwrap().is_nan());
    }

    #[test]
    fn test_area_slope_uses_raw_surface() {
        let mut raw = create_slope_dem();
        raw.set(2, 2, 0.0).unwrap(); // pit
        let mut filled = raw.clone();
        filled.set(2, 2, 20.0).unwrap();

        let routing = d8_area_slope(&filled, &raw).unwrap();
        let slope = routing.slope.unwrap();
        // (2,1) at 30 drains east into the pit: raw drop is 30
        assert_eq!(routing.direction.get(2, 1).unwrap(), d8::EAST);
        assert_relative_eq!(slope.get(2, 1).unwrap(), 30.0);
        // Out of the pit the raw surface rises
        assert_relative_eq!(slope.get(2, 2).unwrap(), -10.0);
    }

    #[test]
    fn test_trace_downstream() {
        let fdir = flow_direction(&create_slope_dem()).unwrap();
        let path = trace_downstream(&fdir, (1, 0)).unwrap();
        assert_eq!(path, vec![(1, 0), (1, 1), (1, 2), (1, 3), (1, 4)]);
        assert!(trace_downstream(&fdir, (9, 9)).is_err());
    }

    #[test]
    fn test_trace_downstream_detects_cycle() {
        let mut fdir: Raster<u8> = Raster::new(1, 2);
        fdir.set(0, 0, d8::EAST).unwrap();
        fdir.set(0, 1, d8::WEST).unwrap();
        assert!(matches!(
            trace_downstream(&fdir, (0, 0)),
            Err(Error::Algorithm(_))
        ));
    }

    #[test]
    fn test_convert_rivertools() {
        let fdir = Raster::from_vec(vec![1u8, 2, 64, 0], 2, 2).unwrap();
        let arc = convert_rivertools_directions(&fdir);
        assert_eq!(arc.get(0, 0).unwrap(), d8::NORTH_EAST);
        assert_eq!(arc.get(0, 1).unwrap(), d8::EAST);
        assert_eq!(arc.get(1, 0).unwrap(), d8::NORTH_WEST);
        assert_eq!(arc.get(1, 1).unwrap(), d8::NODATA);
    }
}
