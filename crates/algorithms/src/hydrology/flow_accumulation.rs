//! Flow accumulation from an existing direction grid
//!
//! Contributing area (square metres, own pixel included) computed from a
//! D8 direction raster that was produced elsewhere, e.g. read from disk.
//! [`d8_flow`](super::d8_flow) already returns area when it does the routing.

use ndarray::Array2;
use chiflow_core::raster::{d8, GridAccessor, Raster};
use chiflow_core::{Algorithm, Error, Result};
use tracing::debug;

/// Flow accumulation algorithm
#[derive(Debug, Clone, Default)]
pub struct FlowAccumulation;

impl Algorithm for FlowAccumulation {
    type Input = Raster<u8>;
    type Output = Raster<f64>;
    type Params = ();
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Accumulation"
    }

    fn description(&self) -> &'static str {
        "Calculate metric contributing area from D8 flow direction"
    }

    fn execute(&self, input: Self::Input, _params: Self::Params) -> Result<Self::Output> {
        flow_accumulation(&input)
    }
}

/// Calculate contributing area from a D8 flow direction raster.
///
/// Every cell counts as valid; undrained cells (`0`) are outlets and keep
/// at least their own area. Use [`flow_accumulation_within`] to exclude
/// cells that have no elevation.
///
/// # Algorithm
/// 1. Count incoming flows for each cell (in-degree)
/// 2. Start from cells with in-degree 0 (headwaters)
/// 3. Propagate downstream, accumulating area
///
/// # Errors
/// [`Error::Algorithm`] if the directions contain a cycle.
pub fn flow_accumulation(flow_dir: &Raster<u8>) -> Result<Raster<f64>> {
    let valid = Array2::from_elem(flow_dir.shape(), true);
    accumulate(flow_dir, &valid)
}

/// Contributing area restricted to the valid cells of `dem`.
///
/// Cells where `dem` holds no data get NaN and pass nothing downstream.
pub fn flow_accumulation_within(flow_dir: &Raster<u8>, dem: &Raster<f64>) -> Result<Raster<f64>> {
    flow_dir.ensure_same_shape(dem)?;
    let (rows, cols) = dem.shape();
    let valid = Array2::from_shape_fn((rows, cols), |(r, c)| dem.is_valid(r, c));
    accumulate(flow_dir, &valid)
}

fn accumulate(flow_dir: &Raster<u8>, valid: &Array2<bool>) -> Result<Raster<f64>> {
    let (rows, cols) = flow_dir.shape();
    let georef = flow_dir.georef();

    let receiver = |row: usize, col: usize| -> Option<(usize, usize)> {
        let code = unsafe { flow_dir.get_unchecked(row, col) };
        d8::target(code, row, col, rows, cols).filter(|&t| valid[t])
    };

    // Step 1: in-degree over valid cells
    let mut in_degree = Array2::<u32>::zeros((rows, cols));
    let mut accumulation = Array2::<f64>::from_elem((rows, cols), f64::NAN);
    let mut n_valid = 0usize;

    for row in 0..rows {
        let pixel_area = georef.pixel_area(row);
        for col in 0..cols {
            if !valid[(row, col)] {
                continue;
            }
            n_valid += 1;
            accumulation[(row, col)] = pixel_area;
            if let Some(t) = receiver(row, col) {
                in_degree[t] += 1;
            }
        }
    }

    // Step 2: headwaters
    let mut queue: Vec<(usize, usize)> = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if valid[(row, col)] && in_degree[(row, col)] == 0 {
                queue.push((row, col));
            }
        }
    }

    // Step 3: topological sweep
    let mut processed = 0usize;
    while let Some((row, col)) = queue.pop() {
        processed += 1;
        let Some(t) = receiver(row, col) else {
            continue;
        };

        accumulation[t] += accumulation[(row, col)];
        in_degree[t] -= 1;
        if in_degree[t] == 0 {
            queue.push(t);
        }
    }

    if processed != n_valid {
        return Err(Error::Algorithm(format!(
            "flow directions contain a cycle: {} of {} cells never drained",
            n_valid - processed,
            n_valid
        )));
    }

    debug!(cells = n_valid, "flow accumulation complete");

    let mut output: Raster<f64> = flow_dir.with_same_meta(0.0);
    *output.data_mut() = accumulation;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::flow_direction::{d8_flow, flow_direction, D8Params};

    #[test]
    fn test_flow_accumulation_linear() {
        // 1x5 strip sloping east: all flow goes E
        let mut dem = Raster::new(1, 5);
        for col in 0..5 {
            dem.set(0, col, (5 - col) as f64).unwrap();
        }

        let fdir = flow_direction(&dem).unwrap();
        let acc = flow_accumulation(&fdir).unwrap();

        for col in 0..5 {
            assert_eq!(acc.get(0, col).unwrap(), (col + 1) as f64);
        }
    }

    #[test]
    fn test_flow_accumulation_convergent() {
        //  5 5 5
        //  5 1 5
        //  5 5 5
        let mut dem = Raster::filled(3, 3, 5.0);
        dem.set(1, 1, 1.0).unwrap();

        let fdir = flow_direction(&dem).unwrap();
        let acc = flow_accumulation(&fdir).unwrap();

        assert_eq!(acc.get(1, 1).unwrap(), 9.0);
        assert_eq!(acc.get(0, 0).unwrap(), 1.0);
    }

    #[test]
    fn test_matches_routing_area() {
        let mut dem = Raster::new(6, 7);
        for row in 0..6 {
            for col in 0..7 {
                let (r, c) = (row as f64 - 5.0, col as f64 - 3.0);
                dem.set(row, col, r * r + 2.0 * c.abs() + 0.01 * col as f64).unwrap();
            }
        }

        let routing = d8_flow(&dem, D8Params::default()).unwrap();
        let acc = flow_accumulation(&routing.direction).unwrap();
        assert_eq!(acc.data(), routing.area.data());
    }

    #[test]
    fn test_within_masks_nodata() {
        let mut dem = Raster::new(1, 4);
        for col in 0..4 {
            dem.set(0, col, (4 - col) as f64).unwrap();
        }
        let fdir = flow_direction(&dem).unwrap();
        dem.set(0, 2, f64::NAN).unwrap();

        let acc = flow_accumulation_within(&fdir, &dem).unwrap();
        assert_eq!(acc.get(0, 1).unwrap(), 2.0);
        assert!(acc.get(0, 2).unwrap().is_nan());
        assert_eq!(acc.get(0, 3).unwrap(), 1.0);
    }

    #[test]
    fn test_cycle_is_an_error() {
        let fdir = Raster::from_vec(vec![d8::EAST, d8::WEST], 1, 2).unwrap();
        assert!(matches!(flow_accumulation(&fdir), Err(Error::Algorithm(_))));
    }
}
