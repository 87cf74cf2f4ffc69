//! Grid-wide flow length, chi and relief
//!
//! The per-outlet quantities of [`FlowNetwork`](crate::network::FlowNetwork),
//! evaluated for every outlet of a direction grid at once. Each routine
//! starts at the cells that drain nowhere and walks upstream with an explicit
//! stack, so every cell is reached from its receiver exactly once.

use chiflow_core::raster::{d8, GridAccessor, Raster};
use chiflow_core::Result;

use super::flow_direction::step_length;
use crate::network::ChiParams;

/// Donor-to-receiver steps in upstream visiting order
struct UpstreamWalk {
    /// Included cells whose receiver is missing or excluded
    roots: Vec<(usize, usize)>,
    /// `(receiver, donor, metric step)`; a receiver always appears before
    /// any of its donors
    links: Vec<((usize, usize), (usize, usize), f64)>,
}

/// Walk upstream over the cells for which `include` holds
fn walk_upstream<I>(direction: &Raster<u8>, include: I) -> UpstreamWalk
where
    I: Fn(usize, usize) -> bool,
{
    let (rows, cols) = direction.shape();
    let georef = direction.georef();
    let mut roots = Vec::new();
    let mut links = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            if !include(row, col) {
                continue;
            }
            let code = unsafe { direction.get_unchecked(row, col) };
            let drains = d8::target(code, row, col, rows, cols).is_some_and(|(r, c)| include(r, c));
            if !drains {
                roots.push((row, col));
            }
        }
    }

    let mut stack = roots.clone();
    while let Some((row, col)) = stack.pop() {
        for n in direction.neighbors(row, col) {
            let code = unsafe { direction.get_unchecked(n.row, n.col) };
            if code != d8::opposite(n.direction) || !include(n.row, n.col) {
                continue;
            }
            links.push(((row, col), (n.row, n.col), step_length(georef, n.row, code)));
            stack.push((n.row, n.col));
        }
    }

    UpstreamWalk { roots, links }
}

/// Along-channel distance from every cell down to its outlet, in metres.
///
/// Outlets are 0. Cells without elevation are NaN and act as barriers, as in
/// [`relief_grid`]. Cells caught in a direction cycle are never reached and
/// stay NaN.
pub fn flow_length_grid(direction: &Raster<u8>, elevation: &Raster<f64>) -> Result<Raster<f64>> {
    direction.ensure_same_shape(elevation)?;
    let walk = walk_upstream(direction, |r, c| elevation.is_valid(r, c));
    let mut length: Raster<f64> = elevation.with_same_meta(f64::NAN);
    let out = length.data_mut();
    for cell in walk.roots {
        out[cell] = 0.0;
    }
    for (to, from, step) in walk.links {
        out[from] = out[to] + step;
    }
    Ok(length)
}

/// Chi for every channel cell (`area >= A0`), integrated upstream from each
/// channel outlet where chi is 0. Other cells are NaN.
pub fn chi_grid(direction: &Raster<u8>, area: &Raster<f64>, params: ChiParams) -> Result<Raster<f64>> {
    direction.ensure_same_shape(area)?;
    let threshold = params.reference_area();
    let is_channel = |r: usize, c: usize| {
        area.value_at(r as isize, c as isize)
            .is_some_and(|a| a >= threshold)
    };

    let walk = walk_upstream(direction, is_channel);

    let mut chi: Raster<f64> = direction.with_same_meta(f64::NAN);
    let out = chi.data_mut();
    for cell in walk.roots {
        out[cell] = 0.0;
    }
    for (to, from, step) in walk.links {
        let a = unsafe { area.get_unchecked(from.0, from.1) };
        out[from] = out[to] + params.increment(a, step);
    }
    Ok(chi)
}

/// Elevation of every cell above the outlet it drains to.
///
/// Outlets are 0; cells without elevation are NaN and act as barriers.
pub fn relief_grid(direction: &Raster<u8>, elevation: &Raster<f64>) -> Result<Raster<f64>> {
    direction.ensure_same_shape(elevation)?;
    let walk = walk_upstream(direction, |r, c| elevation.is_valid(r, c));

    let mut base: Raster<f64> = elevation.with_same_meta(f64::NAN);
    let base_data = base.data_mut();
    for cell in walk.roots {
        base_data[cell] = elevation.data()[cell];
    }
    for (to, from, _) in walk.links {
        base_data[from] = base_data[to];
    }

    let mut relief: Raster<f64> = elevation.with_same_meta(f64::NAN);
    for ((r, &z), &b) in relief
        .data_mut()
        .iter_mut()
        .zip(elevation.data().iter())
        .zip(base.data().iter())
    {
        if !b.is_nan() && !elevation.is_nodata(z) {
            *r = z - b;
        }
    }
    Ok(relief)
}

/// Relief divided by chi on channel cells with positive chi: the apparent
/// steepness `k_s` of each cell relative to its outlet. NaN elsewhere.
pub fn scaled_relief_grid(
    direction: &Raster<u8>,
    elevation: &Raster<f64>,
    area: &Raster<f64>,
    params: ChiParams,
) -> Result<Raster<f64>> {
    let relief = relief_grid(direction, elevation)?;
    let chi = chi_grid(direction, area, params)?;

    let mut scaled: Raster<f64> = elevation.with_same_meta(f64::NAN);
    for ((s, &r), &x) in scaled
        .data_mut()
        .iter_mut()
        .zip(relief.data().iter())
        .zip(chi.data().iter())
    {
        if x > 0.0 && !r.is_nan() {
            *s = r / x;
        }
    }
    Ok(scaled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::{d8_flow, D8Params};
    use crate::network::FlowNetwork;
    use approx::assert_relative_eq;
    use chiflow_core::GeoReference;
    use std::sync::Arc;

    /// Two valleys draining south, 20 m cells
    fn create_dem() -> Raster<f64> {
        let mut dem = Raster::new(6, 7);
        for row in 0..6 {
            for col in 0..7 {
                let side = (col as f64 - 1.0).abs().min((col as f64 - 5.0).abs());
                dem.set(row, col, side + (6 - row) as f64 * 0.5 + 100.0).unwrap();
            }
        }
        let g = GeoReference::new(7, 6, 20.0, 0.0, 0.0).unwrap();
        dem.set_georef(Arc::new(g)).unwrap();
        dem
    }

    #[test]
    fn test_grids_agree_with_network() {
        let dem = create_dem();
        let routing = d8_flow(&dem, D8Params::default()).unwrap();
        let params = ChiParams { x0: 20.0, theta: 0.45 };

        let length = flow_length_grid(&routing.direction, &dem).unwrap();
        let chi = chi_grid(&routing.direction, &routing.area, params).unwrap();
        let relief = relief_grid(&routing.direction, &dem).unwrap();

        let net = FlowNetwork::build(&routing.direction, &routing.area, &dem, (5, 1)).unwrap();
        let net_length = net.flow_length();
        let net_chi = net.chi(params);
        for (id, node) in net.nodes().iter().enumerate() {
            let (r, c) = node.cell;
            assert_relative_eq!(length.get(r, c).unwrap(), net_length[id], epsilon = 1e-9);
            assert_relative_eq!(chi.get(r, c).unwrap(), net_chi[id], epsilon = 1e-9);
            assert_relative_eq!(
                relief.get(r, c).unwrap(),
                node.elevation - net.root().elevation,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_chi_threshold_leaves_hillslopes_nan() {
        let dem = create_dem();
        let routing = d8_flow(&dem, D8Params::default()).unwrap();
        // A0 = 2 pixels
        let params = ChiParams { x0: 800.0_f64.sqrt(), theta: 0.5 };
        let chi = chi_grid(&routing.direction, &routing.area, params).unwrap();

        for row in 0..6 {
            for col in 0..7 {
                let a = routing.area.get(row, col).unwrap();
                let x = chi.get(row, col).unwrap();
                assert_eq!(x.is_nan(), a < params.reference_area(), "({}, {})", row, col);
            }
        }
        assert_eq!(chi.get(5, 1).unwrap(), 0.0);
    }

    #[test]
    fn test_scaled_relief() {
        let dem = create_dem();
        let routing = d8_flow(&dem, D8Params::default()).unwrap();
        let params = ChiParams { x0: 20.0, theta: 0.5 };
        let scaled = scaled_relief_grid(&routing.direction, &dem, &routing.area, params).unwrap();
        let relief = relief_grid(&routing.direction, &dem).unwrap();
        let chi = chi_grid(&routing.direction, &routing.area, params).unwrap();

        // Outlets have chi 0
        assert!(scaled.get(5, 1).unwrap().is_nan());
        let (r, c) = (2, 1);
        assert_relative_eq!(
            scaled.get(r, c).unwrap(),
            relief.get(r, c).unwrap() / chi.get(r, c).unwrap()
        );
    }

    #[test]
    fn test_flow_length_stops_at_nodata() {
        // East-draining strip, 10 m cells, last cell without elevation
        let g = Arc::new(GeoReference::new(4, 1, 10.0, 0.0, 0.0).unwrap());
        let mut direction: Raster<u8> = Raster::with_georef(Arc::clone(&g), d8::EAST);
        direction.set(0, 3, d8::NODATA).unwrap();
        let mut dem: Raster<f64> = Raster::with_georef(g, 0.0);
        for col in 0..4 {
            dem.set(0, col, (3 - col) as f64).unwrap();
        }
        dem.set(0, 3, f64::NAN).unwrap();

        let length = flow_length_grid(&direction, &dem).unwrap();
        assert_relative_eq!(length.get(0, 0).unwrap(), 20.0);
        assert_relative_eq!(length.get(0, 1).unwrap(), 10.0);
        assert_eq!(length.get(0, 2).unwrap(), 0.0);
        assert!(length.get(0, 3).unwrap().is_nan());

        let relief = relief_grid(&direction, &dem).unwrap();
        assert_eq!(relief.get(0, 2).unwrap(), 0.0);
    }

    #[test]
    fn test_relief_nodata_is_barrier() {
        let mut dem = create_dem();
        let routing = d8_flow(&dem, D8Params::default()).unwrap();
        dem.set(4, 1, f64::NAN).unwrap();
        let relief = relief_grid(&routing.direction, &dem).unwrap();
        assert!(relief.get(4, 1).unwrap().is_nan());
        // (3,1) used to drain into (4,1); it is now its own outlet
        assert_eq!(relief.get(3, 1).unwrap(), 0.0);
    }
}
