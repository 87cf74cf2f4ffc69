//! D8 neighbour kernel and bounds-checked grid access

use super::{Raster, RasterElement};

/// D8 flow directions (ArcGIS bit encoding)
///
/// ```text
///   32  64  128
///   16   X    1
///    8   4    2
/// ```
///
/// Canonical scan order is clockwise starting east: E, SE, S, SW, W, NW, N,
/// NE. Every routine that has to pick among equal neighbours uses this order.
pub mod d8 {
    use std::f64::consts::SQRT_2;

    /// Undrained cell / outlet
    pub const NODATA: u8 = 0;

    pub const EAST: u8 = 1;
    pub const SOUTH_EAST: u8 = 2;
    pub const SOUTH: u8 = 4;
    pub const SOUTH_WEST: u8 = 8;
    pub const WEST: u8 = 16;
    pub const NORTH_WEST: u8 = 32;
    pub const NORTH: u8 = 64;
    pub const NORTH_EAST: u8 = 128;

    /// Direction codes in canonical order
    pub const CODES: [u8; 8] = [
        EAST, SOUTH_EAST, SOUTH, SOUTH_WEST, WEST, NORTH_WEST, NORTH, NORTH_EAST,
    ];

    /// (row_offset, col_offset) for each entry of [`CODES`]; rows grow southward
    pub const OFFSETS: [(isize, isize); 8] = [
        (0, 1),   // E
        (1, 1),   // SE
        (1, 0),   // S
        (1, -1),  // SW
        (0, -1),  // W
        (-1, -1), // NW
        (-1, 0),  // N
        (-1, 1),  // NE
    ];

    /// Step length in cell units for each entry of [`CODES`]
    pub const DISTANCES: [f64; 8] = [1.0, SQRT_2, 1.0, SQRT_2, 1.0, SQRT_2, 1.0, SQRT_2];

    /// Exactly one bit set
    pub fn is_valid(code: u8) -> bool {
        code.is_power_of_two()
    }

    /// Position of `code` in canonical order
    pub fn index(code: u8) -> Option<usize> {
        is_valid(code).then(|| code.trailing_zeros() as usize)
    }

    pub fn offset(code: u8) -> Option<(isize, isize)> {
        index(code).map(|i| OFFSETS[i])
    }

    /// 1 for cardinal steps, √2 for diagonal ones
    pub fn distance_factor(code: u8) -> Option<f64> {
        index(code).map(|i| DISTANCES[i])
    }

    /// Code pointing the other way; `NODATA` and invalid codes map to `NODATA`
    pub fn opposite(code: u8) -> u8 {
        if is_valid(code) { code.rotate_left(4) } else { NODATA }
    }

    /// Code for a unit step, `None` for (0, 0) or anything longer
    pub fn from_offset(dr: isize, dc: isize) -> Option<u8> {
        OFFSETS
            .iter()
            .position(|&o| o == (dr, dc))
            .map(|i| CODES[i])
    }

    /// Cell that `(row, col)` drains to, if the code is valid and the target
    /// lies inside a `rows × cols` grid
    pub fn target(code: u8, row: usize, col: usize, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let (dr, dc) = offset(code)?;
        let nr = row as isize + dr;
        let nc = col as isize + dc;
        if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
            return None;
        }
        Some((nr as usize, nc as usize))
    }

    /// Convert a RiverTools code (1 = NE, then clockwise) to this encoding
    pub fn from_rivertools(code: u8) -> u8 {
        if is_valid(code) { code.rotate_right(1) } else { NODATA }
    }
}

/// One in-bounds neighbour of a cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub row: usize,
    pub col: usize,
    /// Code of the step from the centre cell to this neighbour
    pub direction: u8,
    /// Step length in cell units (1 or √2)
    pub distance: f64,
}

/// Iterator over the in-bounds D8 neighbours of a cell, canonical order
#[derive(Debug, Clone)]
pub struct D8Neighbors {
    center_row: usize,
    center_col: usize,
    rows: usize,
    cols: usize,
    index: usize,
}

impl D8Neighbors {
    pub fn new(row: usize, col: usize, rows: usize, cols: usize) -> Self {
        Self {
            center_row: row,
            center_col: col,
            rows,
            cols,
            index: 0,
        }
    }
}

impl Iterator for D8Neighbors {
    type Item = Neighbor;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < d8::OFFSETS.len() {
            let i = self.index;
            self.index += 1;

            let (dr, dc) = d8::OFFSETS[i];
            let nr = self.center_row as isize + dr;
            let nc = self.center_col as isize + dc;
            if nr < 0 || nc < 0 || nr >= self.rows as isize || nc >= self.cols as isize {
                continue;
            }
            return Some(Neighbor {
                row: nr as usize,
                col: nc as usize,
                direction: d8::CODES[i],
                distance: d8::DISTANCES[i],
            });
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(d8::OFFSETS.len() - self.index))
    }
}

/// Bounds-checked cell reads and neighbour enumeration.
///
/// Every engine reads its grids through this trait, so out-of-bounds and
/// no-data cells are filtered in one place.
pub trait GridAccessor {
    type Value: RasterElement;

    /// Grid shape as `(rows, cols)`
    fn dims(&self) -> (usize, usize);

    /// Raw value at an in-bounds cell
    fn raw(&self, row: usize, col: usize) -> Self::Value;

    /// Declared no-data sentinel
    fn nodata_value(&self) -> Option<Self::Value>;

    fn in_bounds(&self, row: isize, col: isize) -> bool {
        let (rows, cols) = self.dims();
        row >= 0 && col >= 0 && (row as usize) < rows && (col as usize) < cols
    }

    /// True when an in-bounds cell holds data
    fn is_valid(&self, row: usize, col: usize) -> bool {
        !self.raw(row, col).is_nodata(self.nodata_value())
    }

    /// Value at `(row, col)`, `None` when out of bounds or no-data
    fn value_at(&self, row: isize, col: isize) -> Option<Self::Value> {
        if !self.in_bounds(row, col) {
            return None;
        }
        let v = self.raw(row as usize, col as usize);
        (!v.is_nodata(self.nodata_value())).then_some(v)
    }

    /// In-bounds neighbours of `(row, col)`, canonical order
    fn neighbors(&self, row: usize, col: usize) -> D8Neighbors {
        let (rows, cols) = self.dims();
        D8Neighbors::new(row, col, rows, cols)
    }

    /// In-bounds neighbours holding data, with their values
    fn valid_neighbors(&self, row: usize, col: usize) -> impl Iterator<Item = (Neighbor, Self::Value)> {
        self.neighbors(row, col).filter_map(move |n| {
            let v = self.raw(n.row, n.col);
            (!v.is_nodata(self.nodata_value())).then_some((n, v))
        })
    }

    /// True for valid cells on the raster border or touching a no-data cell
    fn is_data_edge(&self, row: usize, col: usize) -> bool {
        let (rows, cols) = self.dims();
        if row == 0 || col == 0 || row + 1 == rows || col + 1 == cols {
            return true;
        }
        self.neighbors(row, col).any(|n| !self.is_valid(n.row, n.col))
    }
}

impl<T: RasterElement> GridAccessor for Raster<T> {
    type Value = T;

    fn dims(&self) -> (usize, usize) {
        self.shape()
    }

    fn raw(&self, row: usize, col: usize) -> T {
        self.data()[(row, col)]
    }

    fn nodata_value(&self) -> Option<T> {
        self.nodata()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_d8_codes_clockwise_from_east() {
        assert_eq!(d8::offset(d8::EAST), Some((0, 1)));
        assert_eq!(d8::offset(d8::SOUTH), Some((1, 0)));
        assert_eq!(d8::offset(d8::NORTH_EAST), Some((-1, 1)));
        assert_eq!(d8::offset(3), None);
        assert_eq!(d8::offset(d8::NODATA), None);
        for (i, &code) in d8::CODES.iter().enumerate() {
            assert_eq!(d8::index(code), Some(i));
            let (dr, dc) = d8::OFFSETS[i];
            assert_eq!(d8::from_offset(dr, dc), Some(code));
        }
    }

    #[test]
    fn test_d8_opposite() {
        assert_eq!(d8::opposite(d8::EAST), d8::WEST);
        assert_eq!(d8::opposite(d8::NORTH), d8::SOUTH);
        assert_eq!(d8::opposite(d8::NORTH_EAST), d8::SOUTH_WEST);
        assert_eq!(d8::opposite(d8::NODATA), d8::NODATA);
    }

    #[test]
    fn test_rivertools_conversion() {
        assert_eq!(d8::from_rivertools(1), d8::NORTH_EAST);
        assert_eq!(d8::from_rivertools(2), d8::EAST);
        assert_eq!(d8::from_rivertools(128), d8::NORTH);
        assert_eq!(d8::from_rivertools(0), d8::NODATA);
    }

    #[test]
    fn test_target_off_grid() {
        assert_eq!(d8::target(d8::NORTH, 0, 2, 5, 5), None);
        assert_eq!(d8::target(d8::SOUTH_EAST, 1, 1, 5, 5), Some((2, 2)));
    }

    #[test]
    fn test_corner_has_three_neighbors() {
        let r: Raster<f64> = Raster::new(4, 4);
        let n: Vec<u8> = r.neighbors(0, 0).map(|n| n.direction).collect();
        assert_eq!(n, vec![d8::EAST, d8::SOUTH_EAST, d8::SOUTH]);
        assert_eq!(r.neighbors(2, 2).count(), 8);
    }

    #[test]
    fn test_value_at_filters_nodata() {
        let mut r: Raster<f64> = Raster::filled(3, 3, 1.0);
        r.set(1, 2, -9999.0).unwrap();
        r.set_nodata(Some(-9999.0));
        assert_eq!(r.value_at(1, 1), Some(1.0));
        assert_eq!(r.value_at(1, 2), None);
        assert_eq!(r.value_at(-1, 0), None);
        assert_eq!(r.valid_neighbors(1, 1).count(), 7);
        assert!(r.is_data_edge(1, 1));
    }
}
