//! Raster data structures and operations

mod element;
mod georef;
mod grid;
mod neighborhood;

pub use element::RasterElement;
pub use georef::{GeoReference, METERS_PER_DEGREE};
pub use grid::{Raster, RasterStatistics};
pub use neighborhood::{d8, D8Neighbors, GridAccessor, Neighbor};
