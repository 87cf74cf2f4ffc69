//! # chiflow core
//!
//! Core types, traits and I/O for the chiflow hydrology library.
//!
//! This crate provides:
//! - `Raster<T>`: generic north-up grid sharing an `Arc<GeoReference>`
//! - `GeoReference`: lower-left-centre georeferencing with metric pixel sizes
//! - `Crs`: projection tag (geographic vs projected)
//! - `d8` / `GridAccessor`: the D8 neighbour kernel used by every engine
//! - I/O for ESRI ASCII grids and GeoTIFF

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;

pub use crs::Crs;
pub use error::{Error, Result};
pub use raster::{d8, GeoReference, GridAccessor, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::Crs;
    pub use crate::error::{Error, Result};
    pub use crate::raster::{d8, GeoReference, GridAccessor, Raster, RasterElement};
    pub use crate::Algorithm;
}

/// Core trait for all algorithms in chiflow.
///
/// Algorithms are pure functions that transform input data according to parameters.
pub trait Algorithm {
    /// Input type for the algorithm
    type Input;
    /// Output type for the algorithm
    type Output;
    /// Parameters controlling algorithm behavior
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Returns the algorithm name
    fn name(&self) -> &'static str;

    /// Returns a description of what the algorithm does
    fn description(&self) -> &'static str;

    /// Execute the algorithm
    fn execute(&self, input: Self::Input, params: Self::Params) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
