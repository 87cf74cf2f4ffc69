//! Coordinate reference system tag
//!
//! The core never transforms coordinates. A [`Crs`] only records what the
//! source raster said about itself, plus enough to tell angular (lon/lat)
//! grids from projected ones, which changes how pixel sizes become metres.

use serde::{Deserialize, Serialize};
use std::fmt;

/// EPSG projection tag carried by a [`GeoReference`](crate::raster::GeoReference).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crs {
    epsg: u32,
    /// Whether coordinates are angular degrees rather than metres
    geographic: bool,
}

/// EPSG codes of the common geographic (lon/lat) datums.
const GEOGRAPHIC_EPSG: [u32; 4] = [4326, 4269, 4258, 4674];

impl Crs {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            epsg: code,
            geographic: GEOGRAPHIC_EPSG.contains(&code),
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// True when cell sizes are expressed in degrees
    pub fn is_geographic(&self) -> bool {
        self.geographic
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        format!("EPSG:{}", self.epsg)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crs_epsg() {
        let crs = Crs::from_epsg(32719);
        assert_eq!(crs.epsg(), 32719);
        assert_eq!(crs.identifier(), "EPSG:32719");
        assert!(!crs.is_geographic());
    }

    #[test]
    fn test_geographic_detection() {
        assert!(Crs::wgs84().is_geographic());
        assert!(Crs::from_epsg(4269).is_geographic());
        assert!(!Crs::from_epsg(3857).is_geographic());
    }
}
