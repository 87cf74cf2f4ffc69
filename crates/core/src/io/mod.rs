//! I/O operations for reading and writing grids
//!
//! [`read_grid`] and [`write_grid`] pick the format from the file extension:
//! `.asc` for ESRI ASCII grids, `.tif`/`.tiff` for GeoTIFF.

mod ascii;
mod native;

use std::path::Path;

use crate::error::{Error, Result};
use crate::raster::{Raster, RasterElement};

pub use ascii::{format_ascii_grid, parse_ascii_grid, read_ascii_grid, write_ascii_grid};
pub use native::{read_geotiff, read_geotiff_from_buffer, write_geotiff, write_geotiff_to_buffer};

/// Extensions [`read_grid`] understands, in lookup order
pub const GRID_EXTENSIONS: [&str; 3] = ["tif", "tiff", "asc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GridFormat {
    Ascii,
    GeoTiff,
}

fn format_of(path: &Path) -> Result<GridFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("asc") => Ok(GridFormat::Ascii),
        Some("tif") | Some("tiff") => Ok(GridFormat::GeoTiff),
        _ => Err(Error::UnsupportedDataType(format!(
            "unrecognised grid file extension: {}",
            path.display()
        ))),
    }
}

/// Read a grid, choosing the reader from the file extension
pub fn read_grid<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    match format_of(path)? {
        GridFormat::Ascii => read_ascii_grid(path),
        GridFormat::GeoTiff => read_geotiff(path),
    }
}

/// Write a grid, choosing the writer from the file extension
pub fn write_grid<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    match format_of(path)? {
        GridFormat::Ascii => write_ascii_grid(raster, path),
        GridFormat::GeoTiff => write_geotiff(raster, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoReference;
    use std::sync::Arc;

    fn sample() -> Raster<f64> {
        let mut r: Raster<f64> = Raster::filled(3, 2, 7.0);
        r.set(2, 1, 3.5).unwrap();
        let g = GeoReference::new(2, 3, 30.0, 15.0, 15.0).unwrap();
        r.set_georef(Arc::new(g)).unwrap();
        r
    }

    #[test]
    fn test_ascii_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.asc");
        write_grid(&sample(), &path).unwrap();
        let back: Raster<f64> = read_grid(&path).unwrap();
        assert_eq!(back.get(2, 1).unwrap(), 3.5);
        assert_eq!(back.georef().as_ref(), sample().georef().as_ref());
    }

    #[test]
    fn test_geotiff_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.tif");
        write_grid(&sample(), &path).unwrap();
        let back: Raster<f64> = read_grid(&path).unwrap();
        assert_eq!(back.shape(), (3, 2));
        assert_eq!(back.get(2, 1).unwrap(), 3.5);
    }

    #[test]
    fn test_unknown_extension() {
        let err = write_grid(&sample(), "dem.png").unwrap_err();
        assert!(matches!(err, Error::UnsupportedDataType(_)));
    }
}
