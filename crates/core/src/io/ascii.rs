//! ESRI ASCII grid reading/writing
//!
//! ```text
//! ncols         4
//! nrows         3
//! xllcorner     1000.0
//! yllcorner     5000.0
//! cellsize      30.0
//! NODATA_value  -9999
//! 12.0 13.5 ...
//! ```
//!
//! Either `xllcorner`/`yllcorner` or `xllcenter`/`yllcenter` locate the grid.
//! Data rows run north to south.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::raster::{GeoReference, Raster, RasterElement};

/// Sentinel written for float grids that declare no no-data value
const DEFAULT_ASCII_NODATA: f64 = -9999.0;

/// Recognised header keys, lower-cased
const HEADER_KEYS: [&str; 8] = [
    "ncols",
    "nrows",
    "cellsize",
    "xllcorner",
    "xllcenter",
    "yllcorner",
    "yllcenter",
    "nodata_value",
];

#[derive(Debug, Default)]
struct Header {
    ncols: Option<usize>,
    nrows: Option<usize>,
    cellsize: Option<f64>,
    xllcorner: Option<f64>,
    xllcenter: Option<f64>,
    yllcorner: Option<f64>,
    yllcenter: Option<f64>,
    nodata: Option<f64>,
}

impl Header {
    fn georef(&self) -> Result<GeoReference> {
        let nx = self.ncols.ok_or(Error::MissingGeoreference { field: "ncols" })?;
        let ny = self.nrows.ok_or(Error::MissingGeoreference { field: "nrows" })?;
        let dx = self
            .cellsize
            .ok_or(Error::MissingGeoreference { field: "cellsize" })?;

        let xll = match (self.xllcenter, self.xllcorner) {
            (Some(c), _) => c,
            (None, Some(c)) => c + dx / 2.0,
            (None, None) => return Err(Error::MissingGeoreference { field: "xllcorner" }),
        };
        let yll = match (self.yllcenter, self.yllcorner) {
            (Some(c), _) => c,
            (None, Some(c)) => c + dx / 2.0,
            (None, None) => return Err(Error::MissingGeoreference { field: "yllcorner" }),
        };

        GeoReference::new(nx, ny, dx, xll, yll)
    }
}

fn parse_number<N: std::str::FromStr>(token: &str, line: usize, what: &str) -> Result<N> {
    token.parse::<N>().map_err(|_| Error::Parse {
        line,
        reason: format!("invalid {} '{}'", what, token),
    })
}

/// Read an ESRI ASCII grid file into a Raster
pub fn read_ascii_grid<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    parse_ascii_grid(BufReader::new(file))
}

/// Parse an ESRI ASCII grid from any buffered reader
pub fn parse_ascii_grid<T, R>(reader: R) -> Result<Raster<T>>
where
    T: RasterElement,
    R: BufRead,
{
    let mut header = Header::default();
    let mut values: Vec<f64> = Vec::new();
    let mut in_data = false;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let lineno = i + 1;
        let mut tokens = line.split_whitespace().peekable();
        let Some(&first) = tokens.peek() else {
            continue;
        };

        // Any line not opening with a header key starts the body, so bodies
        // may begin with `nan` or `inf`
        let key = first.to_ascii_lowercase();
        if !in_data && HEADER_KEYS.contains(&key.as_str()) {
            tokens.next();
            let value = tokens.next().ok_or_else(|| Error::Parse {
                line: lineno,
                reason: format!("header key '{}' has no value", first),
            })?;
            match key.as_str() {
                "ncols" => header.ncols = Some(parse_number(value, lineno, "ncols")?),
                "nrows" => header.nrows = Some(parse_number(value, lineno, "nrows")?),
                "cellsize" => header.cellsize = Some(parse_number(value, lineno, "cellsize")?),
                "xllcorner" => header.xllcorner = Some(parse_number(value, lineno, "xllcorner")?),
                "xllcenter" => header.xllcenter = Some(parse_number(value, lineno, "xllcenter")?),
                "yllcorner" => header.yllcorner = Some(parse_number(value, lineno, "yllcorner")?),
                "yllcenter" => header.yllcenter = Some(parse_number(value, lineno, "yllcenter")?),
                "nodata_value" => header.nodata = Some(parse_number(value, lineno, "NODATA_value")?),
                _ => {}
            }
            continue;
        }

        if !in_data {
            // Validate before allocating anything
            let georef = header.georef()?;
            values.reserve(georef.nx * georef.ny);
            in_data = true;
        }

        for token in tokens {
            values.push(parse_number(token, lineno, "cell value")?);
        }
    }

    let georef = header.georef()?;
    let (rows, cols) = georef.shape();
    if values.len() != rows * cols {
        return Err(Error::Parse {
            line: 0,
            reason: format!(
                "expected {} cell values ({} x {}), found {}",
                rows * cols,
                rows,
                cols,
                values.len()
            ),
        });
    }

    let nodata = header.nodata.and_then(T::from_f64);
    let data: Vec<T> = values
        .into_iter()
        .map(|v| T::from_f64(v).or(nodata).unwrap_or(T::default_nodata()))
        .collect();

    let mut raster = Raster::from_vec(data, rows, cols)?;
    raster.set_georef(Arc::new(georef))?;
    raster.set_nodata(nodata);
    Ok(raster)
}

/// Write a Raster as an ESRI ASCII grid file
pub fn write_ascii_grid<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    format_ascii_grid(raster, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Format a Raster as an ESRI ASCII grid into any writer
pub fn format_ascii_grid<T, W>(raster: &Raster<T>, writer: &mut W) -> Result<()>
where
    T: RasterElement,
    W: Write,
{
    let georef = raster.georef();
    let nodata = match raster.nodata().and_then(|v| v.to_f64()) {
        Some(nd) => Some(nd),
        None if T::is_float() => Some(DEFAULT_ASCII_NODATA),
        None => None,
    };

    writeln!(writer, "ncols {}", georef.nx)?;
    writeln!(writer, "nrows {}", georef.ny)?;
    writeln!(writer, "xllcenter {}", georef.xllcenter)?;
    writeln!(writer, "yllcenter {}", georef.yllcenter)?;
    writeln!(writer, "cellsize {}", georef.dx)?;
    if let Some(nd) = nodata {
        writeln!(writer, "NODATA_value {}", nd)?;
    }

    for row in raster.data().rows() {
        let mut first = true;
        for &v in row.iter() {
            if !first {
                write!(writer, " ")?;
            }
            first = false;
            match (raster.is_nodata(v), nodata) {
                (true, Some(nd)) => write!(writer, "{}", nd)?,
                _ => write!(writer, "{}", v.to_f64().unwrap_or(f64::NAN))?,
            }
        }
        writeln!(writer)?;
    }
    Ok(())
}
