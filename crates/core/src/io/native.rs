//! Native GeoTIFF reading/writing
//!
//! Uses the `tiff` crate. Only north-up, unrotated rasters are supported:
//! the georeference comes from ModelPixelScale + ModelTiepoint, the no-data
//! sentinel from the GDAL_NODATA tag.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::raster::{GeoReference, Raster, RasterElement};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray64Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

/// Read a GeoTIFF file into a Raster
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(file)
}

/// Read a GeoTIFF from an in-memory buffer into a Raster
pub fn read_geotiff_from_buffer<T>(data: &[u8]) -> Result<Raster<T>>
where
    T: RasterElement,
{
    decode_geotiff(Cursor::new(data))
}

fn cast_all<S, T>(buf: Vec<S>) -> Vec<T>
where
    S: num_traits::NumCast + Copy,
    T: RasterElement,
{
    buf.into_iter()
        .map(|v| num_traits::cast(v).unwrap_or(T::default_nodata()))
        .collect()
}

/// Internal: decode a GeoTIFF from any `Read + Seek` source
fn decode_geotiff<T, R>(reader: R) -> Result<Raster<T>>
where
    T: RasterElement,
    R: std::io::Read + std::io::Seek,
{
    let mut decoder =
        Decoder::new(reader).map_err(|e| Error::Other(format!("TIFF decode error: {}", e)))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Other(format!("Cannot read dimensions: {}", e)))?;

    let rows = height as usize;
    let cols = width as usize;

    // Georeference first: a file without one must fail before any grid exists
    let georef = read_georef(&mut decoder, cols, rows)?;
    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_end_matches('\0').trim().parse::<f64>().ok());

    let result = decoder
        .read_image()
        .map_err(|e| Error::Other(format!("Cannot read image data: {}", e)))?;

    let data: Vec<T> = match result {
        DecodingResult::F32(buf) => cast_all(buf),
        DecodingResult::F64(buf) => cast_all(buf),
        DecodingResult::U8(buf) => cast_all(buf),
        DecodingResult::U16(buf) => cast_all(buf),
        DecodingResult::U32(buf) => cast_all(buf),
        DecodingResult::I8(buf) => cast_all(buf),
        DecodingResult::I16(buf) => cast_all(buf),
        DecodingResult::I32(buf) => cast_all(buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ))
        }
    };

    let mut raster = Raster::from_vec(data, rows, cols)?;
    raster.set_georef(Arc::new(georef))?;
    raster.set_nodata(nodata.and_then(T::from_f64));
    Ok(raster)
}

/// Build the georeference from ModelPixelScale + ModelTiepoint
fn read_georef<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    cols: usize,
    rows: usize,
) -> Result<GeoReference> {
    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| Error::MissingGeoreference { field: "ModelPixelScale" })?;

    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| Error::MissingGeoreference { field: "ModelTiepoint" })?;

    if scale.len() < 2 {
        return Err(Error::MissingGeoreference { field: "ModelPixelScale" });
    }
    if tiepoint.len() < 6 {
        return Err(Error::MissingGeoreference { field: "ModelTiepoint" });
    }
    if (scale[0] - scale[1]).abs() > 1e-9 * scale[0].abs().max(1.0) {
        return Err(Error::UnsupportedDataType(format!(
            "non-square pixels ({} x {})",
            scale[0], scale[1]
        )));
    }

    // tiepoint: [I, J, K, X, Y, Z]
    let ulx = tiepoint[3] - tiepoint[0] * scale[0];
    let uly = tiepoint[4] + tiepoint[1] * scale[1];
    let georef = GeoReference::from_corner(cols, rows, scale[0], ulx, uly)?;

    let epsg = decoder
        .get_tag_u16_vec(Tag::GeoKeyDirectoryTag)
        .ok()
        .and_then(|keys| epsg_from_geokeys(&keys));
    Ok(match epsg {
        Some(code) => georef.with_projection(Crs::from_epsg(code)),
        None => georef,
    })
}

const GEOGRAPHIC_TYPE_GEOKEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEOKEY: u16 = 3072;

/// EPSG code stored inline in a GeoKeyDirectory, if any
fn epsg_from_geokeys(keys: &[u16]) -> Option<u32> {
    let count = *keys.get(3)? as usize;
    keys.get(4..4 + count * 4)?
        .chunks_exact(4)
        .find(|k| {
            (k[0] == PROJECTED_CS_TYPE_GEOKEY || k[0] == GEOGRAPHIC_TYPE_GEOKEY) && k[1] == 0
        })
        .map(|k| k[3] as u32)
        .filter(|&code| code != 0 && code != 32767)
}

/// Write a Raster to a GeoTIFF file (64-bit float samples)
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    encode_geotiff(raster, file)
}

/// Write a Raster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer<T>(raster: &Raster<T>) -> Result<Vec<u8>>
where
    T: RasterElement,
{
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf))?;
    Ok(buf)
}

/// Internal: encode a Raster as GeoTIFF into any `Write + Seek` sink
fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W) -> Result<()>
where
    T: RasterElement,
    W: std::io::Write + std::io::Seek,
{
    let mut encoder =
        TiffEncoder::new(writer).map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;

    let (rows, cols) = raster.shape();

    let data: Vec<f64> = raster
        .data()
        .iter()
        .map(|&v| v.to_f64().unwrap_or(f64::NAN))
        .collect();

    let mut image = encoder
        .new_image::<Gray64Float>(cols as u32, rows as u32)
        .map_err(|e| Error::Other(format!("Cannot create TIFF image: {}", e)))?;

    let georef = raster.georef();
    let (ulx, uly) = georef.to_corner();

    let scale = [georef.dx, georef.dx, 0.0];
    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, &scale[..])
        .map_err(|e| Error::Other(format!("Cannot write scale tag: {}", e)))?;

    let tiepoint = [0.0, 0.0, 0.0, ulx, uly, 0.0];
    image
        .encoder()
        .write_tag(Tag::ModelTiepointTag, &tiepoint[..])
        .map_err(|e| Error::Other(format!("Cannot write tiepoint tag: {}", e)))?;

    // GTModelTypeGeoKey = 2 (geographic) or 1 (projected); GTRasterTypeGeoKey = PixelIsArea
    let model_type: u16 = if georef.is_geographic() { 2 } else { 1 };
    let mut geokeys: Vec<u16> = vec![1, 1, 0, 2, 1024, 0, 1, model_type, 1025, 0, 1, 1];
    if let Some(code) = georef
        .projection
        .as_ref()
        .map(Crs::epsg)
        .and_then(|c| u16::try_from(c).ok())
    {
        let key = if georef.is_geographic() {
            GEOGRAPHIC_TYPE_GEOKEY
        } else {
            PROJECTED_CS_TYPE_GEOKEY
        };
        geokeys.extend_from_slice(&[key, 0, 1, code]);
        geokeys[3] = 3;
    }
    image
        .encoder()
        .write_tag(Tag::GeoKeyDirectoryTag, &geokeys[..])
        .map_err(|e| Error::Other(format!("Cannot write geokey tag: {}", e)))?;

    if let Some(nd) = raster.nodata().and_then(|v| v.to_f64()) {
        image
            .encoder()
            .write_tag(Tag::GdalNodata, nd.to_string().as_str())
            .map_err(|e| Error::Other(format!("Cannot write nodata tag: {}", e)))?;
    }

    image
        .write_data(&data)
        .map_err(|e| Error::Other(format!("Cannot write image data: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geographic_epsg_survives_roundtrip() {
        let mut dem: Raster<f64> = Raster::filled(2, 2, 1.0);
        let g = GeoReference::new(2, 2, 1.0 / 240.0, -70.0, -33.0)
            .unwrap()
            .with_projection(Crs::wgs84());
        dem.set_georef(Arc::new(g)).unwrap();

        let buf = write_geotiff_to_buffer(&dem).unwrap();
        let back: Raster<f64> = read_geotiff_from_buffer(&buf).unwrap();
        assert!(back.georef().is_geographic());
        assert_eq!(back.georef().projection.as_ref().map(Crs::epsg), Some(4326));
    }

    #[test]
    fn test_buffer_roundtrip_keeps_georef_and_nodata() {
        let mut dem: Raster<f64> = Raster::filled(3, 4, 12.5);
        dem.set(1, 2, -9999.0).unwrap();
        dem.set_nodata(Some(-9999.0));
        let g = GeoReference::from_corner(4, 3, 30.0, 1000.0, 5000.0).unwrap();
        dem.set_georef(Arc::new(g)).unwrap();

        let buf = write_geotiff_to_buffer(&dem).unwrap();
        let back: Raster<f64> = read_geotiff_from_buffer(&buf).unwrap();

        assert_eq!(back.shape(), (3, 4));
        assert_eq!(back.nodata(), Some(-9999.0));
        assert!(back.is_nodata_at(1, 2).unwrap());
        assert_eq!(back.get(0, 0).unwrap(), 12.5);
        assert_eq!(back.georef().as_ref(), dem.georef().as_ref());
    }
}
