//! PostGIS point parsing for visit target locations.
//!
//! The care recipient's address location comes back from the backend in one of:
//! - GeoJSON: `{"type": "Point", "coordinates": [lng, lat]}`
//! - WKT / EWKT: `POINT(lng lat)` or `SRID=4326;POINT(lng lat)`
//! - Hex-encoded (E)WKB, which is what PostgREST emits for `geography` columns

use crate::{Coordinate, GeoError, Result};
use serde::{Deserialize, Serialize};

const WKB_POINT: u32 = 1;
const EWKB_SRID_FLAG: u32 = 0x2000_0000;
const EWKB_TYPE_MASK: u32 = 0x0FFF_FFFF;

/// A PostGIS point as it appears in a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostGISPoint {
    /// GeoJSON object
    GeoJson(GeoJsonPoint),
    /// WKT, EWKT or hex EWKB string
    Text(String),
}

/// GeoJSON Point format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoJsonPoint {
    /// Should be "Point" when present
    #[serde(rename = "type")]
    pub point_type: Option<String>,
    /// [longitude, latitude]
    pub coordinates: [f64; 2],
}

impl PostGISPoint {
    /// Converts the point into a coordinate.
    pub fn to_coordinate(&self) -> Result<Coordinate> {
        match self {
            PostGISPoint::GeoJson(geojson) => {
                if let Some(kind) = geojson.point_type.as_deref() {
                    if !kind.eq_ignore_ascii_case("point") {
                        return Err(GeoError::InvalidGeoJson(format!("expected Point, got {kind}")));
                    }
                }
                let [lng, lat] = geojson.coordinates;
                Ok(Coordinate::new(lat, lng))
            }
            PostGISPoint::Text(text) => parse_text_point(text),
        }
    }
}

/// Parse a PostGIS point from a JSON value.
///
/// # Example
/// ```
/// use carevisit_geo::parse_postgis_point;
/// use serde_json::json;
///
/// let geojson = json!({"type": "Point", "coordinates": [-74.0060, 40.7128]});
/// let coord = parse_postgis_point(&geojson).unwrap();
/// assert!((coord.latitude - 40.7128).abs() < 1e-9);
///
/// let wkt = json!("POINT(-74.0060 40.7128)");
/// assert_eq!(parse_postgis_point(&wkt).unwrap(), coord);
/// ```
pub fn parse_postgis_point(value: &serde_json::Value) -> Result<Coordinate> {
    if value.is_null() {
        return Err(GeoError::MissingLocation);
    }

    let point: PostGISPoint = serde_json::from_value(value.clone())?;
    point.to_coordinate()
}

fn parse_text_point(text: &str) -> Result<Coordinate> {
    let text = text.trim();
    let upper = text.to_ascii_uppercase();

    // EWKT carries an SRID prefix we do not need
    let wkt = match upper.split_once(';') {
        Some((srid, rest)) if srid.starts_with("SRID=") => rest.trim(),
        _ => upper.as_str(),
    };

    if wkt.starts_with("POINT") {
        return parse_wkt_point(wkt);
    }

    if !text.is_empty() && text.chars().all(|c| c.is_ascii_hexdigit()) {
        return parse_ewkb_hex(text);
    }

    Err(GeoError::InvalidWkt(format!("expected POINT, got: {text}")))
}

/// Format: `POINT(longitude latitude)`
fn parse_wkt_point(wkt: &str) -> Result<Coordinate> {
    let start = wkt.find('(').ok_or_else(|| GeoError::InvalidWkt("missing '('".into()))?;
    let end = wkt.rfind(')').ok_or_else(|| GeoError::InvalidWkt("missing ')'".into()))?;

    if start >= end || !wkt[..start].trim().eq("POINT") {
        return Err(GeoError::InvalidWkt(format!("malformed point: {wkt}")));
    }

    let parts: Vec<&str> = wkt[start + 1..end].split_whitespace().collect();
    if parts.len() != 2 {
        return Err(GeoError::InvalidWkt(format!(
            "expected 2 coordinates, got {}",
            parts.len()
        )));
    }

    let lng: f64 = parts[0]
        .parse()
        .map_err(|_| GeoError::InvalidWkt(format!("invalid longitude: {}", parts[0])))?;
    let lat: f64 = parts[1]
        .parse()
        .map_err(|_| GeoError::InvalidWkt(format!("invalid latitude: {}", parts[1])))?;

    Ok(Coordinate::new(lat, lng))
}

/// Decodes a 2D point from hex (E)WKB.
fn parse_ewkb_hex(text: &str) -> Result<Coordinate> {
    let bytes = hex::decode(text).map_err(|e| GeoError::InvalidWkb(e.to_string()))?;
    let mut reader = WkbReader::new(&bytes)?;

    let geometry_type = reader.read_u32()?;
    if geometry_type & EWKB_TYPE_MASK != WKB_POINT {
        return Err(GeoError::InvalidWkb(format!(
            "expected point geometry, got type {}",
            geometry_type & EWKB_TYPE_MASK
        )));
    }
    if geometry_type & EWKB_SRID_FLAG != 0 {
        let _srid = reader.read_u32()?;
    }

    let lng = reader.read_f64()?;
    let lat = reader.read_f64()?;
    Ok(Coordinate::new(lat, lng))
}

struct WkbReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    little_endian: bool,
}

impl<'a> WkbReader<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self> {
        let little_endian = match bytes.first() {
            Some(0) => false,
            Some(1) => true,
            Some(other) => {
                return Err(GeoError::InvalidWkb(format!("invalid byte order marker {other}")));
            }
            None => return Err(GeoError::InvalidWkb("empty input".into())),
        };
        Ok(Self { bytes, offset: 1, little_endian })
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.offset + N;
        let chunk = self
            .bytes
            .get(self.offset..end)
            .ok_or_else(|| GeoError::InvalidWkb("unexpected end of input".into()))?;
        self.offset = end;
        let mut out = [0u8; N];
        out.copy_from_slice(chunk);
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let raw = self.take::<4>()?;
        Ok(if self.little_endian { u32::from_le_bytes(raw) } else { u32::from_be_bytes(raw) })
    }

    fn read_f64(&mut self) -> Result<f64> {
        let raw = self.take::<8>()?;
        Ok(if self.little_endian { f64::from_le_bytes(raw) } else { f64::from_be_bytes(raw) })
    }
}
