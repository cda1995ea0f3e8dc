use std::f64::consts::PI;

use serde::Serialize;

use crate::error::TileError;

/// Slippy map tile in the XYZ scheme, row 0 at the top.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct TileId {
    pub zoom: u8,
    pub column: u32,
    pub row: u32,
}

impl TileId {
    pub const MAX_ZOOM: u8 = 30;

    pub fn new(zoom: u8, column: u32, row: u32) -> Result<Self, TileError> {
        let tile = TileId { zoom, column, row };

        if zoom > Self::MAX_ZOOM || !tile.is_valid() {
            return Err(TileError::InvalidTile { zoom, column, row });
        }

        Ok(tile)
    }

    /// Tile addressed in the TMS scheme, row 0 at the bottom.
    pub fn from_tms(zoom: u8, column: u32, row: u32) -> Result<Self, TileError> {
        if zoom > Self::MAX_ZOOM || row >= 2u32.pow(zoom as u32) {
            return Err(TileError::InvalidTile { zoom, column, row });
        }

        let row = (2u32.pow(zoom as u32) - row) - 1;
        Self::new(zoom, column, row)
    }

    fn is_valid(&self) -> bool {
        self.row < self.limit() && self.column < self.limit()
    }

    pub fn limit(&self) -> u32 {
        2u32.pow(self.zoom as u32)
    }

    pub fn bounds(&self) -> GeoBounds {
        let nw = tile_to_lat_lon(self.column as f64, self.row as f64, self.zoom);
        let se = tile_to_lat_lon(self.column as f64 + 1.0, self.row as f64 + 1.0, self.zoom);

        GeoBounds {
            west: nw.lon,
            south: se.lat,
            east: se.lon,
            north: nw.lat,
        }
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.column, self.row)
    }
}

/// Longitude/latitude rectangle in degrees.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GeoBounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl GeoBounds {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.west <= lon && lon <= self.east && self.south <= lat && lat <= self.north
    }

    pub fn rect(&self) -> geo::Rect<f64> {
        geo::Rect::new(
            geo::coord! { x: self.west, y: self.south },
            geo::coord! { x: self.east, y: self.north },
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// Fractional tile coordinates of a point.
pub fn lat_lon_to_tile(lat: f64, lon: f64, zoom: u8) -> (f64, f64) {
    let n = 2f64.powi(zoom as i32);
    let lat_rad = lat.to_radians();

    let x = (lon + 180.0) / 360.0 * n;
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n;

    (x, y)
}

/// Tile that puts the point near the middle of a 2x2 tile map.
pub fn lat_lon_to_tile_centered(lat: f64, lon: f64, zoom: u8) -> (i64, i64) {
    let (mut x, mut y) = lat_lon_to_tile(lat, lon, zoom);

    if x - x.trunc() > 0.5 {
        x += 1.0;
    }
    if y - y.trunc() > 0.5 {
        y += 1.0;
    }

    (x.trunc() as i64, y.trunc() as i64)
}

/// Corner of tile (x, y). Coordinates outside the grid are allowed so
/// neighbours of edge tiles still resolve.
pub fn tile_to_lat_lon(x: f64, y: f64, zoom: u8) -> LatLon {
    let n = 2f64.powi(zoom as i32);
    let lon = x / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();

    LatLon { lat, lon }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Compass {
    pub n: LatLon,
    pub s: LatLon,
    pub e: LatLon,
    pub w: LatLon,
}

/// Map position for browsing a layer: zoom clamped to the allowed range,
/// the centred tile and the points one tile away in each direction.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Navigation {
    pub lat: f64,
    pub lon: f64,
    pub zoom: u8,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub can_zoom_in: bool,
    pub can_zoom_out: bool,
    pub x: i64,
    pub y: i64,
    pub compass: Compass,
}

impl Navigation {
    pub fn locate(lat: f64, lon: f64, zoom: u8, min_zoom: u8, max_zoom: u8) -> Self {
        let zoom = zoom.min(max_zoom).max(min_zoom);
        let (x, y) = lat_lon_to_tile_centered(lat, lon, zoom);
        let corner = |x: i64, y: i64| tile_to_lat_lon(x as f64, y as f64, zoom);

        Self {
            lat,
            lon,
            zoom,
            min_zoom,
            max_zoom,
            can_zoom_in: zoom < max_zoom,
            can_zoom_out: zoom > min_zoom,
            x,
            y,
            compass: Compass {
                n: corner(x, y - 1),
                s: corner(x, y + 1),
                e: corner(x + 1, y),
                w: corner(x - 1, y),
            },
        }
    }
}
