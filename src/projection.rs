use std::f64::consts::PI;

use geo::Coord;

use crate::grid::TileId;

/// Spherical mercator (EPSG:3857) earth radius in meters.
pub const EARTH_RADIUS: f64 = 6378137.0;

/// Forward EPSG:4326 -> EPSG:3857, input is always lon/lat ordered.
pub fn lon_lat_to_mercator(coord: Coord<f64>) -> Coord<f64> {
    let x = EARTH_RADIUS * coord.x.to_radians();
    let y = EARTH_RADIUS * coord.y.to_radians().tan().asinh();

    Coord { x, y }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ProjectedBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl ProjectedBounds {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Bounds of a tile in meters. Computed on the mercator grid directly,
    /// which is what projecting [`TileId::bounds`] gives without the
    /// round trip through degrees.
    pub fn of(tile: TileId) -> Self {
        let half = EARTH_RADIUS * PI;
        let size = 2.0 * half / tile.limit() as f64;

        ProjectedBounds {
            min_x: -half + tile.column as f64 * size,
            min_y: half - (tile.row as f64 + 1.0) * size,
            max_x: -half + (tile.column as f64 + 1.0) * size,
            max_y: half - tile.row as f64 * size,
        }
    }
}

/// Tiling scheme configuration. Built once and shared read-only between
/// requests.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TileScheme {
    pub extent: u32,
}

impl TileScheme {
    pub const DEFAULT_EXTENT: u32 = 4096;

    /// WebMercatorQuad with the conventional 4096 unit extent.
    pub const fn web_mercator() -> Self {
        TileScheme {
            extent: Self::DEFAULT_EXTENT,
        }
    }

    pub fn projected_bounds(&self, tile: TileId) -> ProjectedBounds {
        ProjectedBounds::of(tile)
    }

    /// Simplification tolerance of one pixel, in projected units.
    pub fn tolerance(&self, bounds: &ProjectedBounds) -> f64 {
        bounds.width() / self.extent as f64
    }
}

impl Default for TileScheme {
    fn default() -> Self {
        Self::web_mercator()
    }
}
