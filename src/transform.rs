//! Moves decoded features from lon/lat into the tile's pixel grid.
//!
//! Order matters and follows the rendering contract of the tile format:
//! clip in geographic space, project to web mercator, simplify to one pixel,
//! rescale and truncate to the grid, then fix polygon winding. Output pixel
//! space has y pointing up; the encoder flips it.

use geo::algorithm::orient::Direction;
use geo::{
    BooleanOps, BoundingRect, Coord, Geometry, LineString, MapCoords, MultiLineString, MultiPoint,
    MultiPolygon, Orient, Polygon, Rect, Simplify,
};

use crate::grid::{GeoBounds, TileId};
use crate::projection::{ProjectedBounds, TileScheme, lon_lat_to_mercator};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Dropped {
    EmptyAfterClip,
    EmptyAfterTransform,
}

/// Everything needed to place geometries into one tile.
#[derive(Debug, Copy, Clone)]
pub struct TileTransform {
    bounds: GeoBounds,
    projected: ProjectedBounds,
    extent: f64,
    tolerance: f64,
}

impl TileTransform {
    pub fn new(tile: TileId, scheme: &TileScheme) -> Self {
        let bounds = tile.bounds();
        let projected = scheme.projected_bounds(tile);

        Self {
            bounds,
            projected,
            extent: scheme.extent as f64,
            tolerance: scheme.tolerance(&projected),
        }
    }

    pub fn apply(&self, geometry: Geometry<f64>) -> Result<Geometry<f64>, Dropped> {
        let clipped = self.clip(geometry).ok_or(Dropped::EmptyAfterClip)?;
        let projected = clipped.map_coords(lon_lat_to_mercator);
        let simplified = self.simplify(projected);
        let pixels = simplified.map_coords(|c| self.to_pixel(c));

        if is_empty(&pixels) {
            return Err(Dropped::EmptyAfterTransform);
        }

        Ok(orient(pixels))
    }

    /// Intersects a lon/lat geometry with the tile rectangle.
    pub fn clip(&self, geometry: Geometry<f64>) -> Option<Geometry<f64>> {
        let rect = self.bounds.rect();

        if geometry
            .bounding_rect()
            .is_some_and(|bbox| contains_rect(&rect, &bbox))
        {
            return Some(geometry).filter(|g| !is_empty(g));
        }

        let clipped: Option<Geometry<f64>> = match geometry {
            Geometry::Point(p) => self.bounds.contains(p.x(), p.y()).then_some(p.into()),
            Geometry::MultiPoint(mp) => {
                let points: Vec<_> = mp
                    .into_iter()
                    .filter(|p| self.bounds.contains(p.x(), p.y()))
                    .collect();
                Some(MultiPoint::new(points).into())
            }
            Geometry::LineString(line) => Some(clip_lines(&rect, MultiLineString::new(vec![line]))),
            Geometry::MultiLineString(lines) => Some(clip_lines(&rect, lines)),
            Geometry::Polygon(polygon) => Some(clip_polygons(&rect, MultiPolygon::new(vec![polygon]))),
            Geometry::MultiPolygon(polygons) => Some(clip_polygons(&rect, polygons)),
            _ => None,
        };

        clipped.filter(|g| !is_empty(g))
    }

    fn simplify(&self, geometry: Geometry<f64>) -> Geometry<f64> {
        let tolerance = &self.tolerance;

        match geometry {
            Geometry::LineString(g) => g.simplify(tolerance).into(),
            Geometry::MultiLineString(g) => g.simplify(tolerance).into(),
            Geometry::Polygon(g) => g.simplify(tolerance).into(),
            Geometry::MultiPolygon(g) => g.simplify(tolerance).into(),
            g => g,
        }
    }

    /// Projected meters to truncated pixel coordinates, origin bottom left.
    pub fn to_pixel(&self, c: Coord<f64>) -> Coord<f64> {
        let width = self.projected.width();
        let x = (c.x - self.projected.min_x) * self.extent / width;
        let y = (c.y - self.projected.min_y) * self.extent / width;

        Coord {
            x: x.trunc(),
            y: y.trunc(),
        }
    }
}

fn contains_rect(outer: &Rect<f64>, inner: &Rect<f64>) -> bool {
    outer.min().x <= inner.min().x
        && outer.min().y <= inner.min().y
        && inner.max().x <= outer.max().x
        && inner.max().y <= outer.max().y
}

fn clip_lines(rect: &Rect<f64>, lines: MultiLineString<f64>) -> Geometry<f64> {
    let clip = MultiPolygon::new(vec![rect.to_polygon()]);
    let mut clipped: Vec<_> = clip
        .clip(&lines, false)
        .into_iter()
        .filter(|line| line.0.len() >= 2)
        .collect();

    if clipped.len() == 1 {
        clipped.remove(0).into()
    } else {
        MultiLineString::new(clipped).into()
    }
}

fn clip_polygons(rect: &Rect<f64>, polygons: MultiPolygon<f64>) -> Geometry<f64> {
    let clip = MultiPolygon::new(vec![rect.to_polygon()]);
    let mut clipped = polygons.intersection(&clip).0;

    if clipped.len() == 1 {
        clipped.remove(0).into()
    } else {
        MultiPolygon::new(clipped).into()
    }
}

/// Exterior rings clockwise and holes counter-clockwise in y-up space.
fn orient(geometry: Geometry<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::Polygon(p) => p.orient(Direction::Reversed).into(),
        Geometry::MultiPolygon(mp) => mp.orient(Direction::Reversed).into(),
        g => g,
    }
}

pub fn is_empty(geometry: &Geometry<f64>) -> bool {
    let line_empty = |line: &LineString<f64>| line.0.is_empty();
    let polygon_empty = |polygon: &Polygon<f64>| line_empty(polygon.exterior());

    match geometry {
        Geometry::Point(p) => p.x().is_nan() || p.y().is_nan(),
        Geometry::MultiPoint(mp) => mp.0.is_empty(),
        Geometry::LineString(line) => line_empty(line),
        Geometry::MultiLineString(lines) => lines.iter().all(line_empty),
        Geometry::Polygon(polygon) => polygon_empty(polygon),
        Geometry::MultiPolygon(polygons) => polygons.iter().all(polygon_empty),
        _ => true,
    }
}
