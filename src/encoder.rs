use geo::{Coord, Geometry, LineString, Polygon};
use prost::Message;

use crate::proto::{
    Tile,
    tile::{Feature, GeomType, Layer},
};
use crate::values::{AttributeValue, ValueTable};

pub const LAYER_VERSION: u32 = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum GeoCommand {
    MoveTo = 1,
    LineTo = 2,
    ClosePath = 7,
}

impl GeoCommand {
    fn with_count(self, count: u32) -> u32 {
        (self as u32 & 0x7) | (count << 3)
    }
}

fn zigzag(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Builds the command stream of one feature. Input is in y-up pixel space,
/// output follows the tile's y-down grid.
pub struct GeometryEncoder {
    extent: i32,
    commands: Vec<u32>,
    cursor: (i32, i32),
}

impl GeometryEncoder {
    pub fn new(extent: u32) -> Self {
        Self {
            extent: extent as i32,
            commands: Vec::new(),
            cursor: (0, 0),
        }
    }

    pub fn encode(mut self, geometry: &Geometry<f64>) -> Vec<u32> {
        match geometry {
            Geometry::Point(p) => self.points(std::iter::once(p.0)),
            Geometry::MultiPoint(mp) => self.points(mp.0.iter().map(|p| p.0)),
            Geometry::LineString(line) => {
                self.path(line.coords().copied(), 2);
            }
            Geometry::MultiLineString(lines) => {
                for line in lines.iter() {
                    self.path(line.coords().copied(), 2);
                }
            }
            Geometry::Polygon(polygon) => self.polygon(polygon),
            Geometry::MultiPolygon(polygons) => {
                for polygon in polygons.iter() {
                    self.polygon(polygon);
                }
            }
            _ => (),
        }

        self.commands
    }

    fn to_grid(&self, c: Coord<f64>) -> (i32, i32) {
        (c.x as i32, self.extent - c.y as i32)
    }

    fn points(&mut self, points: impl ExactSizeIterator<Item = Coord<f64>>) {
        if points.len() == 0 {
            return;
        }

        self.commands
            .push(GeoCommand::MoveTo.with_count(points.len() as u32));
        for c in points {
            let (x, y) = self.to_grid(c);
            self.commands
                .extend([zigzag(x - self.cursor.0), zigzag(y - self.cursor.1)]);
            self.cursor = (x, y);
        }
    }

    /// MoveTo followed by LineTo for every point that moves the cursor.
    /// Nothing is written unless at least `min_points` distinct points remain.
    fn path(&mut self, mut coords: impl Iterator<Item = Coord<f64>>, min_points: u32) -> bool {
        let Some(first) = coords.next() else {
            return false;
        };

        let (x, y) = self.to_grid(first);
        let mut commands = vec![
            GeoCommand::MoveTo.with_count(1),
            zigzag(x - self.cursor.0),
            zigzag(y - self.cursor.1),
            0,
        ];
        let mut last = (x, y);
        let mut line_to = 0;

        for c in coords {
            let (x, y) = self.to_grid(c);
            if (x, y) == last {
                continue;
            }
            commands.extend([zigzag(x - last.0), zigzag(y - last.1)]);
            last = (x, y);
            line_to += 1;
        }

        if line_to + 1 < min_points {
            return false;
        }

        commands[3] = GeoCommand::LineTo.with_count(line_to);
        self.commands.extend(commands);
        self.cursor = last;
        true
    }

    fn ring(&mut self, ring: &LineString<f64>) -> bool {
        // closing point is implied by ClosePath
        let open = &ring.0[..ring.0.len().saturating_sub(1)];

        if self.path(open.iter().copied(), 3) {
            self.commands.push(GeoCommand::ClosePath.with_count(1));
            true
        } else {
            false
        }
    }

    fn polygon(&mut self, polygon: &Polygon<f64>) {
        if !self.ring(polygon.exterior()) {
            return;
        }

        for interior in polygon.interiors() {
            self.ring(interior);
        }
    }
}

pub fn geom_type(geometry: &Geometry<f64>) -> GeomType {
    match geometry {
        Geometry::Point(_) | Geometry::MultiPoint(_) => GeomType::Point,
        Geometry::LineString(_) | Geometry::MultiLineString(_) => GeomType::Linestring,
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) => GeomType::Polygon,
        _ => GeomType::Unknown,
    }
}

/// Accumulates the features of a single tile layer.
pub struct LayerBuilder {
    name: String,
    extent: u32,
    keys: Vec<String>,
    values: ValueTable,
    features: Vec<Feature>,
}

impl LayerBuilder {
    pub fn new<S: Into<String>>(name: S, extent: u32, keys: Vec<String>) -> Self {
        Self {
            name: name.into(),
            extent,
            keys,
            values: ValueTable::new(),
            features: Vec::new(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Encodes a pixel space geometry, `None` when it produces no commands.
    pub fn encode_feature(&self, id: Option<u64>, geometry: &Geometry<f64>) -> Option<Feature> {
        let commands = GeometryEncoder::new(self.extent).encode(geometry);
        if commands.is_empty() {
            return None;
        }

        Some(Feature {
            id,
            tags: Vec::new(),
            r#type: Some(geom_type(geometry) as i32),
            geometry: commands,
        })
    }

    /// Adds a feature with `attributes` lined up with the layer keys. `None`
    /// values emit no tag.
    pub fn push_feature<'a, I>(&mut self, mut feature: Feature, attributes: I)
    where
        I: IntoIterator<Item = Option<&'a AttributeValue>>,
    {
        for (key_idx, value) in attributes.into_iter().enumerate() {
            let Some(value) = value else {
                continue;
            };
            let value_idx = self.values.intern(value);
            feature.tags.extend([key_idx as u32, value_idx]);
        }

        self.features.push(feature);
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn build(self) -> Layer {
        Layer {
            version: LAYER_VERSION,
            name: self.name,
            features: self.features,
            keys: self.keys,
            values: self.values.into_values(),
            extent: Some(self.extent),
        }
    }

    pub fn encode_to_vec(self) -> Vec<u8> {
        Tile {
            layers: vec![self.build()],
        }
        .encode_to_vec()
    }
}
