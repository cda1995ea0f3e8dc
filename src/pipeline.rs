use std::fmt;
use std::io::Write;

use libflate::gzip;
use log::{debug, warn};

use crate::encoder::LayerBuilder;
use crate::error::{DecodeError, TileError};
use crate::filter::BboxFilter;
use crate::grid::TileId;
use crate::projection::TileScheme;
use crate::proto::tile::Feature;
use crate::transform::{Dropped, TileTransform};
use crate::values::AttributeValue;
use crate::wkb;

pub const CONTENT_TYPE: &str = "application/vnd.mapbox-vector-tile";

/// Gzipped tile holding one empty `__empty` layer, served when nothing
/// matches.
pub const EMPTY_TILE: &[u8] = b"\x1F\x8B\x08\x00\xFA\x78\x18\x5E\x00\x03\x93\xE2\xE3\x62\x8F\x8F\x4F\xCD\x2D\x28\xA9\xD4\x68\x50\xA8\x60\x02\x00\x64\x71\x44\x36\x10\x00\x00\x00";

/// One row of a feature table.
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub fid: i64,
    pub geometry: Vec<u8>,
    pub attributes: Vec<(String, Option<AttributeValue>)>,
}

impl SourceRow {
    fn has_keys(&self, keys: &[String]) -> bool {
        self.attributes.len() == keys.len()
            && self
                .attributes
                .iter()
                .zip(keys)
                .all(|((name, _), key)| name == key)
    }
}

/// Anything that can hand out the rows of a layer intersecting a bounding box.
pub trait RowSource {
    fn fetch_rows(&mut self, layer: &str, filter: &BboxFilter) -> Result<Vec<SourceRow>, TileError>;
}

#[derive(Debug)]
pub enum DropReason {
    EmptyGeometry,
    Malformed(DecodeError),
    Transform(Dropped),
    EmptyEncoding,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::EmptyGeometry => write!(f, "empty geometry"),
            DropReason::Malformed(e) => write!(f, "{e}"),
            DropReason::Transform(Dropped::EmptyAfterClip) => write!(f, "outside the tile"),
            DropReason::Transform(Dropped::EmptyAfterTransform) => {
                write!(f, "collapsed after simplification")
            }
            DropReason::EmptyEncoding => write!(f, "no drawable geometry"),
        }
    }
}

/// Result of pushing one row through decode, transform and encode.
#[derive(Debug)]
pub enum FeatureOutcome {
    Encoded(Feature),
    Dropped(DropReason),
    Fatal(TileError),
}

pub fn process_row(row: &SourceRow, transform: &TileTransform, layer: &LayerBuilder) -> FeatureOutcome {
    let geometry = match wkb::decode_blob(&row.geometry) {
        Ok(Some(geometry)) => geometry,
        Ok(None) => return FeatureOutcome::Dropped(DropReason::EmptyGeometry),
        Err(e) if e.is_fatal() => {
            return FeatureOutcome::Fatal(TileError::UnsupportedGeometry {
                fid: row.fid,
                source: e,
            });
        }
        Err(e) => return FeatureOutcome::Dropped(DropReason::Malformed(e)),
    };

    let pixels = match transform.apply(geometry) {
        Ok(pixels) => pixels,
        Err(dropped) => return FeatureOutcome::Dropped(DropReason::Transform(dropped)),
    };

    match layer.encode_feature(u64::try_from(row.fid).ok(), &pixels) {
        Some(feature) => FeatureOutcome::Encoded(feature),
        None => FeatureOutcome::Dropped(DropReason::EmptyEncoding),
    }
}

/// Encodes the rows of one layer into a tile. No rows means no tile.
pub fn build_tile(
    layer_name: &str,
    tile: TileId,
    scheme: &TileScheme,
    rows: &[SourceRow],
) -> Result<Option<Vec<u8>>, TileError> {
    let Some(first) = rows.first() else {
        return Ok(None);
    };

    let transform = TileTransform::new(tile, scheme);
    let keys = first.attributes.iter().map(|(name, _)| name.clone()).collect();
    let mut layer = LayerBuilder::new(layer_name, scheme.extent, keys);

    for row in rows {
        if !row.has_keys(layer.keys()) {
            return Err(TileError::HeterogeneousRows { fid: row.fid });
        }

        match process_row(row, &transform, &layer) {
            FeatureOutcome::Encoded(feature) => {
                layer.push_feature(feature, row.attributes.iter().map(|(_, v)| v.as_ref()))
            }
            FeatureOutcome::Dropped(reason @ DropReason::Malformed(_)) => {
                warn!("{layer_name} {tile}: skipping feature {}: {reason}", row.fid)
            }
            FeatureOutcome::Dropped(reason) => {
                debug!("{layer_name} {tile}: dropped feature {}: {reason}", row.fid)
            }
            FeatureOutcome::Fatal(e) => return Err(e),
        }
    }

    debug!(
        "{layer_name} {tile}: {} of {} features encoded",
        layer.feature_count(),
        rows.len()
    );

    Ok(Some(layer.encode_to_vec()))
}

/// Fetches and encodes one tile.
pub fn render_tile<S: RowSource>(
    source: &mut S,
    layer_name: &str,
    tile: TileId,
    scheme: &TileScheme,
) -> Result<Option<Vec<u8>>, TileError> {
    let filter = BboxFilter::from(tile.bounds());
    let rows = source.fetch_rows(layer_name, &filter)?;

    if rows.is_empty() {
        debug!("{layer_name} {tile}: no rows");
        return Ok(None);
    }

    build_tile(layer_name, tile, scheme, &rows)
}

/// Tile body with the HTTP status it should be served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl TileResponse {
    /// Turns a render result into a response. Errors about the request
    /// itself become a 404 with the empty tile; the rest are passed on.
    pub fn from_result(result: Result<Option<Vec<u8>>, TileError>) -> Result<Self, TileError> {
        match result {
            Ok(tile) => Ok(tile.into()),
            Err(e) if e.is_not_found() => {
                debug!("not found: {e}");
                Ok(TileResponse::from(None::<Vec<u8>>))
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_found(&self) -> bool {
        self.status == 200
    }
}

impl From<Option<Vec<u8>>> for TileResponse {
    fn from(tile: Option<Vec<u8>>) -> Self {
        match tile {
            Some(body) => TileResponse {
                status: 200,
                content_type: CONTENT_TYPE,
                body,
            },
            None => TileResponse {
                status: 404,
                content_type: CONTENT_TYPE,
                body: EMPTY_TILE.to_vec(),
            },
        }
    }
}

pub fn gzip_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = gzip::Encoder::new(Vec::new())?;
    encoder.write_all(data)?;
    encoder.finish().into_result()
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use geo::{Area, Geometry, LineString, Polygon, line_string, point, polygon};
    use prost::Message;

    use super::*;
    use crate::proto::{Tile, tile::GeomType};
    use crate::wkb::tests::{blob, blob_with_envelope};

    fn row(fid: i64, geometry: Geometry<f64>, attributes: &[(&str, Option<AttributeValue>)]) -> SourceRow {
        SourceRow {
            fid,
            geometry: blob(&geometry),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    impl RowSource for Vec<SourceRow> {
        fn fetch_rows(&mut self, _layer: &str, filter: &BboxFilter) -> Result<Vec<SourceRow>, TileError> {
            Ok(self
                .iter()
                .filter(|row| wkb::blob_envelope(&row.geometry).is_none_or(|e| filter.matches(&e)))
                .cloned()
                .collect())
        }
    }

    fn name(s: &str) -> Option<AttributeValue> {
        Some(AttributeValue::String(s.into()))
    }

    fn world() -> TileId {
        TileId::new(0, 0, 0).unwrap()
    }

    fn decode(bytes: &[u8]) -> Tile {
        Tile::decode(bytes).unwrap()
    }

    /// Absolute y-down positions from a command stream.
    fn positions(commands: &[u32]) -> Vec<(i32, i32)> {
        let mut out = Vec::new();
        let (mut x, mut y) = (0, 0);
        let mut i = 0;
        while i < commands.len() {
            let command = commands[i] & 7;
            let count = commands[i] >> 3;
            i += 1;
            if command == 7 {
                continue;
            }
            for _ in 0..count {
                let dx = ((commands[i] >> 1) as i32) ^ -((commands[i] & 1) as i32);
                let dy = ((commands[i + 1] >> 1) as i32) ^ -((commands[i + 1] & 1) as i32);
                x += dx;
                y += dy;
                out.push((x, y));
                i += 2;
            }
        }
        out
    }

    #[test]
    fn no_rows_means_no_tile() {
        let mut source: Vec<SourceRow> = Vec::new();
        let tile = render_tile(&mut source, "roads", world(), &TileScheme::web_mercator()).unwrap();

        assert_eq!(tile, None);

        let response = TileResponse::from(tile);
        assert_eq!(response.status, 404);
        assert_eq!(response.content_type, CONTENT_TYPE);
        assert_eq!(response.body, EMPTY_TILE);
    }

    #[test]
    fn empty_tile_constant_is_a_valid_tile() {
        let mut decoder = gzip::Decoder::new(EMPTY_TILE).unwrap();
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw).unwrap();

        let tile = decode(&raw);
        assert_eq!(tile.layers.len(), 1);
        assert_eq!(tile.layers[0].name, "__empty");
        assert_eq!(tile.layers[0].extent, Some(4096));
        assert_eq!(tile.layers[0].version, 2);
        assert!(tile.layers[0].features.is_empty());
    }

    #[test]
    fn point_at_null_island() {
        let rows = vec![row(7, point!(x: 0.0, y: 0.0).into(), &[("name", name("origin"))])];
        let bytes = build_tile("places", world(), &TileScheme::web_mercator(), &rows)
            .unwrap()
            .unwrap();

        let tile = decode(&bytes);
        let layer = &tile.layers[0];
        assert_eq!(layer.name, "places");
        assert_eq!(layer.version, 2);
        assert_eq!(layer.extent, Some(4096));
        assert_eq!(layer.keys, vec!["name"]);
        assert_eq!(layer.values[0].string_value.as_deref(), Some("origin"));

        let feature = &layer.features[0];
        assert_eq!(feature.id, Some(7));
        assert_eq!(feature.r#type, Some(GeomType::Point as i32));
        assert_eq!(feature.tags, vec![0, 0]);
        assert_eq!(positions(&feature.geometry), vec![(2048, 2048)]);
    }

    #[test]
    fn encoding_is_deterministic() {
        let rows = vec![
            row(1, line_string![(x: -10.0, y: 0.0), (x: 30.0, y: 20.0)].into(), &[
                ("kind", name("road")),
                ("lanes", Some(AttributeValue::Int(2))),
            ]),
            row(2, point!(x: 5.0, y: 5.0).into(), &[
                ("kind", name("stop")),
                ("lanes", Some(AttributeValue::Int(2))),
            ]),
            row(3, point!(x: 6.0, y: 5.0).into(), &[
                ("kind", name("road")),
                ("lanes", Some(AttributeValue::Double(1.5))),
            ]),
        ];
        let scheme = TileScheme::web_mercator();

        let a = build_tile("roads", world(), &scheme, &rows).unwrap().unwrap();
        let b = build_tile("roads", world(), &scheme, &rows).unwrap().unwrap();
        assert_eq!(a, b);

        let tile = decode(&a);
        let layer = &tile.layers[0];
        let ids: Vec<_> = layer.features.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
        // road, 2, stop, 1.5
        assert_eq!(layer.values.len(), 4);
        assert_eq!(layer.features[2].tags, vec![0, 0, 1, 3]);
    }

    #[test]
    fn round_trip_keeps_pixels_in_extent() {
        let rows = vec![
            row(1, polygon![
                (x: -40.0, y: -20.0),
                (x: 60.0, y: -20.0),
                (x: 60.0, y: 50.0),
                (x: -40.0, y: 50.0),
            ]
            .into(), &[("kind", name("park"))]),
            row(2, line_string![(x: -170.0, y: -80.0), (x: 170.0, y: 80.0)].into(), &[
                ("kind", name("diagonal")),
            ]),
        ];
        let tile = TileId::new(1, 1, 0).unwrap();

        let bytes = build_tile("mixed", tile, &TileScheme::web_mercator(), &rows)
            .unwrap()
            .unwrap();
        let layer = &decode(&bytes).layers[0];

        assert_eq!(layer.features.len(), 2);
        assert_eq!(layer.keys, vec!["kind"]);
        assert_eq!(layer.values.len(), 2);
        for feature in &layer.features {
            for (x, y) in positions(&feature.geometry) {
                assert!((0..=4096).contains(&x), "x {x} out of extent");
                assert!((0..=4096).contains(&y), "y {y} out of extent");
            }
        }
    }

    #[test]
    fn exterior_rings_have_positive_area_in_tile_space() {
        let donut = polygon!(
            exterior: [(x: -60.0, y: -40.0), (x: 60.0, y: -40.0), (x: 60.0, y: 40.0), (x: -60.0, y: 40.0)],
            interiors: [[(x: -20.0, y: -10.0), (x: 20.0, y: -10.0), (x: 20.0, y: 10.0), (x: -20.0, y: 10.0)]],
        );
        let rows = vec![row(1, donut.into(), &[])];

        let bytes = build_tile("lakes", world(), &TileScheme::web_mercator(), &rows)
            .unwrap()
            .unwrap();
        let feature = &decode(&bytes).layers[0].features[0];
        let points = positions(&feature.geometry);
        assert_eq!(points.len(), 8);

        let area = |ring: &[(i32, i32)]| {
            let line: LineString<f64> = ring.iter().map(|(x, y)| (*x as f64, *y as f64)).collect();
            Polygon::new(line, vec![]).signed_area()
        };
        // y-down, so a positive exterior area means clockwise on screen
        assert!(area(&points[..4]) > 0.0);
        assert!(area(&points[4..]) < 0.0);
    }

    #[test]
    fn features_outside_tile_are_dropped() {
        let rows = vec![
            row(1, point!(x: -100.0, y: 30.0).into(), &[("name", name("west"))]),
            row(2, point!(x: 100.0, y: 30.0).into(), &[("name", name("east"))]),
        ];
        let tile = TileId::new(1, 1, 0).unwrap();

        let bytes = build_tile("places", tile, &TileScheme::web_mercator(), &rows)
            .unwrap()
            .unwrap();
        let layer = &decode(&bytes).layers[0];

        assert_eq!(layer.features.len(), 1);
        assert_eq!(layer.features[0].id, Some(2));
        // values of dropped features are never interned
        assert_eq!(layer.values.len(), 1);
        assert_eq!(layer.values[0].string_value.as_deref(), Some("east"));
    }

    #[test]
    fn null_attribute_emits_no_tag() {
        let rows = vec![
            row(1, point!(x: 1.0, y: 1.0).into(), &[("name", name("a")), ("rank", None)]),
            row(2, point!(x: 2.0, y: 2.0).into(), &[("name", None), ("rank", Some(AttributeValue::Int(4)))]),
            row(3, point!(x: 3.0, y: 3.0).into(), &[("name", name("c")), ("rank", Some(AttributeValue::Int(5)))]),
        ];

        let bytes = build_tile("places", world(), &TileScheme::web_mercator(), &rows)
            .unwrap()
            .unwrap();
        let layer = &decode(&bytes).layers[0];

        assert_eq!(layer.features[0].tags, vec![0, 0]);
        assert_eq!(layer.features[1].tags, vec![1, 1]);
        assert_eq!(layer.features[2].tags, vec![0, 2, 1, 3]);
    }

    #[test]
    fn malformed_blob_only_drops_its_feature() {
        let mut broken = row(1, point!(x: 1.0, y: 1.0).into(), &[]);
        broken.geometry[3] = 6 << 1;
        let rows = vec![broken, row(2, point!(x: 2.0, y: 2.0).into(), &[])];

        let bytes = build_tile("places", world(), &TileScheme::web_mercator(), &rows)
            .unwrap()
            .unwrap();
        let layer = &decode(&bytes).layers[0];

        assert_eq!(layer.features.len(), 1);
        assert_eq!(layer.features[0].id, Some(2));
    }

    #[test]
    fn geometry_collection_fails_the_tile() {
        let mut payload = vec![1u8];
        payload.extend(7u32.to_le_bytes());
        payload.extend(0u32.to_le_bytes());

        let rows = vec![
            row(1, point!(x: 1.0, y: 1.0).into(), &[]),
            SourceRow {
                fid: 2,
                geometry: blob_with_envelope(0, &payload),
                attributes: vec![],
            },
        ];

        let err = build_tile("places", world(), &TileScheme::web_mercator(), &rows).unwrap_err();
        assert!(matches!(
            err,
            TileError::UnsupportedGeometry {
                fid: 2,
                source: DecodeError::GeometryCollection
            }
        ));
    }

    #[test]
    fn heterogeneous_rows_are_rejected() {
        let rows = vec![
            row(1, point!(x: 1.0, y: 1.0).into(), &[("name", name("a"))]),
            row(2, point!(x: 2.0, y: 2.0).into(), &[("title", name("b"))]),
        ];

        let err = build_tile("places", world(), &TileScheme::web_mercator(), &rows).unwrap_err();
        assert!(matches!(err, TileError::HeterogeneousRows { fid: 2 }));
    }

    #[test]
    fn all_rows_dropped_still_yields_a_layer() {
        let rows = vec![row(1, point!(x: -100.0, y: 30.0).into(), &[])];
        let tile = TileId::new(1, 1, 0).unwrap();

        let bytes = build_tile("places", tile, &TileScheme::web_mercator(), &rows)
            .unwrap()
            .unwrap();
        let tile = decode(&bytes);
        assert_eq!(tile.layers[0].name, "places");
        assert!(tile.layers[0].features.is_empty());
    }

    #[test]
    fn vec_source_filters_by_envelope() {
        let mut source = vec![
            row(1, point!(x: -100.0, y: 30.0).into(), &[]),
            row(2, point!(x: 100.0, y: 30.0).into(), &[]),
        ];
        let tile = TileId::new(1, 1, 0).unwrap();

        let bytes = render_tile(&mut source, "places", tile, &TileScheme::web_mercator())
            .unwrap()
            .unwrap();
        assert_eq!(decode(&bytes).layers[0].features.len(), 1);

        let empty = render_tile(&mut source, "places", TileId::new(1, 0, 1).unwrap(), &TileScheme::web_mercator())
            .unwrap();
        assert_eq!(empty, None);
    }

    #[test]
    fn request_errors_become_not_found() {
        let response =
            TileResponse::from_result(Err(TileError::UnknownLayer("rivers".into()))).unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.body, EMPTY_TILE);

        let response = TileResponse::from_result(Err(TileError::InvalidTile {
            zoom: 1,
            column: 2,
            row: 0,
        }))
        .unwrap();
        assert!(!response.is_found());

        let response = TileResponse::from_result(Ok(Some(vec![1, 2, 3]))).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, CONTENT_TYPE);
    }

    #[test]
    fn pipeline_errors_are_passed_on() {
        assert!(matches!(
            TileResponse::from_result(Err(TileError::Timeout)),
            Err(TileError::Timeout)
        ));
        assert!(matches!(
            TileResponse::from_result(Err(TileError::HeterogeneousRows { fid: 4 })),
            Err(TileError::HeterogeneousRows { fid: 4 })
        ));
    }

    #[test]
    fn drop_reasons_read_plainly() {
        assert_eq!(
            DropReason::Transform(Dropped::EmptyAfterClip).to_string(),
            "outside the tile"
        );
        assert_eq!(
            DropReason::Malformed(DecodeError::InvalidEnvelope(6)).to_string(),
            "Invalid envelope indicator: 6"
        );
    }

    #[test]
    fn gzip_round_trip() {
        let data = b"vector tile bytes".repeat(20);
        let compressed = gzip_compress(&data).unwrap();

        let mut decoder = gzip::Decoder::new(compressed.as_slice()).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
