use serde::Serialize;
use url::Url;

use crate::geopackage::LayerInfo;

pub const TILEJSON_VERSION: &str = "2.2.0";

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8001/-/gpkg/";

/// TileJSON document describing one GeoPackage layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileJson {
    pub tilejson: &'static str,
    pub name: Option<String>,
    pub description: Option<String>,
    pub scheme: &'static str,
    pub tiles: Vec<String>,
    pub bounds: Option<[f64; 4]>,
}

impl TileJson {
    /// Tiles are served below `base` as `<database>/<layer>/{z}/{x}/{y}.mvt`.
    pub fn new(base: &Url, database: &str, layer: &LayerInfo) -> Result<Self, url::ParseError> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let layer_url = base.join(&format!("{}/{}/", database, layer.table_name))?;
        // placeholders must not be percent encoded
        let template = format!("{}{{z}}/{{x}}/{{y}}.mvt", layer_url);

        Ok(Self {
            tilejson: TILEJSON_VERSION,
            name: layer.identifier.clone(),
            description: layer.description.clone(),
            scheme: "xyz",
            tiles: vec![template],
            bounds: layer.bounds,
        })
    }
}
