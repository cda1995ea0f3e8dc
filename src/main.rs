use std::{
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use url::Url;

use crate::{
    error::TileError,
    geopackage::GeoPackage,
    grid::{Navigation, TileId},
    pipeline::{TileResponse, gzip_compress, render_tile},
    projection::TileScheme,
    tilejson::TileJson,
};

mod encoder;
mod error;
mod filter;
mod geopackage;
mod grid;
mod pipeline;
mod projection;
#[allow(dead_code)]
mod proto {
    include!(concat!(env!("OUT_DIR"), "/vector_tile.rs"));
}
mod tilejson;
mod transform;
mod values;
mod wkb;

/// Serve Mapbox vector tiles from GeoPackage feature tables
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one tile of a layer. Exits with status 4 when the tile is
    /// not found; the empty tile is written in that case.
    Tile {
        /// Path to a GeoPackage
        gpkg: PathBuf,
        /// Feature table to render
        layer: String,
        z: u8,
        x: u32,
        y: u32,
        /// Rows are numbered from the south, as in TMS
        #[arg(long)]
        tms: bool,
        /// Gzip the tile body
        #[arg(long)]
        gzip: bool,
        /// Abort the feature query after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Write the tile here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the feature layers of a GeoPackage as JSON
    Layers { gpkg: PathBuf },
    /// Print the TileJSON document of a layer
    Tilejson {
        gpkg: PathBuf,
        layer: String,
        #[arg(long, default_value = tilejson::DEFAULT_BASE_URL)]
        base_url: Url,
    },
    /// Print the tile and neighbouring points for a map position
    Locate {
        #[arg(allow_hyphen_values = true)]
        lat: f64,
        #[arg(allow_hyphen_values = true)]
        lon: f64,
        zoom: u8,
        #[arg(long, default_value_t = 0)]
        min_zoom: u8,
        #[arg(long, default_value_t = 19)]
        max_zoom: u8,
    },
}

const NOT_FOUND_EXIT: u8 = 4;

fn fetch_tile(
    gpkg: &Path,
    layer: &str,
    tile: TileId,
    timeout: Option<Duration>,
) -> Result<Option<Vec<u8>>, TileError> {
    let mut source = GeoPackage::open(gpkg)?;
    source.set_query_timeout(timeout);

    render_tile(&mut source, layer, tile, &TileScheme::web_mercator())
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Tile {
            gpkg,
            layer,
            z,
            x,
            y,
            tms,
            gzip,
            timeout_ms,
            output,
        } => {
            let tile = if tms {
                TileId::from_tms(z, x, y)
            } else {
                TileId::new(z, x, y)
            };
            let timeout = timeout_ms.map(Duration::from_millis);
            let result = tile.and_then(|tile| fetch_tile(&gpkg, &layer, tile, timeout));

            let response = TileResponse::from_result(result)
                .with_context(|| format!("rendering {layer} {z}/{x}/{y} from {}", gpkg.display()))?;
            log::info!(
                "{} {}/{}/{} {} {} ({} bytes)",
                layer,
                z,
                x,
                y,
                response.status,
                response.content_type,
                response.body.len()
            );
            let found = response.is_found();

            // the empty tile is already compressed
            let body = if gzip && found {
                gzip_compress(&response.body)?
            } else {
                response.body
            };

            match output {
                Some(path) => std::fs::write(&path, &body)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&body)?;
                    stdout.flush()?;
                }
            }

            if !found {
                return Ok(ExitCode::from(NOT_FOUND_EXIT));
            }
        }
        Command::Layers { gpkg } => {
            let source = GeoPackage::open(&gpkg)
                .with_context(|| format!("opening {}", gpkg.display()))?;
            println!("{}", serde_json::to_string_pretty(&source.layers()?)?);
        }
        Command::Tilejson {
            gpkg,
            layer,
            base_url,
        } => {
            let source = GeoPackage::open(&gpkg)
                .with_context(|| format!("opening {}", gpkg.display()))?;
            let info = source.layer(&layer)?;
            let database = gpkg
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            let doc = TileJson::new(&base_url, &database, &info)?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Command::Locate {
            lat,
            lon,
            zoom,
            min_zoom,
            max_zoom,
        } => {
            if min_zoom > max_zoom {
                anyhow::bail!("min zoom {min_zoom} is above max zoom {max_zoom}");
            }
            let nav = Navigation::locate(lat, lon, zoom, min_zoom, max_zoom);
            println!("{}", serde_json::to_string_pretty(&nav)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}
