use std::fmt;

/// Failure to read a single GeoPackage geometry blob.
#[derive(Debug)]
pub enum DecodeError {
    BadMagic([u8; 2]),
    InvalidEnvelope(u8),
    UnsupportedGeometry(u32),
    GeometryCollection,
    Truncated(std::io::Error),
    Wkb(geozero::error::GeozeroError),
}

impl DecodeError {
    /// Unsupported geometry means the dataset itself is wrong, so it aborts
    /// the whole tile instead of just the feature.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DecodeError::UnsupportedGeometry(_) | DecodeError::GeometryCollection
        )
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Truncated(e) => Some(e),
            DecodeError::Wkb(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::BadMagic(magic) => {
                write!(f, "Unexpected geometry blob magic: {:#04x} {:#04x}", magic[0], magic[1])
            }
            DecodeError::InvalidEnvelope(class) => {
                write!(f, "Invalid envelope indicator: {class}")
            }
            DecodeError::UnsupportedGeometry(code) => {
                write!(f, "Cannot encode unknown geometry type: {code}")
            }
            DecodeError::GeometryCollection => {
                write!(f, "Encoding geometry collections not supported")
            }
            DecodeError::Truncated(e) => write!(f, "Truncated geometry blob: {e}"),
            DecodeError::Wkb(e) => write!(f, "Malformed WKB payload: {e}"),
        }
    }
}

impl From<geozero::error::GeozeroError> for DecodeError {
    fn from(value: geozero::error::GeozeroError) -> Self {
        DecodeError::Wkb(value)
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        DecodeError::Truncated(value)
    }
}

/// Request level failures of the tile pipeline.
#[derive(Debug)]
pub enum TileError {
    NotGeoPackage,
    UnknownLayer(String),
    InvalidTile { zoom: u8, column: u32, row: u32 },
    UnsupportedGeometry { fid: i64, source: DecodeError },
    HeterogeneousRows { fid: i64 },
    Timeout,
    Database(rusqlite::Error),
}

impl TileError {
    /// Errors the caller should report as "not found" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TileError::NotGeoPackage | TileError::UnknownLayer(_) | TileError::InvalidTile { .. }
        )
    }
}

impl std::error::Error for TileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TileError::UnsupportedGeometry { source, .. } => Some(source),
            TileError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for TileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileError::NotGeoPackage => write!(f, "Not a valid geopackage database"),
            TileError::UnknownLayer(layer) => write!(f, "Unknown layer: {layer}"),
            TileError::InvalidTile { zoom, column, row } => {
                write!(f, "Tile {zoom}/{column}/{row} is outside the tile grid")
            }
            TileError::UnsupportedGeometry { fid, source } => {
                write!(f, "Feature {fid}: {source}")
            }
            TileError::HeterogeneousRows { fid } => {
                write!(f, "Feature {fid} has different columns than the first row")
            }
            TileError::Timeout => write!(f, "Feature query timed out"),
            TileError::Database(e) => write!(f, "Database error: {e}"),
        }
    }
}

impl From<rusqlite::Error> for TileError {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: rusqlite::ErrorCode::OperationInterrupted,
                    ..
                },
                _,
            ) => TileError::Timeout,
            e => TileError::Database(e),
        }
    }
}
