use std::{
    path::Path,
    time::{Duration, Instant},
};

use ahash::AHashMap as HashMap;
use log::debug;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::error::TileError;
use crate::filter::{BboxFilter, FeatureTable, quote_ident};
use crate::pipeline::{RowSource, SourceRow};
use crate::values::AttributeValue;
use crate::wkb;

/// Columns `gpkg_contents` must have for a database to count as a GeoPackage.
const CONTENTS_COLUMNS: [&str; 5] = [
    "table_name",
    "data_type",
    "identifier",
    "description",
    "last_change",
];

const DEFAULT_GEOMETRY_COLUMN: &str = "geom";

/// Progress handler granularity, in SQLite virtual machine instructions.
const PROGRESS_OPS: i32 = 1000;

/// A feature layer listed in `gpkg_contents`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerInfo {
    pub table_name: String,
    pub identifier: Option<String>,
    pub description: Option<String>,
    pub bounds: Option<[f64; 4]>,
    pub geometry_column: String,
}

impl LayerInfo {
    pub fn feature_table(&self) -> FeatureTable {
        FeatureTable::new(self.table_name.clone(), self.geometry_column.clone())
    }
}

pub struct GeoPackage {
    connection: Connection,
    query_timeout: Option<Duration>,
}

impl GeoPackage {
    pub fn open<P: AsRef<Path>>(database: P) -> Result<Self, TileError> {
        let connection =
            Connection::open_with_flags(database, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;

        Self::from_connection(connection)
    }

    /// Wraps an open connection, checking it looks like a GeoPackage.
    pub fn from_connection(connection: Connection) -> Result<Self, TileError> {
        if !is_geopackage(&connection)? {
            return Err(TileError::NotGeoPackage);
        }

        Ok(Self {
            connection,
            query_timeout: None,
        })
    }

    /// Upper bound on the time one feature query may run.
    pub fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.query_timeout = timeout;
    }

    pub fn layers(&self) -> Result<Vec<LayerInfo>, TileError> {
        let mut query = self.connection.prepare_cached(
            "SELECT table_name, identifier, description, min_x, min_y, max_x, max_y \
             FROM gpkg_contents WHERE data_type = 'features' ORDER BY table_name",
        )?;

        let layers = query
            .query_map([], |row| {
                Ok(LayerInfo {
                    table_name: row.get(0)?,
                    identifier: row.get(1)?,
                    description: row.get(2)?,
                    bounds: bounds(row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?),
                    geometry_column: DEFAULT_GEOMETRY_COLUMN.to_string(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        layers
            .into_iter()
            .map(|mut layer| {
                layer.geometry_column = self.geometry_column(&layer.table_name)?;
                Ok(layer)
            })
            .collect()
    }

    /// Looks up a feature layer, failing with `UnknownLayer` for anything
    /// that is not one.
    pub fn layer(&self, name: &str) -> Result<LayerInfo, TileError> {
        let mut query = self.connection.prepare_cached(
            "SELECT table_name, identifier, description, min_x, min_y, max_x, max_y \
             FROM gpkg_contents WHERE table_name = ?1 AND data_type = 'features'",
        )?;

        let layer = query
            .query_row([name], |row| {
                Ok(LayerInfo {
                    table_name: row.get(0)?,
                    identifier: row.get(1)?,
                    description: row.get(2)?,
                    bounds: bounds(row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?),
                    geometry_column: DEFAULT_GEOMETRY_COLUMN.to_string(),
                })
            })
            .optional()?;

        let Some(mut layer) = layer else {
            return Err(TileError::UnknownLayer(name.to_string()));
        };
        layer.geometry_column = self.geometry_column(name)?;

        Ok(layer)
    }

    fn geometry_column(&self, table: &str) -> Result<String, TileError> {
        if !self.has_table("gpkg_geometry_columns")? {
            return Ok(DEFAULT_GEOMETRY_COLUMN.to_string());
        }

        let column = self
            .connection
            .prepare_cached("SELECT column_name FROM gpkg_geometry_columns WHERE table_name = ?1")?
            .query_row([table], |row| row.get(0))
            .optional()?;

        Ok(column.unwrap_or_else(|| DEFAULT_GEOMETRY_COLUMN.to_string()))
    }

    fn has_table(&self, name: &str) -> Result<bool, TileError> {
        let exists = self
            .connection
            .prepare_cached("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?
            .exists([name])?;

        Ok(exists)
    }

    /// Declared column types of a table, keyed by column name.
    fn declared_types(&self, table: &str) -> Result<HashMap<String, String>, TileError> {
        let mut query = self
            .connection
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;

        let types = query
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
            .collect::<Result<_, _>>()?;

        Ok(types)
    }

    fn query_rows(
        &self,
        table: &FeatureTable,
        filter: &BboxFilter,
    ) -> Result<Vec<SourceRow>, TileError> {
        let declared = self.declared_types(&table.table)?;
        let indexed = self.has_table(&table.rtree_table())?;
        if !indexed {
            debug!("{}: no spatial index, scanning every row", table.table);
        }

        let sql = if indexed {
            table.query_sql()
        } else {
            table.scan_sql()
        };
        let mut query = self.connection.prepare_cached(&sql)?;

        let columns: Vec<String> = query.column_names().into_iter().map(String::from).collect();
        let fid_idx = column_index(&columns, FeatureTable::FID_COLUMN)?;
        let geom_idx = column_index(&columns, &table.geometry_column)?;

        let mut rows = if indexed {
            query.query(filter.params())?
        } else {
            query.query([])?
        };
        let mut out = Vec::new();

        while let Some(row) = rows.next()? {
            let fid: i64 = row.get(fid_idx)?;
            let geometry: Vec<u8> = row.get(geom_idx)?;

            // unreadable blobs are kept so the pipeline can report them
            if !indexed && !wkb::blob_envelope(&geometry).is_none_or(|e| filter.matches(&e)) {
                continue;
            }

            let mut attributes = Vec::with_capacity(columns.len() - 2);
            for (idx, name) in columns.iter().enumerate() {
                if idx == fid_idx || idx == geom_idx {
                    continue;
                }
                let declared_type = declared.get(name).map(String::as_str);
                let value = AttributeValue::from_sql(row.get_ref(idx)?, declared_type);
                attributes.push((name.clone(), value));
            }

            out.push(SourceRow {
                fid,
                geometry,
                attributes,
            });
        }

        Ok(out)
    }
}

impl RowSource for GeoPackage {
    fn fetch_rows(&mut self, layer: &str, filter: &BboxFilter) -> Result<Vec<SourceRow>, TileError> {
        let table = self.layer(layer)?.feature_table();

        if let Some(timeout) = self.query_timeout {
            let deadline = Instant::now() + timeout;
            self.connection
                .progress_handler(PROGRESS_OPS, Some(move || Instant::now() > deadline));
        }

        let rows = self.query_rows(&table, filter);

        if self.query_timeout.is_some() {
            self.connection
                .progress_handler(PROGRESS_OPS, None::<fn() -> bool>);
        }

        rows
    }
}

/// Whether `gpkg_contents` exists with the columns GeoPackage requires.
pub fn is_geopackage(connection: &Connection) -> Result<bool, TileError> {
    let mut query = connection.prepare("PRAGMA table_info(gpkg_contents)")?;
    let columns = query
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CONTENTS_COLUMNS
        .iter()
        .all(|required| columns.iter().any(|c| c == required)))
}

fn column_index(columns: &[String], name: &str) -> Result<usize, TileError> {
    columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| TileError::Database(rusqlite::Error::InvalidColumnName(name.to_string())))
}

fn bounds(
    min_x: Option<f64>,
    min_y: Option<f64>,
    max_x: Option<f64>,
    max_y: Option<f64>,
) -> Option<[f64; 4]> {
    Some([min_x?, min_y?, max_x?, max_y?])
}
