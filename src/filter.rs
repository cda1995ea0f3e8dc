use crate::grid::GeoBounds;

/// Bounding box test against the envelopes stored in a GeoPackage rtree.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BboxFilter {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BboxFilter {
    pub const PREDICATE: &'static str = "minx <= ?1 AND maxx >= ?2 AND miny <= ?3 AND maxy >= ?4";

    /// Values for `?1` to `?4` of [`Self::PREDICATE`].
    pub fn params(&self) -> [f64; 4] {
        [self.east, self.west, self.north, self.south]
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        envelope.min_x <= self.east
            && envelope.max_x >= self.west
            && envelope.min_y <= self.north
            && envelope.max_y >= self.south
    }
}

impl From<GeoBounds> for BboxFilter {
    fn from(bounds: GeoBounds) -> Self {
        BboxFilter {
            west: bounds.west,
            south: bounds.south,
            east: bounds.east,
            north: bounds.north,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// A feature table and the spatial index GeoPackage keeps beside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureTable {
    pub table: String,
    pub geometry_column: String,
}

impl FeatureTable {
    pub const FID_COLUMN: &'static str = "fid";

    pub fn new<T: Into<String>, G: Into<String>>(table: T, geometry_column: G) -> Self {
        Self {
            table: table.into(),
            geometry_column: geometry_column.into(),
        }
    }

    pub fn rtree_table(&self) -> String {
        format!("rtree_{}_{}", self.table, self.geometry_column)
    }

    /// Rows of the table whose rtree envelope passes the bounding box filter.
    pub fn query_sql(&self) -> String {
        let table = quote_ident(&self.table);
        let rtree = quote_ident(&self.rtree_table());
        let fid = quote_ident(Self::FID_COLUMN);

        format!(
            "SELECT {table}.* FROM {table}, {rtree} WHERE {table}.{fid} = {rtree}.id AND {} ORDER BY {table}.{fid}",
            BboxFilter::PREDICATE
        )
    }

    /// Every row of the table, for layers without a spatial index.
    pub fn scan_sql(&self) -> String {
        let table = quote_ident(&self.table);
        let fid = quote_ident(Self::FID_COLUMN);

        format!("SELECT {table}.* FROM {table} ORDER BY {table}.{fid}")
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
