use ahash::AHashMap as HashMap;
use rusqlite::types::ValueRef;

use crate::proto::tile;

/// Attribute value of a feature, one of the scalar types a tile can carry.
///
/// Equality is per variant, so `Int(1)`, `Double(1.0)` and `Bool(true)` each
/// get their own slot in a [`ValueTable`] rather than collapsing into one.
#[derive(Debug, Clone)]
pub enum AttributeValue {
    Bool(bool),
    String(String),
    Int(i64),
    Double(f64),
}

impl AttributeValue {
    /// Builds a value from an SQLite cell. SQLite has no boolean storage
    /// class, so the declared column type decides: an integer in a column
    /// declared `BOOLEAN` is a boolean before it is an integer.
    ///
    /// NULL and BLOB cells have no tile representation and yield `None`.
    pub fn from_sql(value: ValueRef<'_>, declared_type: Option<&str>) -> Option<Self> {
        let is_boolean = declared_type.is_some_and(|t| t.eq_ignore_ascii_case("BOOLEAN"));

        match value {
            ValueRef::Null | ValueRef::Blob(_) => None,
            ValueRef::Integer(i) if is_boolean => Some(AttributeValue::Bool(i != 0)),
            ValueRef::Integer(i) => Some(AttributeValue::Int(i)),
            ValueRef::Real(f) => Some(AttributeValue::Double(f)),
            ValueRef::Text(t) => Some(AttributeValue::String(String::from_utf8_lossy(t).into_owned())),
        }
    }

    fn key(&self) -> ValueKey<'_> {
        match self {
            AttributeValue::Bool(b) => ValueKey::Bool(*b),
            AttributeValue::String(s) => ValueKey::String(s),
            AttributeValue::Int(i) => ValueKey::Int(*i),
            // -0.0 == 0.0
            AttributeValue::Double(f) if *f == 0.0 => ValueKey::Double(0f64.to_bits()),
            AttributeValue::Double(f) => ValueKey::Double(f.to_bits()),
        }
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for AttributeValue {}

impl std::hash::Hash for AttributeValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum ValueKey<'a> {
    Bool(bool),
    String(&'a str),
    Int(i64),
    Double(u64),
}

impl From<&AttributeValue> for tile::Value {
    fn from(value: &AttributeValue) -> Self {
        let mut out = tile::Value::default();

        match value {
            AttributeValue::Bool(b) => out.bool_value = Some(*b),
            AttributeValue::String(s) => out.string_value = Some(s.clone()),
            AttributeValue::Int(i) => out.int_value = Some(*i),
            AttributeValue::Double(f) => out.double_value = Some(*f),
        }

        out
    }
}

/// Per tile table of distinct attribute values. Indices follow first
/// insertion.
#[derive(Debug, Default)]
pub struct ValueTable {
    index: HashMap<AttributeValue, u32>,
    values: Vec<tile::Value>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: &AttributeValue) -> u32 {
        if let Some(idx) = self.index.get(value) {
            return *idx;
        }

        let idx = self.values.len() as u32;
        self.values.push(value.into());
        self.index.insert(value.clone(), idx);
        idx
    }

    pub fn into_values(self) -> Vec<tile::Value> {
        self.values
    }
}
