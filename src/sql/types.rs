//! SQL-level column types for DDL generation.
//!
//! This is distinct from the schema-level `PropertyType`, which describes
//! the semantic type of a property. Each property type maps to exactly one
//! column type; dialects decide how each column type is spelled.

use std::fmt;

use crate::schema::PropertyType;

/// SQL-level data type for DDL generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 64-bit integer (ids and foreign keys).
    Integer,
    /// Numeric affinity: integers stay integers, fractions stay fractional.
    Numeric,
    /// Unbounded text.
    Text,
    /// Boolean (0/1 on SQLite).
    Boolean,
    /// JSON document (TEXT on SQLite).
    Json,
}

impl From<PropertyType> for DataType {
    fn from(ty: PropertyType) -> Self {
        match ty {
            PropertyType::String => DataType::Text,
            PropertyType::Number => DataType::Numeric,
            PropertyType::Boolean => DataType::Boolean,
            PropertyType::Json => DataType::Json,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Integer => "integer",
            DataType::Numeric => "numeric",
            DataType::Text => "text",
            DataType::Boolean => "boolean",
            DataType::Json => "json",
        };
        write!(f, "{}", name)
    }
}
