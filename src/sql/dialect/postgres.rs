//! PostgreSQL SQL dialect.
//!
//! PostgreSQL features:
//! - ANSI identifier quoting (`"`)
//! - Numbered placeholders (`$1`, `$2`, ...)
//! - Native boolean type (true/false)
//! - RETURNING clause
//! - BIGSERIAL keys and JSONB columns

use super::helpers;
use super::SqlDialect;
use crate::sql::types::DataType;

/// PostgreSQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    // Uses default emit_limit_offset (LIMIT ... OFFSET ...)

    fn emit_data_type(&self, dt: &DataType) -> String {
        match dt {
            DataType::Integer => "BIGINT".into(),
            DataType::Numeric => "NUMERIC".into(),
            DataType::Text => "TEXT".into(),
            DataType::Boolean => "BOOLEAN".into(),
            DataType::Json => "JSONB".into(),
        }
    }

    fn emit_auto_increment_key(&self) -> &'static str {
        "BIGSERIAL PRIMARY KEY"
    }
}
