//! SQLite SQL dialect.
//!
//! SQLite features relevant here:
//! - ANSI identifier quoting (`"`)
//! - `?` positional placeholders
//! - No native boolean type (stored as 0/1)
//! - `INTEGER PRIMARY KEY AUTOINCREMENT` row ids
//! - RETURNING (3.35+)

use super::helpers;
use super::SqlDialect;
use crate::sql::token::TokenStream;
use crate::sql::types::DataType;

/// SQLite SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".into()
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_sqlite(limit, offset)
    }

    fn emit_data_type(&self, dt: &DataType) -> String {
        match dt {
            DataType::Integer | DataType::Boolean => "INTEGER".into(),
            DataType::Numeric => "NUMERIC".into(),
            DataType::Text | DataType::Json => "TEXT".into(),
        }
    }

    fn emit_auto_increment_key(&self) -> &'static str {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    }
}
