//! DDL (Data Definition Language) support.
//!
//! Only what storage compilation needs: `CREATE TABLE` with typed columns,
//! an auto-increment key, and UNIQUE constraints.
//!
//! # Examples
//!
//! ```
//! use relata::sql::ddl::{ColumnDef, CreateTable, DataType};
//! use relata::sql::dialect::Dialect;
//!
//! let table = CreateTable::new("user")
//!     .if_not_exists()
//!     .column(ColumnDef::new("id", DataType::Integer).auto_increment_key())
//!     .column(ColumnDef::new("name", DataType::Text).not_null());
//!
//! assert_eq!(
//!     table.to_sql(Dialect::Sqlite),
//!     "CREATE TABLE IF NOT EXISTS \"user\" (\n  \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n  \"name\" TEXT NOT NULL\n)"
//! );
//! ```

use super::dialect::{Dialect, SqlDialect};
use super::token::{Token, TokenStream};

// Re-export DataType from sql::types for DDL generation
pub use super::types::DataType;

// ============================================================================
// CREATE TABLE
// ============================================================================

/// CREATE TABLE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct CreateTable {
    pub name: String,
    pub if_not_exists: bool,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
}

impl CreateTable {
    /// Create a new CREATE TABLE statement.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            if_not_exists: false,
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Add IF NOT EXISTS clause.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Add a column definition.
    pub fn column(mut self, col: ColumnDef) -> Self {
        self.columns.push(col);
        self
    }

    /// Add multiple column definitions.
    pub fn columns(mut self, cols: impl IntoIterator<Item = ColumnDef>) -> Self {
        self.columns.extend(cols);
        self
    }

    /// Add a table constraint.
    pub fn constraint(mut self, constraint: TableConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Convert to SQL for the given dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Create).space().push(Token::Table).space();

        if self.if_not_exists && dialect.supports_if_not_exists() {
            ts.push(Token::If)
                .space()
                .push(Token::Not)
                .space()
                .push(Token::Exists)
                .space();
        }

        ts.push(Token::Ident(self.name.clone()));
        ts.space().lparen().newline();

        let mut first = true;
        for col in &self.columns {
            if !first {
                ts.comma().newline();
            }
            first = false;
            ts.indent(1);
            ts.append(&col.to_tokens(dialect));
        }

        for constraint in &self.constraints {
            if !first {
                ts.comma().newline();
            }
            first = false;
            ts.indent(1);
            ts.append(&constraint.to_tokens());
        }

        ts.newline().rparen();
        ts
    }
}

// ============================================================================
// Column definition
// ============================================================================

/// Column definition for CREATE TABLE.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub auto_increment_key: bool,
    pub not_null: bool,
    pub unique: bool,
}

impl ColumnDef {
    /// Create a new nullable column definition.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            auto_increment_key: false,
            not_null: false,
            unique: false,
        }
    }

    /// Make this the auto-increment integer primary key.
    pub fn auto_increment_key(mut self) -> Self {
        self.auto_increment_key = true;
        self
    }

    /// Add NOT NULL constraint.
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Add UNIQUE constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Ident(self.name.clone())).space();

        if self.auto_increment_key {
            ts.push(Token::Raw(dialect.emit_auto_increment_key().into()));
            return ts;
        }

        ts.push(Token::Raw(dialect.emit_data_type(&self.data_type)));

        if self.not_null {
            ts.space().push(Token::Not).space().push(Token::Null);
        }
        if self.unique {
            ts.space().push(Token::Unique);
        }

        ts
    }
}

// ============================================================================
// Table constraints
// ============================================================================

/// Table-level constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum TableConstraint {
    Unique { columns: Vec<String> },
}

impl TableConstraint {
    /// Create a UNIQUE constraint.
    pub fn unique(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        TableConstraint::Unique {
            columns: columns.into_iter().map(|c| c.into()).collect(),
        }
    }

    /// Convert to token stream.
    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        match self {
            TableConstraint::Unique { columns } => {
                ts.push(Token::Unique).space().lparen();
                for (i, col) in columns.iter().enumerate() {
                    if i > 0 {
                        ts.comma().space();
                    }
                    ts.push(Token::Ident(col.clone()));
                }
                ts.rparen();
            }
        }
        ts
    }
}
