//! DML (Data Manipulation Language) support.
//!
//! This module provides types and builders for generating DML statements
//! (INSERT, UPDATE, DELETE). Values always travel as bound parameters.
//!
//! # Examples
//!
//! ```
//! use relata::sql::dml::{Delete, Insert, Update};
//! use relata::sql::dialect::Dialect;
//! use relata::sql::expr::{col, param, ExprExt};
//!
//! let insert = Insert::into("user")
//!     .columns(["name", "email"])
//!     .values([param("Alice"), param("alice@example.com")])
//!     .returning([col("id")]);
//! assert_eq!(
//!     insert.to_statement(Dialect::Postgres).sql,
//!     "INSERT INTO \"user\" (\"name\", \"email\") VALUES ($1, $2) RETURNING \"id\""
//! );
//!
//! let update = Update::table("user")
//!     .set("name", param("Bob"))
//!     .filter(col("id").eq(1i64));
//! assert_eq!(update.to_statement(Dialect::Sqlite).params.len(), 2);
//!
//! let delete = Delete::from("user").filter(col("id").eq(1i64));
//! assert_eq!(
//!     delete.to_statement(Dialect::Sqlite).sql,
//!     "DELETE FROM \"user\" WHERE \"id\" = ?"
//! );
//! ```

use super::dialect::{Dialect, SqlDialect};
use super::expr::{Expr, ExprExt};
use super::token::{Statement, Token, TokenStream};

// ============================================================================
// INSERT
// ============================================================================

/// INSERT statement (single row).
#[derive(Debug, Clone)]
#[must_use = "DML statements have no effect until rendered with to_statement()"]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Expr>,
    pub returning: Vec<Expr>,
}

impl Insert {
    /// Create a new INSERT statement.
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
            returning: Vec::new(),
        }
    }

    /// Set the columns to insert.
    pub fn columns(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns = cols.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Set the row of values.
    pub fn values(mut self, vals: impl IntoIterator<Item = impl Into<Expr>>) -> Self {
        self.values = vals.into_iter().map(|v| v.into()).collect();
        self
    }

    /// Add RETURNING clause.
    pub fn returning(mut self, exprs: impl IntoIterator<Item = impl Into<Expr>>) -> Self {
        self.returning = exprs.into_iter().map(|e| e.into()).collect();
        self
    }

    pub fn to_statement(&self, dialect: Dialect) -> Statement {
        self.to_tokens(dialect).render(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Insert).space().push(Token::Into).space();
        ts.push(Token::Ident(self.table.clone()));

        if self.columns.is_empty() {
            // A row made only of defaults
            ts.space().push(Token::Default).space().push(Token::Values);
        } else {
            ts.space().lparen();
            for (i, col) in self.columns.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.push(Token::Ident(col.clone()));
            }
            ts.rparen();

            ts.space().push(Token::Values).space().lparen();
            for (i, val) in self.values.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.append(&val.to_tokens_for_dialect(dialect));
            }
            ts.rparen();
        }

        emit_returning(&mut ts, &self.returning, dialect);
        ts
    }
}

// ============================================================================
// UPDATE
// ============================================================================

/// UPDATE statement.
#[derive(Debug, Clone)]
#[must_use = "DML statements have no effect until rendered with to_statement()"]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub where_clause: Option<Expr>,
    pub returning: Vec<Expr>,
}

impl Update {
    /// Create a new UPDATE statement.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            where_clause: None,
            returning: Vec::new(),
        }
    }

    /// Add a column assignment.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Add RETURNING clause.
    pub fn returning(mut self, exprs: impl IntoIterator<Item = impl Into<Expr>>) -> Self {
        self.returning = exprs.into_iter().map(|e| e.into()).collect();
        self
    }

    pub fn to_statement(&self, dialect: Dialect) -> Statement {
        self.to_tokens(dialect).render(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Update).space();
        ts.push(Token::Ident(self.table.clone()));

        ts.space().push(Token::Set).space();
        for (i, (col, val)) in self.assignments.iter().enumerate() {
            if i > 0 {
                ts.comma().space();
            }
            ts.push(Token::Ident(col.clone()))
                .space()
                .push(Token::Eq)
                .space();
            ts.append(&val.to_tokens_for_dialect(dialect));
        }

        if let Some(ref where_expr) = self.where_clause {
            ts.space().push(Token::Where).space();
            ts.append(&where_expr.to_tokens_for_dialect(dialect));
        }

        emit_returning(&mut ts, &self.returning, dialect);
        ts
    }
}

// ============================================================================
// DELETE
// ============================================================================

/// DELETE statement.
#[derive(Debug, Clone)]
#[must_use = "DML statements have no effect until rendered with to_statement()"]
pub struct Delete {
    pub table: String,
    pub where_clause: Option<Expr>,
}

impl Delete {
    /// Create a new DELETE statement.
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: None,
        }
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn to_statement(&self, dialect: Dialect) -> Statement {
        self.to_tokens(dialect).render(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Delete).space().push(Token::From).space();
        ts.push(Token::Ident(self.table.clone()));

        if let Some(ref where_expr) = self.where_clause {
            ts.space().push(Token::Where).space();
            ts.append(&where_expr.to_tokens_for_dialect(dialect));
        }

        ts
    }
}

fn emit_returning(ts: &mut TokenStream, returning: &[Expr], dialect: Dialect) {
    if returning.is_empty() || !dialect.supports_returning() {
        return;
    }
    ts.space().push(Token::Returning).space();
    for (i, expr) in returning.iter().enumerate() {
        if i > 0 {
            ts.comma().space();
        }
        ts.append(&expr.to_tokens_for_dialect(dialect));
    }
}
