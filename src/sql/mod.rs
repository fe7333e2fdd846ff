//! SQL generation module.
//!
//! This module provides a type-safe SQL builder that renders dialect-specific
//! SQL with bound parameters. It includes:
//!
//! - [`query`] - SELECT query builder
//! - [`expr`] - Expression AST and builder DSL
//! - [`ddl`] - CREATE TABLE
//! - [`dml`] - INSERT, UPDATE, DELETE
//! - [`token`] - Token types and rendered [`Statement`]s
//! - [`value`] - Bound parameter values
//! - [`dialect`] - SQL dialect implementations

pub mod ddl;
pub mod dialect;
pub mod dml;
pub mod expr;
pub mod query;
pub mod token;
pub mod types;
pub mod value;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types at the sql module level
pub use dialect::{Dialect, SqlDialect};
pub use expr::{and_all, col, param, table_col, BinaryOperator, Expr, ExprExt};
pub use query::{Join, JoinType, LimitOffset, OrderByExpr, Query, SelectExpr, SortDir, TableRef};
pub use token::{Statement, Token, TokenStream};
pub use value::SqlValue;

pub use ddl::{ColumnDef, CreateTable, DataType, TableConstraint};
pub use dml::{Delete, Insert, Update};
