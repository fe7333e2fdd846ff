//! Physical backend contract and its SQLite implementation.
//!
//! The engine never talks to a driver directly. It renders [`Statement`]s and
//! hands them to a [`Database`], which executes them, returns rows, and
//! brackets groups of statements in named savepoints. Every statement goes
//! through the backend's [`SqlLogger`].

use std::cell::RefCell;
use std::path::Path;

use rusqlite::types::{ToSqlOutput, Type, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};

use crate::config::RuntimeSettings;
use crate::error::Error;
use crate::sql::{Dialect, SqlDialect, SqlValue, Statement};

/// Errors raised by a backend driver.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database is closed")]
    Closed,
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl QueryResult {
    /// Position of a column by name.
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

/// What kind of statement a log entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Execute,
    Query,
    Transaction,
}

/// One logged statement.
#[derive(Debug, Clone)]
pub struct SqlLogEntry<'a> {
    pub kind: StatementKind,
    pub name: &'a str,
    pub sql: &'a str,
    pub params: &'a [SqlValue],
    pub error: Option<String>,
}

/// Receives every statement a backend runs.
pub trait SqlLogger {
    fn log(&self, entry: &SqlLogEntry<'_>);
}

/// Forwards statements to the `log` facade under `relata::sql`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSqlLogger;

impl SqlLogger for LogSqlLogger {
    fn log(&self, entry: &SqlLogEntry<'_>) {
        match &entry.error {
            Some(error) => log::error!(
                target: "relata::sql",
                "{:?} '{}' failed: {}\n{}\nparams: {:?}",
                entry.kind,
                entry.name,
                error,
                entry.sql,
                entry.params
            ),
            None => log::debug!(
                target: "relata::sql",
                "{:?} '{}': {} {:?}",
                entry.kind,
                entry.name,
                entry.sql,
                entry.params
            ),
        }
    }
}

/// Discards every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSqlLogger;

impl SqlLogger for NoopSqlLogger {
    fn log(&self, _entry: &SqlLogEntry<'_>) {}
}

/// Minimal SQL backend contract.
///
/// `name` labels a statement for logging and error reports.
pub trait Database {
    /// Run a statement that returns no rows; returns the affected row count.
    fn execute(&self, name: &str, statement: &Statement) -> Result<usize, BackendError>;

    /// Run a statement that returns rows (SELECT, or DML with RETURNING).
    fn query(&self, name: &str, statement: &Statement) -> Result<QueryResult, BackendError>;

    /// Open a named savepoint.
    fn begin(&self, name: &str) -> Result<(), BackendError>;

    /// Release a named savepoint.
    fn commit(&self, name: &str) -> Result<(), BackendError>;

    /// Undo everything since a named savepoint and release it.
    fn rollback(&self, name: &str) -> Result<(), BackendError>;

    fn close(&self) -> Result<(), BackendError>;

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }
}

impl<'d> dyn Database + 'd {
    /// [`Database::query`] with failures wrapped as [`Error::Backend`].
    pub fn fetch(&self, name: &str, statement: &Statement) -> crate::Result<QueryResult> {
        self.query(name, statement)
            .map_err(|source| backend_error(name, statement, source))
    }

    /// [`Database::execute`] with failures wrapped as [`Error::Backend`].
    pub fn run(&self, name: &str, statement: &Statement) -> crate::Result<usize> {
        self.execute(name, statement)
            .map_err(|source| backend_error(name, statement, source))
    }
}

fn backend_error(name: &str, statement: &Statement, source: BackendError) -> Error {
    Error::Backend {
        name: name.to_string(),
        sql: statement.sql.clone(),
        params: statement.params.clone(),
        source,
    }
}

/// Run `f` inside savepoint `name`, rolling back on any error.
pub fn with_transaction<T>(
    db: &dyn Database,
    name: &str,
    f: impl FnOnce() -> crate::Result<T>,
) -> crate::Result<T> {
    db.begin(name).map_err(|e| transaction_error(name, "SAVEPOINT", e))?;
    match f() {
        Ok(value) => {
            db.commit(name)
                .map_err(|e| transaction_error(name, "RELEASE", e))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = db.rollback(name) {
                log::error!("rollback of '{}' failed: {}", name, rollback_err);
            }
            Err(err)
        }
    }
}

fn transaction_error(name: &str, verb: &str, source: BackendError) -> Error {
    backend_error(name, &Statement::raw(format!("{} {}", verb, name)), source)
}

/// SQLite backend over a single `rusqlite` connection.
pub struct SqliteDatabase {
    conn: RefCell<Option<Connection>>,
    logger: Box<dyn SqlLogger>,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("open", &self.conn.borrow().is_some())
            .finish()
    }
}

impl SqliteDatabase {
    /// Open or create a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let conn = Connection::open(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    /// Open the database named by runtime settings.
    pub fn from_settings(settings: &RuntimeSettings) -> crate::Result<Self> {
        let path = settings.database.resolved_path()?;
        let db = match &path {
            Some(path) => Self::open(path),
            None => Self::open_in_memory(),
        }
        .map_err(|source| Error::Backend {
            name: "open".into(),
            sql: String::new(),
            params: Vec::new(),
            source,
        })?;
        Ok(if settings.logging.log_statements {
            db
        } else {
            db.with_logger(NoopSqlLogger)
        })
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: RefCell::new(Some(conn)),
            logger: Box::new(LogSqlLogger),
        }
    }

    /// Replace the statement logger.
    pub fn with_logger(mut self, logger: impl SqlLogger + 'static) -> Self {
        self.logger = Box::new(logger);
        self
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, BackendError> {
        let guard = self.conn.borrow();
        let conn = guard.as_ref().ok_or(BackendError::Closed)?;
        Ok(f(conn)?)
    }

    fn logged<T>(
        &self,
        kind: StatementKind,
        name: &str,
        statement: &Statement,
        result: Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        self.logger.log(&SqlLogEntry {
            kind,
            name,
            sql: &statement.sql,
            params: &statement.params,
            error: result.as_ref().err().map(|e| e.to_string()),
        });
        result
    }

    fn savepoint(&self, name: &str, sql: String) -> Result<(), BackendError> {
        let statement = Statement::raw(sql);
        let result = self.with_conn(|conn| conn.execute_batch(&statement.sql));
        self.logged(StatementKind::Transaction, name, &statement, result)
    }
}

impl Database for SqliteDatabase {
    fn execute(&self, name: &str, statement: &Statement) -> Result<usize, BackendError> {
        let result = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&statement.sql)?;
            stmt.execute(params_from_iter(statement.params.iter()))
        });
        self.logged(StatementKind::Execute, name, statement, result)
    }

    fn query(&self, name: &str, statement: &Statement) -> Result<QueryResult, BackendError> {
        let result = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&statement.sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let width = columns.len();
            let mut rows = stmt.query(params_from_iter(statement.params.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(from_value_ref(i, &columns[i], row.get_ref(i)?)?);
                }
                out.push(values);
            }
            Ok(QueryResult { columns, rows: out })
        });
        self.logged(StatementKind::Query, name, statement, result)
    }

    fn begin(&self, name: &str) -> Result<(), BackendError> {
        let ident = Dialect::Sqlite.quote_identifier(name);
        self.savepoint(name, format!("SAVEPOINT {}", ident))
    }

    fn commit(&self, name: &str) -> Result<(), BackendError> {
        let ident = Dialect::Sqlite.quote_identifier(name);
        self.savepoint(name, format!("RELEASE SAVEPOINT {}", ident))
    }

    fn rollback(&self, name: &str) -> Result<(), BackendError> {
        let ident = Dialect::Sqlite.quote_identifier(name);
        self.savepoint(
            name,
            format!("ROLLBACK TO SAVEPOINT {ident}; RELEASE SAVEPOINT {ident}"),
        )
    }

    fn close(&self) -> Result<(), BackendError> {
        match self.conn.borrow_mut().take() {
            Some(conn) => conn.close().map_err(|(_, e)| BackendError::Sqlite(e)),
            None => Ok(()),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(i) => ToSqlOutput::from(*i),
            SqlValue::Real(f) => ToSqlOutput::from(*f),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Bool(b) => ToSqlOutput::from(i64::from(*b)),
        })
    }
}

/// No property type is stored as a blob, so blob cells are rejected.
fn from_value_ref(index: usize, column: &str, value: ValueRef<'_>) -> rusqlite::Result<SqlValue> {
    match value {
        ValueRef::Null => Ok(SqlValue::Null),
        ValueRef::Integer(i) => Ok(SqlValue::Integer(i)),
        ValueRef::Real(f) => Ok(SqlValue::Real(f)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|text| SqlValue::Text(text.to_string()))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))),
        ValueRef::Blob(_) => Err(rusqlite::Error::InvalidColumnType(
            index,
            column.to_string(),
            Type::Blob,
        )),
    }
}
