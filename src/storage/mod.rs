//! Physical storage: schema compilation, table mapping and the backend.

mod backend;
mod compiler;
mod map;

pub use backend::{
    with_transaction, BackendError, Database, LogSqlLogger, NoopSqlLogger, QueryResult,
    SqlLogEntry, SqlLogger, SqliteDatabase, StatementKind,
};
pub use compiler::{compile, create_tables, inject_columns};
pub use map::{
    ColumnMap, ForeignKey, RecordStorage, RelationMap, RelationStorage, StorageMap, TableMap,
};
