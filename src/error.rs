//! Crate-wide error types.
//!
//! Errors fall into four families that map onto when they can happen:
//!
//! - [`SchemaError`]: raised while building a schema or setting up a
//!   runtime. Fatal, setup aborts.
//! - [`QueryError`]: a read or write references something the schema does
//!   not know. Raised per call, nothing is written.
//! - [`MutationError`]: a write is rejected (validation, cardinality,
//!   missing rows).
//! - [`ComputationError`]: a reactive computation failed while handling an
//!   event. Collected by the runtime, never returned from the mutating call.
//!
//! Backend failures are wrapped in [`Error::Backend`] together with the SQL
//! and parameters of the failing statement.

use crate::config::SettingsError;
use crate::schema::PropertyType;
use crate::sql::SqlValue;
use crate::storage::BackendError;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Computation(#[from] ComputationError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("statement '{name}' failed: {source}\nSQL: {sql}\nparams: {params:?}")]
    Backend {
        name: String,
        sql: String,
        params: Vec<SqlValue>,
        #[source]
        source: BackendError,
    },
}

/// Errors raised while building a schema or setting up a runtime.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown entity or relation '{0}'")]
    UnknownRecord(String),

    #[error("'{0}' is defined more than once")]
    DuplicateName(String),

    #[error("'{record}' defines '{property}' more than once")]
    DuplicateProperty { record: String, property: String },

    #[error("'{record}' uses the reserved property name '{property}'")]
    ReservedProperty { record: String, property: String },

    #[error("filtered record '{record}' has unknown base '{base}'")]
    MissingBase { record: String, base: String },

    #[error("base chain of '{0}' is cyclic")]
    CyclicBase(String),

    #[error("filtered record '{record}' cannot declare its own properties")]
    FilteredProperties { record: String },

    #[error("'{record}' is not an entity")]
    NotAnEntity { record: String },

    #[error("'{record}' is not a relation")]
    NotARelation { record: String },

    #[error("invalid filter path '{path}' on '{record}': {reason}")]
    FilterPath {
        record: String,
        path: String,
        reason: String,
    },

    #[error("invalid computation '{computation}': {reason}")]
    InvalidComputation { computation: String, reason: String },
}

/// Errors raised by a read or write that references unknown schema items.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("unknown entity or relation '{0}'")]
    UnknownRecord(String),

    #[error("'{record}' has no field '{field}'")]
    UnknownField { record: String, field: String },

    #[error("'{segment}' on '{record}' cannot be traversed")]
    NotNavigable { record: String, segment: String },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("invalid attribute query: {0}")]
    InvalidAttributeQuery(String),

    #[error("cannot order '{record}' by '{key}': the path reaches many records")]
    ManyValuedOrder { record: String, key: String },
}

/// Errors raised when a write is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MutationError {
    #[error("'{record}' requires a value for '{property}'")]
    MissingRequired { record: String, property: String },

    #[error("'{record}.{property}' expects {expected}, got {found}")]
    TypeMismatch {
        record: String,
        property: String,
        expected: PropertyType,
        found: String,
    },

    #[error("'{record}' has no writable field '{key}'")]
    UnknownKey { record: String, key: String },

    #[error("relation '{relation}' violates its cardinality: {reason}")]
    Cardinality { relation: String, reason: String },

    #[error("{record} with id {id} does not exist")]
    NotFound { record: String, id: i64 },

    #[error("invalid payload for '{record}': {reason}")]
    InvalidPayload { record: String, reason: String },
}

/// Errors raised inside a reactive computation.
#[derive(Debug, thiserror::Error)]
pub enum ComputationError {
    #[error("computation '{computation}' failed: {source}")]
    Handler {
        computation: String,
        #[source]
        source: Box<Error>,
    },

    #[error("computation '{computation}' produced an invalid result: {reason}")]
    InvalidResult { computation: String, reason: String },
}

impl ComputationError {
    /// Wrap a crate error raised while a computation handled an event.
    pub fn handler(computation: impl Into<String>, source: Error) -> Self {
        ComputationError::Handler {
            computation: computation.into(),
            source: Box::new(source),
        }
    }
}
