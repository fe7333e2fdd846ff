//! Runtime host: one schema instance, one connection, one event loop.

use std::collections::{HashMap, HashSet};

use crate::computation::{BoundStateHandle, Computation};
use crate::config::RuntimeSettings;
use crate::error::{Result, SchemaError};
use crate::query::QueryEngine;
use crate::runtime::ComputationFailure;
use crate::schema::{Schema, SchemaGraph};
use crate::sql::{CreateTable, Statement};
use crate::storage::{compile, create_tables, inject_columns, with_transaction, Database, SqliteDatabase};

/// Owns a private copy of the schema, its storage, the query engine and the
/// registered computations.
#[derive(Debug)]
pub struct Controller {
    engine: QueryEngine,
    handles: HashMap<String, BoundStateHandle>,
    ddl: Vec<CreateTable>,
}

impl Controller {
    /// Set up a runtime over `db`.
    ///
    /// Clones the schema template, injects computation-owned columns,
    /// compiles storage, creates tables (when configured) and registers
    /// every computation in declaration order.
    pub fn setup(
        schema: &Schema,
        computations: Vec<Computation>,
        db: impl Database + 'static,
        settings: &RuntimeSettings,
    ) -> Result<Self> {
        let mut graph = SchemaGraph::instantiate(schema);

        let mut names = HashSet::new();
        for computation in &computations {
            if !names.insert(computation.name().to_string()) {
                return Err(SchemaError::DuplicateName(computation.name().to_string()).into());
            }
        }

        let columns: Vec<_> = computations
            .iter()
            .flat_map(Computation::bound_columns)
            .filter(|(owner, property)| graph.property(owner, &property.name).is_none())
            .collect();
        inject_columns(&mut graph, columns)?;
        for computation in &computations {
            computation.validate(&graph)?;
        }

        let storage = compile(&graph)?;
        let ddl = create_tables(&graph, &storage, settings.schema.if_not_exists);

        let db: Box<dyn Database> = Box::new(db);
        if settings.schema.create_tables {
            let dialect = db.dialect();
            with_transaction(db.as_ref(), "setup", || {
                for table in &ddl {
                    let statement = Statement::raw(table.to_sql(dialect));
                    db.run(&format!("create {}", table.name), &statement)?;
                }
                Ok(())
            })?;
            log::info!("created {} table(s)", ddl.len());
        }

        let engine = QueryEngine::new(graph, storage, db);
        let mut handles = HashMap::new();
        for computation in computations {
            if let Some(handle) = computation.handle() {
                handles.insert(computation.name().to_string(), handle);
            }
            engine.subscribe(computation.into_listener());
        }

        Ok(Self {
            engine,
            handles,
            ddl,
        })
    }

    /// Set up a runtime on the SQLite database named by `settings`.
    pub fn open(schema: &Schema, computations: Vec<Computation>, settings: &RuntimeSettings) -> Result<Self> {
        let db = SqliteDatabase::from_settings(settings)?;
        Self::setup(schema, computations, db, settings)
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Handle on the column owned by the named computation.
    pub fn bound_state(&self, computation: &str) -> Option<&BoundStateHandle> {
        self.handles.get(computation)
    }

    /// Computation failures recorded since the last call.
    pub fn take_failures(&self) -> Vec<ComputationFailure> {
        self.engine.bus().take_failures()
    }

    /// CREATE TABLE statements of the compiled schema.
    pub fn ddl(&self) -> &[CreateTable] {
        &self.ddl
    }

    pub fn close(self) -> Result<()> {
        self.engine.database().close().map_err(|source| crate::Error::Backend {
            name: "close".into(),
            sql: String::new(),
            params: Vec::new(),
            source,
        })
    }
}
