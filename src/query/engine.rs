//! Query engine: reads, writes and the mutation event stream.
//!
//! Every public operation works on any record name, entity or relation,
//! filtered or not. Writes run inside a savepoint, collect their mutation
//! events, and publish them on the engine's [`EventBus`] once the savepoint
//! is released. Listeners receive `&QueryEngine` and may write again; those
//! writes' events join the queue behind the ones being dispatched.

use std::rc::Rc;

use serde_json::Value;

use super::attribute::AttributeQuery;
use super::event::MutationEvent;
use super::fetch::Fetcher;
use super::match_expr::MatchExp;
use super::modifier::Modifier;
use super::Record;
use crate::error::{MutationError, QueryError, Result};
use crate::runtime::{EventBus, FnListener, MutationListener};
use crate::schema::{RecordKind, SchemaGraph, SOURCE, TARGET};
use crate::sql::Dialect;
use crate::storage::{with_transaction, Database, StorageMap};

/// Executes reads and writes against one compiled schema and backend.
pub struct QueryEngine {
    pub(crate) graph: SchemaGraph,
    pub(crate) storage: StorageMap,
    pub(crate) db: Box<dyn Database>,
    pub(crate) bus: EventBus,
    pub(crate) dialect: Dialect,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("records", &self.graph.names())
            .field("dialect", &self.dialect)
            .finish()
    }
}

impl QueryEngine {
    pub fn new(graph: SchemaGraph, storage: StorageMap, db: Box<dyn Database>) -> Self {
        let dialect = db.dialect();
        Self {
            graph,
            storage,
            db,
            bus: EventBus::new(),
            dialect,
        }
    }

    pub fn graph(&self) -> &SchemaGraph {
        &self.graph
    }

    pub fn storage(&self) -> &StorageMap {
        &self.storage
    }

    pub fn database(&self) -> &dyn Database {
        self.db.as_ref()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub(crate) fn fetcher(&self) -> Fetcher<'_> {
        Fetcher {
            graph: &self.graph,
            storage: &self.storage,
            db: self.db.as_ref(),
            dialect: self.dialect,
        }
    }

    pub(crate) fn kind_of(&self, record: &str) -> std::result::Result<RecordKind, QueryError> {
        self.graph
            .kind(record)
            .ok_or_else(|| QueryError::UnknownRecord(record.to_string()))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Records matching `matcher`, hydrated per `attributes`.
    ///
    /// Relation names are accepted and behave like [`QueryEngine::find_relation_by_name`].
    pub fn find(
        &self,
        record: &str,
        matcher: Option<MatchExp>,
        modifier: Option<Modifier>,
        attributes: &AttributeQuery,
    ) -> Result<Vec<Record>> {
        self.kind_of(record)?;
        self.fetcher().find(
            record,
            matcher.as_ref(),
            &modifier.unwrap_or_default(),
            attributes,
        )
    }

    /// First record matching `matcher`.
    pub fn find_one(
        &self,
        record: &str,
        matcher: Option<MatchExp>,
        modifier: Option<Modifier>,
        attributes: &AttributeQuery,
    ) -> Result<Option<Record>> {
        let modifier = modifier.unwrap_or_default().limit(1);
        Ok(self
            .find(record, matcher, Some(modifier), attributes)?
            .into_iter()
            .next())
    }

    /// Relation records, with `source` and `target` navigable like any field.
    pub fn find_relation_by_name(
        &self,
        relation: &str,
        matcher: Option<MatchExp>,
        modifier: Option<Modifier>,
        attributes: &AttributeQuery,
    ) -> Result<Vec<Record>> {
        self.expect_relation(relation)?;
        self.find(relation, matcher, modifier, attributes)
    }

    pub(crate) fn expect_relation(&self, name: &str) -> Result<()> {
        match self.kind_of(name)? {
            RecordKind::Relation => Ok(()),
            RecordKind::Entity => Err(crate::error::SchemaError::NotARelation {
                record: name.to_string(),
            }
            .into()),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create one record. Relation names expect `source` and `target` references.
    pub fn create(&self, record: &str, data: Value) -> Result<Record> {
        let data = payload(record, data)?;
        if self.kind_of(record)? == RecordKind::Relation {
            let source = reference(record, &data, SOURCE)?;
            let target = reference(record, &data, TARGET)?;
            let mut properties = data;
            properties.remove(SOURCE);
            properties.remove(TARGET);
            return self.add_relation_by_name_by_id(record, source, target, Value::Object(properties));
        }
        self.write(&format!("create_{}", record), |events| {
            self.create_entity(record, &data, events)
                .map(|(_, created)| created)
        })
    }

    /// Update every record matching `matcher`; returns the new states.
    pub fn update(&self, record: &str, matcher: MatchExp, data: Value) -> Result<Vec<Record>> {
        if self.kind_of(record)? == RecordKind::Relation {
            return self.update_relation_by_name(record, matcher, data);
        }
        let data = payload(record, data)?;
        self.write(&format!("update_{}", record), |events| {
            self.update_entities(record, &matcher, &data, events)
        })
    }

    /// Delete every record matching `matcher`; returns the deleted rows.
    pub fn delete(&self, record: &str, matcher: MatchExp) -> Result<Vec<Record>> {
        if self.kind_of(record)? == RecordKind::Relation {
            return self.remove_relation_by_name(record, matcher);
        }
        self.write(&format!("delete_{}", record), |events| {
            self.delete_entities(record, &matcher, events)
        })
    }

    /// Update relation properties of every link matching `matcher`.
    pub fn update_relation_by_name(
        &self,
        relation: &str,
        matcher: MatchExp,
        data: Value,
    ) -> Result<Vec<Record>> {
        self.expect_relation(relation)?;
        let data = payload(relation, data)?;
        self.write(&format!("update_{}", relation), |events| {
            self.update_links(relation, &matcher, &data, events)
        })
    }

    /// Remove every link matching `matcher`.
    pub fn remove_relation_by_name(&self, relation: &str, matcher: MatchExp) -> Result<Vec<Record>> {
        self.expect_relation(relation)?;
        self.write(&format!("remove_{}", relation), |events| {
            self.remove_links(relation, Some(&matcher), events)
        })
    }

    /// Link `source_id` to `target_id`, with optional relation properties.
    pub fn add_relation_by_name_by_id(
        &self,
        relation: &str,
        source_id: i64,
        target_id: i64,
        data: Value,
    ) -> Result<Record> {
        self.expect_relation(relation)?;
        let data = match data {
            Value::Null => Record::new(),
            other => payload(relation, other)?,
        };
        self.write(&format!("add_{}", relation), |events| {
            self.link(relation, source_id, target_id, &data, events)
        })
    }

    /// Run `f` in one savepoint. Everything `f` writes is undone if it fails.
    pub fn transaction<T>(&self, name: &str, f: impl FnOnce(&QueryEngine) -> Result<T>) -> Result<T> {
        with_transaction(self.db.as_ref(), name, || f(self))
    }

    fn write<T>(&self, name: &str, f: impl FnOnce(&mut Vec<MutationEvent>) -> Result<T>) -> Result<T> {
        let mut events = Vec::new();
        let value = with_transaction(self.db.as_ref(), name, || f(&mut events))?;
        self.bus.publish(self, events);
        Ok(value)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Register a closure receiving every mutation event.
    pub fn listen<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&QueryEngine, &MutationEvent) -> Result<Vec<MutationEvent>> + 'static,
    {
        self.bus.subscribe(Rc::new(FnListener::new(name, f)));
    }

    /// Register a listener.
    pub fn subscribe(&self, listener: Rc<dyn MutationListener>) {
        self.bus.subscribe(listener);
    }
}

/// The object payload of a write.
pub(crate) fn payload(record: &str, data: Value) -> std::result::Result<Record, MutationError> {
    match data {
        Value::Object(map) => Ok(map),
        other => Err(MutationError::InvalidPayload {
            record: record.to_string(),
            reason: format!("expected an object, got {}", other),
        }),
    }
}

fn reference(record: &str, data: &Record, end: &str) -> std::result::Result<i64, MutationError> {
    data.get(end)
        .and_then(super::event::id_of)
        .ok_or_else(|| MutationError::InvalidPayload {
            record: record.to_string(),
            reason: format!("'{}' must reference an existing record by id", end),
        })
}
