//! Event patterns that wake computations.

use serde_json::Value;

use crate::error::{Result, SchemaError};
use crate::query::{AttributeQuery, MatchExp, MutationEvent, MutationKind, QueryEngine, Record};
use crate::schema::SchemaGraph;

/// Matches mutation events by record, kind and payload fields.
///
/// `record` may name a filtered record: the event must then come from its
/// root and (for creates and updates) the row must currently satisfy the filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub record: String,
    pub kind: Option<MutationKind>,
    /// `(field, value)` pairs the event record must carry; fields may be dotted.
    pub discriminator: Vec<(String, Value)>,
}

impl Trigger {
    /// Any write to `record`.
    pub fn on(record: impl Into<String>) -> Self {
        Self {
            record: record.into(),
            kind: None,
            discriminator: Vec::new(),
        }
    }

    pub fn created(record: impl Into<String>) -> Self {
        Self::on(record).kind(MutationKind::Create)
    }

    pub fn updated(record: impl Into<String>) -> Self {
        Self::on(record).kind(MutationKind::Update)
    }

    pub fn deleted(record: impl Into<String>) -> Self {
        Self::on(record).kind(MutationKind::Delete)
    }

    pub fn kind(mut self, kind: MutationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Require `field` of the event record to equal `value`.
    pub fn when(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.discriminator.push((field.into(), value.into()));
        self
    }

    pub(crate) fn validate(&self, graph: &SchemaGraph, computation: &str) -> std::result::Result<(), SchemaError> {
        if !graph.contains(&self.record) {
            return Err(SchemaError::InvalidComputation {
                computation: computation.to_string(),
                reason: format!("trigger names unknown record '{}'", self.record),
            });
        }
        Ok(())
    }

    /// Whether `event` wakes this trigger.
    pub fn matches(&self, engine: &QueryEngine, event: &MutationEvent) -> Result<bool> {
        let graph = engine.graph();
        if graph.root(&self.record) != event.record_name {
            return Ok(false);
        }
        if self.kind.is_some_and(|kind| kind != event.kind) {
            return Ok(false);
        }
        let payload_matches = self
            .discriminator
            .iter()
            .all(|(field, value)| lookup(&event.record, field) == Some(value));
        if !payload_matches {
            return Ok(false);
        }
        if graph.is_filtered(&self.record) && event.kind != MutationKind::Delete {
            let member = engine.find_one(
                &self.record,
                Some(MatchExp::id(event.record_id)),
                None,
                &AttributeQuery::new(),
            )?;
            return Ok(member.is_some());
        }
        Ok(true)
    }
}

/// Value at a dotted path inside a record.
pub(crate) fn lookup<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
