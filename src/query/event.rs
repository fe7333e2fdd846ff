//! Mutation events emitted after every successful write.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::Record;

/// Kind of write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One committed row-level write.
///
/// `record_name` is always the root entity or relation: events describe
/// physical rows, and filtered records never emit events of their own.
/// For relations, `record` has the shape `{id, source: {id}, target: {id}, ...properties}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEvent {
    pub record_name: String,
    #[serde(rename = "type")]
    pub kind: MutationKind,
    pub record_id: i64,
    /// Properties written by this mutation (all written fields on create).
    pub changed_fields: Vec<String>,
    /// Created row, new values, or the deleted row's last state.
    pub record: Record,
    /// Row state before an update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Record>,
}

impl MutationEvent {
    pub fn new(record_name: impl Into<String>, kind: MutationKind, record_id: i64, record: Record) -> Self {
        Self {
            record_name: record_name.into(),
            kind,
            record_id,
            changed_fields: Vec::new(),
            record,
            old_record: None,
        }
    }

    pub fn changed(mut self, fields: Vec<String>) -> Self {
        self.changed_fields = fields;
        self
    }

    pub fn with_old(mut self, old: Record) -> Self {
        self.old_record = Some(old);
        self
    }

    /// Field of the event record.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.record.get(field)
    }

    /// Field of the previous row state, falling back to the event record.
    pub fn previous(&self, field: &str) -> Option<&Value> {
        self.old_record
            .as_ref()
            .and_then(|r| r.get(field))
            .or_else(|| self.record.get(field))
    }

    /// `record.<end>.id` of a relation event.
    pub fn end_id(&self, end: &str) -> Option<i64> {
        self.record.get(end).and_then(id_of)
    }

    /// `old_record.<end>.id` of a relation update.
    pub fn old_end_id(&self, end: &str) -> Option<i64> {
        self.old_record
            .as_ref()
            .and_then(|r| r.get(end))
            .and_then(id_of)
    }

    pub fn touches(&self, field: &str) -> bool {
        self.changed_fields.iter().any(|f| f == field)
    }
}

/// Id of an `{id: n}` reference or a bare number.
pub fn id_of(value: &Value) -> Option<i64> {
    match value {
        Value::Object(map) => map.get("id").and_then(Value::as_i64),
        other => other.as_i64(),
    }
}

impl fmt::Display for MutationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}#{}", self.kind, self.record_name, self.record_id)
    }
}
