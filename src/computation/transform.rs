//! Transform: derive new records from events.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use super::trigger::Trigger;
use crate::error::{ComputationError, Result, SchemaError};
use crate::query::{MutationEvent, QueryEngine};
use crate::runtime::MutationListener;
use crate::schema::SchemaGraph;

/// Maps an event to the payload(s) to create: `null` for nothing, an
/// object for one record, an array of objects for several.
pub type TransformFn = Rc<dyn Fn(&MutationEvent) -> Value>;

/// Creates `record` rows from matching events. Never updates existing rows.
#[derive(Clone)]
pub struct Transform {
    pub name: String,
    pub record: String,
    pub trigger: Trigger,
    pub map: TransformFn,
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("name", &self.name)
            .field("record", &self.record)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

impl Transform {
    pub fn new(
        name: impl Into<String>,
        record: impl Into<String>,
        trigger: Trigger,
        map: impl Fn(&MutationEvent) -> Value + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            record: record.into(),
            trigger,
            map: Rc::new(map),
        }
    }

    pub(crate) fn validate(&self, graph: &SchemaGraph) -> std::result::Result<(), SchemaError> {
        if !graph.contains(&self.record) {
            return Err(SchemaError::UnknownRecord(self.record.clone()));
        }
        self.trigger.validate(graph, &self.name)
    }
}

impl MutationListener for Transform {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, engine: &QueryEngine, event: &MutationEvent) -> Result<Vec<MutationEvent>> {
        if !self.trigger.matches(engine, event)? {
            return Ok(Vec::new());
        }
        let payloads = match (self.map)(event) {
            Value::Null => return Ok(Vec::new()),
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            other => {
                return Err(ComputationError::InvalidResult {
                    computation: self.name.clone(),
                    reason: format!("expected an object, an array or null, got {}", other),
                }
                .into())
            }
        };

        log::debug!("{} creating {} {} record(s) from {}", self.name, payloads.len(), self.record, event);
        for payload in payloads.into_iter().filter(|p| !p.is_null()) {
            engine
                .create(&self.record, payload)
                .map_err(|e| ComputationError::handler(&self.name, e))?;
        }
        Ok(Vec::new())
    }
}
