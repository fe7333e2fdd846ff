//! Bound state: a computation-owned column and its read/write handle.
//!
//! Every other computation that stores a value writes through a
//! [`BoundStateHandle`]; a bare [`BoundState`] declares such a column and
//! optional rules that set it from events.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use super::trigger::Trigger;
use crate::error::{ComputationError, Result, SchemaError};
use crate::query::{AttributeQuery, MatchExp, MutationEvent, QueryEngine, Record};
use crate::runtime::MutationListener;
use crate::schema::{Property, SchemaGraph};

/// Read/write access to one computation-owned column.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStateHandle {
    pub record: String,
    pub property: String,
}

impl BoundStateHandle {
    pub fn new(record: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            record: record.into(),
            property: property.into(),
        }
    }

    /// Current value for record `id`, `None` if the record does not exist.
    pub fn get(&self, engine: &QueryEngine, id: i64) -> Result<Option<Value>> {
        let found = engine.find_one(
            &self.record,
            Some(MatchExp::id(id)),
            None,
            &AttributeQuery::fields([self.property.as_str()]),
        )?;
        Ok(found.map(|record| record.get(&self.property).cloned().unwrap_or(Value::Null)))
    }

    pub fn set(&self, engine: &QueryEngine, id: i64, value: Value) -> Result<()> {
        self.set_matching(engine, MatchExp::id(id), value).map(|_| ())
    }

    /// Set the value on every record matching `matcher`; returns their new states.
    pub fn set_matching(&self, engine: &QueryEngine, matcher: MatchExp, value: Value) -> Result<Vec<Record>> {
        let root = engine.graph().root(&self.record).to_string();
        let mut data = Record::new();
        data.insert(self.property.clone(), value);
        engine.update(&root, matcher, Value::Object(data))
    }
}

/// Computes the `(record id, value)` a rule writes for an event, if any.
pub type BoundRuleFn = Rc<dyn Fn(&MutationEvent) -> Option<(i64, Value)>>;

#[derive(Clone)]
pub struct BoundRule {
    pub trigger: Trigger,
    pub compute: BoundRuleFn,
}

impl fmt::Debug for BoundRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundRule")
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

/// A value stored per record, set by its rules.
#[derive(Debug, Clone)]
pub struct BoundState {
    pub name: String,
    pub record: String,
    pub property: Property,
    pub rules: Vec<BoundRule>,
}

impl BoundState {
    pub fn new(name: impl Into<String>, record: impl Into<String>, property: Property) -> Self {
        Self {
            name: name.into(),
            record: record.into(),
            property,
            rules: Vec::new(),
        }
    }

    pub fn rule(mut self, trigger: Trigger, compute: impl Fn(&MutationEvent) -> Option<(i64, Value)> + 'static) -> Self {
        self.rules.push(BoundRule {
            trigger,
            compute: Rc::new(compute),
        });
        self
    }

    pub fn handle(&self) -> BoundStateHandle {
        BoundStateHandle::new(&self.record, &self.property.name)
    }

    pub(crate) fn validate(&self, graph: &SchemaGraph) -> std::result::Result<(), SchemaError> {
        if !graph.contains(&self.record) {
            return Err(SchemaError::UnknownRecord(self.record.clone()));
        }
        for rule in &self.rules {
            rule.trigger.validate(graph, &self.name)?;
        }
        Ok(())
    }
}

impl MutationListener for BoundState {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, engine: &QueryEngine, event: &MutationEvent) -> Result<Vec<MutationEvent>> {
        let handle = self.handle();
        for rule in &self.rules {
            if !rule.trigger.matches(engine, event)? {
                continue;
            }
            if let Some((id, value)) = (rule.compute)(event) {
                if !value.is_null() && !self.property.ty.accepts(&value) {
                    return Err(ComputationError::InvalidResult {
                        computation: self.name.clone(),
                        reason: format!("{} is not a valid {}", value, self.property.ty),
                    }
                    .into());
                }
                handle
                    .set(engine, id, value)
                    .map_err(|e| ComputationError::handler(&self.name, e))?;
            }
        }
        Ok(Vec::new())
    }
}
