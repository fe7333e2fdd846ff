//! State machines over one property's value or one relation's existence.
//!
//! A transition fires when its trigger matches and `compute_target` picks
//! the affected record(s). Records already in the transition's target state
//! are left alone, so re-delivered events change nothing.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use super::bound::BoundStateHandle;
use super::trigger::Trigger;
use crate::error::{ComputationError, Result, SchemaError};
use crate::query::{AttributeQuery, MatchExp, MutationEvent, QueryEngine, Record};
use crate::runtime::MutationListener;
use crate::schema::{Property, PropertyType, RecordKind, SchemaGraph, ID};

/// What a state machine governs.
#[derive(Debug, Clone, PartialEq)]
pub enum Governs {
    /// The value of `record.property`; states are property values.
    Property { record: String, property: String },
    /// Whether a link exists; states are `false` and `true`.
    RelationExistence { relation: String },
}

/// Record(s) a transition applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionTarget {
    Id(i64),
    Match(MatchExp),
    /// The link between two entities (relation existence only).
    Link { source: i64, target: i64 },
}

pub type TargetFn = Rc<dyn Fn(&MutationEvent) -> Option<TransitionTarget>>;

#[derive(Clone)]
pub struct Transition {
    /// Required current state; `None` accepts any.
    pub from: Option<Value>,
    pub to: Value,
    pub trigger: Trigger,
    pub compute_target: TargetFn,
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

impl Transition {
    pub fn new(
        trigger: Trigger,
        to: impl Into<Value>,
        compute_target: impl Fn(&MutationEvent) -> Option<TransitionTarget> + 'static,
    ) -> Self {
        Self {
            from: None,
            to: to.into(),
            trigger,
            compute_target: Rc::new(compute_target),
        }
    }

    pub fn from(mut self, state: impl Into<Value>) -> Self {
        self.from = Some(state.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    pub name: String,
    pub governs: Governs,
    /// Declared states; empty accepts any value.
    pub states: Vec<Value>,
    /// Initial state of new records.
    pub default: Value,
    pub transitions: Vec<Transition>,
}

impl StateMachine {
    /// A machine over `record.property`, starting at `default`.
    pub fn property(
        name: impl Into<String>,
        record: impl Into<String>,
        property: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            governs: Governs::Property {
                record: record.into(),
                property: property.into(),
            },
            states: Vec::new(),
            default: default.into(),
            transitions: Vec::new(),
        }
    }

    /// A machine over link existence in `relation`.
    pub fn relation(name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            governs: Governs::RelationExistence {
                relation: relation.into(),
            },
            states: vec![Value::Bool(false), Value::Bool(true)],
            default: Value::Bool(false),
            transitions: Vec::new(),
        }
    }

    pub fn states(mut self, states: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.states = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// The synthesized column of a property machine.
    pub(crate) fn bound_column(&self) -> Option<(String, Property)> {
        match &self.governs {
            Governs::Property { record, property } => {
                let ty = match PropertyType::infer(&self.default) {
                    PropertyType::Json if self.default.is_null() => {
                        self.states
                            .iter()
                            .find(|s| !s.is_null())
                            .map(PropertyType::infer)
                            .unwrap_or(PropertyType::Json)
                    }
                    ty => ty,
                };
                let mut column = Property::new(property.clone(), ty);
                if !self.default.is_null() {
                    column = column.default_value(self.default.clone());
                }
                Some((record.clone(), column))
            }
            Governs::RelationExistence { .. } => None,
        }
    }

    pub fn handle(&self) -> Option<BoundStateHandle> {
        match &self.governs {
            Governs::Property { record, property } => Some(BoundStateHandle::new(record, property)),
            Governs::RelationExistence { .. } => None,
        }
    }

    pub(crate) fn validate(&self, graph: &SchemaGraph) -> std::result::Result<(), SchemaError> {
        match &self.governs {
            Governs::Property { record, .. } => {
                if !graph.contains(record) {
                    return Err(SchemaError::UnknownRecord(record.clone()));
                }
            }
            Governs::RelationExistence { relation } => match graph.kind(relation) {
                Some(RecordKind::Relation) => {}
                Some(RecordKind::Entity) => {
                    return Err(SchemaError::NotARelation {
                        record: relation.clone(),
                    })
                }
                None => return Err(SchemaError::UnknownRecord(relation.clone())),
            },
        }

        let declared = |state: &Value| self.states.is_empty() || self.states.contains(state);
        for transition in &self.transitions {
            transition.trigger.validate(graph, &self.name)?;
            let states = std::iter::once(&transition.to).chain(transition.from.as_ref());
            for state in states {
                if !declared(state) {
                    return Err(SchemaError::InvalidComputation {
                        computation: self.name.clone(),
                        reason: format!("transition uses undeclared state {}", state),
                    });
                }
            }
        }
        Ok(())
    }

    fn apply_property(
        &self,
        engine: &QueryEngine,
        record: &str,
        property: &str,
        transition: &Transition,
        target: TransitionTarget,
    ) -> Result<()> {
        let matcher = match target {
            TransitionTarget::Id(id) => MatchExp::id(id),
            TransitionTarget::Match(matcher) => matcher,
            TransitionTarget::Link { .. } => {
                return Err(ComputationError::InvalidResult {
                    computation: self.name.clone(),
                    reason: "a property machine cannot target a link".to_string(),
                }
                .into())
            }
        };

        let rows = engine.find(record, Some(matcher), None, &AttributeQuery::fields([property]))?;
        let ids: Vec<i64> = rows
            .iter()
            .filter(|row| {
                let current = row.get(property).unwrap_or(&Value::Null);
                current != &transition.to && transition.from.as_ref().map_or(true, |from| current == from)
            })
            .filter_map(|row| row.get(ID).and_then(Value::as_i64))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        log::debug!("{}: {} {:?} -> {}", self.name, record, ids, transition.to);
        let handle = BoundStateHandle::new(record, property);
        let in_ids = MatchExp::atom(ID, crate::query::Operator::In, ids);
        handle.set_matching(engine, in_ids, transition.to.clone())?;
        Ok(())
    }

    fn apply_existence(
        &self,
        engine: &QueryEngine,
        relation: &str,
        transition: &Transition,
        target: TransitionTarget,
    ) -> Result<()> {
        let exists = match &transition.to {
            Value::Bool(exists) => *exists,
            other => {
                return Err(ComputationError::InvalidResult {
                    computation: self.name.clone(),
                    reason: format!("existence states are booleans, got {}", other),
                }
                .into())
            }
        };

        match (exists, target) {
            (true, TransitionTarget::Link { source, target }) => {
                let linked = engine.find_one(relation, Some(link_match(source, target)), None, &AttributeQuery::new())?;
                if linked.is_none() {
                    engine.add_relation_by_name_by_id(relation, source, target, Value::Object(Record::new()))?;
                }
            }
            (true, _) => {
                return Err(ComputationError::InvalidResult {
                    computation: self.name.clone(),
                    reason: "creating a link needs a Link target".to_string(),
                }
                .into())
            }
            (false, target) => {
                let matcher = match target {
                    TransitionTarget::Id(id) => MatchExp::id(id),
                    TransitionTarget::Match(matcher) => matcher,
                    TransitionTarget::Link { source, target } => link_match(source, target),
                };
                engine.remove_relation_by_name(relation, matcher)?;
            }
        }
        Ok(())
    }
}

fn link_match(source: i64, target: i64) -> MatchExp {
    MatchExp::eq("source", source).and(MatchExp::eq("target", target))
}

impl MutationListener for StateMachine {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, engine: &QueryEngine, event: &MutationEvent) -> Result<Vec<MutationEvent>> {
        for transition in &self.transitions {
            if !transition.trigger.matches(engine, event)? {
                continue;
            }
            let Some(target) = (transition.compute_target)(event) else {
                continue;
            };
            let applied = match &self.governs {
                Governs::Property { record, property } => {
                    self.apply_property(engine, record, property, transition, target)
                }
                Governs::RelationExistence { relation } => {
                    self.apply_existence(engine, relation, transition, target)
                }
            };
            applied.map_err(|e| match e {
                crate::Error::Computation(_) => e,
                other => ComputationError::handler(&self.name, other).into(),
            })?;
        }
        Ok(Vec::new())
    }
}
