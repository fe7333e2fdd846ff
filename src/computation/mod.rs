//! Reactive computations driven by mutation events.
//!
//! Declarations are plain values collected into [`Computation`]s. At setup
//! the runtime validates each against the instance's schema graph, injects
//! the columns they own, and registers each as a listener on the event bus.
//!
//! - [`Transform`] - create records from events
//! - [`StateMachine`] - one property's value or one relation's existence
//! - [`Aggregate`] - Count and Summation over a navigation
//! - [`BoundState`] - a computation-owned column set by rules

mod aggregate;
mod bound;
mod state_machine;
mod transform;
mod trigger;

use std::rc::Rc;

pub use aggregate::{Aggregate, AggregateKind};
pub use bound::{BoundRule, BoundRuleFn, BoundState, BoundStateHandle};
pub use state_machine::{Governs, StateMachine, TargetFn, Transition, TransitionTarget};
pub use transform::{Transform, TransformFn};
pub use trigger::Trigger;

use crate::error::SchemaError;
use crate::runtime::MutationListener;
use crate::schema::{Property, SchemaGraph};

/// A computation declaration.
#[derive(Debug, Clone)]
pub enum Computation {
    Transform(Transform),
    StateMachine(StateMachine),
    Count(Aggregate),
    Summation(Aggregate),
    Bound(BoundState),
}

impl Computation {
    pub fn name(&self) -> &str {
        match self {
            Computation::Transform(t) => &t.name,
            Computation::StateMachine(m) => &m.name,
            Computation::Count(a) | Computation::Summation(a) => &a.name,
            Computation::Bound(b) => &b.name,
        }
    }

    /// Columns this computation owns, as `(owner record, property)`.
    pub fn bound_columns(&self) -> Vec<(String, Property)> {
        match self {
            Computation::Transform(_) => Vec::new(),
            Computation::StateMachine(m) => m.bound_column().into_iter().collect(),
            Computation::Count(a) | Computation::Summation(a) => vec![a.bound_column()],
            Computation::Bound(b) => vec![(b.record.clone(), b.property.clone())],
        }
    }

    /// Handle on the stored value, for computations that own a column.
    pub fn handle(&self) -> Option<BoundStateHandle> {
        match self {
            Computation::Transform(_) => None,
            Computation::StateMachine(m) => m.handle(),
            Computation::Count(a) | Computation::Summation(a) => Some(a.handle()),
            Computation::Bound(b) => Some(b.handle()),
        }
    }

    pub fn validate(&self, graph: &SchemaGraph) -> Result<(), SchemaError> {
        match self {
            Computation::Transform(t) => t.validate(graph),
            Computation::StateMachine(m) => m.validate(graph),
            Computation::Count(a) | Computation::Summation(a) => a.validate(graph),
            Computation::Bound(b) => b.validate(graph),
        }
    }

    pub fn into_listener(self) -> Rc<dyn MutationListener> {
        match self {
            Computation::Transform(t) => Rc::new(t),
            Computation::StateMachine(m) => Rc::new(m),
            Computation::Count(a) | Computation::Summation(a) => Rc::new(a),
            Computation::Bound(b) => Rc::new(b),
        }
    }
}

impl From<Transform> for Computation {
    fn from(t: Transform) -> Self {
        Computation::Transform(t)
    }
}

impl From<StateMachine> for Computation {
    fn from(m: StateMachine) -> Self {
        Computation::StateMachine(m)
    }
}

impl From<Aggregate> for Computation {
    fn from(a: Aggregate) -> Self {
        match a.kind {
            AggregateKind::Count => Computation::Count(a),
            AggregateKind::Summation => Computation::Summation(a),
        }
    }
}

impl From<BoundState> for Computation {
    fn from(b: BoundState) -> Self {
        Computation::Bound(b)
    }
}
