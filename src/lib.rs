//! # Relata
//!
//! A reactive entity-relation data layer over a SQL backend.
//!
//! ## Architecture
//!
//! Applications declare entities, relations and filtered variants of both,
//! plus reactive computations. A runtime host turns the declarations into
//! tables and keeps derived values current as records change:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        Schema template (entities, relations, filters)    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [cloner]
//! ┌─────────────────────────────────────────────────────────┐
//! │     Instance graph  + computation-owned columns          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [schema compiler]
//! ┌─────────────────────────────────────────────────────────┐
//! │          Storage map (tables, foreign keys, joins)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [query engine]
//! ┌─────────────────────────────────────────────────────────┐
//! │     SQL statements  ──►  backend  ──►  mutation events    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [event bus]
//! ┌─────────────────────────────────────────────────────────┐
//! │  Transform / StateMachine / Count / Summation / Bound    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use relata::prelude::*;
//! use serde_json::json;
//!
//! let schema = Schema::builder()
//!     .entity(EntityDef::new("Dormitory").property(Property::number("capacity")))
//!     .entity(EntityDef::new("Bed").property(Property::string("label")))
//!     .relation(
//!         RelationDef::new("Dormitory", "beds", "Bed", "dormitory", Cardinality::OneToMany)
//!             .named("DormitoryBed"),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let host = Controller::open(&schema, vec![], &RuntimeSettings::default()).unwrap();
//! let engine = host.engine();
//! let dorm = engine.create("Dormitory", json!({"capacity": 2})).unwrap();
//! engine
//!     .create("Bed", json!({"label": "A", "dormitory": {"id": dorm["id"]}}))
//!     .unwrap();
//!
//! let dorms = engine
//!     .find(
//!         "Dormitory",
//!         None,
//!         None,
//!         &AttributeQuery::all().nest("beds", AttributeQuery::fields(["label"])),
//!     )
//!     .unwrap();
//! assert_eq!(dorms[0]["beds"][0]["label"], "A");
//! ```

pub mod computation;
pub mod config;
pub mod error;
pub mod query;
pub mod runtime;
pub mod schema;
pub mod sql;
pub mod storage;

pub use error::{Error, Result};
pub use query::Record;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::computation::{
        Aggregate, BoundState, BoundStateHandle, Computation, StateMachine, Transform,
        Transition, TransitionTarget, Trigger,
    };
    pub use crate::config::RuntimeSettings;
    pub use crate::error::{Error, Result};
    pub use crate::query::{
        AttributeQuery, MatchExp, Modifier, MutationEvent, MutationKind, Operator, Order,
        QueryEngine, Record,
    };
    pub use crate::runtime::{Controller, MutationListener};
    pub use crate::schema::{Cardinality, EntityDef, Property, PropertyType, RelationDef, Schema};
    pub use crate::storage::{Database, SqliteDatabase};
}
