//! Query layer: match expressions, attribute queries, and the engine that
//! turns them into SQL against the compiled storage map.
//!
//! - [`match_expr`] - predicates over dotted paths
//! - [`attribute`] - nested field selection
//! - [`modifier`] - ordering and pagination
//! - [`mapping`] - path resolution into joins
//! - [`engine`] - reads, writes and mutation events

pub mod attribute;
pub mod engine;
pub mod event;
mod fetch;
pub mod mapping;
pub mod match_expr;
pub mod modifier;
mod mutation;

/// A record as read or written: a JSON object keyed by field name.
pub type Record = serde_json::Map<String, serde_json::Value>;

pub use attribute::{AttributeItem, AttributeQuery};
pub use engine::QueryEngine;
pub use event::{id_of, MutationEvent, MutationKind};
pub use mapping::JoinResolver;
pub use match_expr::{and_match, MatchAtom, MatchExp, Operator};
pub use modifier::{Modifier, Order, OrderBy};
