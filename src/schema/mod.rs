//! Schema model: entities, relations, filtered records and their graph.

mod clone;
mod def;
mod graph;
mod types;

pub use def::{EntityDef, RelationDef, Schema, SchemaBuilder};
pub use graph::{
    Direction, EntityNode, Navigation, PathNode, RecordKind, RelationEnd, RelationNode,
    SchemaEdge, SchemaGraph, SchemaNode, Step, Terminal, ID, LINK, SOURCE, TARGET,
};
pub use types::{Cardinality, DefaultValue, Property, PropertyType};
