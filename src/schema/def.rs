//! Declarative entity and relation definitions.
//!
//! Definitions reference each other by name. [`SchemaBuilder::build`]
//! validates the names and produces an immutable [`Schema`] template that
//! runtimes instantiate privately.

use std::sync::Arc;

use super::graph::SchemaGraph;
use super::types::{Cardinality, Property};
use crate::error::SchemaError;
use crate::query::MatchExp;

/// An entity: a named record type, optionally a filtered subset of a base entity.
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub name: String,
    pub properties: Vec<Property>,
    pub base: Option<String>,
    pub filter: Option<MatchExp>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            base: None,
            filter: None,
        }
    }

    /// A virtual subset of `base` selected by `filter`, sharing its storage.
    pub fn filtered(name: impl Into<String>, base: impl Into<String>, filter: MatchExp) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            base: Some(base.into()),
            filter: Some(filter),
        }
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn properties(mut self, properties: impl IntoIterator<Item = Property>) -> Self {
        self.properties.extend(properties);
        self
    }
}

/// A relation between a source and a target entity.
#[derive(Debug, Clone)]
pub struct RelationDef {
    pub name: Option<String>,
    pub source: String,
    pub source_property: Option<String>,
    pub target: String,
    pub target_property: Option<String>,
    pub cardinality: Cardinality,
    pub properties: Vec<Property>,
    pub base: Option<String>,
    pub filter: Option<MatchExp>,
}

impl RelationDef {
    /// `source.source_property` navigates to targets, `target.target_property` back to sources.
    pub fn new(
        source: impl Into<String>,
        source_property: impl Into<String>,
        target: impl Into<String>,
        target_property: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name: None,
            source: source.into(),
            source_property: Some(source_property.into()),
            target: target.into(),
            target_property: Some(target_property.into()),
            cardinality,
            properties: Vec::new(),
            base: None,
            filter: None,
        }
    }

    /// A virtual subset of relation `base` selected by `filter`.
    ///
    /// Source, target and cardinality are taken from the base. Without
    /// [`RelationDef::navigation`] the filtered relation is only reachable by name.
    pub fn filtered(name: impl Into<String>, base: impl Into<String>, filter: MatchExp) -> Self {
        Self {
            name: Some(name.into()),
            source: String::new(),
            source_property: None,
            target: String::new(),
            target_property: None,
            cardinality: Cardinality::ManyToMany,
            properties: Vec::new(),
            base: Some(base.into()),
            filter: Some(filter),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Navigation names for a filtered relation.
    pub fn navigation(
        mut self,
        source_property: impl Into<String>,
        target_property: impl Into<String>,
    ) -> Self {
        self.source_property = Some(source_property.into());
        self.target_property = Some(target_property.into());
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Explicit name, or `{Source}_{sourceProperty}_{targetProperty}_{Target}`.
    pub fn resolved_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!(
                "{}_{}_{}_{}",
                self.source,
                self.source_property.as_deref().unwrap_or_default(),
                self.target_property.as_deref().unwrap_or_default(),
                self.target
            ),
        }
    }
}

/// Collects definitions and validates them into a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityDef>,
    relations: Vec<RelationDef>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Validate all definitions and freeze them into an immutable template.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let graph = SchemaGraph::from_defs(&self.entities, &self.relations)?;
        Ok(Schema {
            graph: Arc::new(graph),
        })
    }
}

/// Immutable, shareable schema template.
///
/// Runtimes never mutate it; they call [`SchemaGraph::instantiate`] to get a
/// private copy.
#[derive(Debug, Clone)]
pub struct Schema {
    pub(crate) graph: Arc<SchemaGraph>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Read-only view of the template graph.
    pub fn graph(&self) -> &SchemaGraph {
        &self.graph
    }
}
