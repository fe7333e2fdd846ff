//! SchemaGraph - arena representation of the entity/relation graph.
//!
//! Entities and relations reference each other in both directions (a
//! relation names its source and target, an entity is navigated through the
//! relations that touch it, a filtered record names its base). The graph
//! keeps every record as a node in a `petgraph` arena and every reference as
//! an edge, so there are no owning cycles and cloning is a matter of copying
//! nodes and remapping indices (see `clone.rs`).
//!
//! ```text
//!   Relation ──Source──▶ Entity
//!   Relation ──Target──▶ Entity
//!   Filtered ──Base────▶ Entity | Relation
//! ```

use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction as EdgeDirection;

use super::def::{EntityDef, RelationDef};
use super::types::{Cardinality, Property};
use crate::error::{QueryError, SchemaError};
use crate::query::MatchExp;

/// Property name reserved for record ids.
pub const ID: &str = "id";
/// Path segment stepping from an entity onto the relation record it was reached through.
pub const LINK: &str = "&";
/// Relation record field naming its source entity.
pub const SOURCE: &str = "source";
/// Relation record field naming its target entity.
pub const TARGET: &str = "target";

/// Entity node.
#[derive(Debug, Clone)]
pub struct EntityNode {
    pub name: String,
    pub properties: Vec<Property>,
    pub filter: Option<MatchExp>,
}

/// Relation node.
#[derive(Debug, Clone)]
pub struct RelationNode {
    pub name: String,
    pub source_property: Option<String>,
    pub target_property: Option<String>,
    pub cardinality: Cardinality,
    pub properties: Vec<Property>,
    pub filter: Option<MatchExp>,
}

/// A node in the schema arena.
#[derive(Debug, Clone)]
pub enum SchemaNode {
    Entity(EntityNode),
    Relation(RelationNode),
}

impl SchemaNode {
    pub fn name(&self) -> &str {
        match self {
            SchemaNode::Entity(e) => &e.name,
            SchemaNode::Relation(r) => &r.name,
        }
    }

    pub fn filter(&self) -> Option<&MatchExp> {
        match self {
            SchemaNode::Entity(e) => e.filter.as_ref(),
            SchemaNode::Relation(r) => r.filter.as_ref(),
        }
    }

    pub fn properties(&self) -> &[Property] {
        match self {
            SchemaNode::Entity(e) => &e.properties,
            SchemaNode::Relation(r) => &r.properties,
        }
    }

    fn properties_mut(&mut self) -> &mut Vec<Property> {
        match self {
            SchemaNode::Entity(e) => &mut e.properties,
            SchemaNode::Relation(r) => &mut r.properties,
        }
    }
}

/// Reference edge between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaEdge {
    Source,
    Target,
    Base,
}

/// Entity or relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Entity,
    Relation,
}

/// Which way a navigation crosses its relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the source entity to targets.
    Forward,
    /// From the target entity to sources.
    Backward,
}

/// A named way to reach related entities from an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Navigation {
    pub name: String,
    /// Relation crossed (possibly filtered).
    pub relation: String,
    pub direction: Direction,
    /// Entity at the other end (possibly filtered).
    pub entity: String,
    /// The other end holds many records.
    pub many: bool,
}

/// Position while walking a dotted path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathNode {
    /// At an entity, optionally reached through a relation record.
    Entity { name: String, link: Option<String> },
    /// At a relation record.
    Relation { name: String },
}

impl PathNode {
    pub fn record(&self) -> &str {
        match self {
            PathNode::Entity { name, .. } | PathNode::Relation { name } => name,
        }
    }
}

/// One traversal step of a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Cross a relation to the entity at the other end.
    Navigate(Navigation),
    /// Step from an entity back onto the relation it was reached through.
    Link,
    /// From a relation record to its source or target entity.
    End(RelationEnd),
}

/// Source or target side of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationEnd {
    Source,
    Target,
}

/// What the last segment of a path names.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Id,
    Property(Property),
    /// Shorthand for `<navigation>.id`.
    Navigation(Navigation),
    /// Shorthand for `source.id` / `target.id`.
    End(RelationEnd),
}

/// Graph of entity and relation definitions.
#[derive(Debug, Clone, Default)]
pub struct SchemaGraph {
    pub(crate) graph: StableGraph<SchemaNode, SchemaEdge>,
    pub(crate) node_indices: HashMap<String, NodeIndex>,
}

impl SchemaGraph {
    /// Build and validate a graph from declarations.
    pub fn from_defs(
        entities: &[EntityDef],
        relations: &[RelationDef],
    ) -> Result<Self, SchemaError> {
        let mut graph = SchemaGraph::default();

        for def in entities {
            if def.base.is_some() && !def.properties.is_empty() {
                return Err(SchemaError::FilteredProperties {
                    record: def.name.clone(),
                });
            }
            check_properties(&def.name, &def.properties)?;
            graph.add_node(SchemaNode::Entity(EntityNode {
                name: def.name.clone(),
                properties: def.properties.clone(),
                filter: def.filter.clone(),
            }))?;
        }

        for def in relations {
            let name = def.resolved_name();
            if def.base.is_some() && !def.properties.is_empty() {
                return Err(SchemaError::FilteredProperties { record: name });
            }
            check_properties(&name, &def.properties)?;
            graph.add_node(SchemaNode::Relation(RelationNode {
                name,
                source_property: def.source_property.clone(),
                target_property: def.target_property.clone(),
                cardinality: def.cardinality,
                properties: def.properties.clone(),
                filter: def.filter.clone(),
            }))?;
        }

        // Base edges
        for (name, base, kind) in entities
            .iter()
            .filter_map(|e| e.base.as_ref().map(|b| (e.name.clone(), b, RecordKind::Entity)))
            .chain(relations.iter().filter_map(|r| {
                r.base
                    .as_ref()
                    .map(|b| (r.resolved_name(), b, RecordKind::Relation))
            }))
        {
            let base_kind = graph.kind(base).ok_or_else(|| SchemaError::MissingBase {
                record: name.clone(),
                base: base.clone(),
            })?;
            if base_kind != kind {
                return Err(match kind {
                    RecordKind::Entity => SchemaError::NotAnEntity {
                        record: base.clone(),
                    },
                    RecordKind::Relation => SchemaError::NotARelation {
                        record: base.clone(),
                    },
                });
            }
            graph.add_edge(&name, base, SchemaEdge::Base);
        }
        for name in graph.names() {
            graph.check_base_chain(&name)?;
        }

        // Source/target edges of root relations
        for def in relations.iter().filter(|r| r.base.is_none()) {
            let name = def.resolved_name();
            for (end, edge) in [(&def.source, SchemaEdge::Source), (&def.target, SchemaEdge::Target)] {
                match graph.kind(end) {
                    Some(RecordKind::Entity) => graph.add_edge(&name, end, edge),
                    Some(RecordKind::Relation) => {
                        return Err(SchemaError::NotAnEntity {
                            record: end.clone(),
                        })
                    }
                    None => return Err(SchemaError::UnknownRecord(end.clone())),
                }
            }
        }

        // Filtered relations share ends and cardinality with their root
        for def in relations.iter().filter(|r| r.base.is_some()) {
            let name = def.resolved_name();
            let root = graph.root(&name).to_string();
            let (source, target) = (
                graph.source(&root).map(str::to_string),
                graph.target(&root).map(str::to_string),
            );
            let cardinality = graph.relation(&root).map(|r| r.cardinality);
            if let (Some(source), Some(target), Some(cardinality)) = (source, target, cardinality) {
                graph.add_edge(&name, &source, SchemaEdge::Source);
                graph.add_edge(&name, &target, SchemaEdge::Target);
                if let Some(SchemaNode::Relation(rel)) = graph.node_mut(&name) {
                    rel.cardinality = cardinality;
                }
            }
        }

        graph.check_navigation_names()?;
        graph.check_filters()?;
        Ok(graph)
    }

    fn add_node(&mut self, node: SchemaNode) -> Result<NodeIndex, SchemaError> {
        let name = node.name().to_string();
        if self.node_indices.contains_key(&name) {
            return Err(SchemaError::DuplicateName(name));
        }
        let idx = self.graph.add_node(node);
        self.node_indices.insert(name, idx);
        Ok(idx)
    }

    fn add_edge(&mut self, from: &str, to: &str, edge: SchemaEdge) {
        if let (Some(&a), Some(&b)) = (self.node_indices.get(from), self.node_indices.get(to)) {
            self.graph.add_edge(a, b, edge);
        }
    }

    fn check_base_chain(&self, name: &str) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        let mut current = name;
        while let Some(base) = self.base(current) {
            if !seen.insert(current) {
                return Err(SchemaError::CyclicBase(name.to_string()));
            }
            current = base;
        }
        Ok(())
    }

    fn check_navigation_names(&self) -> Result<(), SchemaError> {
        for entity in self.entities() {
            let mut names: HashSet<String> = self
                .properties(entity)
                .iter()
                .map(|p| p.name.clone())
                .collect();
            for nav in self.navigations(entity) {
                if nav.name == ID || nav.name == LINK || !names.insert(nav.name.clone()) {
                    return Err(SchemaError::DuplicateProperty {
                        record: entity.to_string(),
                        property: nav.name,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_filters(&self) -> Result<(), SchemaError> {
        for name in self.names() {
            let Some(filter) = self.node(&name).and_then(SchemaNode::filter) else {
                continue;
            };
            for atom in filter.atoms() {
                self.resolve_path(&name, &atom.segments())
                    .map_err(|e| SchemaError::FilterPath {
                        record: name.clone(),
                        path: atom.key.clone(),
                        reason: e.to_string(),
                    })?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn node(&self, name: &str) -> Option<&SchemaNode> {
        self.node_indices
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    pub(crate) fn node_mut(&mut self, name: &str) -> Option<&mut SchemaNode> {
        let idx = *self.node_indices.get(name)?;
        self.graph.node_weight_mut(idx)
    }

    pub fn kind(&self, name: &str) -> Option<RecordKind> {
        self.node(name).map(|node| match node {
            SchemaNode::Entity(_) => RecordKind::Entity,
            SchemaNode::Relation(_) => RecordKind::Relation,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.node_indices.contains_key(name)
    }

    pub fn entity(&self, name: &str) -> Option<&EntityNode> {
        match self.node(name)? {
            SchemaNode::Entity(e) => Some(e),
            SchemaNode::Relation(_) => None,
        }
    }

    pub fn relation(&self, name: &str) -> Option<&RelationNode> {
        match self.node(name)? {
            SchemaNode::Relation(r) => Some(r),
            SchemaNode::Entity(_) => None,
        }
    }

    /// All record names in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
            .map(|n| n.name().to_string())
            .collect()
    }

    /// Entity names in declaration order.
    pub fn entities(&self) -> Vec<&str> {
        self.graph
            .node_indices()
            .filter_map(|idx| match self.graph.node_weight(idx) {
                Some(SchemaNode::Entity(e)) => Some(e.name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Relation names in declaration order.
    pub fn relations(&self) -> Vec<&str> {
        self.graph
            .node_indices()
            .filter_map(|idx| match self.graph.node_weight(idx) {
                Some(SchemaNode::Relation(r)) => Some(r.name.as_str()),
                _ => None,
            })
            .collect()
    }

    fn edge_target(&self, name: &str, kind: SchemaEdge) -> Option<&str> {
        let idx = *self.node_indices.get(name)?;
        self.graph
            .edges_directed(idx, EdgeDirection::Outgoing)
            .find(|e| *e.weight() == kind)
            .and_then(|e| self.graph.node_weight(e.target()))
            .map(SchemaNode::name)
    }

    /// Direct base of a filtered record.
    pub fn base(&self, name: &str) -> Option<&str> {
        self.edge_target(name, SchemaEdge::Base)
    }

    /// Source entity of a relation.
    pub fn source(&self, relation: &str) -> Option<&str> {
        self.edge_target(relation, SchemaEdge::Source)
    }

    /// Target entity of a relation.
    pub fn target(&self, relation: &str) -> Option<&str> {
        self.edge_target(relation, SchemaEdge::Target)
    }

    /// Entity at one end of a relation.
    pub fn end(&self, relation: &str, end: RelationEnd) -> Option<&str> {
        match end {
            RelationEnd::Source => self.source(relation),
            RelationEnd::Target => self.target(relation),
        }
    }

    /// The physically stored record a (possibly filtered) record derives from.
    pub fn root<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        let mut steps = 0;
        while let Some(base) = self.base(current) {
            current = base;
            steps += 1;
            if steps > self.node_indices.len() {
                break;
            }
        }
        current
    }

    pub fn is_filtered(&self, name: &str) -> bool {
        self.base(name).is_some()
    }

    /// Filters from `name` up to its root, nearest first.
    pub fn filter_chain(&self, name: &str) -> Vec<&MatchExp> {
        let mut filters = Vec::new();
        let mut current = name;
        while let Some(base) = self.base(current) {
            if let Some(filter) = self.node(current).and_then(SchemaNode::filter) {
                filters.push(filter);
            }
            current = base;
            if filters.len() > self.node_indices.len() {
                break;
            }
        }
        filters
    }

    /// Properties of a record (filtered records expose their root's).
    pub fn properties(&self, name: &str) -> &[Property] {
        self.node(self.root(name))
            .map(SchemaNode::properties)
            .unwrap_or(&[])
    }

    pub fn property(&self, record: &str, property: &str) -> Option<&Property> {
        self.properties(record).iter().find(|p| p.name == property)
    }

    /// Cardinality of a relation.
    pub fn cardinality(&self, relation: &str) -> Option<Cardinality> {
        self.relation(relation).map(|r| r.cardinality)
    }

    /// Root relations whose source or target is stored in `root_entity`.
    pub fn relations_touching(&self, root_entity: &str) -> Vec<&str> {
        self.relations()
            .into_iter()
            .filter(|rel| !self.is_filtered(rel))
            .filter(|rel| {
                self.source(rel).map(|s| self.root(s)) == Some(root_entity)
                    || self.target(rel).map(|t| self.root(t)) == Some(root_entity)
            })
            .collect()
    }

    /// Navigations available on an entity, including those inherited from its bases.
    pub fn navigations(&self, entity: &str) -> Vec<Navigation> {
        let mut result = Vec::new();
        let mut current = Some(entity);
        let mut depth = 0;
        while let Some(name) = current {
            result.extend(self.own_navigations(name));
            current = self.base(name);
            depth += 1;
            if depth > self.node_indices.len() {
                break;
            }
        }
        result
    }

    fn own_navigations(&self, entity: &str) -> Vec<Navigation> {
        let Some(&idx) = self.node_indices.get(entity) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(idx, EdgeDirection::Incoming)
            .filter(|e| *e.weight() != SchemaEdge::Base)
            .map(|e| (e.source(), *e.weight()))
            .collect();
        edges.sort_by_key(|(node, _)| node.index());

        edges
            .into_iter()
            .filter_map(|(rel_idx, edge)| {
                let SchemaNode::Relation(rel) = self.graph.node_weight(rel_idx)? else {
                    return None;
                };
                match edge {
                    SchemaEdge::Source => Some(Navigation {
                        name: rel.source_property.clone()?,
                        relation: rel.name.clone(),
                        direction: Direction::Forward,
                        entity: self.target(&rel.name)?.to_string(),
                        many: rel.cardinality.target_is_many(),
                    }),
                    SchemaEdge::Target => Some(Navigation {
                        name: rel.target_property.clone()?,
                        relation: rel.name.clone(),
                        direction: Direction::Backward,
                        entity: self.source(&rel.name)?.to_string(),
                        many: rel.cardinality.source_is_many(),
                    }),
                    SchemaEdge::Base => None,
                }
            })
            .collect()
    }

    pub fn navigation(&self, entity: &str, name: &str) -> Option<Navigation> {
        self.navigations(entity).into_iter().find(|n| n.name == name)
    }

    // =========================================================================
    // Paths
    // =========================================================================

    /// Starting position for paths on `record`.
    pub fn path_root(&self, record: &str) -> Result<PathNode, QueryError> {
        match self.kind(record) {
            Some(RecordKind::Entity) => Ok(PathNode::Entity {
                name: record.to_string(),
                link: None,
            }),
            Some(RecordKind::Relation) => Ok(PathNode::Relation {
                name: record.to_string(),
            }),
            None => Err(QueryError::UnknownRecord(record.to_string())),
        }
    }

    /// Take one traversal step from `at` through `segment`.
    pub fn step(&self, at: &PathNode, segment: &str) -> Result<(PathNode, Step), QueryError> {
        match at {
            PathNode::Entity { name, link } => {
                if segment == LINK {
                    return match link {
                        Some(rel) => Ok((PathNode::Relation { name: rel.clone() }, Step::Link)),
                        None => Err(QueryError::NotNavigable {
                            record: name.clone(),
                            segment: segment.to_string(),
                        }),
                    };
                }
                match self.navigation(name, segment) {
                    Some(nav) => Ok((
                        PathNode::Entity {
                            name: nav.entity.clone(),
                            link: Some(nav.relation.clone()),
                        },
                        Step::Navigate(nav),
                    )),
                    None => Err(self.not_navigable(name, segment)),
                }
            }
            PathNode::Relation { name } => {
                let end = match segment {
                    SOURCE => RelationEnd::Source,
                    TARGET => RelationEnd::Target,
                    _ => return Err(self.not_navigable(name, segment)),
                };
                let entity = self
                    .end(name, end)
                    .ok_or_else(|| QueryError::UnknownRecord(name.clone()))?;
                Ok((
                    PathNode::Entity {
                        name: entity.to_string(),
                        link: Some(name.clone()),
                    },
                    Step::End(end),
                ))
            }
        }
    }

    fn not_navigable(&self, record: &str, segment: &str) -> QueryError {
        if self.property(record, segment).is_some() {
            QueryError::NotNavigable {
                record: record.to_string(),
                segment: segment.to_string(),
            }
        } else {
            QueryError::UnknownField {
                record: record.to_string(),
                field: segment.to_string(),
            }
        }
    }

    /// Resolve the last segment of a path at `at`.
    pub fn terminal(&self, at: &PathNode, segment: &str) -> Result<Terminal, QueryError> {
        if segment == ID {
            return Ok(Terminal::Id);
        }
        let record = at.record();
        if let Some(prop) = self.property(record, segment) {
            return Ok(Terminal::Property(prop.clone()));
        }
        match at {
            PathNode::Entity { name, .. } => self
                .navigation(name, segment)
                .map(Terminal::Navigation)
                .ok_or_else(|| QueryError::UnknownField {
                    record: name.clone(),
                    field: segment.to_string(),
                }),
            PathNode::Relation { name } => match segment {
                SOURCE => Ok(Terminal::End(RelationEnd::Source)),
                TARGET => Ok(Terminal::End(RelationEnd::Target)),
                _ => Err(QueryError::UnknownField {
                    record: name.clone(),
                    field: segment.to_string(),
                }),
            },
        }
    }

    /// Walk a whole path without touching storage.
    pub fn resolve_path(&self, record: &str, segments: &[&str]) -> Result<Terminal, QueryError> {
        let mut at = self.path_root(record)?;
        let Some((last, init)) = segments.split_last() else {
            return Err(QueryError::UnknownField {
                record: record.to_string(),
                field: String::new(),
            });
        };
        for segment in init {
            at = self.step(&at, segment)?.0;
        }
        self.terminal(&at, last)
    }

    // =========================================================================
    // Instance-local mutation
    // =========================================================================

    /// Append a computation-owned property to the root storage of `record`.
    pub(crate) fn add_property(
        &mut self,
        record: &str,
        property: Property,
    ) -> Result<(), SchemaError> {
        let root = self.root(record).to_string();
        let clashes = property.name == ID
            || self.property(&root, &property.name).is_some()
            || self
                .kind(&root)
                .filter(|k| *k == RecordKind::Entity)
                .map(|_| self.navigation(&root, &property.name).is_some())
                .unwrap_or(false);
        if clashes {
            return Err(SchemaError::DuplicateProperty {
                record: root,
                property: property.name,
            });
        }
        let node = self
            .node_mut(&root)
            .ok_or_else(|| SchemaError::UnknownRecord(root.clone()))?;
        node.properties_mut().push(property);
        Ok(())
    }
}

fn check_properties(record: &str, properties: &[Property]) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for prop in properties {
        if prop.name == ID || prop.name == LINK || prop.name.contains('.') {
            return Err(SchemaError::ReservedProperty {
                record: record.to_string(),
                property: prop.name.clone(),
            });
        }
        if !seen.insert(prop.name.as_str()) {
            return Err(SchemaError::DuplicateProperty {
                record: record.to_string(),
                property: prop.name.clone(),
            });
        }
    }
    Ok(())
}
