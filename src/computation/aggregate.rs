//! Count and Summation over the records linked through one navigation.
//!
//! An aggregate is recomputed from scratch for every owner a relevant event
//! touches: links of the navigation's relation (created, removed, or moved
//! in or out of a filtered relation), writes to the related entity, and
//! changes to any relation or entity a filter path crosses further out.

use std::collections::BTreeSet;

use serde_json::Value;

use super::bound::BoundStateHandle;
use crate::error::{ComputationError, QueryError, Result, SchemaError};
use crate::query::{
    and_match, AttributeQuery, MatchExp, MutationEvent, MutationKind, Operator, QueryEngine,
};
use crate::schema::{
    Direction, Navigation, PathNode, Property, RecordKind, SchemaGraph, Step, Terminal, ID, LINK,
    SOURCE, TARGET,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Summation,
}

/// `record.property = count/sum` of the records reached through `navigation`.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub name: String,
    pub kind: AggregateKind,
    /// Owner entity.
    pub record: String,
    /// Column receiving the aggregate.
    pub property: String,
    /// Navigation of the owner to aggregate over.
    pub navigation: String,
    /// Restriction on the related records, keyed from the related entity
    /// (`&.<field>` reaches the link).
    pub filter: Option<MatchExp>,
    /// Summed field of the related entity, or `&.<field>` for a link property.
    pub field: Option<String>,
}

/// A record that a filter path crosses beyond the navigation itself.
#[derive(Debug, Clone, PartialEq)]
enum Dependency {
    /// Root entity reached at `path` (relative to the owner).
    Entity { record: String, path: String },
    /// Root relation whose `near` end is the entity at `path`.
    Relation {
        record: String,
        near: &'static str,
        path: String,
    },
}

/// Records the filter paths depend on, and whether any path crosses a
/// filtered record (reverse lookups through those miss records that just
/// left the filter).
#[derive(Debug, Default)]
struct Dependencies {
    items: Vec<Dependency>,
    filtered: bool,
}

impl Aggregate {
    pub fn count(
        name: impl Into<String>,
        record: impl Into<String>,
        property: impl Into<String>,
        navigation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: AggregateKind::Count,
            record: record.into(),
            property: property.into(),
            navigation: navigation.into(),
            filter: None,
            field: None,
        }
    }

    pub fn summation(
        name: impl Into<String>,
        record: impl Into<String>,
        property: impl Into<String>,
        navigation: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            kind: AggregateKind::Summation,
            field: Some(field.into()),
            ..Self::count(name, record, property, navigation)
        }
    }

    pub fn filter(mut self, filter: MatchExp) -> Self {
        self.filter = Some(filter);
        self
    }

    pub(crate) fn bound_column(&self) -> (String, Property) {
        (self.record.clone(), Property::number(&self.property).default_value(0))
    }

    pub fn handle(&self) -> BoundStateHandle {
        BoundStateHandle::new(&self.record, &self.property)
    }

    pub(crate) fn validate(&self, graph: &SchemaGraph) -> std::result::Result<(), SchemaError> {
        match graph.kind(&self.record) {
            Some(RecordKind::Entity) => {}
            Some(RecordKind::Relation) => {
                return Err(SchemaError::NotAnEntity {
                    record: self.record.clone(),
                })
            }
            None => return Err(SchemaError::UnknownRecord(self.record.clone())),
        }
        let navigation = graph.navigation(&self.record, &self.navigation).ok_or_else(|| {
            SchemaError::InvalidComputation {
                computation: self.name.clone(),
                reason: format!("'{}' has no navigation '{}'", self.record, self.navigation),
            }
        })?;
        if let Some(field) = &self.field {
            let known = match field.strip_prefix("&.") {
                Some(link_field) => graph.property(&navigation.relation, link_field).is_some(),
                None => graph.property(&navigation.entity, field).is_some(),
            };
            if !known {
                return Err(SchemaError::InvalidComputation {
                    computation: self.name.clone(),
                    reason: format!("cannot sum unknown field '{}'", field),
                });
            }
        }
        self.dependencies(graph, &navigation)
            .map_err(|e| SchemaError::InvalidComputation {
                computation: self.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Walk every filter key from the related entity and collect the
    /// relations and entities it crosses.
    fn dependencies(&self, graph: &SchemaGraph, navigation: &Navigation) -> std::result::Result<Dependencies, QueryError> {
        let mut deps = Dependencies {
            filtered: graph.is_filtered(&navigation.relation) || graph.is_filtered(&navigation.entity),
            ..Default::default()
        };
        let Some(filter) = &self.filter else {
            return Ok(deps);
        };

        for atom in filter.atoms() {
            let segments: Vec<&str> = atom.key.split('.').collect();
            let Some((last, init)) = segments.split_last() else {
                continue;
            };
            let mut at = PathNode::Entity {
                name: navigation.entity.clone(),
                link: Some(navigation.relation.clone()),
            };
            let mut path = navigation.name.clone();
            for segment in init {
                let (next, step) = graph.step(&at, segment)?;
                match &step {
                    Step::Navigate(nav) => deps.cross(graph, nav, &path),
                    Step::End(_) => {
                        deps.filtered |= graph.is_filtered(next.record());
                        deps.items.push(Dependency::Entity {
                            record: graph.root(next.record()).to_string(),
                            path: format!("{}.{}", path, segment),
                        });
                    }
                    Step::Link => {}
                }
                path = format!("{}.{}", path, segment);
                at = next;
            }
            if *last == LINK {
                continue;
            }
            if let Terminal::Navigation(nav) = graph.terminal(&at, last)? {
                deps.cross(graph, &nav, &path);
            }
        }
        Ok(deps)
    }

    fn resolve(&self, graph: &SchemaGraph) -> Result<Navigation> {
        graph.navigation(&self.record, &self.navigation).ok_or_else(|| {
            SchemaError::InvalidComputation {
                computation: self.name.clone(),
                reason: format!("'{}' has no navigation '{}'", self.record, self.navigation),
            }
            .into()
        })
    }

    /// Owners whose aggregate `event` may have changed.
    fn affected_owners(&self, engine: &QueryEngine, navigation: &Navigation, event: &MutationEvent) -> Result<BTreeSet<i64>> {
        let graph = engine.graph();
        let (near, far) = ends(navigation.direction);
        let mut owners = BTreeSet::new();

        if event.record_name == graph.root(&navigation.relation) {
            owners.extend(event.end_id(near));
            owners.extend(event.old_end_id(near));
        }

        if event.record_name == graph.root(&navigation.entity) && event.kind == MutationKind::Update {
            let links = engine.find_relation_by_name(
                graph.root(&navigation.relation),
                Some(MatchExp::eq(far, event.record_id)),
                None,
                &AttributeQuery::fields([near]),
            )?;
            owners.extend(links.iter().filter_map(|link| link.get(near).and_then(crate::query::id_of)));
        }

        let deps = self.dependencies(graph, navigation)?;
        for dep in &deps.items {
            match dep {
                Dependency::Relation { record, near, path } if event.record_name == *record => {
                    let ends = event.end_id(near).into_iter().chain(event.old_end_id(near));
                    for end in ends.collect::<BTreeSet<_>>() {
                        owners.extend(self.owners_at(engine, path, end, deps.filtered)?);
                    }
                }
                Dependency::Entity { record, path }
                    if event.record_name == *record && event.kind == MutationKind::Update =>
                {
                    owners.extend(self.owners_at(engine, path, event.record_id, deps.filtered)?);
                }
                _ => {}
            }
        }
        Ok(owners)
    }

    /// Owners that reach record `id` at `path`. Every owner when the path
    /// crosses a filtered record.
    fn owners_at(&self, engine: &QueryEngine, path: &str, id: i64, all: bool) -> Result<Vec<i64>> {
        let matcher = (!all).then(|| MatchExp::eq(format!("{}.{}", path, ID), id));
        let owners = engine.find(&self.record, matcher, None, &AttributeQuery::new())?;
        Ok(owners
            .iter()
            .filter_map(|owner| owner.get(ID).and_then(crate::query::id_of))
            .collect())
    }

    /// Aggregate of one owner, queried from the current related set.
    fn compute(&self, engine: &QueryEngine, navigation: &Navigation, owner: i64) -> Result<Value> {
        let (near, far) = ends(navigation.direction);
        let mut matcher = MatchExp::eq(near, owner).and(MatchExp::atom(
            format!("{}.id", far),
            Operator::Ne,
            Value::Null,
        ));
        if let Some(filter) = &self.filter {
            matcher = matcher.and(relative_to_link(filter, far));
        }

        let attributes = match self.field.as_deref() {
            Some(field) => match field.strip_prefix("&.") {
                Some(link_field) => AttributeQuery::fields([link_field]),
                None => AttributeQuery::new().nest(far, AttributeQuery::fields([field])),
            },
            None => AttributeQuery::new(),
        };
        let links = engine.find_relation_by_name(&navigation.relation, Some(matcher), None, &attributes)?;

        match (self.kind, self.field.as_deref()) {
            (AggregateKind::Count, _) | (AggregateKind::Summation, None) => Ok(Value::from(links.len() as i64)),
            (AggregateKind::Summation, Some(field)) => {
                let values = links.iter().map(|link| match field.strip_prefix("&.") {
                    Some(link_field) => link.get(link_field),
                    None => link.get(far).and_then(|entity| entity.get(field)),
                });
                let mut integral = 0i64;
                let mut total = 0f64;
                let mut inexact = false;
                for value in values.flatten() {
                    match value.as_i64().map(|i| (i, integral.checked_add(i))) {
                        Some((_, Some(sum))) => integral = sum,
                        // Past the i64 range the sum continues as a float.
                        Some((i, None)) => {
                            total += i as f64;
                            inexact = true;
                        }
                        None => {
                            if let Some(f) = value.as_f64() {
                                total += f;
                                inexact = true;
                            }
                        }
                    }
                }
                if inexact {
                    Ok(Value::from(total + integral as f64))
                } else {
                    Ok(Value::from(integral))
                }
            }
        }
    }
}

impl Dependencies {
    /// Record crossing `nav` from the entity at `path`.
    fn cross(&mut self, graph: &SchemaGraph, nav: &Navigation, path: &str) {
        self.filtered |= graph.is_filtered(&nav.relation) || graph.is_filtered(&nav.entity);
        self.items.push(Dependency::Relation {
            record: graph.root(&nav.relation).to_string(),
            near: ends(nav.direction).0,
            path: path.to_string(),
        });
        self.items.push(Dependency::Entity {
            record: graph.root(&nav.entity).to_string(),
            path: format!("{}.{}", path, nav.name),
        });
    }
}

fn ends(direction: Direction) -> (&'static str, &'static str) {
    match direction {
        Direction::Forward => (SOURCE, TARGET),
        Direction::Backward => (TARGET, SOURCE),
    }
}

/// Rewrite a filter keyed from the related entity to be keyed from the link.
fn relative_to_link(filter: &MatchExp, far: &str) -> MatchExp {
    let mut result: Option<MatchExp> = None;
    for atom in filter.atoms() {
        let key = match atom.key.strip_prefix(LINK) {
            Some("") => crate::schema::ID.to_string(),
            Some(rest) => rest.trim_start_matches('.').to_string(),
            None => format!("{}.{}", far, atom.key),
        };
        result = and_match(result, Some(MatchExp::atom(key, atom.op, atom.value.clone())));
    }
    result.unwrap_or_else(|| filter.prefixed(far))
}

impl crate::runtime::MutationListener for Aggregate {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, engine: &QueryEngine, event: &MutationEvent) -> Result<Vec<MutationEvent>> {
        let navigation = self.resolve(engine.graph())?;
        let owners = self.affected_owners(engine, &navigation, event)?;
        if owners.is_empty() {
            return Ok(Vec::new());
        }

        let handle = self.handle();
        for owner in owners {
            let value = self
                .compute(engine, &navigation, owner)
                .map_err(|e| ComputationError::handler(&self.name, e))?;
            log::debug!("{}: {}#{}.{} = {}", self.name, self.record, owner, self.property, value);
            handle
                .set(engine, owner, value)
                .map_err(|e| ComputationError::handler(&self.name, e))?;
        }
        Ok(Vec::new())
    }
}
