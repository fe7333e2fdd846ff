//! Table mapping: dotted paths to aliased joins.
//!
//! A [`JoinResolver`] owns one alias scope rooted at a record. Resolving a
//! path walks the schema graph segment by segment and emits one LEFT JOIN
//! per traversed relation row and one per reached entity row:
//!
//! ```text
//!   User t0 ──bed──▶ [UserBed t1] ──▶ Bed t2 ──dormitory──▶ [Dorm_beds t3] ──▶ Dormitory t4
//! ```
//!
//! Joins are keyed by their path, so the same path used twice (by a filter
//! and an ordering key, say) shares one join, while different paths through
//! the same relation always get distinct aliases.
//!
//! A filtered record reached by traversal is restricted with
//! `alias.id IN (SELECT id FROM ... WHERE <filter chain>)`. The subquery is
//! built in its own resolver with a fresh alias prefix, so a filter that
//! itself crosses relations (or targets another filtered record) composes
//! without sharing aliases with the outer query.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use super::event::id_of;
use super::match_expr::{MatchAtom, MatchExp, Operator};
use crate::error::QueryError;
use crate::schema::{Direction, PathNode, RelationEnd, SchemaGraph, Step, Terminal, LINK};
use crate::sql::{and_all, param, table_col, Expr, ExprExt, Join, JoinType, Query, SqlValue, TableRef};
use crate::storage::{RecordStorage, StorageMap};

/// Alias scope for one SELECT.
#[derive(Debug)]
pub struct JoinResolver<'a> {
    graph: &'a SchemaGraph,
    storage: &'a StorageMap,
    root: PathNode,
    prefix: String,
    next_alias: usize,
    subqueries: Rc<Cell<usize>>,
    joins: Vec<Join>,
    /// path key -> (alias, position)
    resolved: HashMap<String, (String, PathNode)>,
    has_many: bool,
}

impl<'a> JoinResolver<'a> {
    pub fn new(
        graph: &'a SchemaGraph,
        storage: &'a StorageMap,
        record: &str,
    ) -> Result<Self, QueryError> {
        Self::scoped(graph, storage, record, String::new(), Rc::new(Cell::new(0)))
    }

    fn scoped(
        graph: &'a SchemaGraph,
        storage: &'a StorageMap,
        record: &str,
        prefix: String,
        subqueries: Rc<Cell<usize>>,
    ) -> Result<Self, QueryError> {
        let root = graph.path_root(record)?;
        let mut resolver = Self {
            graph,
            storage,
            root: root.clone(),
            prefix,
            next_alias: 0,
            subqueries,
            joins: Vec::new(),
            resolved: HashMap::new(),
            has_many: false,
        };
        let alias = resolver.alias();
        resolver.resolved.insert(String::new(), (alias, root));
        Ok(resolver)
    }

    fn alias(&mut self) -> String {
        let alias = format!("{}t{}", self.prefix, self.next_alias);
        self.next_alias += 1;
        alias
    }

    pub fn graph(&self) -> &'a SchemaGraph {
        self.graph
    }

    pub fn root_record(&self) -> &str {
        self.root.record()
    }

    pub fn root_alias(&self) -> String {
        format!("{}t0", self.prefix)
    }

    /// Whether any emitted join can multiply rows.
    pub fn has_many(&self) -> bool {
        self.has_many
    }

    fn storage_of(&self, record: &str) -> Result<RecordStorage<'a>, QueryError> {
        self.storage
            .record_storage(self.graph, record)
            .ok_or_else(|| QueryError::UnknownRecord(record.to_string()))
    }

    /// Id column of the record at `alias`.
    pub fn id_column(&self, alias: &str, node: &PathNode) -> Result<Expr, QueryError> {
        let storage = self.storage_of(node.record())?;
        Ok(table_col(alias, storage.id_column))
    }

    /// Join every segment of `segments` and return the alias and position reached.
    pub fn join_path(&mut self, segments: &[&str]) -> Result<(String, PathNode), QueryError> {
        let mut key = String::new();
        let (mut alias, mut at) = self
            .resolved
            .get("")
            .cloned()
            .ok_or_else(|| QueryError::UnknownRecord(self.root.record().to_string()))?;

        for segment in segments {
            let next_key = if key.is_empty() {
                segment.to_string()
            } else {
                format!("{}.{}", key, segment)
            };
            if let Some((a, n)) = self.resolved.get(&next_key) {
                alias = a.clone();
                at = n.clone();
                key = next_key;
                continue;
            }

            let (next, step) = self.graph.step(&at, segment)?;
            let next_alias = match step {
                Step::Link => {
                    // only reachable when the parent entity was joined through a relation
                    let link_key = format!("{}.{}", key, LINK);
                    self.resolved
                        .get(&link_key)
                        .map(|(a, _)| a.clone())
                        .ok_or_else(|| QueryError::NotNavigable {
                            record: at.record().to_string(),
                            segment: LINK.to_string(),
                        })?
                }
                Step::Navigate(nav) => {
                    let rel = self.storage_of(&nav.relation)?;
                    let rel_info = rel.relation.ok_or_else(|| QueryError::NotNavigable {
                        record: at.record().to_string(),
                        segment: segment.to_string(),
                    })?;
                    let (near, far) = match nav.direction {
                        Direction::Forward => (&rel_info.source_column, &rel_info.target_column),
                        Direction::Backward => (&rel_info.target_column, &rel_info.source_column),
                    };

                    let rel_alias = self.alias();
                    let mut on = vec![table_col(&rel_alias, near).eq(self.id_column(&alias, &at)?)];
                    on.extend(rel_info.existence(&rel_alias));
                    if self.graph.is_filtered(&nav.relation) {
                        let sub = self.subquery(&nav.relation)?;
                        on.push(table_col(&rel_alias, &rel_info.id_column).in_subquery(sub));
                    }
                    self.push_join(rel.table, &rel_alias, on);

                    let entity_alias = self.alias();
                    let far_expr = table_col(&rel_alias, far);
                    self.join_entity(&nav.entity, &entity_alias, far_expr)?;

                    if nav.many {
                        self.has_many = true;
                    }
                    self.resolved.insert(
                        format!("{}.{}", next_key, LINK),
                        (rel_alias, PathNode::Relation { name: nav.relation.clone() }),
                    );
                    entity_alias
                }
                Step::End(end) => {
                    let rel = self.storage_of(at.record())?;
                    let rel_info = rel.relation.ok_or_else(|| QueryError::NotNavigable {
                        record: at.record().to_string(),
                        segment: segment.to_string(),
                    })?;
                    let entity = self
                        .graph
                        .end(at.record(), end)
                        .ok_or_else(|| QueryError::UnknownRecord(at.record().to_string()))?
                        .to_string();
                    let entity_alias = self.alias();
                    self.join_entity(&entity, &entity_alias, table_col(&alias, rel_info.end_column(end)))?;
                    self.resolved.insert(
                        format!("{}.{}", next_key, LINK),
                        (alias.clone(), at.clone()),
                    );
                    entity_alias
                }
            };

            self.resolved
                .insert(next_key.clone(), (next_alias.clone(), next.clone()));
            alias = next_alias;
            at = next;
            key = next_key;
        }
        Ok((alias, at))
    }

    fn join_entity(&mut self, entity: &str, alias: &str, id_value: Expr) -> Result<(), QueryError> {
        let storage = self.storage_of(entity)?;
        let mut on = vec![table_col(alias, storage.id_column).eq(id_value)];
        if self.graph.is_filtered(entity) {
            let sub = self.subquery(entity)?;
            on.push(table_col(alias, storage.id_column).in_subquery(sub));
        }
        self.push_join(storage.table, alias, on);
        Ok(())
    }

    fn push_join(&mut self, table: &str, alias: &str, on: Vec<Expr>) {
        if let Some(on) = and_all(on) {
            self.joins.push(Join {
                join_type: JoinType::Left,
                table: TableRef::new(table).with_alias(alias),
                on,
            });
        }
    }

    /// `SELECT id` of every row belonging to a (filtered) record.
    pub fn subquery(&mut self, record: &str) -> Result<Query, QueryError> {
        let n = self.subqueries.get();
        self.subqueries.set(n + 1);
        let mut sub = JoinResolver::scoped(
            self.graph,
            self.storage,
            record,
            format!("s{}_", n),
            Rc::clone(&self.subqueries),
        )?;
        let constraints = sub.root_constraints()?;
        let root = sub.root_alias();
        let id = sub.id_column(&root, &sub.root.clone())?;
        let mut query = sub.into_query().select(vec![id]);
        if let Some(filter) = and_all(constraints) {
            query = query.filter(filter);
        }
        Ok(query)
    }

    /// Predicates that every row of the root record satisfies: link existence
    /// for merged relations and the whole filter chain of a filtered record.
    pub fn root_constraints(&mut self) -> Result<Vec<Expr>, QueryError> {
        let record = self.root.record().to_string();
        let root = self.root_alias();
        let mut constraints = Vec::new();
        constraints.extend(self.storage_of(&record)?.existence(&root));
        let filters: Vec<MatchExp> = self
            .graph
            .filter_chain(&record)
            .into_iter()
            .cloned()
            .collect();
        for filter in filters {
            constraints.push(self.predicate(&filter)?);
        }
        Ok(constraints)
    }

    /// Column expression for a dotted key, with what the key names.
    pub fn column(&mut self, key: &str) -> Result<(Expr, Terminal), QueryError> {
        let segments: Vec<&str> = key.split('.').collect();
        let Some((last, init)) = segments.split_last() else {
            return Err(QueryError::UnknownField {
                record: self.root.record().to_string(),
                field: key.to_string(),
            });
        };
        let (alias, at) = self.join_path(init)?;
        let terminal = self.graph.terminal(&at, last)?;
        let expr = match &terminal {
            Terminal::Id => self.id_column(&alias, &at)?,
            Terminal::Property(prop) => {
                let storage = self.storage_of(at.record())?;
                let column = storage.column(&prop.name).ok_or_else(|| QueryError::UnknownField {
                    record: at.record().to_string(),
                    field: prop.name.clone(),
                })?;
                table_col(&alias, &column.column)
            }
            Terminal::Navigation(_) => {
                let mut path = init.to_vec();
                path.push(*last);
                let (nav_alias, nav_at) = self.join_path(&path)?;
                self.id_column(&nav_alias, &nav_at)?
            }
            Terminal::End(end) => {
                let storage = self.storage_of(at.record())?;
                let rel = storage.relation.ok_or_else(|| QueryError::UnknownField {
                    record: at.record().to_string(),
                    field: last.to_string(),
                })?;
                table_col(&alias, rel.end_column(*end))
            }
        };
        Ok((expr, terminal))
    }

    /// SQL predicate for a match expression.
    pub fn predicate(&mut self, exp: &MatchExp) -> Result<Expr, QueryError> {
        match exp {
            MatchExp::Atom(atom) => self.atom(atom),
            MatchExp::And(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    parts.push(Expr::Paren(Box::new(self.predicate(item)?)));
                }
                Ok(and_all(parts).unwrap_or(Expr::Bool(true)))
            }
        }
    }

    fn atom(&mut self, atom: &MatchAtom) -> Result<Expr, QueryError> {
        let (column, _) = self.column(&atom.key)?;
        let invalid = |reason: &str| QueryError::InvalidValue {
            key: atom.key.clone(),
            reason: reason.to_string(),
        };

        let expr = match atom.op {
            Operator::Eq if atom.value.is_null() => column.is_null(),
            Operator::Ne if atom.value.is_null() => column.is_not_null(),
            Operator::Eq => column.eq(value_param(&atom.value)),
            Operator::Ne => column.ne(value_param(&atom.value)),
            Operator::Gt => column.gt(value_param(&atom.value)),
            Operator::Gte => column.gte(value_param(&atom.value)),
            Operator::Lt => column.lt(value_param(&atom.value)),
            Operator::Lte => column.lte(value_param(&atom.value)),
            Operator::Like => match &atom.value {
                Value::String(_) => column.like(value_param(&atom.value)),
                _ => return Err(invalid("like expects a string pattern")),
            },
            Operator::In | Operator::NotIn => {
                let items = atom
                    .value
                    .as_array()
                    .ok_or_else(|| invalid("expects an array"))?;
                let values = items.iter().map(value_param).collect();
                if atom.op == Operator::In {
                    column.in_list(values)
                } else {
                    column.not_in_list(values)
                }
            }
            Operator::Between => match atom.value.as_array().map(Vec::as_slice) {
                Some([low, high]) => column.between(value_param(low), value_param(high)),
                _ => return Err(invalid("between expects a two-element array")),
            },
        };
        Ok(expr)
    }

    /// The accumulated FROM and JOIN clauses, with an empty select list.
    pub fn into_query(self) -> Query {
        let alias = self.root_alias();
        let table = self
            .storage
            .record_storage(self.graph, self.root.record())
            .map(|s| s.table.to_string())
            .unwrap_or_default();
        let mut query = Query::new().from(TableRef::new(&table).with_alias(&alias));
        query.joins = self.joins;
        query
    }
}

/// Bound parameter for a match value. `{id}` references compare by id.
fn value_param(value: &Value) -> Expr {
    match value {
        Value::Object(_) => match id_of(value) {
            Some(id) => param(id),
            None => param(SqlValue::from_json(value)),
        },
        other => param(SqlValue::from_json(other)),
    }
}

/// Position of a relation end relative to a navigation.
pub(crate) fn far_end(direction: Direction) -> RelationEnd {
    match direction {
        Direction::Forward => RelationEnd::Target,
        Direction::Backward => RelationEnd::Source,
    }
}

/// The opposite end.
pub(crate) fn near_end(direction: Direction) -> RelationEnd {
    match direction {
        Direction::Forward => RelationEnd::Source,
        Direction::Backward => RelationEnd::Target,
    }
}

/// Full WHERE predicate for reading `record` with an optional match.
pub(crate) fn where_clause(
    resolver: &mut JoinResolver<'_>,
    matcher: Option<&MatchExp>,
) -> Result<Option<Expr>, QueryError> {
    let mut parts = resolver.root_constraints()?;
    if let Some(matcher) = matcher {
        parts.push(resolver.predicate(matcher)?);
    }
    Ok(and_all(parts))
}
