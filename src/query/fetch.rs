//! Reads: attribute queries to SELECTs and rows to nested records.
//!
//! Own properties and every x:1 nested entry (navigations to one record,
//! `&`, `source`, `target`) are selected in the main statement through the
//! resolver's joins. Each x:n nested entry is fetched with one batched
//! follow-up query per nesting level, keyed by the parent ids, and stitched
//! back in relation-id order.

use std::collections::HashMap;

use serde_json::Value;

use super::attribute::AttributeQuery;
use super::mapping::{far_end, near_end, where_clause, JoinResolver};
use super::match_expr::MatchExp;
use super::modifier::Modifier;
use super::Record;
use crate::error::{QueryError, Result};
use crate::schema::{
    Navigation, PropertyType, RelationEnd, SchemaGraph, Step, Terminal, ID, SOURCE,
    TARGET,
};
use crate::sql::{and_all, param, table_col, Dialect, ExprExt, OrderByExpr, SelectExpr, SqlValue};
use crate::storage::{Database, StorageMap};

#[derive(Debug)]
enum FieldKind {
    Value(PropertyType),
    /// Rendered as `{id}`.
    Reference,
}

#[derive(Debug)]
struct FetchField {
    name: String,
    index: usize,
    kind: FieldKind,
}

#[derive(Debug)]
struct ManyFetch {
    name: String,
    navigation: Navigation,
    query: AttributeQuery,
}

/// Where each requested value sits in a result row.
#[derive(Debug)]
struct FetchNode {
    id: usize,
    fields: Vec<FetchField>,
    one: Vec<(String, FetchNode)>,
    many: Vec<ManyFetch>,
}

/// Borrowed view used to run reads.
pub(crate) struct Fetcher<'a> {
    pub graph: &'a SchemaGraph,
    pub storage: &'a StorageMap,
    pub db: &'a dyn Database,
    pub dialect: Dialect,
}

impl<'a> Fetcher<'a> {
    /// Records of `record` matching `matcher`, hydrated per `attributes`.
    pub fn find(
        &self,
        record: &str,
        matcher: Option<&MatchExp>,
        modifier: &Modifier,
        attributes: &AttributeQuery,
    ) -> Result<Vec<Record>> {
        let mut resolver = JoinResolver::new(self.graph, self.storage, record)?;
        let filter = where_clause(&mut resolver, matcher)?;

        let mut select = Vec::new();
        let node = plan_node(&mut resolver, &mut select, &[], attributes)?;

        let mut order = Vec::new();
        for key in &modifier.order_by {
            check_order_key(self.graph, record, &key.key)?;
            let (expr, _) = resolver.column(&key.key)?;
            order.push((expr, key.order));
        }
        let root_alias = resolver.root_alias();
        let root_id = resolver.id_column(&root_alias, &resolver.graph().path_root(record)?)?;
        let distinct = resolver.has_many();

        let mut order_by = Vec::new();
        for (i, (expr, dir)) in order.into_iter().enumerate() {
            if distinct {
                select.push(expr.clone().alias(&format!("o{}", i)));
            }
            order_by.push(OrderByExpr {
                expr,
                dir: dir.into(),
            });
        }
        order_by.push(OrderByExpr::asc(root_id));

        let mut query = resolver.into_query().select(select).order_by(order_by);
        if distinct {
            query = query.distinct();
        }
        if let Some(filter) = filter {
            query = query.filter(filter);
        }
        if let Some(limit) = modifier.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = modifier.offset {
            query = query.offset(offset);
        }

        let statement = query.to_statement(self.dialect);
        let result = self.db.fetch(&format!("find {}", record), &statement)?;

        let mut records: Vec<Record> = result
            .rows
            .iter()
            .filter_map(|row| match hydrate(&node, row) {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.fill_many(&node, records.iter_mut().collect())?;
        Ok(records)
    }

    fn fill_many(&self, node: &FetchNode, mut records: Vec<&mut Record>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        for (name, child) in &node.one {
            let nested: Vec<&mut Record> = records
                .iter_mut()
                .filter_map(|r| r.get_mut(name).and_then(Value::as_object_mut))
                .collect();
            self.fill_many(child, nested)?;
        }

        for many in &node.many {
            let ids: Vec<i64> = records
                .iter()
                .filter_map(|r| r.get(ID).and_then(Value::as_i64))
                .collect();
            let mut groups = self.fetch_many(many, &ids)?;
            for record in records.iter_mut() {
                let items = record
                    .get(ID)
                    .and_then(Value::as_i64)
                    .and_then(|id| groups.remove(&id))
                    .unwrap_or_default();
                record.insert(
                    many.name.clone(),
                    Value::Array(items.into_iter().map(Value::Object).collect()),
                );
            }
        }
        Ok(())
    }

    fn fetch_many(&self, many: &ManyFetch, parent_ids: &[i64]) -> Result<HashMap<i64, Vec<Record>>> {
        let mut groups: HashMap<i64, Vec<Record>> = HashMap::new();
        if parent_ids.is_empty() {
            return Ok(groups);
        }
        let nav = &many.navigation;
        let relation = self
            .storage
            .relation_storage(self.graph, &nav.relation)
            .ok_or_else(|| QueryError::UnknownRecord(nav.relation.clone()))?;

        let mut resolver = JoinResolver::new(self.graph, self.storage, &nav.relation)?;
        let root_alias = resolver.root_alias();
        let parent = table_col(&root_alias, relation.end_column(near_end(nav.direction)));
        let far = match far_end(nav.direction) {
            RelationEnd::Source => SOURCE,
            RelationEnd::Target => TARGET,
        };

        let mut parts = resolver.root_constraints()?;
        let mut select: Vec<SelectExpr> = vec![parent.clone().alias("c0")];
        let node = plan_node(&mut resolver, &mut select, &[far.to_string()], &many.query)?;
        let (entity_alias, entity_at) = resolver.join_path(&[far])?;
        parts.push(resolver.id_column(&entity_alias, &entity_at)?.is_not_null());
        parts.push(parent.in_list(parent_ids.iter().map(|id| param(*id)).collect()));
        let link_id = table_col(&root_alias, &relation.id_column);

        let mut query = resolver
            .into_query()
            .select(select)
            .order_by(vec![OrderByExpr::asc(link_id)]);
        if let Some(filter) = and_all(parts) {
            query = query.filter(filter);
        }

        let statement = query.to_statement(self.dialect);
        let result = self
            .db
            .fetch(&format!("find {}.{}", nav.relation, many.name), &statement)?;

        let mut children: Vec<(i64, Record)> = result
            .rows
            .iter()
            .filter_map(|row| {
                let parent = row.first().and_then(SqlValue::as_i64)?;
                match hydrate(&node, row) {
                    Value::Object(map) => Some((parent, map)),
                    _ => None,
                }
            })
            .collect();
        self.fill_many(&node, children.iter_mut().map(|(_, r)| r).collect())?;

        for (parent, record) in children {
            groups.entry(parent).or_default().push(record);
        }
        Ok(groups)
    }
}

/// Order keys must resolve to one value per record.
fn check_order_key(graph: &SchemaGraph, record: &str, key: &str) -> Result<()> {
    let many = || QueryError::ManyValuedOrder {
        record: record.to_string(),
        key: key.to_string(),
    };
    let segments: Vec<&str> = key.split('.').collect();
    let Some((last, init)) = segments.split_last() else {
        return Ok(());
    };
    let mut at = graph.path_root(record)?;
    for segment in init {
        let (next, step) = graph.step(&at, segment)?;
        if matches!(&step, Step::Navigate(nav) if nav.many) {
            return Err(many().into());
        }
        at = next;
    }
    match graph.terminal(&at, last)? {
        Terminal::Navigation(nav) if nav.many => Err(many().into()),
        _ => Ok(()),
    }
}

fn plan_node(
    resolver: &mut JoinResolver<'_>,
    select: &mut Vec<SelectExpr>,
    path: &[String],
    attributes: &AttributeQuery,
) -> std::result::Result<FetchNode, QueryError> {
    let segments: Vec<&str> = path.iter().map(String::as_str).collect();
    let (alias, at) = resolver.join_path(&segments)?;
    let graph = resolver.graph();

    let id = select.len();
    select.push(resolver.id_column(&alias, &at)?.alias(&format!("c{}", id)));

    let mut node = FetchNode {
        id,
        fields: Vec::new(),
        one: Vec::new(),
        many: Vec::new(),
    };

    let mut names: Vec<String> = Vec::new();
    for name in attributes.field_names() {
        if name == "*" {
            names.extend(graph.properties(at.record()).iter().map(|p| p.name.clone()));
        } else {
            names.push(name.to_string());
        }
    }

    let mut nested: Vec<(String, AttributeQuery)> = Vec::new();
    for name in names {
        if name == ID || node.fields.iter().any(|f| f.name == name) {
            continue;
        }
        let kind = match graph.terminal(&at, &name)? {
            Terminal::Id => continue,
            Terminal::Property(prop) => FieldKind::Value(prop.ty),
            Terminal::End(_) => FieldKind::Reference,
            Terminal::Navigation(_) => {
                nested.push((name, AttributeQuery::new()));
                continue;
            }
        };
        let key = segments
            .iter()
            .copied()
            .chain(std::iter::once(name.as_str()))
            .collect::<Vec<_>>()
            .join(".");
        let (expr, _) = resolver.column(&key)?;
        let index = select.len();
        select.push(expr.alias(&format!("c{}", index)));
        node.fields.push(FetchField { name, index, kind });
    }

    nested.extend(
        attributes
            .nested()
            .map(|(name, query)| (name.to_string(), query.clone())),
    );

    for (name, query) in nested {
        let (_, step) = graph.step(&at, &name)?;
        match step {
            Step::Navigate(navigation) if navigation.many => node.many.push(ManyFetch {
                name,
                navigation,
                query,
            }),
            _ => {
                let mut child_path = path.to_vec();
                child_path.push(name.clone());
                let child = plan_node(resolver, select, &child_path, &query)?;
                node.one.push((name, child));
            }
        }
    }

    Ok(node)
}

fn hydrate(node: &FetchNode, row: &[SqlValue]) -> Value {
    let id = match row.get(node.id).and_then(SqlValue::as_i64) {
        Some(id) => id,
        None => return Value::Null,
    };
    let mut record = Record::new();
    record.insert(ID.to_string(), Value::from(id));

    for field in &node.fields {
        let value = row.get(field.index).unwrap_or(&SqlValue::Null);
        let json = match field.kind {
            FieldKind::Value(ty) => column_to_json(value, ty),
            FieldKind::Reference => match value.as_i64() {
                Some(id) => serde_json::json!({ "id": id }),
                None => Value::Null,
            },
        };
        record.insert(field.name.clone(), json);
    }

    for (name, child) in &node.one {
        record.insert(name.clone(), hydrate(child, row));
    }

    Value::Object(record)
}

/// JSON value of a stored column of type `ty`.
pub(crate) fn column_to_json(value: &SqlValue, ty: PropertyType) -> Value {
    match (ty, value) {
        (_, SqlValue::Null) => Value::Null,
        (PropertyType::Boolean, SqlValue::Integer(i)) => Value::Bool(*i != 0),
        (PropertyType::Json, SqlValue::Text(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
        }
        (PropertyType::Number, SqlValue::Text(s)) => s
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| s.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(s.clone())),
        _ => value.to_json(),
    }
}
