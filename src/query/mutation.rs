//! Writes: creates with inline relation payloads, updates, deletes and links.
//!
//! Every function here runs inside the savepoint opened by the public
//! [`QueryEngine`] operation and pushes its events into the caller's buffer
//! in the order the rows changed.

use serde_json::Value;

use super::attribute::AttributeQuery;
use super::engine::{payload, QueryEngine};
use super::event::{id_of, MutationEvent, MutationKind};
use super::match_expr::{MatchExp, Operator};
use super::modifier::Modifier;
use super::Record;
use crate::error::{MutationError, QueryError, Result};
use crate::schema::{Direction, Navigation, Property, PropertyType, RelationEnd, ID, LINK, SOURCE, TARGET};
use crate::sql::{col, param, Delete, ExprExt, Insert, Query, SqlValue, Statement, TableRef, Update};
use crate::storage::{RelationMap, RelationStorage};

/// Fields read before a relation row is changed or removed.
fn link_attributes() -> AttributeQuery {
    AttributeQuery::fields(["*", SOURCE, TARGET])
}

impl QueryEngine {
    // =========================================================================
    // Entities
    // =========================================================================

    /// Insert one entity row (into its root table), then write inline relations.
    pub(crate) fn create_entity(
        &self,
        record: &str,
        data: &Record,
        events: &mut Vec<MutationEvent>,
    ) -> Result<(i64, Record)> {
        let root = self.graph.root(record).to_string();
        let table = self
            .storage
            .entity_table(&self.graph, record)
            .ok_or_else(|| QueryError::UnknownRecord(record.to_string()))?;

        let mut inline = Vec::new();
        for (key, value) in data {
            if self.graph.property(record, key).is_some() {
                continue;
            }
            match self.graph.navigation(record, key) {
                Some(navigation) => inline.push((navigation, value)),
                None => {
                    return Err(MutationError::UnknownKey {
                        record: record.to_string(),
                        key: key.clone(),
                    }
                    .into())
                }
            }
        }

        let values = row_values(record, self.graph.properties(record), data)?;
        let mut columns = Vec::with_capacity(values.len());
        let mut params = Vec::with_capacity(values.len());
        for (prop, value) in &values {
            let column = table.column(&prop.name).ok_or_else(|| QueryError::UnknownField {
                record: record.to_string(),
                field: prop.name.clone(),
            })?;
            columns.push(column.column.clone());
            params.push(param(to_column(prop.ty, value)));
        }

        let statement = Insert::into(&table.table)
            .columns(columns)
            .values(params)
            .returning([col(ID)])
            .to_statement(self.dialect);
        let id = self.returned_id(&root, &format!("create {}", root), &statement)?;

        let mut created = Record::new();
        created.insert(ID.to_string(), Value::from(id));
        let mut changed = Vec::with_capacity(values.len());
        for (prop, value) in values {
            changed.push(prop.name.clone());
            created.insert(prop.name.clone(), value);
        }
        log::debug!("created {}#{}", root, id);
        events.push(MutationEvent::new(&root, MutationKind::Create, id, created.clone()).changed(changed));

        for (navigation, value) in inline {
            self.write_inline(record, id, &navigation, value, events)?;
        }
        Ok((id, created))
    }

    /// Link a freshly created record through one navigation of its payload.
    ///
    /// Items are `{id}` references or payloads for new records; either may
    /// carry relation properties under `&`.
    fn write_inline(
        &self,
        record: &str,
        id: i64,
        navigation: &Navigation,
        value: &Value,
        events: &mut Vec<MutationEvent>,
    ) -> Result<()> {
        let items: Vec<&Value> = match value {
            Value::Null => return Ok(()),
            Value::Array(items) if navigation.many => items.iter().collect(),
            Value::Object(_) if !navigation.many => vec![value],
            _ => {
                return Err(MutationError::InvalidPayload {
                    record: record.to_string(),
                    reason: format!(
                        "'{}' expects {}",
                        navigation.name,
                        if navigation.many { "an array" } else { "an object" }
                    ),
                }
                .into())
            }
        };

        for item in items {
            let mut item = payload(&navigation.entity, item.clone())?;
            let link_data = match item.remove(LINK) {
                None | Some(Value::Null) => Record::new(),
                Some(Value::Object(map)) => map,
                Some(other) => {
                    return Err(MutationError::InvalidPayload {
                        record: navigation.relation.clone(),
                        reason: format!("'{}' must be an object, got {}", LINK, other),
                    }
                    .into())
                }
            };
            let other = match item.get(ID) {
                Some(reference) => id_of(reference).ok_or_else(|| MutationError::InvalidPayload {
                    record: navigation.entity.clone(),
                    reason: format!("'{}' is not a valid id", reference),
                })?,
                None => self.create_entity(&navigation.entity, &item, events)?.0,
            };
            let (source, target) = match navigation.direction {
                Direction::Forward => (id, other),
                Direction::Backward => (other, id),
            };
            self.link(&navigation.relation, source, target, &link_data, events)?;
        }
        Ok(())
    }

    pub(crate) fn update_entities(
        &self,
        record: &str,
        matcher: &MatchExp,
        data: &Record,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Vec<Record>> {
        let root = self.graph.root(record).to_string();
        let table = self
            .storage
            .entity_table(&self.graph, record)
            .ok_or_else(|| QueryError::UnknownRecord(record.to_string()))?;

        let mut changes = Vec::new();
        let mut relinks = Vec::new();
        for (key, value) in data {
            if let Some(prop) = self.graph.property(record, key) {
                check_value(record, prop, value)?;
                changes.push((prop, value));
                continue;
            }
            match self.graph.navigation(record, key) {
                Some(navigation) if !navigation.many => {
                    if !value.is_null() && id_of(value).is_none() {
                        return Err(MutationError::InvalidPayload {
                            record: record.to_string(),
                            reason: format!("'{}' expects null or {{id}}", key),
                        }
                        .into());
                    }
                    relinks.push((navigation, value));
                }
                Some(navigation) => {
                    return Err(MutationError::InvalidPayload {
                        record: record.to_string(),
                        reason: format!(
                            "'{}' links many records; use the relation operations of '{}'",
                            key, navigation.relation
                        ),
                    }
                    .into())
                }
                None => {
                    return Err(MutationError::UnknownKey {
                        record: record.to_string(),
                        key: key.clone(),
                    }
                    .into())
                }
            }
        }

        let rows = self
            .fetcher()
            .find(record, Some(matcher), &Modifier::new(), &AttributeQuery::all())?;

        let mut updated = Vec::with_capacity(rows.len());
        for old in rows {
            let id = row_id(&old)?;
            let mut new = old.clone();
            let mut changed = Vec::new();
            let mut update = Update::table(&table.table);
            for (prop, value) in &changes {
                let unchanged = match old.get(&prop.name) {
                    Some(current) => same_value(current, value),
                    None => value.is_null(),
                };
                if unchanged {
                    continue;
                }
                let column = table.column(&prop.name).ok_or_else(|| QueryError::UnknownField {
                    record: record.to_string(),
                    field: prop.name.clone(),
                })?;
                update = update.set(&column.column, param(to_column(prop.ty, value)));
                new.insert(prop.name.clone(), (*value).clone());
                changed.push(prop.name.clone());
            }

            if !changed.is_empty() {
                let statement = update.filter(col(ID).eq(id)).to_statement(self.dialect);
                self.db.run(&format!("update {}", root), &statement)?;
                events.push(
                    MutationEvent::new(&root, MutationKind::Update, id, new.clone())
                        .changed(changed)
                        .with_old(old),
                );
            }

            for (navigation, value) in &relinks {
                self.relink(id, navigation, value, events)?;
            }
            updated.push(new);
        }
        Ok(updated)
    }

    /// Point an x:1 navigation of `id` elsewhere, or unlink it on `null`.
    fn relink(
        &self,
        id: i64,
        navigation: &Navigation,
        value: &Value,
        events: &mut Vec<MutationEvent>,
    ) -> Result<()> {
        let (near, far) = match navigation.direction {
            Direction::Forward => (SOURCE, TARGET),
            Direction::Backward => (TARGET, SOURCE),
        };
        let current = MatchExp::eq(near, id);
        let wanted = id_of(value);

        if let Some(other) = wanted {
            let links = self.fetcher().find(
                &navigation.relation,
                Some(&current),
                &Modifier::new(),
                &link_attributes(),
            )?;
            if links.iter().any(|link| link.get(far).and_then(id_of) == Some(other)) {
                return Ok(());
            }
        }

        self.remove_links(&navigation.relation, Some(&current), events)?;
        if let Some(other) = wanted {
            let (source, target) = match navigation.direction {
                Direction::Forward => (id, other),
                Direction::Backward => (other, id),
            };
            self.link(&navigation.relation, source, target, &Record::new(), events)?;
        }
        Ok(())
    }

    /// Delete matching rows after removing every link that touches them.
    pub(crate) fn delete_entities(
        &self,
        record: &str,
        matcher: &MatchExp,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Vec<Record>> {
        let root = self.graph.root(record).to_string();
        let table = self
            .storage
            .entity_table(&self.graph, record)
            .ok_or_else(|| QueryError::UnknownRecord(record.to_string()))?;

        let rows = self
            .fetcher()
            .find(record, Some(matcher), &Modifier::new(), &AttributeQuery::all())?;
        if rows.is_empty() {
            return Ok(rows);
        }
        let ids = rows.iter().map(row_id).collect::<Result<Vec<_>>>()?;
        let id_values = Value::Array(ids.iter().map(|id| Value::from(*id)).collect());

        for relation in self.graph.relations_touching(&root) {
            for (end, key) in [(RelationEnd::Source, SOURCE), (RelationEnd::Target, TARGET)] {
                let stored_here = self
                    .graph
                    .end(relation, end)
                    .map(|entity| self.graph.root(entity) == root)
                    .unwrap_or(false);
                if stored_here {
                    let touching = MatchExp::atom(key, Operator::In, id_values.clone());
                    self.remove_links(relation, Some(&touching), events)?;
                }
            }
        }

        let statement = Delete::from(&table.table)
            .filter(col(ID).in_list(ids.iter().map(|id| param(*id)).collect()))
            .to_statement(self.dialect);
        self.db.run(&format!("delete {}", root), &statement)?;

        for (id, row) in ids.iter().zip(&rows) {
            events.push(MutationEvent::new(&root, MutationKind::Delete, *id, row.clone()));
        }
        log::debug!("deleted {} {} row(s)", rows.len(), root);
        Ok(rows)
    }

    // =========================================================================
    // Relations
    // =========================================================================

    /// Create one link, enforcing the relation's cardinality.
    pub(crate) fn link(
        &self,
        relation: &str,
        source_id: i64,
        target_id: i64,
        data: &Record,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Record> {
        let root = self.graph.root(relation).to_string();
        let map = self.relation_map(relation)?;
        let cardinality = self
            .graph
            .cardinality(&root)
            .ok_or_else(|| QueryError::UnknownRecord(relation.to_string()))?;

        for key in data.keys() {
            if self.graph.property(relation, key).is_none() {
                return Err(MutationError::UnknownKey {
                    record: relation.to_string(),
                    key: key.clone(),
                }
                .into());
            }
        }
        let values = row_values(relation, self.graph.properties(relation), data)?;

        self.expect_end(relation, RelationEnd::Source, source_id)?;
        self.expect_end(relation, RelationEnd::Target, target_id)?;
        if !cardinality.target_is_many() && self.is_linked(map, RelationEnd::Source, source_id)? {
            return Err(MutationError::Cardinality {
                relation: root,
                reason: format!("source {} already has a target ({})", source_id, cardinality),
            }
            .into());
        }
        if !cardinality.source_is_many() && self.is_linked(map, RelationEnd::Target, target_id)? {
            return Err(MutationError::Cardinality {
                relation: root,
                reason: format!("target {} already has a source ({})", target_id, cardinality),
            }
            .into());
        }

        let name = format!("link {}", root);
        let id = match map.storage {
            RelationStorage::JoinTable => {
                let mut columns = vec![map.source_column.clone(), map.target_column.clone()];
                let mut params = vec![param(source_id), param(target_id)];
                for (prop, value) in &values {
                    let column = map.column(&prop.name).ok_or_else(|| QueryError::UnknownField {
                        record: root.clone(),
                        field: prop.name.clone(),
                    })?;
                    columns.push(column.column.clone());
                    params.push(param(to_column(prop.ty, value)));
                }
                let statement = Insert::into(&map.table)
                    .columns(columns)
                    .values(params)
                    .returning([col(&map.id_column)])
                    .to_statement(self.dialect);
                self.returned_id(&root, &name, &statement)?
            }
            RelationStorage::MergedIntoSource => {
                let statement = Update::table(&map.table)
                    .set(&map.target_column, param(target_id))
                    .filter(col(&map.id_column).eq(source_id))
                    .to_statement(self.dialect);
                self.db.run(&name, &statement)?;
                source_id
            }
            RelationStorage::MergedIntoTarget => {
                let statement = Update::table(&map.table)
                    .set(&map.source_column, param(source_id))
                    .filter(col(&map.id_column).eq(target_id))
                    .to_statement(self.dialect);
                self.db.run(&name, &statement)?;
                target_id
            }
        };

        let mut record = Record::new();
        record.insert(ID.to_string(), Value::from(id));
        record.insert(SOURCE.to_string(), serde_json::json!({ "id": source_id }));
        record.insert(TARGET.to_string(), serde_json::json!({ "id": target_id }));
        let mut changed = vec![SOURCE.to_string(), TARGET.to_string()];
        for (prop, value) in values {
            changed.push(prop.name.clone());
            record.insert(prop.name.clone(), value);
        }
        log::debug!("linked {} {} -> {}", root, source_id, target_id);
        events.push(MutationEvent::new(&root, MutationKind::Create, id, record.clone()).changed(changed));
        Ok(record)
    }

    /// Remove matching links; merged links are cleared rather than deleted.
    pub(crate) fn remove_links(
        &self,
        relation: &str,
        matcher: Option<&MatchExp>,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Vec<Record>> {
        let root = self.graph.root(relation).to_string();
        let map = self.relation_map(relation)?;
        let rows = self
            .fetcher()
            .find(relation, matcher, &Modifier::new(), &link_attributes())?;

        let name = format!("unlink {}", root);
        for row in &rows {
            let id = row_id(row)?;
            let statement = match map.storage {
                RelationStorage::JoinTable => Delete::from(&map.table)
                    .filter(col(&map.id_column).eq(id))
                    .to_statement(self.dialect),
                RelationStorage::MergedIntoSource => Update::table(&map.table)
                    .set(&map.target_column, param(SqlValue::Null))
                    .filter(col(&map.id_column).eq(id))
                    .to_statement(self.dialect),
                RelationStorage::MergedIntoTarget => Update::table(&map.table)
                    .set(&map.source_column, param(SqlValue::Null))
                    .filter(col(&map.id_column).eq(id))
                    .to_statement(self.dialect),
            };
            self.db.run(&name, &statement)?;
            events.push(MutationEvent::new(&root, MutationKind::Delete, id, row.clone()));
        }
        Ok(rows)
    }

    pub(crate) fn update_links(
        &self,
        relation: &str,
        matcher: &MatchExp,
        data: &Record,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Vec<Record>> {
        let root = self.graph.root(relation).to_string();
        let map = self.relation_map(relation)?;

        let mut changes = Vec::new();
        for (key, value) in data {
            match self.graph.property(relation, key) {
                Some(prop) => {
                    check_value(relation, prop, value)?;
                    changes.push((prop, value));
                }
                None => {
                    return Err(MutationError::UnknownKey {
                        record: relation.to_string(),
                        key: key.clone(),
                    }
                    .into())
                }
            }
        }

        let rows = self
            .fetcher()
            .find(relation, Some(matcher), &Modifier::new(), &link_attributes())?;

        let mut updated = Vec::with_capacity(rows.len());
        for old in rows {
            let id = row_id(&old)?;
            let mut new = old.clone();
            let mut changed = Vec::new();
            let mut update = Update::table(&map.table);
            for (prop, value) in &changes {
                if old.get(&prop.name).map_or(value.is_null(), |current| same_value(current, value)) {
                    continue;
                }
                let column = map.column(&prop.name).ok_or_else(|| QueryError::UnknownField {
                    record: root.clone(),
                    field: prop.name.clone(),
                })?;
                update = update.set(&column.column, param(to_column(prop.ty, value)));
                new.insert(prop.name.clone(), (*value).clone());
                changed.push(prop.name.clone());
            }
            if !changed.is_empty() {
                let statement = update
                    .filter(col(&map.id_column).eq(id))
                    .to_statement(self.dialect);
                self.db.run(&format!("update {}", root), &statement)?;
                events.push(
                    MutationEvent::new(&root, MutationKind::Update, id, new.clone())
                        .changed(changed)
                        .with_old(old),
                );
            }
            updated.push(new);
        }
        Ok(updated)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn relation_map(&self, relation: &str) -> Result<&RelationMap> {
        Ok(self
            .storage
            .relation_storage(&self.graph, relation)
            .ok_or_else(|| QueryError::UnknownRecord(relation.to_string()))?)
    }

    /// The entity at one end of `relation` must exist (and satisfy its filter).
    fn expect_end(&self, relation: &str, end: RelationEnd, id: i64) -> Result<()> {
        let entity = self
            .graph
            .end(relation, end)
            .ok_or_else(|| QueryError::UnknownRecord(relation.to_string()))?;
        let found = self.fetcher().find(
            entity,
            Some(&MatchExp::id(id)),
            &Modifier::new().limit(1),
            &AttributeQuery::new(),
        )?;
        if found.is_empty() {
            return Err(MutationError::NotFound {
                record: entity.to_string(),
                id,
            }
            .into());
        }
        Ok(())
    }

    /// Whether the record at `end` already takes part in a link.
    fn is_linked(&self, map: &RelationMap, end: RelationEnd, id: i64) -> Result<bool> {
        let mut filter = col(map.end_column(end)).eq(id);
        if let Some(exists) = map.existence(&map.table) {
            filter = filter.and(exists);
        }
        let statement = Query::new()
            .select(vec![col(&map.id_column)])
            .from(TableRef::new(&map.table))
            .filter(filter)
            .limit(1)
            .to_statement(self.dialect);
        let result = self
            .db
            .fetch(&format!("check {}", map.relation), &statement)?;
        Ok(!result.rows.is_empty())
    }

    fn returned_id(&self, record: &str, name: &str, statement: &Statement) -> Result<i64> {
        let result = self.db.fetch(name, statement)?;
        result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(SqlValue::as_i64)
            .ok_or_else(|| {
                MutationError::InvalidPayload {
                    record: record.to_string(),
                    reason: "insert returned no id".to_string(),
                }
                .into()
            })
    }
}

fn row_id(record: &Record) -> Result<i64> {
    record
        .get(ID)
        .and_then(Value::as_i64)
        .ok_or_else(|| QueryError::InvalidValue {
            key: ID.to_string(),
            reason: "row without id".to_string(),
        }
        .into())
}

/// Validated values of a new row: given values first, then defaults.
fn row_values<'p>(
    record: &str,
    properties: &'p [Property],
    data: &Record,
) -> std::result::Result<Vec<(&'p Property, Value)>, MutationError> {
    let mut values = Vec::new();
    for prop in properties {
        match data.get(&prop.name) {
            Some(value) => {
                check_value(record, prop, value)?;
                values.push((prop, value.clone()));
            }
            None => match &prop.default {
                Some(default) => {
                    let value = default.evaluate(data);
                    check_value(record, prop, &value)?;
                    values.push((prop, value));
                }
                None if prop.required => {
                    return Err(MutationError::MissingRequired {
                        record: record.to_string(),
                        property: prop.name.clone(),
                    })
                }
                None => {}
            },
        }
    }
    Ok(values)
}

fn check_value(record: &str, prop: &Property, value: &Value) -> std::result::Result<(), MutationError> {
    if value.is_null() {
        if prop.required {
            return Err(MutationError::MissingRequired {
                record: record.to_string(),
                property: prop.name.clone(),
            });
        }
        return Ok(());
    }
    if !prop.ty.accepts(value) {
        return Err(MutationError::TypeMismatch {
            record: record.to_string(),
            property: prop.name.clone(),
            expected: prop.ty,
            found: json_type(value).to_string(),
        });
    }
    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Bindable value of a property. JSON documents are stored as text.
fn to_column(ty: PropertyType, value: &Value) -> SqlValue {
    match (ty, value) {
        (_, Value::Null) => SqlValue::Null,
        (PropertyType::Json, value) => SqlValue::Text(value.to_string()),
        (_, value) => SqlValue::from_json(value),
    }
}

/// Equality that ignores the integer/float distinction of stored numbers.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
