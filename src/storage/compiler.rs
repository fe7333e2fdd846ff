//! Schema compiler: decides physical storage for a (cloned) schema graph.
//!
//! Storage strategy per root relation:
//!
//! | cardinality | properties | storage                                        |
//! |-------------|------------|------------------------------------------------|
//! | `1:1`       | none       | `{sourceProperty}_id UNIQUE` in source table   |
//! | `n:1`       | none       | `{sourceProperty}_id` in source table          |
//! | `1:n`       | none       | `{targetProperty}_id` in target table          |
//! | `n:n`       | any        | join table `id, source_id, target_id, ...`     |
//! | any         | some       | join table, uniqueness follows the x:1 side(s) |
//!
//! Filtered entities and relations get nothing: they resolve to their root.

use std::collections::HashSet;

use inflector::Inflector;

use super::map::{ColumnMap, ForeignKey, RelationMap, RelationStorage, StorageMap, TableMap};
use crate::error::SchemaError;
use crate::schema::{Cardinality, Property, RecordKind, SchemaGraph, ID};
use crate::sql::ddl::{ColumnDef, CreateTable, DataType, TableConstraint};

const SOURCE_ID: &str = "source_id";
const TARGET_ID: &str = "target_id";

/// Attach computation-owned properties to their owners' root storage.
///
/// Must run on an instance graph, before [`compile`].
pub fn inject_columns(
    graph: &mut SchemaGraph,
    columns: impl IntoIterator<Item = (String, Property)>,
) -> Result<(), SchemaError> {
    for (owner, property) in columns {
        if !graph.contains(&owner) {
            return Err(SchemaError::UnknownRecord(owner));
        }
        log::debug!(
            "injecting computed column {}.{} into {}",
            owner,
            property.name,
            graph.root(&owner)
        );
        graph.add_property(&owner, property.computed())?;
    }
    Ok(())
}

/// Compile a schema graph into its storage map.
pub fn compile(graph: &SchemaGraph) -> Result<StorageMap, SchemaError> {
    let mut map = StorageMap::default();
    let mut table_names = HashSet::new();

    for name in graph.entities() {
        if graph.is_filtered(name) {
            continue;
        }
        let table = name.to_snake_case();
        if !table_names.insert(table.clone()) {
            return Err(SchemaError::DuplicateName(table));
        }
        map.push_table(TableMap {
            record: name.to_string(),
            table,
            columns: columns_of(graph.properties(name)),
            foreign_keys: Vec::new(),
        });
    }

    for name in graph.relations() {
        if graph.is_filtered(name) {
            continue;
        }
        let relation = compile_relation(graph, &mut map, name)?;
        if relation.storage == RelationStorage::JoinTable
            && !table_names.insert(relation.table.clone())
        {
            return Err(SchemaError::DuplicateName(relation.table));
        }
        log::debug!(
            "relation {} stored as {:?} in {}",
            relation.relation,
            relation.storage,
            relation.table
        );
        map.push_relation(relation);
    }

    Ok(map)
}

fn columns_of(properties: &[Property]) -> Vec<ColumnMap> {
    properties
        .iter()
        .map(|p| ColumnMap {
            property: p.name.clone(),
            column: p.name.clone(),
            ty: p.ty,
        })
        .collect()
}

fn compile_relation(
    graph: &SchemaGraph,
    map: &mut StorageMap,
    name: &str,
) -> Result<RelationMap, SchemaError> {
    let node = graph
        .relation(name)
        .ok_or_else(|| SchemaError::NotARelation {
            record: name.to_string(),
        })?;
    let source = graph
        .source(name)
        .map(|s| graph.root(s).to_string())
        .ok_or_else(|| SchemaError::UnknownRecord(name.to_string()))?;
    let target = graph
        .target(name)
        .map(|t| graph.root(t).to_string())
        .ok_or_else(|| SchemaError::UnknownRecord(name.to_string()))?;

    let merged_side = match (node.cardinality, node.properties.is_empty()) {
        (_, false) | (Cardinality::ManyToMany, true) => None,
        (Cardinality::OneToOne, true) | (Cardinality::ManyToOne, true) => Some((
            RelationStorage::MergedIntoSource,
            source,
            node.source_property.as_deref(),
        )),
        (Cardinality::OneToMany, true) => Some((
            RelationStorage::MergedIntoTarget,
            target,
            node.target_property.as_deref(),
        )),
    };

    let Some((storage, owner, navigation)) = merged_side else {
        return Ok(RelationMap {
            relation: name.to_string(),
            storage: RelationStorage::JoinTable,
            table: name.to_snake_case(),
            id_column: ID.to_string(),
            source_column: SOURCE_ID.to_string(),
            target_column: TARGET_ID.to_string(),
            columns: columns_of(&node.properties),
        });
    };

    let fk = format!("{}_id", navigation.unwrap_or(name).to_snake_case());
    let table = map
        .table_mut(&owner)
        .ok_or_else(|| SchemaError::UnknownRecord(owner.clone()))?;
    let taken = table.column(&fk).is_some() || table.foreign_keys.iter().any(|f| f.column == fk);
    if taken {
        return Err(SchemaError::DuplicateProperty {
            record: owner,
            property: fk,
        });
    }
    table.foreign_keys.push(ForeignKey {
        column: fk.clone(),
        relation: name.to_string(),
        unique: node.cardinality == Cardinality::OneToOne,
    });

    let (source_column, target_column) = match storage {
        RelationStorage::MergedIntoSource => (ID.to_string(), fk),
        _ => (fk, ID.to_string()),
    };
    Ok(RelationMap {
        relation: name.to_string(),
        storage,
        table: table.table.clone(),
        id_column: ID.to_string(),
        source_column,
        target_column,
        columns: Vec::new(),
    })
}

/// CREATE TABLE statements for every physical table, entities first.
pub fn create_tables(graph: &SchemaGraph, map: &StorageMap, if_not_exists: bool) -> Vec<CreateTable> {
    let mut statements = Vec::new();

    for table in map.tables() {
        let mut stmt = CreateTable::new(&table.table)
            .column(ColumnDef::new(ID, DataType::Integer).auto_increment_key());
        stmt = stmt.columns(table.columns.iter().map(|c| column_def(graph, &table.record, c)));
        for fk in &table.foreign_keys {
            let mut column = ColumnDef::new(&fk.column, DataType::Integer);
            if fk.unique {
                column = column.unique();
            }
            stmt = stmt.column(column);
        }
        if if_not_exists {
            stmt = stmt.if_not_exists();
        }
        statements.push(stmt);
    }

    for relation in map
        .relations()
        .iter()
        .filter(|r| r.storage == RelationStorage::JoinTable)
    {
        let mut stmt = CreateTable::new(&relation.table)
            .column(ColumnDef::new(ID, DataType::Integer).auto_increment_key())
            .column(ColumnDef::new(SOURCE_ID, DataType::Integer).not_null())
            .column(ColumnDef::new(TARGET_ID, DataType::Integer).not_null())
            .columns(
                relation
                    .columns
                    .iter()
                    .map(|c| column_def(graph, &relation.relation, c)),
            );
        let cardinality = graph.cardinality(&relation.relation);
        if matches!(cardinality, Some(Cardinality::ManyToOne | Cardinality::OneToOne)) {
            stmt = stmt.constraint(TableConstraint::unique([SOURCE_ID]));
        }
        if matches!(cardinality, Some(Cardinality::OneToMany | Cardinality::OneToOne)) {
            stmt = stmt.constraint(TableConstraint::unique([TARGET_ID]));
        }
        if if_not_exists {
            stmt = stmt.if_not_exists();
        }
        statements.push(stmt);
    }

    statements
}

fn column_def(graph: &SchemaGraph, record: &str, column: &ColumnMap) -> ColumnDef {
    let def = ColumnDef::new(&column.column, DataType::from(column.ty));
    match graph.property(record, &column.property) {
        // Required values may still be filled in by a default at create time.
        Some(p) if p.required && p.default.is_none() && graph.kind(record) == Some(RecordKind::Entity) => {
            def.not_null()
        }
        _ => def,
    }
}
