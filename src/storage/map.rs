//! Logical record to physical table mapping.
//!
//! Every root entity owns one table. Every root relation is described by the
//! same five coordinates regardless of how it is stored:
//!
//! ```text
//!   table         where link rows live
//!   id_column     identity of a link
//!   source_column value equal to the source entity id
//!   target_column value equal to the target entity id
//!   existence     predicate that a row actually is a link (merged fks may be NULL)
//! ```
//!
//! so traversal joins never need to know whether a relation has its own
//! join table or lives as a foreign key in one of the entity tables.
//! Filtered records have no storage of their own; lookups resolve them to
//! their root first.

use std::collections::HashMap;

use crate::schema::{PropertyType, RelationEnd, SchemaGraph, ID};
use crate::sql::{table_col, Expr, ExprExt};

/// A property stored in a column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    pub property: String,
    pub column: String,
    pub ty: PropertyType,
}

/// Storage of one root entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMap {
    pub record: String,
    pub table: String,
    pub columns: Vec<ColumnMap>,
    /// Foreign keys of relations merged into this table.
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableMap {
    pub fn column(&self, property: &str) -> Option<&ColumnMap> {
        self.columns.iter().find(|c| c.property == property)
    }
}

/// A merged relation's foreign key column.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub column: String,
    pub relation: String,
    pub unique: bool,
}

/// How a root relation is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationStorage {
    /// Dedicated table with `id`, `source_id`, `target_id` and relation properties.
    JoinTable,
    /// Foreign key to the target in the source table (`1:1`, `n:1`).
    MergedIntoSource,
    /// Foreign key to the source in the target table (`1:n`).
    MergedIntoTarget,
}

/// Storage of one root relation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationMap {
    pub relation: String,
    pub storage: RelationStorage,
    pub table: String,
    pub id_column: String,
    pub source_column: String,
    pub target_column: String,
    /// Relation properties (join tables only).
    pub columns: Vec<ColumnMap>,
}

impl RelationMap {
    /// The foreign key column of a merged relation.
    pub fn fk_column(&self) -> Option<&str> {
        match self.storage {
            RelationStorage::JoinTable => None,
            RelationStorage::MergedIntoSource => Some(&self.target_column),
            RelationStorage::MergedIntoTarget => Some(&self.source_column),
        }
    }

    pub fn is_merged(&self) -> bool {
        self.storage != RelationStorage::JoinTable
    }

    /// Predicate that a row under `alias` is an actual link.
    pub fn existence(&self, alias: &str) -> Option<Expr> {
        self.fk_column()
            .map(|fk| table_col(alias, fk).is_not_null())
    }

    pub fn column(&self, property: &str) -> Option<&ColumnMap> {
        self.columns.iter().find(|c| c.property == property)
    }

    /// Column holding the id of one end.
    pub fn end_column(&self, end: RelationEnd) -> &str {
        match end {
            RelationEnd::Source => &self.source_column,
            RelationEnd::Target => &self.target_column,
        }
    }
}

/// Output of the schema compiler.
#[derive(Debug, Clone, Default)]
pub struct StorageMap {
    pub(crate) tables: Vec<TableMap>,
    pub(crate) relations: Vec<RelationMap>,
    pub(crate) table_index: HashMap<String, usize>,
    pub(crate) relation_index: HashMap<String, usize>,
}

impl StorageMap {
    pub(crate) fn push_table(&mut self, table: TableMap) {
        self.table_index
            .insert(table.record.clone(), self.tables.len());
        self.tables.push(table);
    }

    pub(crate) fn push_relation(&mut self, relation: RelationMap) {
        self.relation_index
            .insert(relation.relation.clone(), self.relations.len());
        self.relations.push(relation);
    }

    pub(crate) fn table_mut(&mut self, root: &str) -> Option<&mut TableMap> {
        let idx = *self.table_index.get(root)?;
        self.tables.get_mut(idx)
    }

    /// Table of a root entity.
    pub fn table(&self, root: &str) -> Option<&TableMap> {
        self.table_index.get(root).and_then(|&i| self.tables.get(i))
    }

    /// Storage of a root relation.
    pub fn relation(&self, root: &str) -> Option<&RelationMap> {
        self.relation_index
            .get(root)
            .and_then(|&i| self.relations.get(i))
    }

    /// Table of any entity, filtered or not.
    pub fn entity_table<'a>(&'a self, graph: &SchemaGraph, name: &str) -> Option<&'a TableMap> {
        self.table(graph.root(name))
    }

    /// Storage of any relation, filtered or not.
    pub fn relation_storage<'a>(
        &'a self,
        graph: &SchemaGraph,
        name: &str,
    ) -> Option<&'a RelationMap> {
        self.relation(graph.root(name))
    }

    pub fn tables(&self) -> &[TableMap] {
        &self.tables
    }

    pub fn relations(&self) -> &[RelationMap] {
        &self.relations
    }

    /// Physical location of a record: table, id column, property columns.
    pub fn record_storage<'a>(&'a self, graph: &SchemaGraph, name: &str) -> Option<RecordStorage<'a>> {
        if let Some(table) = self.entity_table(graph, name) {
            return Some(RecordStorage {
                table: &table.table,
                id_column: ID,
                columns: &table.columns,
                relation: None,
            });
        }
        self.relation_storage(graph, name).map(|rel| RecordStorage {
            table: &rel.table,
            id_column: &rel.id_column,
            columns: &rel.columns,
            relation: Some(rel),
        })
    }
}

/// Uniform view over entity and relation storage.
#[derive(Debug, Clone, Copy)]
pub struct RecordStorage<'a> {
    pub table: &'a str,
    pub id_column: &'a str,
    pub columns: &'a [ColumnMap],
    pub relation: Option<&'a RelationMap>,
}

impl<'a> RecordStorage<'a> {
    pub fn column(&self, property: &str) -> Option<&'a ColumnMap> {
        self.columns.iter().find(|c| c.property == property)
    }

    /// Predicate that a row under `alias` exists as a record.
    pub fn existence(&self, alias: &str) -> Option<Expr> {
        self.relation.and_then(|r| r.existence(alias))
    }
}
