//! Typed schema model
//!
//! A pure-data description of the generated database schema. Nothing here
//! talks to the database; the DDL generator renders this model and the boot
//! path executes it.

use chrono::{DateTime, Utc};

/// The complete generated schema
#[derive(Debug, Clone)]
pub struct SchemaDefinition {
    /// Row-format version tag
    pub version: i32,
    pub generated_at: DateTime<Utc>,
    /// One table set per concrete resource type
    pub table_sets: Vec<ResourceTableSet>,
    /// The four global lookup tables
    pub lookup_tables: Vec<TableDefinition>,
}

impl SchemaDefinition {
    pub fn table_set(&self, resource_type: &str) -> Option<&ResourceTableSet> {
        self.table_sets
            .iter()
            .find(|ts| ts.resource_type == resource_type)
    }
}

/// Main, history, and references table for one resource type
#[derive(Debug, Clone)]
pub struct ResourceTableSet {
    pub resource_type: String,
    pub main: TableDefinition,
    pub history: TableDefinition,
    pub references: TableDefinition,
}

#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub indexes: Vec<IndexDefinition>,
    /// Primary key column names
    pub primary_key: Vec<String>,
}

impl TableDefinition {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub name: String,
    /// SQL type, including `[]` suffix for arrays
    pub sql_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    /// Back-link to the FHIRPath expression that fills this column
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    BTree,
    Gin,
    Gist,
}

impl IndexType {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::BTree => "btree",
            Self::Gin => "gin",
            Self::Gist => "gist",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub index_type: IndexType,
    pub unique: bool,
    /// Partial-index predicate
    pub where_clause: Option<String>,
    /// Covering-index INCLUDE columns
    pub include: Vec<String>,
    /// Operator class applied to every indexed column (e.g. `gin_trgm_ops`)
    pub operator_class: Option<String>,
    /// Functional index expression; replaces `columns` when set
    pub expression: Option<String>,
}

impl IndexDefinition {
    /// Plain single-type index over named columns.
    pub fn simple(name: impl Into<String>, columns: Vec<String>, index_type: IndexType) -> Self {
        Self {
            name: name.into(),
            columns,
            index_type,
            unique: false,
            where_clause: None,
            include: Vec::new(),
            operator_class: None,
            expression: None,
        }
    }
}
