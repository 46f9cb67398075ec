//! Generated relational schema
//!
//! The schema model is pure data: the builder derives it from the
//! registries, the DDL generator renders it to SQL statements, and the boot
//! path applies those statements. Identical registries always produce
//! byte-identical DDL.

pub mod builder;
pub mod ddl;
pub mod model;

pub use builder::build_schema;
pub use ddl::generate_ddl;
pub use model::{
    ColumnDefinition, IndexDefinition, IndexType, ResourceTableSet, SchemaDefinition,
    TableDefinition,
};
