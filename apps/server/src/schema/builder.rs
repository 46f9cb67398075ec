//! Schema builder
//!
//! Derives the typed schema model from the registries: one main, history,
//! and references table per concrete resource type, plus the four global
//! lookup tables. Search parameter impls with a column strategy contribute
//! columns and indexes to the main table.

use chrono::Utc;
use cuprum_registry::{Registry, SearchParameterImpl, Strategy};

use crate::models::SCHEMA_VERSION;

use super::model::{
    ColumnDefinition, IndexDefinition, IndexType, ResourceTableSet, SchemaDefinition,
    TableDefinition,
};

/// Build the complete schema from the boot registries.
pub fn build_schema(registry: &Registry) -> SchemaDefinition {
    let table_sets = registry
        .table_resource_types()
        .into_iter()
        .map(|resource_type| {
            let impls = registry.search_params.for_type(&resource_type);
            ResourceTableSet {
                main: build_main_table(&resource_type, &impls),
                history: build_history_table(&resource_type),
                references: build_references_table(&resource_type),
                resource_type,
            }
        })
        .collect();

    SchemaDefinition {
        version: SCHEMA_VERSION,
        generated_at: Utc::now(),
        table_sets,
        lookup_tables: build_lookup_tables(),
    }
}

fn column(name: &str, sql_type: &str) -> ColumnDefinition {
    ColumnDefinition {
        name: name.to_string(),
        sql_type: sql_type.to_string(),
        not_null: false,
        default: None,
        documentation: None,
    }
}

fn required_column(name: &str, sql_type: &str) -> ColumnDefinition {
    ColumnDefinition {
        not_null: true,
        ..column(name, sql_type)
    }
}

fn build_main_table(resource_type: &str, impls: &[&SearchParameterImpl]) -> TableDefinition {
    let mut columns = vec![
        required_column("id", "UUID"),
        required_column("content", "TEXT"),
        required_column("lastUpdated", "TIMESTAMPTZ"),
        required_column("deleted", "BOOLEAN"),
        column("projectId", "UUID"),
        required_column("__version", "INTEGER"),
    ];

    // Binary resources never participate in compartments
    if resource_type != "Binary" {
        columns.push(column("compartments", "UUID[]"));
    }

    columns.push(column("_source", "TEXT"));
    columns.push(column("_profile", "TEXT[]"));

    let mut indexes = vec![
        IndexDefinition::simple(
            format!("{}_lastUpdated_idx", resource_type),
            vec!["lastUpdated".to_string()],
            IndexType::BTree,
        ),
        IndexDefinition {
            where_clause: Some("\"deleted\" = false".to_string()),
            ..IndexDefinition::simple(
                format!("{}_id_live_idx", resource_type),
                vec!["id".to_string()],
                IndexType::BTree,
            )
        },
    ];

    if resource_type != "Binary" {
        indexes.push(IndexDefinition::simple(
            format!("{}_compartments_idx", resource_type),
            vec!["compartments".to_string()],
            IndexType::Gin,
        ));
    }

    for impl_ in impls {
        if !matches!(impl_.strategy, Strategy::Column | Strategy::TokenColumn) {
            continue;
        }
        let sql_type = if impl_.array {
            format!("{}[]", impl_.column_type.sql())
        } else {
            impl_.column_type.sql().to_string()
        };
        columns.push(ColumnDefinition {
            name: impl_.column_name.clone(),
            sql_type,
            not_null: false,
            default: None,
            documentation: Some(impl_.expression.clone()),
        });

        let index_type = if impl_.array {
            IndexType::Gin
        } else {
            IndexType::BTree
        };
        indexes.push(IndexDefinition::simple(
            format!("{}_{}_idx", resource_type, impl_.column_name),
            vec![impl_.column_name.clone()],
            index_type,
        ));

        // String search also gets a trigram index for :contains
        if impl_.param_type == cuprum_registry::SearchParamType::String && !impl_.array {
            indexes.push(IndexDefinition {
                operator_class: Some("gin_trgm_ops".to_string()),
                ..IndexDefinition::simple(
                    format!("{}_{}_trgm_idx", resource_type, impl_.column_name),
                    vec![impl_.column_name.clone()],
                    IndexType::Gin,
                )
            });
        }
    }

    TableDefinition {
        name: resource_type.to_string(),
        columns,
        indexes,
        primary_key: vec!["id".to_string()],
    }
}

fn build_history_table(resource_type: &str) -> TableDefinition {
    let name = format!("{}_History", resource_type);
    TableDefinition {
        columns: vec![
            required_column("id", "UUID"),
            required_column("versionId", "UUID"),
            required_column("lastUpdated", "TIMESTAMPTZ"),
            column("content", "TEXT"),
        ],
        indexes: vec![IndexDefinition::simple(
            format!("{}_lastUpdated_idx", name),
            vec!["lastUpdated".to_string()],
            IndexType::BTree,
        )],
        primary_key: vec!["id".to_string(), "versionId".to_string()],
        name,
    }
}

fn build_references_table(resource_type: &str) -> TableDefinition {
    let name = format!("{}_References", resource_type);
    TableDefinition {
        columns: vec![
            required_column("resourceId", "UUID"),
            required_column("targetId", "TEXT"),
            required_column("code", "TEXT"),
        ],
        indexes: vec![
            IndexDefinition::simple(
                format!("{}_targetId_idx", name),
                vec!["targetId".to_string()],
                IndexType::BTree,
            ),
            IndexDefinition::simple(
                format!("{}_code_idx", name),
                vec!["code".to_string()],
                IndexType::BTree,
            ),
        ],
        primary_key: vec![
            "resourceId".to_string(),
            "targetId".to_string(),
            "code".to_string(),
        ],
        name,
    }
}

fn build_lookup_tables() -> Vec<TableDefinition> {
    vec![
        lookup_table(
            "HumanName",
            &[("name", "TEXT"), ("given", "TEXT"), ("family", "TEXT")],
            &["name", "given", "family"],
        ),
        lookup_table(
            "Address",
            &[
                ("address", "TEXT"),
                ("city", "TEXT"),
                ("country", "TEXT"),
                ("postalCode", "TEXT"),
                ("state", "TEXT"),
                ("use", "TEXT"),
            ],
            &["address", "city", "postalCode"],
        ),
        lookup_table(
            "ContactPoint",
            &[("system", "TEXT"), ("value", "TEXT")],
            &["value"],
        ),
        lookup_table(
            "Identifier",
            &[("system", "TEXT"), ("value", "TEXT")],
            &["value"],
        ),
    ]
}

fn lookup_table(
    name: &str,
    fields: &[(&str, &str)],
    indexed_fields: &[&str],
) -> TableDefinition {
    let mut columns = vec![
        required_column("resourceId", "UUID"),
        required_column("resourceType", "TEXT"),
    ];
    for (field, sql_type) in fields {
        columns.push(column(field, sql_type));
    }

    let mut indexes = vec![IndexDefinition::simple(
        format!("{}_resourceId_idx", name),
        vec!["resourceId".to_string()],
        IndexType::BTree,
    )];
    for field in indexed_fields {
        indexes.push(IndexDefinition::simple(
            format!("{}_{}_idx", name, field),
            vec![field.to_string()],
            IndexType::BTree,
        ));
        // Lookup strings power :contains; give them trigram indexes too
        indexes.push(IndexDefinition {
            operator_class: Some("gin_trgm_ops".to_string()),
            ..IndexDefinition::simple(
                format!("{}_{}_trgm_idx", name, field),
                vec![field.to_string()],
                IndexType::Gin,
            )
        });
    }

    TableDefinition {
        name: name.to_string(),
        columns,
        indexes,
        primary_key: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .index_profile(&json!({
                "type": "Patient", "kind": "resource", "abstract": false
            }))
            .unwrap();
        registry
            .index_profile(&json!({
                "type": "Binary", "kind": "resource", "abstract": false
            }))
            .unwrap();
        registry
            .index_search_parameter(&json!({
                "code": "gender", "type": "token",
                "expression": "Patient.gender", "base": ["Patient"]
            }))
            .unwrap();
        registry
            .index_search_parameter(&json!({
                "code": "name", "type": "string",
                "expression": "Patient.name", "base": ["Patient"]
            }))
            .unwrap();
        registry
    }

    #[test]
    fn main_table_has_fixed_and_search_columns() {
        let schema = build_schema(&test_registry());
        let patient = schema.table_set("Patient").unwrap();

        for fixed in [
            "id",
            "content",
            "lastUpdated",
            "deleted",
            "projectId",
            "__version",
            "compartments",
            "_source",
            "_profile",
        ] {
            assert!(
                patient.main.column(fixed).is_some(),
                "missing fixed column {}",
                fixed
            );
        }

        // Column-strategy parameter becomes a column; lookup-strategy does not
        assert!(patient.main.column("gender").is_some());
        assert!(patient.main.column("name").is_none());
    }

    #[test]
    fn binary_has_no_compartments() {
        let schema = build_schema(&test_registry());
        let binary = schema.table_set("Binary").unwrap();
        assert!(binary.main.column("compartments").is_none());
        assert!(binary
            .main
            .indexes
            .iter()
            .all(|i| !i.columns.contains(&"compartments".to_string())));
    }

    #[test]
    fn history_and_references_key_shapes() {
        let schema = build_schema(&test_registry());
        let patient = schema.table_set("Patient").unwrap();

        assert_eq!(patient.history.primary_key, vec!["id", "versionId"]);
        assert_eq!(
            patient.references.primary_key,
            vec!["resourceId", "targetId", "code"]
        );
    }

    #[test]
    fn four_lookup_tables() {
        let schema = build_schema(&test_registry());
        let names: Vec<&str> = schema
            .lookup_tables
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["HumanName", "Address", "ContactPoint", "Identifier"]
        );
    }
}
