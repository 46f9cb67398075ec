//! DDL generation
//!
//! Renders the typed schema model to `CREATE TABLE` / `CREATE INDEX`
//! statements, one statement per schema element. Identifiers are always
//! double-quoted; user data never reaches DDL. `IF NOT EXISTS` keeps
//! boot-time application idempotent.

use super::model::{IndexDefinition, SchemaDefinition, TableDefinition};

/// Render every statement of the schema, in deterministic order.
pub fn generate_ddl(schema: &SchemaDefinition) -> Vec<String> {
    let mut statements = Vec::new();

    for lookup in &schema.lookup_tables {
        statements.push(create_table(lookup));
        for index in &lookup.indexes {
            statements.push(create_index(&lookup.name, index));
        }
    }

    for table_set in &schema.table_sets {
        for table in [&table_set.main, &table_set.history, &table_set.references] {
            statements.push(create_table(table));
            for index in &table.indexes {
                statements.push(create_index(&table.name, index));
            }
        }
    }

    statements
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

fn create_table(table: &TableDefinition) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(table.columns.len() + 1);

    for column in &table.columns {
        let mut part = format!("{} {}", quote(&column.name), column.sql_type);
        if column.not_null {
            part.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            part.push_str(" DEFAULT ");
            part.push_str(default);
        }
        if table.primary_key.len() == 1 && table.primary_key[0] == column.name {
            part.push_str(" PRIMARY KEY");
        }
        parts.push(part);
    }

    if table.primary_key.len() > 1 {
        let key_columns: Vec<String> = table.primary_key.iter().map(|c| quote(c)).collect();
        parts.push(format!("PRIMARY KEY ({})", key_columns.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(&table.name),
        parts.join(", ")
    )
}

fn create_index(table_name: &str, index: &IndexDefinition) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };

    let target = match &index.expression {
        Some(expression) => format!("({})", expression),
        None => {
            let columns: Vec<String> = index
                .columns
                .iter()
                .map(|c| match &index.operator_class {
                    Some(op_class) => format!("{} {}", quote(c), op_class),
                    None => quote(c),
                })
                .collect();
            columns.join(", ")
        }
    };

    let mut statement = format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} USING {} ({})",
        unique,
        quote(&index.name),
        quote(table_name),
        index.index_type.sql(),
        target
    );

    if !index.include.is_empty() {
        let include: Vec<String> = index.include.iter().map(|c| quote(c)).collect();
        statement.push_str(&format!(" INCLUDE ({})", include.join(", ")));
    }

    if let Some(where_clause) = &index.where_clause {
        statement.push_str(" WHERE ");
        statement.push_str(where_clause);
    }

    statement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::build_schema;
    use cuprum_registry::Registry;
    use serde_json::json;

    fn test_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .index_profile(&json!({
                "type": "Patient", "kind": "resource", "abstract": false
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
                "code": "birthdate", "type": "date",
                "expression": "Patient.birthDate", "base": ["Patient"]
            }))
            .unwrap();
        registry
    }

    #[test]
    fn identical_registries_yield_identical_ddl() {
        let first = generate_ddl(&build_schema(&test_registry()));
        let second = generate_ddl(&build_schema(&test_registry()));
        assert_eq!(first, second);
    }

    #[test]
    fn all_identifiers_are_quoted() {
        let statements = generate_ddl(&build_schema(&test_registry()));
        let create_patient = statements
            .iter()
            .find(|s| s.starts_with("CREATE TABLE IF NOT EXISTS \"Patient\""))
            .expect("patient table statement");

        assert!(create_patient.contains("\"id\" UUID NOT NULL PRIMARY KEY"));
        assert!(create_patient.contains("\"lastUpdated\" TIMESTAMPTZ NOT NULL"));
        assert!(create_patient.contains("\"gender\" TEXT[]"));
        assert!(create_patient.contains("\"birthdate\" DATE"));
    }

    #[test]
    fn composite_primary_keys_render_as_constraints() {
        let statements = generate_ddl(&build_schema(&test_registry()));
        let history = statements
            .iter()
            .find(|s| s.starts_with("CREATE TABLE IF NOT EXISTS \"Patient_History\""))
            .expect("history table statement");
        assert!(history.contains("PRIMARY KEY (\"id\", \"versionId\")"));
    }

    #[test]
    fn partial_index_on_live_rows() {
        let statements = generate_ddl(&build_schema(&test_registry()));
        assert!(statements.iter().any(|s| s.contains("\"Patient_id_live_idx\"")
            && s.ends_with("WHERE \"deleted\" = false")));
    }

    #[test]
    fn one_statement_per_element() {
        let statements = generate_ddl(&build_schema(&test_registry()));
        for statement in &statements {
            assert!(!statement.contains(';'));
        }
    }
}
