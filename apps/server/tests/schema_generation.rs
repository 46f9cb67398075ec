//! Schema generation over the full seeded registry

use cuprum::conformance::seed_registry;
use cuprum::schema::{build_schema, generate_ddl};
use cuprum_registry::Registry;

fn seeded_registry() -> Registry {
    let mut registry = Registry::new();
    seed_registry(&mut registry).unwrap();
    registry
}

#[test]
fn every_table_resource_type_gets_a_table_set() {
    let registry = seeded_registry();
    let schema = build_schema(&registry);

    let types = registry.table_resource_types();
    assert_eq!(schema.table_sets.len(), types.len());
    for resource_type in &types {
        let table_set = schema
            .table_set(resource_type)
            .unwrap_or_else(|| panic!("missing table set for {}", resource_type));
        assert_eq!(table_set.main.name, *resource_type);
        assert_eq!(table_set.history.name, format!("{}_History", resource_type));
        assert_eq!(
            table_set.references.name,
            format!("{}_References", resource_type)
        );
    }
}

#[test]
fn ddl_is_deterministic_across_builds() {
    let first = generate_ddl(&build_schema(&seeded_registry()));
    let second = generate_ddl(&build_schema(&seeded_registry()));
    assert_eq!(first, second);
    assert!(!first.is_empty());
}

#[test]
fn lookup_strategy_params_do_not_become_columns() {
    let schema = build_schema(&seeded_registry());
    let patient = schema.table_set("Patient").unwrap();

    // Patient name/address/telecom/identifier live in lookup tables
    for lookup_backed in ["name", "given", "family", "address", "telecom", "identifier"] {
        assert!(
            patient.main.column(lookup_backed).is_none(),
            "{} should not be a Patient column",
            lookup_backed
        );
    }

    // gender and birthdate are columns
    assert!(patient.main.column("gender").is_some());
    assert!(patient.main.column("birthdate").is_some());
}

#[test]
fn reference_columns_are_text() {
    let schema = build_schema(&seeded_registry());
    let observation = schema.table_set("Observation").unwrap();
    let subject = observation.main.column("subject").unwrap();
    assert_eq!(subject.sql_type, "TEXT");
    assert_eq!(subject.documentation.as_deref(), Some("Observation.subject"));
}

#[test]
fn string_columns_get_trigram_indexes() {
    let schema = build_schema(&seeded_registry());
    let organization = schema.table_set("Organization").unwrap();

    // Organization.name is a plain string column with a trigram index
    assert!(organization.main.column("name").is_some());
    assert!(organization
        .main
        .indexes
        .iter()
        .any(|i| i.name == "Organization_name_trgm_idx"
            && i.operator_class.as_deref() == Some("gin_trgm_ops")));
}

#[test]
fn binary_is_special_cased() {
    let schema = build_schema(&seeded_registry());
    let binary = schema.table_set("Binary").unwrap();
    assert!(binary.main.column("compartments").is_none());
}

#[test]
fn generated_statements_quote_all_identifiers() {
    let statements = generate_ddl(&build_schema(&seeded_registry()));
    for statement in &statements {
        assert!(
            statement.starts_with("CREATE TABLE IF NOT EXISTS \"")
                || statement.starts_with("CREATE INDEX IF NOT EXISTS \"")
                || statement.starts_with("CREATE UNIQUE INDEX IF NOT EXISTS \""),
            "unexpected statement shape: {}",
            statement
        );
    }
}
