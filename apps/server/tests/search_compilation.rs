//! Search compilation over the full seeded registry

use cuprum::conformance::seed_registry;
use cuprum::db::search::{BindValue, QueryBuilder, SearchRequest};
use cuprum::models::OperationContext;
use cuprum_registry::Registry;

fn seeded_registry() -> Registry {
    let mut registry = Registry::new();
    seed_registry(&mut registry).unwrap();
    registry
}

fn compile(resource_type: &str, query: &str) -> (String, Vec<BindValue>) {
    let registry = seeded_registry();
    let request = SearchRequest::parse(resource_type, query).unwrap();
    let context = OperationContext::default();
    QueryBuilder::new(&registry, &request, &context)
        .build_sql()
        .unwrap()
}

#[test]
fn no_parameters_compiles_to_deleted_filter_only() {
    let (sql, _) = compile("Patient", "");
    assert!(sql.contains("WHERE \"deleted\" = false ORDER BY"));
}

#[test]
fn every_client_literal_is_a_placeholder() {
    let queries = [
        ("Patient", "gender=male&birthdate=ge1980-01-01"),
        ("Patient", "name=smith&address-city=berlin"),
        ("Observation", "code=http://loinc.org|1234-5&value-quantity=gt7.5"),
        ("Observation", "subject=Patient/0be88176-57e3-48d6-8d58-24bb1ee48bfc"),
        ("Condition", "clinical-status=active,resolved"),
    ];
    for (resource_type, query) in queries {
        let (sql, binds) = compile(resource_type, query);
        for needle in ["male", "1980", "smith", "berlin", "loinc", "7.5", "0be88176", "active"] {
            assert!(
                !sql.contains(needle),
                "client literal '{}' leaked into SQL: {}",
                needle,
                sql
            );
        }
        assert!(!binds.is_empty());
    }
}

#[test]
fn token_system_and_code_forms() {
    // system|code matches the stored combined form
    let (_, binds) = compile("Observation", "code=http://loinc.org|1234-5");
    assert!(matches!(&binds[0], BindValue::Text(v) if v == "http://loinc.org|1234-5"));

    // |code matches the no-system form
    let (_, binds) = compile("Observation", "code=|1234-5");
    assert!(matches!(&binds[0], BindValue::Text(v) if v == "|1234-5"));

    // system| becomes a prefix scan over the stored forms
    let (sql, binds) = compile("Observation", "code=http://loinc.org|");
    assert!(sql.contains("LIKE $1"));
    assert!(matches!(&binds[0], BindValue::Text(v) if v.ends_with("|%")));
}

#[test]
fn or_values_produce_one_clause_per_alternative() {
    let (sql, binds) = compile("Patient", "gender=male,female");
    assert!(sql.contains(" OR "));
    assert_eq!(
        binds
            .iter()
            .filter(|b| matches!(b, BindValue::Text(_)))
            .count(),
        2
    );
}

#[test]
fn and_occurrences_produce_separate_conditions() {
    let (sql, _) = compile("Patient", "gender=male&birthdate=ge1980-01-01");
    let and_count = sql.matches(" AND ").count();
    assert!(and_count >= 2, "expected two ANDed conditions: {}", sql);
}

#[test]
fn chained_type_modifier_constrains_reference() {
    let (_, binds) = compile(
        "Observation",
        "subject:Patient=0be88176-57e3-48d6-8d58-24bb1ee48bfc",
    );
    assert!(
        matches!(&binds[0], BindValue::Text(v) if v == "Patient/0be88176-57e3-48d6-8d58-24bb1ee48bfc")
    );
}

#[test]
fn bare_reference_id_expands_across_targets() {
    // Observation.subject targets Patient and Group
    let (sql, binds) = compile("Observation", "subject=0be88176-57e3-48d6-8d58-24bb1ee48bfc");
    assert!(sql.contains(" OR "));
    assert_eq!(binds.len(), 3); // two candidates + limit
}

#[test]
fn lookup_tables_join_by_exists() {
    let (sql, _) = compile("Patient", "name=smith");
    assert!(sql.contains("EXISTS (SELECT 1 FROM \"HumanName\" l"));

    let (sql, _) = compile("Patient", "identifier=http://example.com/mrn|12345");
    assert!(sql.contains("EXISTS (SELECT 1 FROM \"Identifier\" l"));
    assert!(sql.contains("l.\"system\" = $1"));
    assert!(sql.contains("l.\"value\" = $2"));

    let (sql, _) = compile("Patient", "phone=555-0100");
    assert!(sql.contains("EXISTS (SELECT 1 FROM \"ContactPoint\" l"));
    assert!(sql.contains("l.\"system\" = $2"));

    let (sql, _) = compile("Patient", "address-city=Berlin");
    assert!(sql.contains("EXISTS (SELECT 1 FROM \"Address\" l"));
    assert!(sql.contains("l.\"city\" ILIKE $1"));
}

#[test]
fn missing_on_lookup_params_compiles_to_existence() {
    // HumanName: absence of any name row, never a match on the word "true"
    let (sql, binds) = compile("Patient", "name:missing=true");
    assert!(sql.contains(
        "NOT EXISTS (SELECT 1 FROM \"HumanName\" l WHERE l.\"resourceId\" = \"Patient\".\"id\" \
         AND l.\"resourceType\" = 'Patient')"
    ));
    assert!(!sql.contains("ILIKE"), "no value matching: {}", sql);
    assert_eq!(binds.len(), 1, "only the LIMIT parameter is bound");

    let (sql, _) = compile("Patient", "name:missing=false");
    assert!(sql.contains("EXISTS (SELECT 1 FROM \"HumanName\" l"));
    assert!(!sql.contains("NOT EXISTS"));

    // Identifier and ContactPoint lookups behave the same way
    let (sql, _) = compile("Patient", "identifier:missing=true");
    assert!(sql.contains("NOT EXISTS (SELECT 1 FROM \"Identifier\" l"));
    assert!(!sql.contains("l.\"value\""), "no value matching: {}", sql);

    let (sql, _) = compile("Patient", "phone:missing=true");
    assert!(sql.contains("NOT EXISTS (SELECT 1 FROM \"ContactPoint\" l"));
    assert!(!sql.contains("l.\"system\" ="), "no system matching: {}", sql);
}

#[test]
fn missing_on_reference_param_tests_the_column() {
    let (sql, binds) = compile("Observation", "subject:missing=true");
    assert!(sql.contains("\"subject\" IS NULL"));
    assert_eq!(binds.len(), 1, "only the LIMIT parameter is bound");

    let (sql, _) = compile("Observation", "subject:missing=false");
    assert!(sql.contains("\"subject\" IS NOT NULL"));
}

#[test]
fn missing_requires_a_boolean_value() {
    let registry = seeded_registry();
    let context = OperationContext::default();
    let request = SearchRequest::parse("Patient", "name:missing=maybe").unwrap();
    assert!(QueryBuilder::new(&registry, &request, &context)
        .build_sql()
        .is_err());
}

#[test]
fn string_modifiers() {
    let (sql, binds) = compile("Organization", "name:exact=Acme");
    assert!(sql.contains("\"name\" = $1"));
    assert!(matches!(&binds[0], BindValue::Text(v) if v == "Acme"));

    let (sql, binds) = compile("Organization", "name:contains=cme");
    assert!(sql.contains("\"name\" ILIKE $1"));
    assert!(matches!(&binds[0], BindValue::Text(v) if v == "%cme%"));
}

#[test]
fn like_metacharacters_are_escaped() {
    let (_, binds) = compile("Organization", "name:contains=50%_x");
    assert!(matches!(&binds[0], BindValue::Text(v) if v == "%50\\%\\_x%"));
}

#[test]
fn count_and_offset_are_bound() {
    let (sql, binds) = compile("Patient", "_count=50&_offset=100");
    assert!(sql.ends_with("LIMIT $1 OFFSET $2"));
    assert!(matches!(binds[binds.len() - 2], BindValue::Int(50)));
    assert!(matches!(binds[binds.len() - 1], BindValue::Int(100)));
}

#[test]
fn count_query_shares_the_where_clause() {
    let registry = seeded_registry();
    let request = SearchRequest::parse("Patient", "gender=male").unwrap();
    let context = OperationContext::default();
    let builder = QueryBuilder::new(&registry, &request, &context);

    let (sql, _) = builder.build_sql().unwrap();
    let (count_sql, count_binds) = builder.build_count_sql().unwrap();

    assert!(count_sql.starts_with("SELECT COUNT(*) FROM \"Patient\" WHERE"));
    assert!(!count_sql.contains("LIMIT"));
    assert!(!count_sql.contains("ORDER BY"));
    assert_eq!(count_binds.len(), 1);
    assert!(sql.contains("\"deleted\" = false") && count_sql.contains("\"deleted\" = false"));
}

#[test]
fn default_sort_is_last_updated_desc() {
    let (sql, _) = compile("Patient", "gender=male");
    assert!(sql.contains("ORDER BY \"lastUpdated\" DESC"));
}

#[test]
fn include_specs_survive_parsing() {
    let request = SearchRequest::parse(
        "Observation",
        "_id=0be88176-57e3-48d6-8d58-24bb1ee48bfc&_include=Observation:subject&_revinclude:iterate=Provenance:target",
    )
    .unwrap();
    assert_eq!(request.include.len(), 1);
    assert_eq!(request.revinclude.len(), 1);
    assert!(request.revinclude[0].iterate);
}
