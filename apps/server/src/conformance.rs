//! Conformance resources
//!
//! Ships a compact set of base R4 StructureDefinitions and
//! SearchParameters so a fresh server boots with usable resource types,
//! and renders the CapabilityStatement from whatever the registry ended up
//! holding. Additional definitions load from `fhir.definitions_dir`.

use serde_json::{json, Value as JsonValue};

use cuprum_registry::Registry;

/// Base StructureDefinitions: concrete resources get table sets, abstract
/// ones and complex types do not.
pub fn base_structure_definitions() -> Vec<JsonValue> {
    let mut definitions = vec![
        json!({ "resourceType": "StructureDefinition", "type": "Resource", "kind": "resource", "abstract": true }),
        json!({ "resourceType": "StructureDefinition", "type": "DomainResource", "kind": "resource", "abstract": true }),
        json!({ "resourceType": "StructureDefinition", "type": "HumanName", "kind": "complex-type", "abstract": false }),
        json!({ "resourceType": "StructureDefinition", "type": "Address", "kind": "complex-type", "abstract": false }),
        json!({ "resourceType": "StructureDefinition", "type": "ContactPoint", "kind": "complex-type", "abstract": false }),
        json!({ "resourceType": "StructureDefinition", "type": "Identifier", "kind": "complex-type", "abstract": false }),
    ];

    for resource_type in [
        "AllergyIntolerance",
        "Binary",
        "Condition",
        "Encounter",
        "Observation",
        "Organization",
        "Patient",
        "Practitioner",
        "Provenance",
    ] {
        definitions.push(json!({
            "resourceType": "StructureDefinition",
            "type": resource_type,
            "kind": "resource",
            "abstract": false,
        }));
    }
    definitions
}

/// Base SearchParameters for the shipped resource types.
pub fn base_search_parameters() -> Vec<JsonValue> {
    let params: Vec<(&str, &str, &str, Vec<&str>, Vec<&str>)> = vec![
        // (code, type, expression, base, target)
        ("identifier", "token", "Patient.identifier | Practitioner.identifier | Organization.identifier | Observation.identifier | Condition.identifier | Encounter.identifier", vec!["Patient", "Practitioner", "Organization", "Observation", "Condition", "Encounter"], vec![]),
        ("name", "string", "Patient.name | Practitioner.name | Organization.name", vec!["Patient", "Practitioner", "Organization"], vec![]),
        ("given", "string", "Patient.name.given | Practitioner.name.given", vec!["Patient", "Practitioner"], vec![]),
        ("family", "string", "Patient.name.family | Practitioner.name.family", vec!["Patient", "Practitioner"], vec![]),
        ("gender", "token", "Patient.gender | Practitioner.gender", vec!["Patient", "Practitioner"], vec![]),
        ("birthdate", "date", "Patient.birthDate", vec!["Patient"], vec![]),
        ("address", "string", "Patient.address | Practitioner.address | Organization.address", vec!["Patient", "Practitioner", "Organization"], vec![]),
        ("address-city", "string", "Patient.address.city | Organization.address.city", vec!["Patient", "Organization"], vec![]),
        ("address-postalcode", "string", "Patient.address.postalCode | Organization.address.postalCode", vec!["Patient", "Organization"], vec![]),
        ("telecom", "token", "Patient.telecom | Practitioner.telecom", vec!["Patient", "Practitioner"], vec![]),
        ("phone", "token", "Patient.telecom.where(system='phone') | Practitioner.telecom.where(system='phone')", vec!["Patient", "Practitioner"], vec![]),
        ("email", "token", "Patient.telecom.where(system='email') | Practitioner.telecom.where(system='email')", vec!["Patient", "Practitioner"], vec![]),
        ("active", "token", "Patient.active | Organization.active", vec!["Patient", "Organization"], vec![]),
        ("deceased", "token", "Patient.deceased.exists() and Patient.deceased != false", vec!["Patient"], vec![]),
        ("general-practitioner", "reference", "Patient.generalPractitioner", vec!["Patient"], vec!["Practitioner", "Organization"]),
        ("organization", "reference", "Patient.managingOrganization | Practitioner.organization", vec!["Patient", "Practitioner"], vec!["Organization"]),
        ("code", "token", "AllergyIntolerance.code | Condition.code | Observation.code", vec!["AllergyIntolerance", "Condition", "Observation"], vec![]),
        ("status", "token", "Observation.status | Encounter.status", vec!["Observation", "Encounter"], vec![]),
        ("category", "token", "Observation.category | Condition.category", vec!["Observation", "Condition"], vec![]),
        ("date", "date", "Observation.effective | Encounter.period", vec!["Observation", "Encounter"], vec![]),
        ("value-quantity", "quantity", "Observation.value", vec!["Observation"], vec![]),
        ("subject", "reference", "Observation.subject | Condition.subject | Encounter.subject", vec!["Observation", "Condition", "Encounter"], vec!["Patient", "Group"]),
        ("patient", "reference", "AllergyIntolerance.patient | Observation.subject.where(resolve() is Patient) | Condition.subject.where(resolve() is Patient) | Encounter.subject.where(resolve() is Patient)", vec!["AllergyIntolerance", "Observation", "Condition", "Encounter"], vec!["Patient"]),
        ("performer", "reference", "Observation.performer", vec!["Observation"], vec!["Practitioner", "Organization"]),
        ("encounter", "reference", "Observation.encounter | Condition.encounter", vec!["Observation", "Condition"], vec!["Encounter"]),
        ("clinical-status", "token", "AllergyIntolerance.clinicalStatus | Condition.clinicalStatus", vec!["AllergyIntolerance", "Condition"], vec![]),
        ("onset-date", "date", "Condition.onset", vec!["Condition"], vec![]),
        ("target", "reference", "Provenance.target", vec!["Provenance"], vec![]),
        ("agent", "reference", "Provenance.agent.who", vec!["Provenance"], vec!["Practitioner", "Organization", "Patient"]),
    ];

    params
        .into_iter()
        .map(|(code, type_, expression, base, target)| {
            json!({
                "resourceType": "SearchParameter",
                "code": code,
                "type": type_,
                "expression": expression,
                "base": base,
                "target": target,
            })
        })
        .collect()
}

/// Render the CapabilityStatement: one `rest.resource` entry per table
/// resource type with its search parameters.
pub fn capability_statement(registry: &Registry, base_url: &str) -> JsonValue {
    let resources: Vec<JsonValue> = registry
        .table_resource_types()
        .into_iter()
        .map(|resource_type| {
            let search_params: Vec<JsonValue> = registry
                .search_params
                .for_type(&resource_type)
                .into_iter()
                .map(|impl_| {
                    json!({
                        "name": impl_.code,
                        "type": search_param_type_name(impl_.param_type),
                    })
                })
                .collect();

            json!({
                "type": resource_type,
                "interaction": [
                    { "code": "read" },
                    { "code": "vread" },
                    { "code": "update" },
                    { "code": "delete" },
                    { "code": "history-instance" },
                    { "code": "history-type" },
                    { "code": "create" },
                    { "code": "search-type" },
                ],
                "versioning": "versioned",
                "searchParam": search_params,
            })
        })
        .collect();

    json!({
        "resourceType": "CapabilityStatement",
        "status": "active",
        "kind": "instance",
        "fhirVersion": "4.0.1",
        "format": ["application/fhir+json"],
        "implementation": {
            "description": "Cuprum FHIR Server",
            "url": base_url,
        },
        "rest": [{
            "mode": "server",
            "resource": resources,
            "interaction": [
                { "code": "transaction" },
                { "code": "batch" },
            ],
        }],
    })
}

fn search_param_type_name(param_type: cuprum_registry::SearchParamType) -> &'static str {
    use cuprum_registry::SearchParamType::*;
    match param_type {
        Number => "number",
        Date => "date",
        String => "string",
        Token => "token",
        Reference => "reference",
        Composite => "composite",
        Quantity => "quantity",
        Uri => "uri",
        Special => "special",
    }
}

/// Seed a registry with the base definitions.
pub fn seed_registry(registry: &mut Registry) -> cuprum_registry::Result<()> {
    for definition in base_structure_definitions() {
        registry.index_profile(&definition)?;
    }
    for parameter in base_search_parameters() {
        registry.index_search_parameter(&parameter)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuprum_registry::Strategy;

    fn seeded() -> Registry {
        let mut registry = Registry::new();
        seed_registry(&mut registry).unwrap();
        registry
    }

    #[test]
    fn seed_produces_table_types() {
        let registry = seeded();
        let types = registry.table_resource_types();
        assert!(types.contains(&"Patient".to_string()));
        assert!(types.contains(&"Observation".to_string()));
        // Abstract resources are not table types
        assert!(!types.contains(&"Resource".to_string()));
        assert!(!types.contains(&"DomainResource".to_string()));
    }

    #[test]
    fn seeded_strategies_are_plausible() {
        let registry = seeded();

        let name = registry.search_params.get("Patient", "name").unwrap();
        assert!(matches!(name.strategy, Strategy::LookupTable(_)));

        // Organization.name is a plain string column
        let org_name = registry.search_params.get("Organization", "name").unwrap();
        assert_eq!(org_name.strategy, Strategy::Column);

        let gender = registry.search_params.get("Patient", "gender").unwrap();
        assert_eq!(gender.strategy, Strategy::TokenColumn);

        let subject = registry.search_params.get("Observation", "subject").unwrap();
        assert_eq!(subject.strategy, Strategy::Column);
        assert_eq!(subject.expression, "Observation.subject");
    }

    #[test]
    fn capability_statement_lists_resources() {
        let registry = seeded();
        let capability = capability_statement(&registry, "http://localhost:8080/fhir");

        let resources = capability["rest"][0]["resource"].as_array().unwrap();
        assert!(!resources.is_empty());
        let patient = resources
            .iter()
            .find(|r| r["type"] == "Patient")
            .expect("patient entry");
        assert!(patient["searchParam"].as_array().unwrap().len() > 3);
    }
}
