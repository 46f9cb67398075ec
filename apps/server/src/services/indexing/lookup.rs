//! Global lookup-table row decomposition
//!
//! HumanName, Address, ContactPoint, and Identifier elements decompose
//! into the four global lookup tables shared by all resource types. The
//! search engine joins them for lookup-strategy parameters.

use serde_json::Value;
use uuid::Uuid;

use cuprum_registry::{LookupTable, SearchParameterImpl, Strategy};

use super::text::normalize_string;

/// One row in a global lookup table
#[derive(Debug, Clone, PartialEq)]
pub enum LookupRow {
    HumanName {
        resource_id: Uuid,
        resource_type: String,
        /// Normalized full name for broad matching
        name: String,
        given: Option<String>,
        family: Option<String>,
    },
    Address {
        resource_id: Uuid,
        resource_type: String,
        /// Normalized full address for broad matching
        address: String,
        city: Option<String>,
        country: Option<String>,
        postal_code: Option<String>,
        state: Option<String>,
        use_: Option<String>,
    },
    ContactPoint {
        resource_id: Uuid,
        resource_type: String,
        system: Option<String>,
        value: String,
    },
    Identifier {
        resource_id: Uuid,
        resource_type: String,
        system: Option<String>,
        value: String,
    },
}

impl LookupRow {
    pub fn table(&self) -> LookupTable {
        match self {
            Self::HumanName { .. } => LookupTable::HumanName,
            Self::Address { .. } => LookupTable::Address,
            Self::ContactPoint { .. } => LookupTable::ContactPoint,
            Self::Identifier { .. } => LookupTable::Identifier,
        }
    }
}

/// Build all lookup-table rows for one resource.
///
/// Which tables apply follows from the resource's lookup-strategy impls;
/// the source elements are the conventional ones (`name`, `address`,
/// `telecom`, `identifier`).
pub fn build_lookup_rows(
    resource: &Value,
    resource_type: &str,
    resource_id: Uuid,
    impls: &[&SearchParameterImpl],
) -> Vec<LookupRow> {
    let mut tables: Vec<LookupTable> = Vec::new();
    for impl_ in impls {
        if let Strategy::LookupTable(table) = impl_.strategy {
            if !tables.contains(&table) {
                tables.push(table);
            }
        }
    }

    let mut rows = Vec::new();
    for table in tables {
        match table {
            LookupTable::HumanName => {
                extract_human_names(resource, resource_type, resource_id, &mut rows)
            }
            LookupTable::Address => {
                extract_addresses(resource, resource_type, resource_id, &mut rows)
            }
            LookupTable::ContactPoint => {
                extract_contact_points(resource, resource_type, resource_id, &mut rows)
            }
            LookupTable::Identifier => {
                extract_identifiers(resource, resource_type, resource_id, &mut rows)
            }
        }
    }
    rows
}

fn elements<'a>(resource: &'a Value, name: &str) -> Vec<&'a Value> {
    match resource.get(name) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    }
}

fn string_field(obj: &Value, field: &str) -> Option<String> {
    obj.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
}

fn extract_human_names(
    resource: &Value,
    resource_type: &str,
    resource_id: Uuid,
    rows: &mut Vec<LookupRow>,
) {
    for element in elements(resource, "name") {
        let family = string_field(element, "family");
        let given: Vec<String> = element
            .get("given")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        // Full name: explicit text, else "given... family"
        let full = string_field(element, "text").unwrap_or_else(|| {
            let mut parts = given.clone();
            if let Some(family) = &family {
                parts.push(family.clone());
            }
            parts.join(" ")
        });
        if full.is_empty() && family.is_none() && given.is_empty() {
            continue;
        }

        rows.push(LookupRow::HumanName {
            resource_id,
            resource_type: resource_type.to_string(),
            name: normalize_string(&full),
            given: if given.is_empty() {
                None
            } else {
                Some(given.join(" "))
            },
            family,
        });
    }
}

fn extract_addresses(
    resource: &Value,
    resource_type: &str,
    resource_id: Uuid,
    rows: &mut Vec<LookupRow>,
) {
    for element in elements(resource, "address") {
        let lines: Vec<String> = element
            .get("line")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();
        let city = string_field(element, "city");
        let country = string_field(element, "country");
        let postal_code = string_field(element, "postalCode");
        let state = string_field(element, "state");
        let use_ = string_field(element, "use");

        let full = string_field(element, "text").unwrap_or_else(|| {
            let mut parts = lines.clone();
            for part in [&city, &state, &postal_code, &country] {
                if let Some(part) = part {
                    parts.push(part.clone());
                }
            }
            parts.join(" ")
        });
        if full.is_empty() && city.is_none() && postal_code.is_none() {
            continue;
        }

        rows.push(LookupRow::Address {
            resource_id,
            resource_type: resource_type.to_string(),
            address: normalize_string(&full),
            city,
            country,
            postal_code,
            state,
            use_,
        });
    }
}

fn extract_contact_points(
    resource: &Value,
    resource_type: &str,
    resource_id: Uuid,
    rows: &mut Vec<LookupRow>,
) {
    for element in elements(resource, "telecom") {
        let Some(value) = string_field(element, "value") else {
            continue;
        };
        rows.push(LookupRow::ContactPoint {
            resource_id,
            resource_type: resource_type.to_string(),
            system: string_field(element, "system"),
            value,
        });
    }
}

fn extract_identifiers(
    resource: &Value,
    resource_type: &str,
    resource_id: Uuid,
    rows: &mut Vec<LookupRow>,
) {
    for element in elements(resource, "identifier") {
        let Some(value) = string_field(element, "value") else {
            continue;
        };
        rows.push(LookupRow::Identifier {
            resource_id,
            resource_type: resource_type.to_string(),
            system: string_field(element, "system"),
            value,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient_impls() -> Vec<SearchParameterImpl> {
        let mut registry = cuprum_registry::SearchParameterRegistry::default();
        for (code, type_, expression) in [
            ("name", "string", "Patient.name"),
            ("identifier", "token", "Patient.identifier"),
            ("telecom", "token", "Patient.telecom"),
            ("address", "string", "Patient.address"),
        ] {
            registry
                .index(&json!({
                    "code": code, "type": type_,
                    "expression": expression, "base": ["Patient"],
                }))
                .unwrap();
        }
        ["name", "identifier", "telecom", "address"]
            .iter()
            .map(|code| registry.get("Patient", code).unwrap().clone())
            .collect()
    }

    #[test]
    fn decomposes_patient_into_all_four_tables() {
        let impls = patient_impls();
        let impl_refs: Vec<&SearchParameterImpl> = impls.iter().collect();
        let id = Uuid::new_v4();
        let patient = json!({
            "resourceType": "Patient",
            "id": id.to_string(),
            "name": [{ "family": "Müller", "given": ["Anna"] }],
            "identifier": [{ "system": "http://example.com/mrn", "value": "12345" }],
            "telecom": [{ "system": "phone", "value": "555-0100" }],
            "address": [{ "city": "Berlin", "postalCode": "10115" }]
        });

        let rows = build_lookup_rows(&patient, "Patient", id, &impl_refs);
        assert_eq!(rows.len(), 4);

        assert_eq!(
            rows[0],
            LookupRow::HumanName {
                resource_id: id,
                resource_type: "Patient".into(),
                name: "anna muller".into(),
                given: Some("Anna".into()),
                family: Some("Müller".into()),
            }
        );
        assert!(matches!(
            &rows[1],
            LookupRow::Identifier { system: Some(s), value, .. }
                if s == "http://example.com/mrn" && value == "12345"
        ));
        assert!(matches!(
            &rows[2],
            LookupRow::ContactPoint { system: Some(s), value, .. }
                if s == "phone" && value == "555-0100"
        ));
        assert!(matches!(
            &rows[3],
            LookupRow::Address { city: Some(c), .. } if c == "Berlin"
        ));
    }

    #[test]
    fn resources_without_lookup_impls_produce_no_rows() {
        let patient = json!({ "resourceType": "Patient", "name": [{ "family": "X" }] });
        assert!(build_lookup_rows(&patient, "Patient", Uuid::new_v4(), &[]).is_empty());
    }
}
