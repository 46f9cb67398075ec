//! Outgoing reference extraction
//!
//! Builds the per-resource-type references table rows: one row per
//! `(resourceId, targetId, code)` for every reference a resource makes.
//! Fragment (`#`) and `urn:` references are never indexed.

use serde_json::Value;
use uuid::Uuid;

use cuprum_registry::{SearchParamType, SearchParameterImpl};

use super::extract::extract_raw_values;

/// A parsed reference string
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReference {
    pub target_type: String,
    pub target_id: String,
}

/// One references-table row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReferenceRow {
    pub resource_id: Uuid,
    pub target_id: String,
    /// SearchParameter code that produced the row
    pub code: String,
}

/// Parse a reference string: skip fragments and urns, split on `/`, take
/// the last segment as the target id and the one before it as the type.
pub fn parse_reference(reference: &str) -> Option<ParsedReference> {
    if reference.is_empty() || reference.starts_with('#') || reference.starts_with("urn:") {
        return None;
    }

    let segments: Vec<&str> = reference.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }

    Some(ParsedReference {
        target_type: segments[segments.len() - 2].to_string(),
        target_id: segments[segments.len() - 1].to_string(),
    })
}

/// Extract the deduplicated reference rows for one resource.
pub fn build_references(
    resource: &Value,
    resource_id: Uuid,
    impls: &[&SearchParameterImpl],
) -> Vec<ReferenceRow> {
    let mut rows = Vec::new();

    for impl_ in impls {
        if impl_.param_type != SearchParamType::Reference {
            continue;
        }
        let Ok(values) = extract_raw_values(resource, &impl_.expression) else {
            continue;
        };
        for value in values {
            let Some(reference) = reference_string(&value) else {
                continue;
            };
            let Some(parsed) = parse_reference(&reference) else {
                continue;
            };
            rows.push(ReferenceRow {
                resource_id,
                target_id: parsed.target_id,
                code: impl_.code.clone(),
            });
        }
    }

    rows.sort();
    rows.dedup();
    rows
}

fn reference_string(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => obj
            .get("reference")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subject_impl() -> cuprum_registry::SearchParameterImpl {
        let mut registry = cuprum_registry::SearchParameterRegistry::default();
        registry
            .index(&json!({
                "code": "subject",
                "type": "reference",
                "expression": "Observation.subject",
                "base": ["Observation"],
                "target": ["Patient", "Group"],
            }))
            .unwrap();
        registry.get("Observation", "subject").unwrap().clone()
    }

    #[test]
    fn parses_relative_and_absolute_references() {
        assert_eq!(
            parse_reference("Patient/123"),
            Some(ParsedReference {
                target_type: "Patient".into(),
                target_id: "123".into()
            })
        );
        assert_eq!(
            parse_reference("https://example.com/fhir/Patient/123"),
            Some(ParsedReference {
                target_type: "Patient".into(),
                target_id: "123".into()
            })
        );
    }

    #[test]
    fn skips_fragments_and_urns() {
        assert_eq!(parse_reference("#contained"), None);
        assert_eq!(parse_reference("urn:uuid:4d6c2b0e"), None);
        assert_eq!(parse_reference(""), None);
        assert_eq!(parse_reference("123"), None);
    }

    #[test]
    fn builds_deduplicated_rows() {
        let impl_ = subject_impl();
        let impls = vec![&impl_];
        let resource_id = Uuid::new_v4();
        let observation = json!({
            "resourceType": "Observation",
            "subject": { "reference": "Patient/123" }
        });

        let rows = build_references(&observation, resource_id, &impls);
        assert_eq!(
            rows,
            vec![ReferenceRow {
                resource_id,
                target_id: "123".into(),
                code: "subject".into()
            }]
        );

        // Idempotent: extracting again yields the same row set
        let again = build_references(&observation, resource_id, &impls);
        assert_eq!(rows, again);
    }

    #[test]
    fn urn_references_produce_no_rows() {
        let impl_ = subject_impl();
        let impls = vec![&impl_];
        let observation = json!({
            "resourceType": "Observation",
            "subject": { "reference": "urn:uuid:0a4e1c1c" }
        });

        assert!(build_references(&observation, Uuid::new_v4(), &impls).is_empty());
    }
}
