//! Patient compartment membership
//!
//! Patients belong to their own compartment. Any other resource joins the
//! compartment of every Patient it references. Only syntactically valid
//! UUIDs are retained, since the compartment column is UUID-typed.

use serde_json::Value;
use uuid::Uuid;

use cuprum_registry::{SearchParamType, SearchParameterImpl};

use super::extract::extract_raw_values;
use super::references::parse_reference;

/// Compute the Patient-compartment members for a resource.
pub fn build_compartments(
    resource: &Value,
    resource_type: &str,
    impls: &[&SearchParameterImpl],
) -> Vec<Uuid> {
    if resource_type == "Patient" {
        return resource
            .get("id")
            .and_then(|v| v.as_str())
            .and_then(|id| Uuid::parse_str(id).ok())
            .into_iter()
            .collect();
    }

    let mut members = Vec::new();
    for impl_ in impls {
        if impl_.param_type != SearchParamType::Reference {
            continue;
        }
        let Ok(values) = extract_raw_values(resource, &impl_.expression) else {
            continue;
        };
        for value in values {
            let reference = match &value {
                Value::Object(obj) => obj.get("reference").and_then(|v| v.as_str()),
                Value::String(s) => Some(s.as_str()),
                _ => None,
            };
            let Some(parsed) = reference.and_then(parse_reference) else {
                continue;
            };
            if parsed.target_type != "Patient" {
                continue;
            }
            let Ok(uuid) = Uuid::parse_str(&parsed.target_id) else {
                continue;
            };
            if !members.contains(&uuid) {
                members.push(uuid);
            }
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subject_impl() -> SearchParameterImpl {
        let mut registry = cuprum_registry::SearchParameterRegistry::default();
        registry
            .index(&json!({
                "code": "subject",
                "type": "reference",
                "expression": "Observation.subject",
                "base": ["Observation"],
            }))
            .unwrap();
        registry.get("Observation", "subject").unwrap().clone()
    }

    #[test]
    fn patient_is_in_its_own_compartment() {
        let id = Uuid::new_v4();
        let patient = json!({ "resourceType": "Patient", "id": id.to_string() });
        assert_eq!(build_compartments(&patient, "Patient", &[]), vec![id]);
    }

    #[test]
    fn referencing_resource_joins_patient_compartment() {
        let patient_id = Uuid::new_v4();
        let impl_ = subject_impl();
        let observation = json!({
            "resourceType": "Observation",
            "subject": { "reference": format!("Patient/{}", patient_id) }
        });

        assert_eq!(
            build_compartments(&observation, "Observation", &[&impl_]),
            vec![patient_id]
        );
    }

    #[test]
    fn non_uuid_patient_ids_are_dropped() {
        let impl_ = subject_impl();
        let observation = json!({
            "resourceType": "Observation",
            "subject": { "reference": "Patient/not-a-uuid" }
        });

        assert!(build_compartments(&observation, "Observation", &[&impl_]).is_empty());
    }

    #[test]
    fn non_patient_references_are_ignored() {
        let impl_ = subject_impl();
        let observation = json!({
            "resourceType": "Observation",
            "subject": { "reference": format!("Group/{}", Uuid::new_v4()) }
        });

        assert!(build_compartments(&observation, "Observation", &[&impl_]).is_empty());
    }
}
