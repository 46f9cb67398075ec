//! Batch and transaction bundle processing
//!
//! Transaction bundles run every entry inside one shared database
//! transaction: a pre-pass assigns ids to `urn:uuid:` POST entries, payload
//! references are rewritten structurally (only `.reference` string fields),
//! and any failure rolls the whole bundle back. Batch bundles isolate each
//! entry in its own try/catch and its own transaction.

use std::collections::HashMap;

use chrono::SecondsFormat;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::db::Repository;
use crate::models::{operation_outcome, OperationContext, Resource};
use crate::{Error, Result};

/// One parsed bundle entry request
#[derive(Debug, Clone)]
struct EntryRequest {
    method: String,
    resource_type: String,
    id: Option<String>,
    full_url: Option<String>,
    resource: Option<JsonValue>,
}

/// Process a `transaction` or `batch` bundle. The response bundle type
/// mirrors the input (`transaction-response` / `batch-response`).
pub async fn process_bundle(
    repository: &Repository,
    bundle: JsonValue,
    context: &OperationContext,
) -> Result<JsonValue> {
    let bundle_type = bundle
        .get("type")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();

    let entries = parse_entries(&bundle)?;

    match bundle_type.as_str() {
        "transaction" => process_transaction(repository, entries, context).await,
        "batch" => process_batch(repository, entries, context).await,
        other => Err(Error::InvalidInput(format!(
            "Unsupported Bundle.type '{}'. POST to [base] requires type 'batch' or 'transaction'",
            other
        ))),
    }
}

fn parse_entries(bundle: &JsonValue) -> Result<Vec<EntryRequest>> {
    let Some(entries) = bundle.get("entry").and_then(|v| v.as_array()) else {
        // An empty bundle is a valid request
        return Ok(Vec::new());
    };

    let mut parsed = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        let request = entry
            .get("request")
            .and_then(|v| v.as_object())
            .ok_or_else(|| {
                Error::InvalidInput(format!("Bundle.entry[{}].request is required", idx))
            })?;
        let method = request
            .get("method")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::InvalidInput(format!("Bundle.entry[{}].request.method is required", idx))
            })?
            .to_ascii_uppercase();
        let url = request.get("url").and_then(|v| v.as_str()).ok_or_else(|| {
            Error::InvalidInput(format!("Bundle.entry[{}].request.url is required", idx))
        })?;

        let mut segments = url.trim_start_matches('/').splitn(2, '?');
        let path = segments.next().unwrap_or_default();
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (resource_type, id) = match path_segments.as_slice() {
            [resource_type] => (resource_type.to_string(), None),
            [resource_type, id] => (resource_type.to_string(), Some(id.to_string())),
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Bundle.entry[{}].request.url '{}' is not supported",
                    idx, url
                )))
            }
        };

        parsed.push(EntryRequest {
            method,
            resource_type,
            id,
            full_url: entry
                .get("fullUrl")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            resource: entry.get("resource").cloned(),
        });
    }
    Ok(parsed)
}

/// Pre-assign ids for POST entries whose fullUrl is a `urn:uuid:`,
/// producing the `urn -> Type/id` rewrite map.
fn assign_urn_ids(entries: &[EntryRequest]) -> HashMap<String, (String, Uuid)> {
    let mut map = HashMap::new();
    for entry in entries {
        if entry.method != "POST" {
            continue;
        }
        let Some(full_url) = &entry.full_url else {
            continue;
        };
        if full_url.starts_with("urn:uuid:") {
            map.insert(
                full_url.clone(),
                (entry.resource_type.clone(), Uuid::new_v4()),
            );
        }
    }
    map
}

/// Rewrite `urn:uuid:X` references to `Type/assignedId`.
///
/// A deep structural walk that only touches `.reference` string fields;
/// everything else, including strings that merely look like urns, is left
/// alone. Pure: same map and input always produce the same output.
pub fn rewrite_urn_references(value: &mut JsonValue, urn_map: &HashMap<String, (String, Uuid)>) {
    match value {
        JsonValue::Object(obj) => {
            for (key, child) in obj.iter_mut() {
                if key == "reference" {
                    if let JsonValue::String(reference) = child {
                        if let Some((resource_type, id)) = urn_map.get(reference.as_str()) {
                            *child = JsonValue::String(format!("{}/{}", resource_type, id));
                            continue;
                        }
                    }
                }
                rewrite_urn_references(child, urn_map);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                rewrite_urn_references(item, urn_map);
            }
        }
        _ => {}
    }
}

async fn process_transaction(
    repository: &Repository,
    entries: Vec<EntryRequest>,
    context: &OperationContext,
) -> Result<JsonValue> {
    let urn_map = assign_urn_ids(&entries);
    let context = context.clone();
    let repo = repository.clone();

    let response_entries = repository
        .run_in_transaction(move |tx| {
            Box::pin(async move {
                let mut responses = Vec::with_capacity(entries.len());
                for mut entry in entries {
                    if let Some(resource) = entry.resource.as_mut() {
                        rewrite_urn_references(resource, &urn_map);
                    }
                    let assigned_id = entry
                        .full_url
                        .as_deref()
                        .and_then(|url| urn_map.get(url))
                        .map(|(_, id)| *id);

                    let response =
                        execute_entry(&repo, &mut **tx, entry, assigned_id, &context).await?;
                    responses.push(response);
                }
                Ok(responses)
            })
        })
        .await?;

    Ok(json!({
        "resourceType": "Bundle",
        "type": "transaction-response",
        "entry": response_entries,
    }))
}

async fn process_batch(
    repository: &Repository,
    entries: Vec<EntryRequest>,
    context: &OperationContext,
) -> Result<JsonValue> {
    let mut responses = Vec::with_capacity(entries.len());

    // Failures are isolated per entry
    for entry in entries {
        let result = execute_batch_entry(repository, entry, context).await;
        responses.push(match result {
            Ok(response) => response,
            Err(e) => {
                let status = error_status(&e);
                json!({
                    "response": {
                        "status": status,
                        "outcome": operation_outcome("error", e.issue_code(), &e.to_string()),
                    }
                })
            }
        });
    }

    Ok(json!({
        "resourceType": "Bundle",
        "type": "batch-response",
        "entry": responses,
    }))
}

async fn execute_batch_entry(
    repository: &Repository,
    entry: EntryRequest,
    context: &OperationContext,
) -> Result<JsonValue> {
    match entry.method.as_str() {
        "POST" => {
            let resource = entry
                .resource
                .ok_or_else(|| Error::InvalidInput("POST entry requires a resource".into()))?;
            let created = repository.create(resource, context, None).await?;
            Ok(entry_response(&created, "201 Created"))
        }
        "PUT" => {
            let mut resource = entry
                .resource
                .ok_or_else(|| Error::InvalidInput("PUT entry requires a resource".into()))?;
            apply_entry_id(&mut resource, entry.id.as_deref())?;
            let updated = repository.update(resource, context, None).await?;
            Ok(entry_response(&updated, "200 OK"))
        }
        "DELETE" => {
            let id = entry
                .id
                .ok_or_else(|| Error::InvalidInput("DELETE entry requires an id".into()))?;
            repository
                .delete(&entry.resource_type, &id, context)
                .await?;
            Ok(json!({ "response": { "status": "204 No Content" } }))
        }
        "GET" => {
            let id = entry
                .id
                .ok_or_else(|| Error::InvalidInput("GET entry requires an id".into()))?;
            let resource = repository.read(&entry.resource_type, &id, context).await?;
            Ok(entry_response(&resource, "200 OK"))
        }
        other => Err(Error::InvalidInput(format!(
            "Unsupported bundle entry method: {}",
            other
        ))),
    }
}

async fn execute_entry(
    repository: &Repository,
    conn: &mut sqlx::PgConnection,
    entry: EntryRequest,
    assigned_id: Option<Uuid>,
    context: &OperationContext,
) -> Result<JsonValue> {
    match entry.method.as_str() {
        "POST" => {
            let resource = entry
                .resource
                .ok_or_else(|| Error::InvalidInput("POST entry requires a resource".into()))?;
            let created = repository
                .create_in(conn, resource, context, assigned_id)
                .await?;
            Ok(entry_response(&created, "201 Created"))
        }
        "PUT" => {
            let mut resource = entry
                .resource
                .ok_or_else(|| Error::InvalidInput("PUT entry requires a resource".into()))?;
            apply_entry_id(&mut resource, entry.id.as_deref())?;
            let (updated, existed) = repository.update_in(conn, resource, context).await?;
            let status = if existed { "200 OK" } else { "201 Created" };
            Ok(entry_response(&updated, status))
        }
        "DELETE" => {
            let id = entry
                .id
                .ok_or_else(|| Error::InvalidInput("DELETE entry requires an id".into()))?;
            repository
                .delete_in(conn, &entry.resource_type, &id, context)
                .await?;
            Ok(json!({ "response": { "status": "204 No Content" } }))
        }
        // GET inside a transaction bundle is read-only against the shared
        // transaction
        "GET" => {
            let id = entry
                .id
                .ok_or_else(|| Error::InvalidInput("GET entry requires an id".into()))?;
            let resource = repository
                .read_in(conn, &entry.resource_type, &id, context)
                .await?;
            Ok(entry_response(&resource, "200 OK"))
        }
        other => Err(Error::InvalidInput(format!(
            "Unsupported bundle entry method: {}",
            other
        ))),
    }
}

fn apply_entry_id(resource: &mut JsonValue, url_id: Option<&str>) -> Result<()> {
    let Some(url_id) = url_id else {
        return Err(Error::InvalidInput("PUT entry requires Type/id url".into()));
    };
    match resource.get("id").and_then(|v| v.as_str()) {
        Some(body_id) if body_id != url_id => Err(Error::InvalidInput(format!(
            "Entry resource id '{}' does not match url id '{}'",
            body_id, url_id
        ))),
        Some(_) => Ok(()),
        None => {
            if let Some(obj) = resource.as_object_mut() {
                obj.insert("id".to_string(), json!(url_id));
            }
            Ok(())
        }
    }
}

fn entry_response(resource: &Resource, status: &str) -> JsonValue {
    json!({
        "resource": resource.resource,
        "response": {
            "status": status,
            "location": format!(
                "{}/{}/_history/{}",
                resource.resource_type, resource.id, resource.version_id
            ),
            "etag": format!("W/\"{}\"", resource.version_id),
            "lastModified": resource
                .last_updated
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    })
}

fn error_status(error: &Error) -> &'static str {
    match error {
        Error::ResourceNotFound { .. } | Error::VersionNotFound { .. } => "404 Not Found",
        Error::ResourceGone { .. } => "410 Gone",
        Error::VersionConflict { .. } => "409 Conflict",
        Error::InvalidInput(_) | Error::Search(_) => "400 Bad Request",
        _ => "500 Internal Server Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urn_map(urn: &str, resource_type: &str, id: Uuid) -> HashMap<String, (String, Uuid)> {
        let mut map = HashMap::new();
        map.insert(urn.to_string(), (resource_type.to_string(), id));
        map
    }

    #[test]
    fn rewrites_only_reference_fields() {
        let id = Uuid::new_v4();
        let map = urn_map("urn:uuid:P", "Patient", id);
        let mut resource = json!({
            "resourceType": "Observation",
            "subject": { "reference": "urn:uuid:P", "display": "urn:uuid:P" },
            "note": [{ "text": "urn:uuid:P" }]
        });

        rewrite_urn_references(&mut resource, &map);

        assert_eq!(
            resource["subject"]["reference"],
            json!(format!("Patient/{}", id))
        );
        // Non-reference strings are untouched
        assert_eq!(resource["subject"]["display"], json!("urn:uuid:P"));
        assert_eq!(resource["note"][0]["text"], json!("urn:uuid:P"));
    }

    #[test]
    fn rewriting_is_pure() {
        let id = Uuid::new_v4();
        let map = urn_map("urn:uuid:P", "Patient", id);
        let original = json!({
            "subject": { "reference": "urn:uuid:P" }
        });

        let mut first = original.clone();
        let mut second = original.clone();
        rewrite_urn_references(&mut first, &map);
        rewrite_urn_references(&mut second, &map);
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_urns_are_left_alone() {
        let map = urn_map("urn:uuid:P", "Patient", Uuid::new_v4());
        let mut resource = json!({
            "subject": { "reference": "urn:uuid:OTHER" }
        });
        rewrite_urn_references(&mut resource, &map);
        assert_eq!(resource["subject"]["reference"], json!("urn:uuid:OTHER"));
    }

    #[test]
    fn parse_entries_accepts_empty_bundle() {
        let entries = parse_entries(&json!({ "resourceType": "Bundle", "type": "transaction" }));
        assert!(entries.unwrap().is_empty());
    }

    #[test]
    fn parse_entries_requires_request() {
        let result = parse_entries(&json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": [{ "resource": { "resourceType": "Patient" } }]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn urn_pre_pass_covers_post_entries_only() {
        let entries = vec![
            EntryRequest {
                method: "POST".into(),
                resource_type: "Patient".into(),
                id: None,
                full_url: Some("urn:uuid:P".into()),
                resource: None,
            },
            EntryRequest {
                method: "PUT".into(),
                resource_type: "Patient".into(),
                id: Some("x".into()),
                full_url: Some("urn:uuid:Q".into()),
                resource: None,
            },
        ];
        let map = assign_urn_ids(&entries);
        assert!(map.contains_key("urn:uuid:P"));
        assert!(!map.contains_key("urn:uuid:Q"));
        assert_eq!(map["urn:uuid:P"].0, "Patient");
    }
}
