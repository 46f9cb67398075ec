//! Domain models for FHIR REST operations

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

/// Row-format version written to `__version` on live rows
pub const SCHEMA_VERSION: i32 = 1;

/// Row-format version marking a soft-deleted row
pub const DELETED_SCHEMA_VERSION: i32 = -1;

/// A FHIR resource with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Resource ID (server-assigned UUID)
    pub id: String,

    /// Resource type (e.g., "Patient", "Observation")
    pub resource_type: String,

    /// Version ID (a fresh UUID per create/update/delete)
    pub version_id: String,

    /// Full resource JSON
    pub resource: JsonValue,

    /// Last updated timestamp
    pub last_updated: DateTime<Utc>,

    /// Is this resource deleted?
    pub deleted: bool,
}

/// Result of a resource operation
#[derive(Debug, Clone)]
pub struct ResourceResult {
    /// The resource
    pub resource: Resource,

    /// Operation that was performed
    pub operation: ResourceOperation,
}

/// Type of operation performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOperation {
    /// Resource was created (HTTP 201)
    Created,

    /// Resource was updated (HTTP 200)
    Updated,

    /// Resource was deleted (HTTP 204 or 200 with OperationOutcome)
    Deleted,
}

impl ResourceOperation {
    /// Get HTTP status code for this operation
    pub fn status_code(&self) -> u16 {
        match self {
            ResourceOperation::Created => 201,
            ResourceOperation::Updated => 200,
            ResourceOperation::Deleted => 204,
        }
    }
}

/// History entry for a resource
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: String,
    pub version_id: String,
    pub last_updated: DateTime<Utc>,
    /// Empty for tombstone entries
    pub content: JsonValue,
}

impl HistoryEntry {
    /// Tombstones carry no content.
    pub fn is_tombstone(&self) -> bool {
        self.content.is_null()
            || self
                .content
                .as_object()
                .map(|o| o.is_empty())
                .unwrap_or(false)
    }
}

/// Per-call operation context supplied by the outer layers
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Multi-tenant project scope; stored in `projectId` on write and
    /// filtered on read/search
    pub project: Option<Uuid>,
    /// Reference to the calling identity
    pub author: Option<String>,
    /// When set, project filtering is bypassed
    pub super_admin: bool,
}

/// Set `id` and `meta.{versionId, lastUpdated}` on a resource, replacing
/// whatever the caller supplied.
pub fn stamp_meta(
    resource: &mut JsonValue,
    id: &str,
    version_id: &str,
    last_updated: DateTime<Utc>,
) {
    if let Some(obj) = resource.as_object_mut() {
        obj.insert("id".to_string(), json!(id));

        let meta = obj
            .entry("meta".to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if let Some(meta_obj) = meta.as_object_mut() {
            meta_obj.insert("versionId".to_string(), json!(version_id));
            meta_obj.insert(
                "lastUpdated".to_string(),
                json!(last_updated.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
    }
}

/// `meta.source` of a resource, when present.
pub fn extract_meta_source(resource: &JsonValue) -> Option<String> {
    resource
        .get("meta")
        .and_then(|m| m.get("source"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// `meta.profile` of a resource, when present.
pub fn extract_meta_profile(resource: &JsonValue) -> Vec<String> {
    resource
        .get("meta")
        .and_then(|m| m.get("profile"))
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Build an OperationOutcome with a single issue.
pub fn operation_outcome(severity: &str, code: &str, diagnostics: &str) -> JsonValue {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": severity,
            "code": code,
            "diagnostics": diagnostics
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_meta_replaces_caller_supplied_values() {
        let mut resource = json!({
            "resourceType": "Patient",
            "meta": { "versionId": "bogus", "source": "upstream" }
        });
        let now = Utc::now();
        stamp_meta(&mut resource, "abc", "v1", now);

        assert_eq!(resource["id"], json!("abc"));
        assert_eq!(resource["meta"]["versionId"], json!("v1"));
        assert!(resource["meta"]["lastUpdated"].is_string());
        // Other meta fields survive
        assert_eq!(resource["meta"]["source"], json!("upstream"));
    }

    #[test]
    fn tombstone_detection() {
        let entry = HistoryEntry {
            id: "a".into(),
            version_id: "v".into(),
            last_updated: Utc::now(),
            content: json!({}),
        };
        assert!(entry.is_tombstone());

        let live = HistoryEntry {
            content: json!({ "resourceType": "Patient" }),
            ..entry
        };
        assert!(!live.is_tombstone());
    }
}
