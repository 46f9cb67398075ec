//! FHIR HTTP header helpers

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};

/// FHIR JSON content type
pub const FHIR_JSON: &str = "application/fhir+json; charset=utf-8";

/// Weak ETag carrying the version id.
pub fn etag(version_id: &str) -> String {
    format!("W/\"{}\"", version_id)
}

/// `Last-Modified` in HTTP-date format.
pub fn http_date(instant: DateTime<Utc>) -> String {
    instant.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `Location` for a created or updated resource version.
pub fn location(base_url: &str, resource_type: &str, id: &str, version_id: &str) -> String {
    format!(
        "{}/{}/{}/_history/{}",
        base_url, resource_type, id, version_id
    )
}

/// Extract the version id from an `If-Match` header (`W/"<versionId>"`).
pub fn if_match_version(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("if-match")?.to_str().ok()?;
    let value = value.trim();
    let value = value.strip_prefix("W/").unwrap_or(value);
    Some(value.trim_matches('"').to_string())
}

/// `Prefer: return=` preference on writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferReturn {
    Minimal,
    Representation,
}

pub fn prefer_return(headers: &HeaderMap) -> PreferReturn {
    headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            if v.contains("return=minimal") {
                PreferReturn::Minimal
            } else {
                PreferReturn::Representation
            }
        })
        .unwrap_or(PreferReturn::Representation)
}
