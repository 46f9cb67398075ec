//! History and version-read handlers

use axum::{
    extract::{Path, RawQuery, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::SecondsFormat;
use serde_json::{json, Value as JsonValue};

use crate::api::headers::FHIR_JSON;
use crate::db::search::params::parse_query_string;
use crate::db::store::HistoryOptions;
use crate::models::HistoryEntry;
use crate::services::indexing::extract::parse_fhir_datetime;
use crate::state::AppState;
use crate::{Error, Result};

/// GET /fhir/{type}/{id}/_history - instance history
pub async fn instance_history(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response> {
    let options = parse_history_options(query.as_deref().unwrap_or_default())?;
    let entries = state
        .repository
        .read_history(&resource_type, Some(&id), &options)
        .await?;

    if entries.is_empty() {
        return Err(Error::ResourceNotFound { resource_type, id });
    }
    Ok(bundle_response(&state, &resource_type, entries))
}

/// GET /fhir/{type}/_history - type history
pub async fn type_history(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response> {
    let options = parse_history_options(query.as_deref().unwrap_or_default())?;
    let entries = state
        .repository
        .read_history(&resource_type, None, &options)
        .await?;
    Ok(bundle_response(&state, &resource_type, entries))
}

/// GET /fhir/{type}/{id}/_history/{vid} - version read
pub async fn vread(
    State(state): State<AppState>,
    Path((resource_type, id, version_id)): Path<(String, String, String)>,
) -> Result<Response> {
    let resource = state
        .repository
        .read_version(&resource_type, &id, &version_id)
        .await?;

    let mut response = Json(resource.resource).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        FHIR_JSON.parse().expect("static content type"),
    );
    Ok(response)
}

fn parse_history_options(query: &str) -> Result<HistoryOptions> {
    let mut options = HistoryOptions {
        count: Some(100),
        ..Default::default()
    };

    for (key, value) in parse_query_string(query) {
        match key.as_str() {
            "_since" => {
                options.since = Some(parse_fhir_datetime(&value).ok_or_else(|| {
                    Error::InvalidInput(format!("Invalid _since value: {}", value))
                })?);
            }
            "_count" => {
                let count: i64 = value.parse().map_err(|_| {
                    Error::InvalidInput(format!("Invalid _count value: {}", value))
                })?;
                options.count = Some(count.clamp(1, 1000));
            }
            "_cursor" => {
                options.cursor = Some(parse_fhir_datetime(&value).ok_or_else(|| {
                    Error::InvalidInput(format!("Invalid _cursor value: {}", value))
                })?);
            }
            _ => {}
        }
    }
    Ok(options)
}

/// History bundle: entries newest first, `request.method` distinguishing
/// updates from tombstones.
fn bundle_response(state: &AppState, resource_type: &str, entries: Vec<HistoryEntry>) -> Response {
    let base_url = &state.config.fhir.base_url;
    let bundle_entries: Vec<JsonValue> = entries
        .iter()
        .map(|entry| {
            let method = if entry.is_tombstone() { "DELETE" } else { "PUT" };
            let mut bundle_entry = json!({
                "fullUrl": format!("{}/{}/{}", base_url, resource_type, entry.id),
                "request": {
                    "method": method,
                    "url": format!("{}/{}", resource_type, entry.id),
                },
                "response": {
                    "status": "200 OK",
                    "etag": format!("W/\"{}\"", entry.version_id),
                    "lastModified": entry
                        .last_updated
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                },
            });
            if !entry.is_tombstone() {
                bundle_entry["resource"] = entry.content.clone();
            }
            bundle_entry
        })
        .collect();

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "history",
        "total": bundle_entries.len(),
        "entry": bundle_entries,
    });

    let mut response = Json(bundle).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        FHIR_JSON.parse().expect("static content type"),
    );
    response
}
