//! CRUD handlers

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value as JsonValue;

use crate::api::headers::{
    etag, http_date, if_match_version, location, prefer_return, PreferReturn, FHIR_JSON,
};
use crate::api::handlers::operation_context;
use crate::models::{operation_outcome, Resource};
use crate::state::AppState;
use crate::{Error, Result};

/// POST /fhir/{type} - create
pub async fn create(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Result<Response> {
    check_body_type(&resource_type, &body)?;
    let context = operation_context(&headers);

    let created = state.repository.create(body, &context, None).await?;
    Ok(resource_response(
        &state,
        &created,
        StatusCode::CREATED,
        prefer_return(&headers),
        true,
    ))
}

/// GET /fhir/{type}/{id} - read
pub async fn read(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let context = operation_context(&headers);
    let resource = state.repository.read(&resource_type, &id, &context).await?;
    Ok(resource_response(
        &state,
        &resource,
        StatusCode::OK,
        PreferReturn::Representation,
        false,
    ))
}

/// PUT /fhir/{type}/{id} - update
pub async fn update(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Result<Response> {
    check_body_type(&resource_type, &body)?;

    // A resource's id never changes; a mismatched body id is an error
    match body.get("id").and_then(|v| v.as_str()) {
        Some(body_id) if body_id == id => {}
        Some(body_id) => {
            return Err(Error::InvalidInput(format!(
                "Resource id '{}' does not match URL id '{}'",
                body_id, id
            )))
        }
        None => {
            return Err(Error::InvalidInput(
                "Update requires an id in the resource body".into(),
            ))
        }
    }

    let context = operation_context(&headers);
    let precondition = if_match_version(&headers);
    let updated = state.repository.update(body, &context, precondition).await?;
    Ok(resource_response(
        &state,
        &updated,
        StatusCode::OK,
        prefer_return(&headers),
        false,
    ))
}

/// DELETE /fhir/{type}/{id} - soft delete
pub async fn delete(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let context = operation_context(&headers);
    state.repository.delete(&resource_type, &id, &context).await?;

    let outcome = operation_outcome("information", "informational", "Resource deleted");
    let mut response = (StatusCode::OK, Json(outcome)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        FHIR_JSON.parse().expect("static content type"),
    );
    Ok(response)
}

fn check_body_type(resource_type: &str, body: &JsonValue) -> Result<()> {
    let body_type = body
        .get("resourceType")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if body_type != resource_type {
        return Err(Error::InvalidInput(format!(
            "Body resourceType '{}' does not match URL type '{}'",
            body_type, resource_type
        )));
    }
    Ok(())
}

fn resource_response(
    state: &AppState,
    resource: &Resource,
    status: StatusCode,
    prefer: PreferReturn,
    with_location: bool,
) -> Response {
    let mut response = match prefer {
        PreferReturn::Minimal => status.into_response(),
        PreferReturn::Representation => (status, Json(resource.resource.clone())).into_response(),
    };

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        FHIR_JSON.parse().expect("static content type"),
    );
    if let Ok(value) = etag(&resource.version_id).parse() {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = http_date(resource.last_updated).parse() {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if with_location {
        let location = location(
            &state.config.fhir.base_url,
            &resource.resource_type,
            &resource.id,
            &resource.version_id,
        );
        if let Ok(value) = location.parse() {
            headers.insert(header::LOCATION, value);
        }
    }

    response
}
