//! Metadata and health handlers

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::api::headers::FHIR_JSON;
use crate::conformance::capability_statement;
use crate::state::AppState;

/// GET /fhir/metadata - CapabilityStatement
pub async fn metadata(State(state): State<AppState>) -> Response {
    let capability = capability_statement(&state.registry, &state.config.fhir.base_url);

    let mut response = Json(capability).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        FHIR_JSON.parse().expect("static content type"),
    );
    response
}

/// GET /health - liveness
pub async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}
