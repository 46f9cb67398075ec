//! Batch and transaction bundle handler

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value as JsonValue;

use crate::api::handlers::operation_context;
use crate::api::headers::FHIR_JSON;
use crate::services::bundle::process_bundle;
use crate::state::AppState;
use crate::{Error, Result};

/// POST /fhir - process a batch or transaction Bundle
pub async fn bundle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Result<Response> {
    let resource_type = body
        .get("resourceType")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if resource_type != "Bundle" {
        return Err(Error::InvalidInput(
            "POST to the base URL requires a Bundle".into(),
        ));
    }

    let context = operation_context(&headers);
    let response_bundle = process_bundle(&state.repository, body, &context).await?;

    let mut response = Json(response_bundle).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        FHIR_JSON.parse().expect("static content type"),
    );
    Ok(response)
}
