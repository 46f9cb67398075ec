//! Search handler

use axum::{
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};

use crate::api::handlers::operation_context;
use crate::api::headers::FHIR_JSON;
use crate::db::search::params::MAX_COUNT;
use crate::db::search::SearchRequest;
use crate::state::AppState;
use crate::Result;

/// GET /fhir/{type} - search
pub async fn search(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response> {
    let query = query.unwrap_or_default();
    let mut request = SearchRequest::parse(&resource_type, &query)?;

    // The configured page size applies when the client did not pick one
    if !query.split('&').any(|p| p.starts_with("_count=")) {
        request.count = state
            .config
            .fhir
            .default_page_size
            .clamp(1, state.config.fhir.max_page_size.min(MAX_COUNT));
    }

    let context = operation_context(&headers);
    let bundle = state.search.search(&request, &context).await?;

    let mut response = Json(bundle).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        FHIR_JSON.parse().expect("static content type"),
    );
    Ok(response)
}
