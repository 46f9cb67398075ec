//! Request handlers

pub mod batch;
pub mod crud;
pub mod history;
pub mod metadata;
pub mod search;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::models::OperationContext;

/// Build the per-call operation context. Authentication is an external
/// collaborator; the project scope arrives pre-resolved in a header.
pub fn operation_context(headers: &HeaderMap) -> OperationContext {
    let project = headers
        .get("x-project-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok());

    OperationContext {
        project,
        author: headers
            .get("x-author")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        super_admin: false,
    }
}
