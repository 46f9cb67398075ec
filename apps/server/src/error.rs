//! Error types for the FHIR server

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Resource not found: {resource_type}/{id}")]
    ResourceNotFound { resource_type: String, id: String },

    #[error("Resource deleted: {resource_type}/{id}")]
    ResourceGone {
        resource_type: String,
        id: String,
        version_id: Option<String>,
    },

    #[error("Version not found: {resource_type}/{id}/_history/{version_id}")]
    VersionNotFound {
        resource_type: String,
        id: String,
        version_id: String,
    },

    #[error("Version conflict: expected {expected}, got {actual}")]
    VersionConflict { expected: String, actual: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("FHIRPath error: {0}")]
    FhirPath(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// PostgreSQL serialization failure (SQLSTATE 40001); retried by the
    /// repository before surfacing.
    pub fn is_serialization_failure(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => {
                db_err.code().as_deref() == Some("40001")
            }
            _ => false,
        }
    }

    /// The OperationOutcome issue code for this error.
    pub fn issue_code(&self) -> &'static str {
        match self {
            Error::ResourceNotFound { .. } | Error::VersionNotFound { .. } => "not-found",
            Error::ResourceGone { .. } => "deleted",
            Error::VersionConflict { .. } => "conflict",
            Error::InvalidInput(_) | Error::Search(_) => "invalid",
            Error::Database(_) | Error::FhirPath(_) | Error::Internal(_) | Error::Other(_) => {
                "exception"
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_message, etag) = match &self {
            Error::ResourceNotFound { .. } | Error::VersionNotFound { .. } => {
                (StatusCode::NOT_FOUND, self.to_string(), None)
            }
            Error::ResourceGone { version_id, .. } => {
                (StatusCode::GONE, self.to_string(), version_id.clone())
            }
            Error::VersionConflict { .. } => (StatusCode::CONFLICT, self.to_string(), None),
            Error::InvalidInput(_) | Error::Search(_) => {
                (StatusCode::BAD_REQUEST, self.to_string(), None)
            }
            Error::Database(_) | Error::Internal(_) | Error::Other(_) => {
                tracing::error!("Internal error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
            Error::FhirPath(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string(), None),
        };

        let body = Json(json!({
            "resourceType": "OperationOutcome",
            "issue": [{
                "severity": "error",
                "code": self.issue_code(),
                "diagnostics": error_message
            }]
        }));

        let mut response = (status, body).into_response();

        // Always emit a FHIR content type for OperationOutcome errors.
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/fhir+json; charset=utf-8"),
        );

        // Per FHIR spec: MAY include ETag on deleted resource errors
        if let Some(version_id) = etag {
            let etag_value = format!("W/\"{}\"", version_id);
            if let Ok(header_value) = etag_value.parse() {
                response.headers_mut().insert(header::ETAG, header_value);
            }
        }

        response
    }
}
