//! Router assembly

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::api::handlers;
use crate::state::AppState;

/// Build the FHIR router.
pub fn create_router(state: AppState) -> Router {
    let fhir = Router::new()
        .route("/", post(handlers::batch::bundle))
        .route("/metadata", get(handlers::metadata::metadata))
        .route(
            "/:resource_type",
            get(handlers::search::search).post(handlers::crud::create),
        )
        .route(
            "/:resource_type/_history",
            get(handlers::history::type_history),
        )
        .route(
            "/:resource_type/:id",
            get(handlers::crud::read)
                .put(handlers::crud::update)
                .delete(handlers::crud::delete),
        )
        .route(
            "/:resource_type/:id/_history",
            get(handlers::history::instance_history),
        )
        .route(
            "/:resource_type/:id/_history/:version_id",
            get(handlers::history::vread),
        );

    Router::new()
        .route("/health", get(handlers::metadata::health))
        .nest("/fhir", fhir)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .with_state(state)
}
