//! HTTP API - routes, handlers, and header helpers

pub mod handlers;
pub mod headers;
pub mod routes;

pub use routes::create_router;
