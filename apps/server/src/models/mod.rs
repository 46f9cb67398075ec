//! Domain models

pub mod fhir;

pub use fhir::{
    extract_meta_profile, extract_meta_source, operation_outcome, stamp_meta, HistoryEntry,
    OperationContext, Resource, ResourceOperation, ResourceResult, DELETED_SCHEMA_VERSION,
    SCHEMA_VERSION,
};
