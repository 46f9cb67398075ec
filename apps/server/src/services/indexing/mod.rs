//! Search indexing - row building for the generated schema
//!
//! Given a resource and its search parameter impls, these services extract
//! everything the write path persists besides the document itself: search
//! column values, outgoing reference rows, compartment memberships, and
//! global lookup-table rows.

pub mod compartments;
pub mod extract;
pub mod lookup;
pub mod references;
pub mod text;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use cuprum_registry::{ColumnType, SearchParameterImpl, Strategy};

use crate::models::{extract_meta_profile, extract_meta_source, OperationContext, SCHEMA_VERSION};
use crate::{Error, Result};

pub use compartments::build_compartments;
pub use lookup::{build_lookup_rows, LookupRow};
pub use references::{build_references, parse_reference, ParsedReference, ReferenceRow};

/// One extracted search column value, typed for binding
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    TextArray(Vec<String>),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Numeric(Decimal),
    Double(f64),
}

/// A search column slot on the main row; `value` is `None` when the
/// resource has nothing at the extraction path (the upsert still writes the
/// column, clearing stale values).
#[derive(Debug, Clone)]
pub struct SearchColumnValue {
    pub name: String,
    pub column_type: ColumnType,
    pub array: bool,
    pub value: Option<ColumnValue>,
}

/// Everything persisted to the main table for one resource version
#[derive(Debug, Clone)]
pub struct MainRow {
    pub id: Uuid,
    pub content: String,
    pub last_updated: DateTime<Utc>,
    pub deleted: bool,
    pub project_id: Option<Uuid>,
    pub version: i32,
    pub compartments: Vec<Uuid>,
    pub source: Option<String>,
    pub profile: Vec<String>,
    pub search_values: Vec<SearchColumnValue>,
}

/// Everything persisted to the history table for one resource version
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub id: Uuid,
    pub version_id: Uuid,
    pub last_updated: DateTime<Utc>,
    pub content: String,
}

/// Build the main-table row for a live resource.
pub fn build_row(
    resource: &JsonValue,
    resource_type: &str,
    impls: &[&SearchParameterImpl],
    context: &OperationContext,
    last_updated: DateTime<Utc>,
) -> Result<MainRow> {
    let id = resource
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidInput("Resource is missing an id".into()))?;
    let id = Uuid::parse_str(id)
        .map_err(|_| Error::InvalidInput(format!("Resource id '{}' is not a UUID", id)))?;

    let mut search_values = Vec::new();
    for impl_ in impls {
        if !matches!(impl_.strategy, Strategy::Column | Strategy::TokenColumn) {
            continue;
        }
        search_values.push(SearchColumnValue {
            name: impl_.column_name.clone(),
            column_type: impl_.column_type,
            array: impl_.array,
            value: extract::extract_column_value(resource, impl_)?,
        });
    }

    let compartments = if resource_type == "Binary" {
        Vec::new()
    } else {
        build_compartments(resource, resource_type, impls)
    };

    Ok(MainRow {
        id,
        content: serde_json::to_string(resource)
            .map_err(|e| Error::Internal(format!("Failed to serialize resource: {}", e)))?,
        last_updated,
        deleted: false,
        project_id: context.project,
        version: SCHEMA_VERSION,
        compartments,
        source: extract_meta_source(resource),
        profile: extract_meta_profile(resource),
        search_values,
    })
}

/// Build the history-table row for a resource version.
pub fn build_history_row(
    resource: &JsonValue,
    id: Uuid,
    version_id: Uuid,
    last_updated: DateTime<Utc>,
) -> Result<HistoryRow> {
    Ok(HistoryRow {
        id,
        version_id,
        last_updated,
        content: serde_json::to_string(resource)
            .map_err(|e| Error::Internal(format!("Failed to serialize resource: {}", e)))?,
    })
}
