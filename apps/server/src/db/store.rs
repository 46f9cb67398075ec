//! Resource repository
//!
//! Executes create / read / update / delete / version-read / history with
//! at-most-one-writer-per-resource semantics. Every write runs inside one
//! transaction: main-row upsert, history insert, reference refresh, and
//! lookup refresh commit atomically. Serialization failures (SQLSTATE
//! 40001) are retried with exponential backoff before surfacing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use cuprum_registry::{ColumnType, Registry};

use crate::db::sql;
use crate::models::fhir::stamp_meta;
use crate::models::{HistoryEntry, OperationContext, Resource, DELETED_SCHEMA_VERSION};
use crate::services::indexing::{
    self, build_lookup_rows, build_references, ColumnValue, LookupRow, MainRow, SearchColumnValue,
};
use crate::services::validation::ResourceValidator;
use crate::{Error, Result};

/// Maximum retries on serialization failure
const MAX_RETRIES: u32 = 3;
/// Base retry delay; doubled per attempt, capped at 1 s
const RETRY_BASE_DELAY_MS: u64 = 100;
const RETRY_MAX_DELAY_MS: u64 = 1000;

/// History query options
#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    /// Lower-inclusive bound on `lastUpdated`
    pub since: Option<DateTime<Utc>>,
    /// Upper-exclusive bound used for pagination
    pub cursor: Option<DateTime<Utc>>,
    pub count: Option<i64>,
}

/// The resource repository
#[derive(Clone)]
pub struct Repository {
    pool: PgPool,
    registry: Arc<Registry>,
    validator: Arc<dyn ResourceValidator>,
}

impl Repository {
    pub fn new(
        pool: PgPool,
        registry: Arc<Registry>,
        validator: Arc<dyn ResourceValidator>,
    ) -> Self {
        Self {
            pool,
            registry,
            validator,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn require_table_type(&self, resource_type: &str) -> Result<()> {
        let known = self
            .registry
            .profiles
            .get(resource_type)
            .map(|p| p.is_table_resource())
            .unwrap_or(false);
        if known {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "Unknown resource type: {}",
                resource_type
            )))
        }
    }

    fn validate(&self, resource: &JsonValue) -> Result<()> {
        let outcome = self.validator.validate(resource);
        if !outcome.valid() {
            return Err(Error::InvalidInput(outcome.error_diagnostics()));
        }
        for issue in &outcome.issues {
            tracing::warn!(severity = %issue.severity, "{}", issue.diagnostics);
        }
        Ok(())
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Create a resource, assigning id and version metadata.
    pub async fn create(
        &self,
        mut resource: JsonValue,
        context: &OperationContext,
        assigned_id: Option<Uuid>,
    ) -> Result<Resource> {
        let resource_type = resource_type_of(&resource)?;
        self.require_table_type(&resource_type)?;
        self.validate(&resource)?;

        let id = assigned_id.unwrap_or_else(Uuid::new_v4);
        let version_id = Uuid::new_v4();
        let now = Utc::now();
        stamp_meta(&mut resource, &id.to_string(), &version_id.to_string(), now);

        let mut attempt: u32 = 0;
        loop {
            let mut tx = self.pool.begin().await?;
            let result = write_resource(
                &mut tx,
                &self.registry,
                &resource,
                &resource_type,
                id,
                version_id,
                now,
                context,
            )
            .await;

            match finish(tx, result).await {
                Ok(()) => break,
                Err(e) => attempt = retry_or_fail(e, attempt).await?,
            }
        }

        Ok(Resource {
            id: id.to_string(),
            resource_type,
            version_id: version_id.to_string(),
            resource,
            last_updated: now,
            deleted: false,
        })
    }

    /// Read the latest live version.
    pub async fn read(
        &self,
        resource_type: &str,
        id: &str,
        context: &OperationContext,
    ) -> Result<Resource> {
        self.require_table_type(resource_type)?;
        let mut conn = self.pool.acquire().await?;
        read_resource(&mut conn, resource_type, id, context).await
    }

    /// Update a resource, writing a new version. An optional precondition
    /// version id enables optimistic concurrency.
    pub async fn update(
        &self,
        mut resource: JsonValue,
        context: &OperationContext,
        precondition_version: Option<String>,
    ) -> Result<Resource> {
        let resource_type = resource_type_of(&resource)?;
        self.require_table_type(&resource_type)?;

        let id = resource
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("Update requires an id".into()))?
            .to_string();
        let id_uuid = parse_uuid(&id)?;

        self.validate(&resource)?;

        let version_id = Uuid::new_v4();
        let now = Utc::now();
        stamp_meta(&mut resource, &id, &version_id.to_string(), now);

        let mut attempt: u32 = 0;
        loop {
            let mut tx = self.pool.begin().await?;
            let result = update_in_tx(
                &mut tx,
                &self.registry,
                &resource,
                &resource_type,
                id_uuid,
                version_id,
                now,
                context,
                precondition_version.as_deref(),
            )
            .await;

            match finish(tx, result).await {
                Ok(()) => break,
                Err(e) => attempt = retry_or_fail(e, attempt).await?,
            }
        }

        Ok(Resource {
            id,
            resource_type,
            version_id: version_id.to_string(),
            resource,
            last_updated: now,
            deleted: false,
        })
    }

    /// Soft delete: keep the row with `deleted = true`, cleared content, and
    /// a tombstone history entry. Reference and lookup rows are removed.
    pub async fn delete(
        &self,
        resource_type: &str,
        id: &str,
        context: &OperationContext,
    ) -> Result<String> {
        self.require_table_type(resource_type)?;
        let id_uuid = parse_uuid(id)?;

        let version_id = Uuid::new_v4();
        let now = Utc::now();

        let mut attempt: u32 = 0;
        loop {
            let mut tx = self.pool.begin().await?;
            let result = delete_in_tx(
                &mut tx,
                &self.registry,
                resource_type,
                id,
                id_uuid,
                version_id,
                now,
                context,
            )
            .await;

            match finish(tx, result).await {
                Ok(()) => break,
                Err(e) => attempt = retry_or_fail(e, attempt).await?,
            }
        }

        Ok(version_id.to_string())
    }

    /// Read one specific version from history.
    pub async fn read_version(
        &self,
        resource_type: &str,
        id: &str,
        version_id: &str,
    ) -> Result<Resource> {
        self.require_table_type(resource_type)?;
        let mut conn = self.pool.acquire().await?;

        let sql = sql::build_version_select(&history_table(resource_type));
        let row = sqlx::query(&sql)
            .bind(parse_uuid(id)?)
            .bind(parse_uuid(version_id)?)
            .fetch_optional(&mut *conn)
            .await?;

        let Some(row) = row else {
            return Err(Error::VersionNotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                version_id: version_id.to_string(),
            });
        };

        let content: String = row.try_get("content")?;
        if content.is_empty() {
            return Err(Error::ResourceGone {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                version_id: Some(version_id.to_string()),
            });
        }

        let resource: JsonValue = serde_json::from_str(&content)
            .map_err(|e| Error::Internal(format!("Stored content is not JSON: {}", e)))?;
        Ok(resource_from_json(resource_type, id, resource))
    }

    /// Instance-level (id given) or type-level version history, newest
    /// first.
    pub async fn read_history(
        &self,
        resource_type: &str,
        id: Option<&str>,
        options: &HistoryOptions,
    ) -> Result<Vec<HistoryEntry>> {
        self.require_table_type(resource_type)?;
        let mut conn = self.pool.acquire().await?;

        let shape = sql::HistoryQueryShape {
            by_id: id.is_some(),
            since: options.since.is_some(),
            cursor: options.cursor.is_some(),
            count: options.count.is_some(),
        };
        let sql = sql::build_history_select(&history_table(resource_type), shape);

        let mut query = sqlx::query(&sql);
        if let Some(id) = id {
            query = query.bind(parse_uuid(id)?);
        }
        if let Some(since) = options.since {
            query = query.bind(since);
        }
        if let Some(cursor) = options.cursor {
            query = query.bind(cursor);
        }
        if let Some(count) = options.count {
            query = query.bind(count);
        }

        let rows = query.fetch_all(&mut *conn).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let version_id: Uuid = row.try_get("versionId")?;
            let last_updated: DateTime<Utc> = row.try_get("lastUpdated")?;
            let content: String = row.try_get("content")?;
            let content = if content.is_empty() {
                JsonValue::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(&content)
                    .map_err(|e| Error::Internal(format!("Stored content is not JSON: {}", e)))?
            };
            entries.push(HistoryEntry {
                id: id.to_string(),
                version_id: version_id.to_string(),
                last_updated,
                content,
            });
        }
        Ok(entries)
    }

    /// Run a closure inside one transaction; bundles use this to batch
    /// entries. The transaction commits when the closure succeeds and rolls
    /// back otherwise.
    pub async fn run_in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Transaction<'static, Postgres>) -> BoxFuture<'c, Result<T>>,
    {
        let mut tx = self.pool.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    // ========================================================================
    // Transaction-scoped operations (bundle processing)
    // ========================================================================

    /// Transaction-scoped create.
    pub async fn create_in(
        &self,
        conn: &mut PgConnection,
        mut resource: JsonValue,
        context: &OperationContext,
        assigned_id: Option<Uuid>,
    ) -> Result<Resource> {
        let resource_type = resource_type_of(&resource)?;
        self.require_table_type(&resource_type)?;
        self.validate(&resource)?;

        let id = assigned_id.unwrap_or_else(Uuid::new_v4);
        let version_id = Uuid::new_v4();
        let now = Utc::now();
        stamp_meta(&mut resource, &id.to_string(), &version_id.to_string(), now);

        write_resource(
            conn,
            &self.registry,
            &resource,
            &resource_type,
            id,
            version_id,
            now,
            context,
        )
        .await?;

        Ok(Resource {
            id: id.to_string(),
            resource_type,
            version_id: version_id.to_string(),
            resource,
            last_updated: now,
            deleted: false,
        })
    }

    /// Transaction-scoped update. Creates the resource when it does not
    /// exist yet (PUT-as-upsert inside bundles). The boolean is `true` when
    /// the resource already existed.
    pub async fn update_in(
        &self,
        conn: &mut PgConnection,
        mut resource: JsonValue,
        context: &OperationContext,
    ) -> Result<(Resource, bool)> {
        let resource_type = resource_type_of(&resource)?;
        self.require_table_type(&resource_type)?;
        let id = resource
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("Update requires an id".into()))?
            .to_string();
        let id_uuid = parse_uuid(&id)?;
        self.validate(&resource)?;

        let existed = current_state(conn, &resource_type, &id, context)
            .await?
            .is_some();

        let version_id = Uuid::new_v4();
        let now = Utc::now();
        stamp_meta(&mut resource, &id, &version_id.to_string(), now);

        write_resource(
            conn,
            &self.registry,
            &resource,
            &resource_type,
            id_uuid,
            version_id,
            now,
            context,
        )
        .await?;

        Ok((
            Resource {
                id,
                resource_type,
                version_id: version_id.to_string(),
                resource,
                last_updated: now,
                deleted: false,
            },
            existed,
        ))
    }

    /// Transaction-scoped read.
    pub async fn read_in(
        &self,
        conn: &mut PgConnection,
        resource_type: &str,
        id: &str,
        context: &OperationContext,
    ) -> Result<Resource> {
        self.require_table_type(resource_type)?;
        read_resource(conn, resource_type, id, context).await
    }

    /// Transaction-scoped delete.
    pub async fn delete_in(
        &self,
        conn: &mut PgConnection,
        resource_type: &str,
        id: &str,
        context: &OperationContext,
    ) -> Result<String> {
        self.require_table_type(resource_type)?;
        let id_uuid = parse_uuid(id)?;
        let version_id = Uuid::new_v4();
        let now = Utc::now();

        delete_in_tx(
            conn,
            &self.registry,
            resource_type,
            id,
            id_uuid,
            version_id,
            now,
            context,
        )
        .await?;
        Ok(version_id.to_string())
    }
}

/// Commit on success, roll back on failure.
async fn finish(tx: Transaction<'static, Postgres>, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => {
            tx.commit().await?;
            Ok(())
        }
        Err(e) => {
            tx.rollback().await?;
            Err(e)
        }
    }
}

/// Sleep-and-retry bookkeeping for serialization failures. Returns the next
/// attempt number, or the error itself when it is not retryable.
async fn retry_or_fail(error: Error, attempt: u32) -> Result<u32> {
    if error.is_serialization_failure() && attempt < MAX_RETRIES {
        let delay = (RETRY_BASE_DELAY_MS << attempt).min(RETRY_MAX_DELAY_MS);
        tracing::warn!(
            attempt = attempt + 1,
            delay_ms = delay,
            "Serialization failure, retrying transaction"
        );
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(attempt + 1)
    } else {
        Err(error)
    }
}

// ============================================================================
// Internals shared by the transaction-scoped paths
// ============================================================================

fn resource_type_of(resource: &JsonValue) -> Result<String> {
    resource
        .get("resourceType")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::InvalidInput("Resource is missing resourceType".into()))
}

fn parse_uuid(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| Error::InvalidInput(format!("'{}' is not a UUID", id)))
}

pub(crate) fn history_table(resource_type: &str) -> String {
    format!("{}_History", resource_type)
}

pub(crate) fn references_table(resource_type: &str) -> String {
    format!("{}_References", resource_type)
}

struct CurrentState {
    version_id: Option<String>,
}

/// Latest state of one resource, honoring project scoping. `None` when the
/// row does not exist (or belongs to another project).
async fn current_state(
    conn: &mut PgConnection,
    resource_type: &str,
    id: &str,
    context: &OperationContext,
) -> Result<Option<CurrentState>> {
    let sql = sql::build_select_by_id(resource_type);
    let row = sqlx::query(&sql)
        .bind(parse_uuid(id)?)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let project_id: Option<Uuid> = row.try_get("projectId")?;
    if let Some(project) = context.project {
        if !context.super_admin && project_id != Some(project) {
            return Ok(None);
        }
    }

    let content: String = row.try_get("content")?;
    let version_id = serde_json::from_str::<JsonValue>(&content)
        .ok()
        .and_then(|r| {
            r.get("meta")
                .and_then(|m| m.get("versionId"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        });

    Ok(Some(CurrentState { version_id }))
}

async fn update_in_tx(
    conn: &mut PgConnection,
    registry: &Registry,
    resource: &JsonValue,
    resource_type: &str,
    id: Uuid,
    version_id: Uuid,
    now: DateTime<Utc>,
    context: &OperationContext,
    precondition_version: Option<&str>,
) -> Result<()> {
    let current = current_state(conn, resource_type, &id.to_string(), context).await?;
    let Some(current) = current else {
        return Err(Error::ResourceNotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        });
    };

    if let Some(expected) = precondition_version {
        if let Some(actual) = &current.version_id {
            if expected != actual {
                return Err(Error::VersionConflict {
                    expected: expected.to_string(),
                    actual: actual.clone(),
                });
            }
        }
    }

    write_resource(
        conn,
        registry,
        resource,
        resource_type,
        id,
        version_id,
        now,
        context,
    )
    .await
}

async fn delete_in_tx(
    conn: &mut PgConnection,
    registry: &Registry,
    resource_type: &str,
    id: &str,
    id_uuid: Uuid,
    version_id: Uuid,
    now: DateTime<Utc>,
    context: &OperationContext,
) -> Result<()> {
    let current = current_state(conn, resource_type, id, context).await?;
    if current.is_none() {
        return Err(Error::ResourceNotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        });
    }

    delete_resource(conn, registry, resource_type, id_uuid, version_id, now).await
}

async fn read_resource(
    conn: &mut PgConnection,
    resource_type: &str,
    id: &str,
    context: &OperationContext,
) -> Result<Resource> {
    let sql = sql::build_select_by_id(resource_type);
    let row = sqlx::query(&sql)
        .bind(parse_uuid(id)?)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Err(Error::ResourceNotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        });
    };

    let project_id: Option<Uuid> = row.try_get("projectId")?;
    if let Some(project) = context.project {
        if !context.super_admin && project_id != Some(project) {
            return Err(Error::ResourceNotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            });
        }
    }

    let deleted: bool = row.try_get("deleted")?;
    if deleted {
        // Latest tombstone version for the ETag
        let version_sql = format!(
            "SELECT \"versionId\" FROM \"{}\" WHERE \"id\" = $1 ORDER BY \"lastUpdated\" DESC LIMIT 1",
            history_table(resource_type)
        );
        let version_id: Option<Uuid> = sqlx::query_scalar(&version_sql)
            .bind(parse_uuid(id)?)
            .fetch_optional(&mut *conn)
            .await?;
        return Err(Error::ResourceGone {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            version_id: version_id.map(|v| v.to_string()),
        });
    }

    let content: String = row.try_get("content")?;
    let resource: JsonValue = serde_json::from_str(&content)
        .map_err(|e| Error::Internal(format!("Stored content is not JSON: {}", e)))?;
    Ok(resource_from_json(resource_type, id, resource))
}

fn resource_from_json(resource_type: &str, id: &str, resource: JsonValue) -> Resource {
    let version_id = resource
        .get("meta")
        .and_then(|m| m.get("versionId"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let last_updated = resource
        .get("meta")
        .and_then(|m| m.get("lastUpdated"))
        .and_then(|v| v.as_str())
        .and_then(indexing::extract::parse_fhir_datetime)
        .unwrap_or_else(Utc::now);

    Resource {
        id: id.to_string(),
        resource_type: resource_type.to_string(),
        version_id,
        resource,
        last_updated,
        deleted: false,
    }
}

/// The single-operation write ordering: main upsert, history insert,
/// reference refresh, lookup refresh. Callers hold the transaction.
async fn write_resource(
    conn: &mut PgConnection,
    registry: &Registry,
    resource: &JsonValue,
    resource_type: &str,
    id: Uuid,
    version_id: Uuid,
    now: DateTime<Utc>,
    context: &OperationContext,
) -> Result<()> {
    let impls = registry.search_params.for_type(resource_type);

    let row = indexing::build_row(resource, resource_type, &impls, context, now)?;
    upsert_main_row(conn, resource_type, &row).await?;

    let history = indexing::build_history_row(resource, id, version_id, now)?;
    insert_history_row(conn, resource_type, &history.content, id, version_id, now).await?;

    refresh_references(
        conn,
        resource_type,
        id,
        build_references(resource, id, &impls),
    )
    .await?;

    refresh_lookup_rows(
        conn,
        resource_type,
        id,
        build_lookup_rows(resource, resource_type, id, &impls),
    )
    .await?;

    tracing::debug!(
        resource_type,
        id = %id,
        version_id = %version_id,
        "Resource written"
    );
    Ok(())
}

/// Soft delete: cleared content, `deleted = true`, no search values, a
/// tombstone history row, and no remaining reference or lookup rows.
async fn delete_resource(
    conn: &mut PgConnection,
    registry: &Registry,
    resource_type: &str,
    id: Uuid,
    version_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    let impls = registry.search_params.for_type(resource_type);

    let search_values: Vec<SearchColumnValue> = impls
        .iter()
        .filter(|impl_| {
            matches!(
                impl_.strategy,
                cuprum_registry::Strategy::Column | cuprum_registry::Strategy::TokenColumn
            )
        })
        .map(|impl_| SearchColumnValue {
            name: impl_.column_name.clone(),
            column_type: impl_.column_type,
            array: impl_.array,
            value: None,
        })
        .collect();

    let row = MainRow {
        id,
        content: String::new(),
        last_updated: now,
        deleted: true,
        project_id: None,
        version: DELETED_SCHEMA_VERSION,
        compartments: Vec::new(),
        source: None,
        profile: Vec::new(),
        search_values,
    };
    upsert_main_row(conn, resource_type, &row).await?;

    insert_history_row(conn, resource_type, "", id, version_id, now).await?;

    let delete_refs = sql::build_delete_references(&references_table(resource_type));
    sqlx::query(&delete_refs)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    for table in ["HumanName", "Address", "ContactPoint", "Identifier"] {
        let delete_lookup = sql::build_delete_lookup_rows(table);
        sqlx::query(&delete_lookup)
            .bind(id)
            .bind(resource_type)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

async fn upsert_main_row(
    conn: &mut PgConnection,
    resource_type: &str,
    row: &MainRow,
) -> Result<()> {
    let has_compartments = resource_type != "Binary";

    let mut columns: Vec<String> = vec![
        "id".into(),
        "content".into(),
        "lastUpdated".into(),
        "deleted".into(),
        "projectId".into(),
        "__version".into(),
    ];
    if has_compartments {
        columns.push("compartments".into());
    }
    columns.push("_source".into());
    columns.push("_profile".into());
    for sv in &row.search_values {
        columns.push(sv.name.clone());
    }

    let sql = sql::build_upsert(resource_type, &columns);
    let mut query = sqlx::query(&sql)
        .bind(row.id)
        .bind(row.content.clone())
        .bind(row.last_updated)
        .bind(row.deleted)
        .bind(row.project_id)
        .bind(row.version);
    if has_compartments {
        query = query.bind(row.compartments.clone());
    }
    query = query.bind(row.source.clone()).bind(row.profile.clone());
    for sv in &row.search_values {
        query = bind_search_value(query, sv);
    }

    query.execute(&mut *conn).await?;
    Ok(())
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

fn bind_search_value<'q>(query: PgQuery<'q>, sv: &SearchColumnValue) -> PgQuery<'q> {
    match &sv.value {
        Some(ColumnValue::Text(v)) => query.bind(v.clone()),
        Some(ColumnValue::TextArray(v)) => query.bind(v.clone()),
        Some(ColumnValue::Boolean(v)) => query.bind(*v),
        Some(ColumnValue::Timestamp(v)) => query.bind(*v),
        Some(ColumnValue::Date(v)) => query.bind(*v),
        Some(ColumnValue::Numeric(v)) => query.bind(*v),
        Some(ColumnValue::Double(v)) => query.bind(*v),
        None => match (sv.column_type, sv.array) {
            (ColumnType::Text, true) => query.bind(Option::<Vec<String>>::None),
            (ColumnType::Text, false) => query.bind(Option::<String>::None),
            (ColumnType::Timestamptz, _) => query.bind(Option::<DateTime<Utc>>::None),
            (ColumnType::Date, _) => query.bind(Option::<chrono::NaiveDate>::None),
            (ColumnType::Numeric, _) => query.bind(Option::<rust_decimal::Decimal>::None),
            (ColumnType::DoublePrecision, _) => query.bind(Option::<f64>::None),
            (ColumnType::Boolean, _) => query.bind(Option::<bool>::None),
            (ColumnType::Uuid, _) => query.bind(Option::<Uuid>::None),
        },
    }
}

async fn insert_history_row(
    conn: &mut PgConnection,
    resource_type: &str,
    content: &str,
    id: Uuid,
    version_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    let columns: Vec<String> = vec![
        "id".into(),
        "versionId".into(),
        "lastUpdated".into(),
        "content".into(),
    ];
    let sql = sql::build_insert(&history_table(resource_type), &columns);
    sqlx::query(&sql)
        .bind(id)
        .bind(version_id)
        .bind(now)
        .bind(content.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn refresh_references(
    conn: &mut PgConnection,
    resource_type: &str,
    id: Uuid,
    rows: Vec<indexing::ReferenceRow>,
) -> Result<()> {
    let table = references_table(resource_type);
    let delete = sql::build_delete_references(&table);
    sqlx::query(&delete).bind(id).execute(&mut *conn).await?;

    let columns: Vec<String> = vec!["resourceId".into(), "targetId".into(), "code".into()];
    let insert = sql::build_insert(&table, &columns);
    for row in rows {
        sqlx::query(&insert)
            .bind(row.resource_id)
            .bind(row.target_id)
            .bind(row.code)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn refresh_lookup_rows(
    conn: &mut PgConnection,
    resource_type: &str,
    id: Uuid,
    rows: Vec<LookupRow>,
) -> Result<()> {
    for table in ["HumanName", "Address", "ContactPoint", "Identifier"] {
        let delete = sql::build_delete_lookup_rows(table);
        sqlx::query(&delete)
            .bind(id)
            .bind(resource_type)
            .execute(&mut *conn)
            .await?;
    }

    for row in rows {
        match row {
            LookupRow::HumanName {
                resource_id,
                resource_type,
                name,
                given,
                family,
            } => {
                let columns: Vec<String> = vec![
                    "resourceId".into(),
                    "resourceType".into(),
                    "name".into(),
                    "given".into(),
                    "family".into(),
                ];
                let insert = sql::build_insert("HumanName", &columns);
                sqlx::query(&insert)
                    .bind(resource_id)
                    .bind(resource_type)
                    .bind(name)
                    .bind(given)
                    .bind(family)
                    .execute(&mut *conn)
                    .await?;
            }
            LookupRow::Address {
                resource_id,
                resource_type,
                address,
                city,
                country,
                postal_code,
                state,
                use_,
            } => {
                let columns: Vec<String> = vec![
                    "resourceId".into(),
                    "resourceType".into(),
                    "address".into(),
                    "city".into(),
                    "country".into(),
                    "postalCode".into(),
                    "state".into(),
                    "use".into(),
                ];
                let insert = sql::build_insert("Address", &columns);
                sqlx::query(&insert)
                    .bind(resource_id)
                    .bind(resource_type)
                    .bind(address)
                    .bind(city)
                    .bind(country)
                    .bind(postal_code)
                    .bind(state)
                    .bind(use_)
                    .execute(&mut *conn)
                    .await?;
            }
            LookupRow::ContactPoint {
                resource_id,
                resource_type,
                system,
                value,
            } => {
                let columns: Vec<String> = vec![
                    "resourceId".into(),
                    "resourceType".into(),
                    "system".into(),
                    "value".into(),
                ];
                let insert = sql::build_insert("ContactPoint", &columns);
                sqlx::query(&insert)
                    .bind(resource_id)
                    .bind(resource_type)
                    .bind(system)
                    .bind(value)
                    .execute(&mut *conn)
                    .await?;
            }
            LookupRow::Identifier {
                resource_id,
                resource_type,
                system,
                value,
            } => {
                let columns: Vec<String> = vec![
                    "resourceId".into(),
                    "resourceType".into(),
                    "system".into(),
                    "value".into(),
                ];
                let insert = sql::build_insert("Identifier", &columns);
                sqlx::query(&insert)
                    .bind(resource_id)
                    .bind(resource_type)
                    .bind(system)
                    .bind(value)
                    .execute(&mut *conn)
                    .await?;
            }
        }
    }
    Ok(())
}
