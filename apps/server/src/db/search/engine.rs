//! Search execution engine
//!
//! Runs the compiled query, materializes `_include` / `_revinclude`
//! (including `:iterate` and the wildcard) with a `(type, id)` seen-set,
//! and packages the results into a searchset Bundle with `self` and
//! `next` links.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Map, Value as JsonValue};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use cuprum_registry::Registry;

use crate::models::OperationContext;
use crate::services::indexing::extract::extract_raw_values;
use crate::services::indexing::references::parse_reference;
use crate::{Error, Result};

use super::params::{SearchRequest, TotalMode};
use super::query_builder::{BindValue, QueryBuilder};

/// The search engine
#[derive(Clone)]
pub struct SearchEngine {
    pool: PgPool,
    registry: Arc<Registry>,
    base_url: String,
}

impl SearchEngine {
    pub fn new(pool: PgPool, registry: Arc<Registry>, base_url: String) -> Self {
        Self {
            pool,
            registry,
            base_url,
        }
    }

    /// Execute a search request and return the searchset Bundle.
    pub async fn search(
        &self,
        request: &SearchRequest,
        context: &OperationContext,
    ) -> Result<JsonValue> {
        let builder = QueryBuilder::new(&self.registry, request, context);

        if request.summary_count {
            let total = self.execute_count(&builder).await?;
            return Ok(json!({
                "resourceType": "Bundle",
                "type": "searchset",
                "total": total,
            }));
        }

        let matches = self.execute_primary(&builder).await?;

        let total = match request.total {
            TotalMode::None => None,
            TotalMode::Accurate => Some(self.execute_count(&builder).await?),
            TotalMode::Estimate => Some(self.execute_estimate(request, &builder).await?),
        };

        let includes = self.resolve_includes(request, &matches).await?;

        Ok(self.assemble_bundle(request, matches, includes, total))
    }

    async fn execute_primary(&self, builder: &QueryBuilder<'_>) -> Result<Vec<JsonValue>> {
        let (sql, values) = builder.build_sql()?;
        let rows = bind_values(sqlx::query(&sql), values)
            .fetch_all(&self.pool)
            .await?;

        let mut resources = Vec::with_capacity(rows.len());
        for row in rows {
            let content: String = row.try_get("content")?;
            let resource: JsonValue = serde_json::from_str(&content)
                .map_err(|e| Error::Internal(format!("Stored content is not JSON: {}", e)))?;
            resources.push(resource);
        }
        Ok(resources)
    }

    async fn execute_count(&self, builder: &QueryBuilder<'_>) -> Result<i64> {
        let (sql, values) = builder.build_count_sql()?;
        let total: i64 = bind_values_scalar(sqlx::query_scalar(&sql), values)
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    /// `_total=estimate`: planner row estimate for unfiltered searches,
    /// accurate count otherwise.
    async fn execute_estimate(
        &self,
        request: &SearchRequest,
        builder: &QueryBuilder<'_>,
    ) -> Result<i64> {
        if builder.is_unfiltered() {
            let estimate: Option<i64> = sqlx::query_scalar(
                "SELECT reltuples::bigint FROM pg_class WHERE relname = $1",
            )
            .bind(&request.resource_type)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(estimate) = estimate {
                if estimate >= 0 {
                    return Ok(estimate);
                }
            }
        }
        self.execute_count(builder).await
    }

    // ========================================================================
    // Includes
    // ========================================================================

    /// Resolve `_include` / `_revinclude`. Non-iterating specs run once over
    /// the primary matches; `:iterate` specs run again over each batch of
    /// newly loaded resources until the seen-set stops growing.
    async fn resolve_includes(
        &self,
        request: &SearchRequest,
        matches: &[JsonValue],
    ) -> Result<Vec<JsonValue>> {
        if request.include.is_empty() && request.revinclude.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen: HashSet<(String, String)> = matches.iter().filter_map(identity_of).collect();
        let mut included = Vec::new();
        let mut frontier: Vec<JsonValue> = matches.to_vec();
        let mut first_pass = true;

        while !frontier.is_empty() {
            let mut loaded = Vec::new();

            for spec in &request.include {
                if !first_pass && !spec.iterate {
                    continue;
                }
                loaded.extend(self.resolve_include_pass(spec, &frontier).await?);
            }
            for spec in &request.revinclude {
                if !first_pass && !spec.iterate {
                    continue;
                }
                loaded.extend(self.resolve_revinclude_pass(spec, &frontier).await?);
            }

            // The seen-set keeps cyclic include graphs finite
            let mut next_frontier = Vec::new();
            for resource in loaded {
                let Some(identity) = identity_of(&resource) else {
                    continue;
                };
                if seen.insert(identity) {
                    included.push(resource.clone());
                    next_frontier.push(resource);
                }
            }

            frontier = next_frontier;
            first_pass = false;
        }

        Ok(included)
    }

    /// One `_include` pass: collect reference targets from the frontier
    /// resources, group by type, and load each group.
    async fn resolve_include_pass(
        &self,
        spec: &super::params::IncludeParam,
        frontier: &[JsonValue],
    ) -> Result<Vec<JsonValue>> {
        let mut ids_by_type: HashMap<String, Vec<Uuid>> = HashMap::new();

        for resource in frontier {
            let resource_type = resource
                .get("resourceType")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            let references = if spec.wildcard {
                collect_all_references(resource)
            } else {
                if resource_type != spec.source_type {
                    continue;
                }
                let Some(impl_) = self.registry.search_params.get(resource_type, &spec.param)
                else {
                    continue;
                };
                let values = extract_raw_values(resource, &impl_.expression).unwrap_or_default();
                values
                    .iter()
                    .filter_map(|v| match v {
                        JsonValue::Object(obj) => obj
                            .get("reference")
                            .and_then(|r| r.as_str())
                            .map(|s| s.to_string()),
                        JsonValue::String(s) => Some(s.clone()),
                        _ => None,
                    })
                    .collect()
            };

            for reference in references {
                let Some(parsed) = parse_reference(&reference) else {
                    continue;
                };
                if let Some(target_type) = &spec.target_type {
                    if &parsed.target_type != target_type {
                        continue;
                    }
                }
                let Ok(uuid) = Uuid::parse_str(&parsed.target_id) else {
                    continue;
                };
                ids_by_type.entry(parsed.target_type).or_default().push(uuid);
            }
        }

        let mut loaded = Vec::new();
        for (target_type, ids) in ids_by_type {
            // Only registry table types are loadable
            let known = self
                .registry
                .profiles
                .get(&target_type)
                .map(|p| p.is_table_resource())
                .unwrap_or(false);
            if !known {
                continue;
            }
            loaded.extend(self.load_by_ids(&target_type, &ids).await?);
        }
        Ok(loaded)
    }

    /// One `_revinclude` pass: load sources whose reference rows point at
    /// frontier resources.
    async fn resolve_revinclude_pass(
        &self,
        spec: &super::params::IncludeParam,
        frontier: &[JsonValue],
    ) -> Result<Vec<JsonValue>> {
        if spec.wildcard || spec.source_type.is_empty() {
            return Ok(Vec::new());
        }
        let known = self
            .registry
            .profiles
            .get(&spec.source_type)
            .map(|p| p.is_table_resource())
            .unwrap_or(false);
        if !known {
            return Ok(Vec::new());
        }

        let target_ids: Vec<String> = frontier
            .iter()
            .filter(|resource| match &spec.target_type {
                Some(target_type) => resource
                    .get("resourceType")
                    .and_then(|v| v.as_str())
                    .map(|rt| rt == target_type)
                    .unwrap_or(false),
                None => true,
            })
            .filter_map(|resource| resource.get("id").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .collect();
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT s.\"content\" FROM \"{}\" s \
             JOIN \"{}_References\" r ON r.\"resourceId\" = s.\"id\" \
             WHERE r.\"code\" = $1 AND r.\"targetId\" = ANY($2) AND s.\"deleted\" = false",
            spec.source_type, spec.source_type
        );
        let rows = sqlx::query(&sql)
            .bind(&spec.param)
            .bind(target_ids)
            .fetch_all(&self.pool)
            .await?;

        let mut loaded = Vec::new();
        for row in rows {
            let content: String = row.try_get("content")?;
            let resource: JsonValue = serde_json::from_str(&content)
                .map_err(|e| Error::Internal(format!("Stored content is not JSON: {}", e)))?;
            loaded.push(resource);
        }
        Ok(loaded)
    }

    async fn load_by_ids(&self, resource_type: &str, ids: &[Uuid]) -> Result<Vec<JsonValue>> {
        let sql = format!(
            "SELECT \"content\" FROM \"{}\" WHERE \"id\" = ANY($1) AND \"deleted\" = false",
            resource_type
        );
        let rows = sqlx::query(&sql)
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;

        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            let content: String = row.try_get("content")?;
            let resource: JsonValue = serde_json::from_str(&content)
                .map_err(|e| Error::Internal(format!("Stored content is not JSON: {}", e)))?;
            loaded.push(resource);
        }
        Ok(loaded)
    }

    // ========================================================================
    // Bundle assembly
    // ========================================================================

    fn assemble_bundle(
        &self,
        request: &SearchRequest,
        matches: Vec<JsonValue>,
        includes: Vec<JsonValue>,
        total: Option<i64>,
    ) -> JsonValue {
        let page_full = matches.len() == request.count;

        let mut entries = Vec::with_capacity(matches.len() + includes.len());
        for resource in matches {
            let resource = mask_elements(resource, &request.elements);
            entries.push(json!({
                "fullUrl": self.full_url(&resource),
                "resource": resource,
                "search": { "mode": "match" }
            }));
        }
        for resource in includes {
            entries.push(json!({
                "fullUrl": self.full_url(&resource),
                "resource": resource,
                "search": { "mode": "include" }
            }));
        }

        let mut links = vec![json!({
            "relation": "self",
            "url": self.page_url(request, &request.query_string),
        })];
        // A full page implies a next page
        if page_full {
            let next_query =
                set_offset(&request.query_string, request.offset + request.count);
            links.push(json!({
                "relation": "next",
                "url": self.page_url(request, &next_query),
            }));
        }

        let mut bundle = Map::new();
        bundle.insert("resourceType".to_string(), json!("Bundle"));
        bundle.insert("type".to_string(), json!("searchset"));
        if let Some(total) = total {
            bundle.insert("total".to_string(), json!(total));
        }
        bundle.insert("link".to_string(), json!(links));
        bundle.insert("entry".to_string(), json!(entries));
        JsonValue::Object(bundle)
    }

    fn full_url(&self, resource: &JsonValue) -> String {
        let resource_type = resource
            .get("resourceType")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let id = resource.get("id").and_then(|v| v.as_str()).unwrap_or_default();
        format!("{}/{}/{}", self.base_url, resource_type, id)
    }

    fn page_url(&self, request: &SearchRequest, query: &str) -> String {
        if query.is_empty() {
            format!("{}/{}", self.base_url, request.resource_type)
        } else {
            format!("{}/{}?{}", self.base_url, request.resource_type, query)
        }
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;
type PgQueryScalar<'q, O> = sqlx::query::QueryScalar<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>;

fn bind_values(mut query: PgQuery<'_>, values: Vec<BindValue>) -> PgQuery<'_> {
    for value in values {
        query = match value {
            BindValue::Text(v) => query.bind(v),
            BindValue::TextArray(v) => query.bind(v),
            BindValue::Int(v) => query.bind(v),
            BindValue::Double(v) => query.bind(v),
            BindValue::Numeric(v) => query.bind(v),
            BindValue::Uuid(v) => query.bind(v),
            BindValue::UuidArray(v) => query.bind(v),
            BindValue::Timestamp(v) => query.bind(v),
            BindValue::Date(v) => query.bind(v),
        };
    }
    query
}

fn bind_values_scalar<O>(mut query: PgQueryScalar<'_, O>, values: Vec<BindValue>) -> PgQueryScalar<'_, O> {
    for value in values {
        query = match value {
            BindValue::Text(v) => query.bind(v),
            BindValue::TextArray(v) => query.bind(v),
            BindValue::Int(v) => query.bind(v),
            BindValue::Double(v) => query.bind(v),
            BindValue::Numeric(v) => query.bind(v),
            BindValue::Uuid(v) => query.bind(v),
            BindValue::UuidArray(v) => query.bind(v),
            BindValue::Timestamp(v) => query.bind(v),
            BindValue::Date(v) => query.bind(v),
        };
    }
    query
}

fn identity_of(resource: &JsonValue) -> Option<(String, String)> {
    let resource_type = resource.get("resourceType")?.as_str()?.to_string();
    let id = resource.get("id")?.as_str()?.to_string();
    Some((resource_type, id))
}

/// Walk an entire resource for `.reference` string fields; `#` fragments
/// and `urn:` references are skipped by the parser downstream.
fn collect_all_references(value: &JsonValue) -> Vec<String> {
    let mut references = Vec::new();
    collect_references_into(value, &mut references);
    references
}

fn collect_references_into(value: &JsonValue, output: &mut Vec<String>) {
    match value {
        JsonValue::Object(obj) => {
            for (key, child) in obj {
                if key == "reference" {
                    if let JsonValue::String(reference) = child {
                        output.push(reference.clone());
                        continue;
                    }
                }
                collect_references_into(child, output);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                collect_references_into(item, output);
            }
        }
        _ => {}
    }
}

/// `_elements` masks top-level elements; `resourceType`, `id`, and `meta`
/// always survive.
fn mask_elements(resource: JsonValue, elements: &[String]) -> JsonValue {
    if elements.is_empty() {
        return resource;
    }
    let JsonValue::Object(obj) = resource else {
        return resource;
    };

    let kept: Map<String, JsonValue> = obj
        .into_iter()
        .filter(|(key, _)| {
            key == "resourceType"
                || key == "id"
                || key == "meta"
                || elements.iter().any(|e| e == key)
        })
        .collect();
    JsonValue::Object(kept)
}

/// Replace (or add) `_offset` in a query string; used for the `next` link.
fn set_offset(query: &str, offset: usize) -> String {
    let mut parts: Vec<String> = query
        .split('&')
        .filter(|p| !p.is_empty() && !p.starts_with("_offset="))
        .map(|p| p.to_string())
        .collect();
    parts.push(format!("_offset={}", offset));
    parts.join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_offset_replaces_existing() {
        assert_eq!(set_offset("gender=male", 20), "gender=male&_offset=20");
        assert_eq!(
            set_offset("gender=male&_offset=20", 40),
            "gender=male&_offset=40"
        );
        assert_eq!(set_offset("", 20), "_offset=20");
    }

    #[test]
    fn mask_elements_keeps_mandatory_fields() {
        let resource = json!({
            "resourceType": "Patient",
            "id": "x",
            "meta": { "versionId": "v" },
            "name": [{ "family": "Smith" }],
            "gender": "male"
        });
        let masked = mask_elements(resource, &["name".to_string()]);
        assert!(masked.get("name").is_some());
        assert!(masked.get("resourceType").is_some());
        assert!(masked.get("meta").is_some());
        assert!(masked.get("gender").is_none());
    }

    #[test]
    fn collects_nested_references() {
        let resource = json!({
            "resourceType": "Observation",
            "subject": { "reference": "Patient/a" },
            "performer": [
                { "reference": "Practitioner/b" },
                { "reference": "#contained" }
            ]
        });
        let refs = collect_all_references(&resource);
        assert_eq!(refs.len(), 3);
        assert!(refs.contains(&"Patient/a".to_string()));
    }
}
