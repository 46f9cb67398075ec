//! Application state
//!
//! Boot order: pool, migrations, registries (seed + definitions
//! directory), schema generation and application, then the repository and
//! search engine. Registries freeze behind an Arc once boot completes.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use cuprum_registry::Registry;

use crate::config::Config;
use crate::conformance;
use crate::db::search::SearchEngine;
use crate::db::{create_pool, MigrationRunner, Repository};
use crate::schema::{build_schema, generate_ddl, SchemaDefinition};
use crate::services::validation::StructuralValidator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub registry: Arc<Registry>,
    pub schema: Arc<SchemaDefinition>,
    pub repository: Repository,
    pub search: SearchEngine,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = create_pool(&config.database)
            .await
            .context("Failed to connect to the database")?;

        let applied = MigrationRunner::new(pool.clone())
            .up(None)
            .await
            .context("Failed to run migrations")?;
        if !applied.is_empty() {
            tracing::info!(versions = ?applied, "Applied migrations");
        }

        let registry = Arc::new(boot_registry(&config)?);
        tracing::info!(
            resource_types = registry.table_resource_types().len(),
            search_params = registry.search_params.len(),
            "Registries loaded"
        );

        let schema = Arc::new(build_schema(&registry));
        apply_schema(&pool, &schema)
            .await
            .context("Failed to apply generated schema")?;

        let repository = Repository::new(
            pool.clone(),
            registry.clone(),
            Arc::new(StructuralValidator),
        );
        let search = SearchEngine::new(pool.clone(), registry.clone(), config.fhir.base_url.clone());

        Ok(Self {
            config: Arc::new(config),
            pool,
            registry,
            schema,
            repository,
            search,
        })
    }
}

/// Build the boot registry: base definitions first, then whatever the
/// definitions directory adds (later entries win).
fn boot_registry(config: &Config) -> anyhow::Result<Registry> {
    let mut registry = Registry::new();
    conformance::seed_registry(&mut registry).context("Failed to seed base definitions")?;

    let dir = Path::new(&config.fhir.definitions_dir);
    if dir.is_dir() {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        paths.sort();

        for path in paths {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let value: JsonValue = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            index_definition(&mut registry, &value);
        }
    } else {
        tracing::debug!(
            dir = %dir.display(),
            "No definitions directory; using base definitions only"
        );
    }

    Ok(registry)
}

/// Index a definition file: a Bundle indexes every entry resource, a bare
/// StructureDefinition / SearchParameter indexes itself. Unknown resource
/// types are skipped.
fn index_definition(registry: &mut Registry, value: &JsonValue) {
    match value.get("resourceType").and_then(|v| v.as_str()) {
        Some("Bundle") => {
            if let Some(entries) = value.get("entry").and_then(|v| v.as_array()) {
                for entry in entries {
                    if let Some(resource) = entry.get("resource") {
                        index_definition(registry, resource);
                    }
                }
            }
        }
        Some("StructureDefinition") => {
            if let Err(e) = registry.index_profile(value) {
                tracing::warn!("Skipping StructureDefinition: {}", e);
            }
        }
        Some("SearchParameter") => {
            if let Err(e) = registry.index_search_parameter(value) {
                tracing::warn!("Skipping SearchParameter: {}", e);
            }
        }
        _ => {}
    }
}

/// Execute the generated DDL; every statement is idempotent.
async fn apply_schema(pool: &PgPool, schema: &SchemaDefinition) -> anyhow::Result<()> {
    let statements = generate_ddl(schema);
    let count = statements.len();
    for statement in statements {
        sqlx::query(&statement)
            .execute(pool)
            .await
            .with_context(|| format!("DDL failed: {}", statement))?;
    }
    tracing::info!(statements = count, "Schema applied");
    Ok(())
}
