//! Versioned schema migrations
//!
//! A small up/down migration runner backed by the `_migrations` tracking
//! table. Migrations carry plain SQL statements executed sequentially; a
//! migration is atomic only as far as its own statements are. The
//! generated per-resource-type schema is applied separately at boot.

use sqlx::PgPool;

use crate::{Error, Result};

/// One versioned migration
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up: &'static [&'static str],
    pub down: &'static [&'static str],
}

/// Built-in migrations: extensions and the four global lookup tables.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "trigram extension",
        up: &["CREATE EXTENSION IF NOT EXISTS pg_trgm"],
        down: &["DROP EXTENSION IF EXISTS pg_trgm"],
    },
    Migration {
        version: 2,
        description: "global lookup tables",
        up: &[
            "CREATE TABLE IF NOT EXISTS \"HumanName\" (\"resourceId\" UUID NOT NULL, \"resourceType\" TEXT NOT NULL, \"name\" TEXT, \"given\" TEXT, \"family\" TEXT)",
            "CREATE INDEX IF NOT EXISTS \"HumanName_resourceId_idx\" ON \"HumanName\" USING btree (\"resourceId\")",
            "CREATE TABLE IF NOT EXISTS \"Address\" (\"resourceId\" UUID NOT NULL, \"resourceType\" TEXT NOT NULL, \"address\" TEXT, \"city\" TEXT, \"country\" TEXT, \"postalCode\" TEXT, \"state\" TEXT, \"use\" TEXT)",
            "CREATE INDEX IF NOT EXISTS \"Address_resourceId_idx\" ON \"Address\" USING btree (\"resourceId\")",
            "CREATE TABLE IF NOT EXISTS \"ContactPoint\" (\"resourceId\" UUID NOT NULL, \"resourceType\" TEXT NOT NULL, \"system\" TEXT, \"value\" TEXT)",
            "CREATE INDEX IF NOT EXISTS \"ContactPoint_resourceId_idx\" ON \"ContactPoint\" USING btree (\"resourceId\")",
            "CREATE TABLE IF NOT EXISTS \"Identifier\" (\"resourceId\" UUID NOT NULL, \"resourceType\" TEXT NOT NULL, \"system\" TEXT, \"value\" TEXT)",
            "CREATE INDEX IF NOT EXISTS \"Identifier_resourceId_idx\" ON \"Identifier\" USING btree (\"resourceId\")",
        ],
        down: &[
            "DROP TABLE IF EXISTS \"Identifier\"",
            "DROP TABLE IF EXISTS \"ContactPoint\"",
            "DROP TABLE IF EXISTS \"Address\"",
            "DROP TABLE IF EXISTS \"HumanName\"",
        ],
    },
];

/// Migration status report
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Highest applied version (0 when none)
    pub current: i32,
    pub applied: Vec<i32>,
    pub available: Vec<i32>,
    pub pending: Vec<i32>,
}

/// Migrations to apply: `version > current` and `version <= target`,
/// ascending.
fn pending_migrations(migrations: &[Migration], current: i32, target: Option<i32>) -> Vec<&Migration> {
    let mut pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| m.version > current && target.map(|t| m.version <= t).unwrap_or(true))
        .collect();
    pending.sort_by_key(|m| m.version);
    pending
}

/// Applied migrations to revert: `version > target`, descending.
fn revertible_migrations<'a>(
    migrations: &'a [Migration],
    applied: &[i32],
    target: i32,
) -> Vec<&'a Migration> {
    let mut to_revert: Vec<&Migration> = migrations
        .iter()
        .filter(|m| m.version > target && applied.contains(&m.version))
        .collect();
    to_revert.sort_by_key(|m| std::cmp::Reverse(m.version));
    to_revert
}

/// Runs versioned migrations against the pool.
pub struct MigrationRunner {
    pool: PgPool,
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            migrations: MIGRATIONS.to_vec(),
        }
    }

    /// Runner over a custom migration list (tests).
    pub fn with_migrations(pool: PgPool, migrations: Vec<Migration>) -> Self {
        Self { pool, migrations }
    }

    async fn ensure_tracking_table(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS \"_migrations\" (\
             \"version\" INTEGER PRIMARY KEY, \
             \"description\" TEXT, \
             \"applied_at\" TIMESTAMPTZ DEFAULT NOW())",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn applied_versions(&self) -> Result<Vec<i32>> {
        let rows: Vec<(i32,)> =
            sqlx::query_as("SELECT \"version\" FROM \"_migrations\" ORDER BY \"version\"")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    /// Apply every pending migration with `version <= target` (all when
    /// target is None), ascending. Stops on the first failure.
    pub async fn up(&self, target: Option<i32>) -> Result<Vec<i32>> {
        self.ensure_tracking_table().await?;
        let applied = self.applied_versions().await?;
        let current = applied.iter().copied().max().unwrap_or(0);

        let mut newly_applied = Vec::new();
        for migration in pending_migrations(&self.migrations, current, target) {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "Applying migration"
            );
            for (idx, statement) in migration.up.iter().enumerate() {
                sqlx::query(statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        Error::Internal(format!(
                            "Migration {} failed at statement {}: {}",
                            migration.version, idx, e
                        ))
                    })?;
            }
            sqlx::query(
                "INSERT INTO \"_migrations\" (\"version\", \"description\") VALUES ($1, $2)",
            )
            .bind(migration.version)
            .bind(migration.description)
            .execute(&self.pool)
            .await?;
            newly_applied.push(migration.version);
        }

        Ok(newly_applied)
    }

    /// Revert applied migrations with `version > target`, descending.
    pub async fn down(&self, target: i32) -> Result<Vec<i32>> {
        self.ensure_tracking_table().await?;
        let applied = self.applied_versions().await?;

        let mut reverted = Vec::new();
        for migration in revertible_migrations(&self.migrations, &applied, target) {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "Reverting migration"
            );
            for (idx, statement) in migration.down.iter().enumerate() {
                sqlx::query(statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        Error::Internal(format!(
                            "Migration {} revert failed at statement {}: {}",
                            migration.version, idx, e
                        ))
                    })?;
            }
            sqlx::query("DELETE FROM \"_migrations\" WHERE \"version\" = $1")
                .bind(migration.version)
                .execute(&self.pool)
                .await?;
            reverted.push(migration.version);
        }

        Ok(reverted)
    }

    pub async fn status(&self) -> Result<MigrationStatus> {
        self.ensure_tracking_table().await?;
        let applied = self.applied_versions().await?;
        let available: Vec<i32> = self.migrations.iter().map(|m| m.version).collect();
        let pending: Vec<i32> = available
            .iter()
            .copied()
            .filter(|v| !applied.contains(v))
            .collect();

        Ok(MigrationStatus {
            current: applied.iter().copied().max().unwrap_or(0),
            applied,
            available,
            pending,
        })
    }
}
