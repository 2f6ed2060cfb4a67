//! Forward-only catalog migrations
//!
//! Each step runs in its own transaction together with its ledger insert. The
//! transaction first takes a database-wide advisory lock and then re-checks the
//! ledger, so concurrent bootstraps of the same database apply every step
//! exactly once. Step statements are themselves idempotent.

use sqlx::PgPool;
use tracing::{debug, info};

use crate::catalog::CatalogTables;
use crate::error::{Result, TableStoreError};

/// Built-in physical types seeded by the first step: (name, backend type)
pub const BUILTIN_TYPES: [(&str, &str); 5] = [
    ("text", "text"),
    ("number", "numeric"),
    ("bool", "boolean"),
    ("timestamp", "timestamptz"),
    ("json", "jsonb"),
];

/// Advisory lock key; extensions are per database, so catalogs with different
/// prefixes share one lock
const LOCK_KEY: &str = "runtara_table_store.migrations";

/// Virtual types seeded by the second step; the name doubles as the `kind`
pub const VIRTUAL_TYPES: [&str; 2] = ["formula", "relationship"];

/// One forward-only migration step
pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    statements: fn(&CatalogTables) -> Vec<String>,
}

impl Migration {
    pub fn statements(&self, tables: &CatalogTables) -> Vec<String> {
        (self.statements)(tables)
    }
}

/// All steps, in ascending version order
pub static MIGRATIONS: [Migration; 3] = [
    Migration {
        version: 1,
        name: "init core catalog and seed types",
        statements: init_core,
    },
    Migration {
        version: 2,
        name: "seed virtual column types",
        statements: seed_virtual_types,
    },
    Migration {
        version: 3,
        name: "store column kind",
        statements: store_column_kind,
    },
];

/// Latest version known to this build
pub fn latest_version() -> i32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Apply every pending migration; returns the versions applied by this call
pub async fn run(pool: &PgPool, tables: &CatalogTables) -> Result<Vec<i32>> {
    let mut tx = pool.begin().await?;
    lock(&mut tx).await?;
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            version    INT PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        tables.migrations
    ))
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let current = current_version(pool, tables).await?;
    debug!(current, latest = latest_version(), "Catalog migration version");

    let mut applied = Vec::new();
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        lock(&mut tx).await?;

        let done: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE version = $1)",
            tables.migrations
        ))
        .bind(migration.version)
        .fetch_one(&mut *tx)
        .await?;
        if done {
            debug!(version = migration.version, "Migration already applied concurrently");
            continue;
        }

        for statement in migration.statements(tables) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|source| TableStoreError::Migration {
                    version: migration.version,
                    name: migration.name,
                    source,
                })?;
        }
        sqlx::query(&format!(
            "INSERT INTO {} (version, name) VALUES ($1, $2)",
            tables.migrations
        ))
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            version = migration.version,
            name = migration.name,
            "Applied catalog migration"
        );
        applied.push(migration.version);
    }

    Ok(applied)
}

/// Highest applied version, 0 when the ledger is empty
pub async fn current_version(pool: &PgPool, tables: &CatalogTables) -> Result<i32> {
    let version: i32 = sqlx::query_scalar(&format!(
        "SELECT COALESCE(MAX(version), 0) FROM {}",
        tables.migrations
    ))
    .fetch_one(pool)
    .await?;
    Ok(version)
}

async fn lock(tx: &mut sqlx::PgConnection) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(LOCK_KEY)
        .execute(tx)
        .await?;
    Ok(())
}

fn init_core(t: &CatalogTables) -> Vec<String> {
    let seeds = BUILTIN_TYPES
        .iter()
        .map(|(name, pg_type)| format!("('{}', '{}', '{{}}'::jsonb)", name, pg_type))
        .collect::<Vec<_>>()
        .join(", ");

    vec![
        r#"CREATE EXTENSION IF NOT EXISTS "pgcrypto""#.to_string(),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {types} (
                id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name       TEXT UNIQUE NOT NULL,
                pg_type    TEXT NOT NULL,
                config     JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            types = t.types
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {tables} (
                id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name        TEXT NOT NULL,
                schema_name TEXT NOT NULL,
                table_name  TEXT NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (schema_name, table_name)
            )
            "#,
            tables = t.tables
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {columns} (
                id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                table_id    UUID NOT NULL REFERENCES {tables}(id) ON DELETE CASCADE,
                name        TEXT NOT NULL,
                type_id     UUID NOT NULL REFERENCES {types}(id),
                pg_column   TEXT NOT NULL,
                is_nullable BOOLEAN NOT NULL DEFAULT TRUE,
                position    INT NOT NULL,
                config      JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (table_id, name),
                UNIQUE (table_id, pg_column)
            )
            "#,
            columns = t.columns,
            tables = t.tables,
            types = t.types
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {indexes} (
                id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                table_id   UUID NOT NULL REFERENCES {tables}(id) ON DELETE CASCADE,
                name       TEXT NOT NULL,
                pg_index   TEXT NOT NULL,
                column_ids UUID[] NOT NULL,
                is_unique  BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (table_id, name),
                UNIQUE (table_id, pg_index)
            )
            "#,
            indexes = t.indexes,
            tables = t.tables
        ),
        format!(
            "INSERT INTO {} (name, pg_type, config) VALUES {} ON CONFLICT (name) DO NOTHING",
            t.types, seeds
        ),
    ]
}

fn seed_virtual_types(t: &CatalogTables) -> Vec<String> {
    let seeds = VIRTUAL_TYPES
        .iter()
        .map(|kind| format!("('{kind}', 'jsonb', '{{\"kind\":\"{kind}\"}}'::jsonb)"))
        .collect::<Vec<_>>()
        .join(", ");

    vec![format!(
        "INSERT INTO {} (name, pg_type, config) VALUES {} ON CONFLICT (name) DO NOTHING",
        t.types, seeds
    )]
}

fn store_column_kind(t: &CatalogTables) -> Vec<String> {
    vec![
        format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS kind TEXT NOT NULL DEFAULT 'physical'",
            t.columns
        ),
        format!(
            r#"
            UPDATE {columns} c
            SET kind = ty.config->>'kind'
            FROM {types} ty
            WHERE c.type_id = ty.id
              AND ty.config->>'kind' IN ('formula', 'relationship')
              AND c.kind <> ty.config->>'kind'
            "#,
            columns = t.columns,
            types = t.types
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> CatalogTables {
        CatalogTables::new("lc_")
    }

    #[test]
    fn test_versions_ascend_without_gaps() {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version, i as i32 + 1);
        }
        assert_eq!(latest_version(), 3);
    }

    #[test]
    fn test_every_create_is_conditional() {
        for migration in MIGRATIONS.iter() {
            for statement in migration.statements(&tables()) {
                let upper = statement.to_uppercase();
                if upper.contains("CREATE TABLE") || upper.contains("CREATE EXTENSION") {
                    assert!(upper.contains("IF NOT EXISTS"), "{}", statement);
                }
                if upper.contains("ADD COLUMN") {
                    assert!(upper.contains("IF NOT EXISTS"), "{}", statement);
                }
                if upper.trim_start().starts_with("INSERT") {
                    assert!(upper.contains("ON CONFLICT"), "{}", statement);
                }
            }
        }
    }

    #[test]
    fn test_seed_statements() {
        let core = init_core(&tables());
        let seed = core.last().unwrap();
        assert!(seed.starts_with("INSERT INTO \"lc_types\""));
        assert!(seed.contains("('number', 'numeric', '{}'::jsonb)"));
        assert!(seed.contains("('timestamp', 'timestamptz', '{}'::jsonb)"));

        let virtual_seed = &seed_virtual_types(&tables())[0];
        assert!(virtual_seed.contains(r#"('relationship', 'jsonb', '{"kind":"relationship"}'::jsonb)"#));
        assert!(virtual_seed.contains(r#"('formula', 'jsonb', '{"kind":"formula"}'::jsonb)"#));
    }

    #[test]
    fn test_statements_use_catalog_prefix() {
        let custom = CatalogTables::new("meta_");
        let statements = init_core(&custom).join("\n");
        assert!(statements.contains("\"meta_columns\""));
        assert!(statements.contains("REFERENCES \"meta_tables\"(id)"));
        assert!(!statements.contains("lc_"));
    }
}
