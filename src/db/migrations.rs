//! Database migrations
//!
//! Versioned schema for the installation lifecycle tables.

use crate::core::error::{HarborError, Result};
use rusqlite::Connection;
use tracing::info;

/// Migration version tracking table
const MIGRATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
)
"#;

/// Initial schema migration (version 1)
const MIGRATION_V1: &str = r#"
-- Cached declarations, one row per unique package
CREATE TABLE IF NOT EXISTS plugin_declaration (
    id TEXT PRIMARY KEY,
    plugin_unique_identifier TEXT UNIQUE NOT NULL,
    plugin_id TEXT NOT NULL,
    declaration TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

-- Per-tenant plugin bindings
CREATE TABLE IF NOT EXISTS plugin_installation (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    plugin_unique_identifier TEXT NOT NULL,
    plugin_id TEXT NOT NULL,
    runtime_type TEXT NOT NULL,
    source TEXT NOT NULL,
    meta TEXT NOT NULL DEFAULT '{}',
    endpoints_setups INTEGER NOT NULL DEFAULT 0,
    endpoints_active INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(tenant_id, plugin_unique_identifier, source)
);

CREATE INDEX IF NOT EXISTS idx_installation_tenant ON plugin_installation(tenant_id);
CREATE INDEX IF NOT EXISTS idx_installation_identifier ON plugin_installation(plugin_unique_identifier);
CREATE INDEX IF NOT EXISTS idx_installation_plugin_id ON plugin_installation(plugin_id);

-- Multi-plugin install tasks; plugins column holds the per-slot statuses as JSON
CREATE TABLE IF NOT EXISTS install_task (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    total_plugins INTEGER NOT NULL,
    completed_plugins INTEGER NOT NULL DEFAULT 0,
    plugins TEXT NOT NULL DEFAULT '[]',
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_install_task_tenant ON install_task(tenant_id);

-- Launched serverless functions, looked up by checksum for idempotency
CREATE TABLE IF NOT EXISTS serverless_runtime (
    id TEXT PRIMARY KEY,
    checksum TEXT NOT NULL,
    type TEXT NOT NULL,
    function_url TEXT NOT NULL,
    function_name TEXT NOT NULL,
    plugin_unique_identifier TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(checksum, type)
);

CREATE INDEX IF NOT EXISTS idx_serverless_identifier ON serverless_runtime(plugin_unique_identifier);

-- Capability bindings, one row per tenant per provider
CREATE TABLE IF NOT EXISTS tool_installation (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    plugin_id TEXT NOT NULL,
    plugin_unique_identifier TEXT NOT NULL,
    provider TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(tenant_id, plugin_id)
);

CREATE TABLE IF NOT EXISTS ai_model_installation (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    plugin_id TEXT NOT NULL,
    plugin_unique_identifier TEXT NOT NULL,
    provider TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(tenant_id, plugin_id)
);

CREATE TABLE IF NOT EXISTS agent_strategy_installation (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    plugin_id TEXT NOT NULL,
    plugin_unique_identifier TEXT NOT NULL,
    provider TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(tenant_id, plugin_id)
);
"#;

/// Ordered list of migrations to apply
const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1)];

/// Run all pending migrations against the given connection
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_TABLE)
        .map_err(HarborError::DatabaseError)?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(HarborError::DatabaseError)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        info!(version, "applying database migration");

        let tx = conn.transaction().map_err(HarborError::DatabaseError)?;
        tx.execute_batch(sql).map_err(HarborError::DatabaseError)?;
        tx.execute("INSERT INTO schema_migrations (version) VALUES (?)", [version])
            .map_err(HarborError::DatabaseError)?;
        tx.commit().map_err(HarborError::DatabaseError)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_cleanly() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_installation_uniqueness() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let insert = "INSERT INTO plugin_installation \
                      (id, tenant_id, plugin_unique_identifier, plugin_id, runtime_type, source) \
                      VALUES (?, 'T1', 'alice/calc:1.0.0@abc', 'alice/calc', 'local', 'marketplace')";
        conn.execute(insert, ["i1"]).unwrap();
        // same tenant + identifier + source must be rejected
        assert!(conn.execute(insert, ["i2"]).is_err());
    }
}
