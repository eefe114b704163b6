//! Catalog schema and forward-only versioning.
//!
//! A `st_meta` singleton row carries the schema version. Fresh files get the
//! full DDL; older files are migrated forward step by step; a newer version
//! than this binary knows is refused.

use strata_db::{EngineConnection, EngineValue};
use tracing::info;

use crate::error::{CatalogError, Result};

/// Current catalog schema version. Increment with each migration step.
pub const SCHEMA_VERSION: i64 = 1;

/// Migration steps keyed by the version they upgrade *to*. Version 1 is the
/// baseline DDL below; later steps append here.
const MIGRATIONS: &[(i64, &str)] = &[];

const BASELINE_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS st_meta (
        key TEXT PRIMARY KEY,
        schema_version BIGINT NOT NULL,
        updated_at TIMESTAMP NOT NULL
    );

    CREATE TABLE IF NOT EXISTS st_projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active','deleted')),
        created_at TIMESTAMP NOT NULL
    );

    CREATE TABLE IF NOT EXISTS st_branches (
        project_id TEXT NOT NULL,
        id TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL,
        created_by TEXT NOT NULL,
        PRIMARY KEY (project_id, id)
    );

    -- Copied / deleted sets of the branch overlay
    CREATE TABLE IF NOT EXISTS st_branch_tables (
        project_id TEXT NOT NULL,
        branch_id TEXT NOT NULL,
        bucket TEXT NOT NULL,
        table_name TEXT NOT NULL,
        state TEXT NOT NULL CHECK (state IN ('copied','deleted')),
        PRIMARY KEY (project_id, branch_id, bucket, table_name)
    );

    CREATE TABLE IF NOT EXISTS st_buckets (
        project_id TEXT NOT NULL,
        branch_id TEXT NOT NULL,
        name TEXT NOT NULL,
        stage TEXT NOT NULL CHECK (stage IN ('in','out','sys')),
        linked_project TEXT,
        linked_bucket TEXT,
        created_at TIMESTAMP NOT NULL,
        PRIMARY KEY (project_id, branch_id, name)
    );

    CREATE TABLE IF NOT EXISTS st_bucket_shares (
        project_id TEXT NOT NULL,
        bucket TEXT NOT NULL,
        shared_with TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL,
        PRIMARY KEY (project_id, bucket, shared_with)
    );

    CREATE TABLE IF NOT EXISTS st_tables (
        project_id TEXT NOT NULL,
        branch_id TEXT NOT NULL,
        bucket TEXT NOT NULL,
        name TEXT NOT NULL,
        columns_json TEXT NOT NULL,
        primary_key_json TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active','orphaned')),
        row_count BIGINT,
        size_bytes BIGINT,
        created_at TIMESTAMP NOT NULL,
        PRIMARY KEY (project_id, branch_id, bucket, name)
    );

    CREATE TABLE IF NOT EXISTS st_files (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        name TEXT NOT NULL,
        rel_path TEXT NOT NULL,
        size_bytes BIGINT NOT NULL,
        sha256 TEXT NOT NULL,
        content_type TEXT,
        is_staging BOOLEAN NOT NULL,
        created_at TIMESTAMP NOT NULL,
        expires_at TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS ix_st_files_project ON st_files(project_id);
    CREATE INDEX IF NOT EXISTS ix_st_files_expires ON st_files(expires_at);

    CREATE TABLE IF NOT EXISTS st_snapshots (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        bucket TEXT NOT NULL,
        table_name TEXT NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('manual','auto_predrop','auto_pretruncate','auto_prealtercolumn')),
        rel_path TEXT NOT NULL,
        row_count BIGINT NOT NULL,
        size_bytes BIGINT NOT NULL,
        schema_json TEXT NOT NULL,
        primary_key_json TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL,
        created_by TEXT NOT NULL,
        expires_at TIMESTAMP NOT NULL,
        description TEXT
    );
    CREATE INDEX IF NOT EXISTS ix_st_snapshots_project ON st_snapshots(project_id);
    CREATE INDEX IF NOT EXISTS ix_st_snapshots_expires ON st_snapshots(expires_at);

    CREATE TABLE IF NOT EXISTS st_settings (
        scope TEXT NOT NULL CHECK (scope IN ('project','bucket','table')),
        project_id TEXT NOT NULL,
        bucket TEXT NOT NULL DEFAULT '',
        table_name TEXT NOT NULL DEFAULT '',
        config_json TEXT NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        PRIMARY KEY (scope, project_id, bucket, table_name)
    );

    CREATE TABLE IF NOT EXISTS st_api_keys (
        key_hash TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL
    );

    CREATE SEQUENCE IF NOT EXISTS seq_st_audit;
    CREATE TABLE IF NOT EXISTS st_audit (
        id BIGINT PRIMARY KEY DEFAULT nextval('seq_st_audit'),
        ts TIMESTAMP NOT NULL,
        request_id TEXT NOT NULL,
        project_id TEXT,
        operation TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        resource_id TEXT NOT NULL,
        status TEXT NOT NULL,
        duration_ms BIGINT NOT NULL,
        error TEXT
    );
    CREATE INDEX IF NOT EXISTS ix_st_audit_project ON st_audit(project_id, id);
"#;

/// Bring the metadata file to the current schema version.
pub fn ensure_schema(conn: &EngineConnection) -> Result<()> {
    match current_version(conn)? {
        None => {
            info!("Initializing catalog schema at version {}", SCHEMA_VERSION);
            conn.execute_batch(BASELINE_DDL)?;
            set_version(conn, SCHEMA_VERSION)?;
            Ok(())
        }
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(v) if v > SCHEMA_VERSION => Err(CatalogError::SchemaVersion {
            found: v,
            supported: SCHEMA_VERSION,
        }),
        Some(mut v) => {
            for (target, sql) in MIGRATIONS {
                if *target > v {
                    info!("Migrating catalog schema {} -> {}", v, target);
                    conn.execute_batch(sql)?;
                    set_version(conn, *target)?;
                    v = *target;
                }
            }
            Ok(())
        }
    }
}

fn current_version(conn: &EngineConnection) -> Result<Option<i64>> {
    let meta_exists = conn
        .query_optional(
            "SELECT 1 FROM information_schema.tables WHERE table_name = 'st_meta'",
            &[],
        )?
        .is_some();
    if !meta_exists {
        return Ok(None);
    }

    let row = conn.query_optional(
        "SELECT schema_version FROM st_meta WHERE key = 'schema'",
        &[],
    )?;
    match row {
        Some(r) => Ok(Some(r.get("schema_version")?)),
        None => Ok(None),
    }
}

fn set_version(conn: &EngineConnection, version: i64) -> Result<()> {
    let now = chrono::Utc::now();
    conn.execute(
        r#"
        INSERT INTO st_meta (key, schema_version, updated_at)
        VALUES ('schema', ?, ?)
        ON CONFLICT(key) DO UPDATE SET schema_version = excluded.schema_version, updated_at = excluded.updated_at
        "#,
        &[EngineValue::from(version), EngineValue::from(now)],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_file_gets_baseline() {
        let conn = EngineConnection::open_memory().unwrap();
        ensure_schema(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), Some(SCHEMA_VERSION));

        // idempotent
        ensure_schema(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn newer_version_is_refused() {
        let conn = EngineConnection::open_memory().unwrap();
        ensure_schema(&conn).unwrap();
        set_version(&conn, SCHEMA_VERSION + 5).unwrap();

        let err = ensure_schema(&conn).unwrap_err();
        assert!(matches!(err, CatalogError::SchemaVersion { .. }));
    }
}
