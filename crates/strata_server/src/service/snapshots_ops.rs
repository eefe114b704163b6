//! Snapshot create/restore and the retention sweeper.

use chrono::Utc;
use serde::Serialize;
use strata_catalog::SnapshotRow;
use strata_db::{create_atomic, escape_sql_string, quote_ident, EngineConnection, DATA_RELATION};
use strata_protocol::http_types::{RestoreSnapshotRequest, SnapshotInfo, TableInfo};
use strata_protocol::types::{DestructiveOp, SnapshotKind};
use strata_protocol::{BranchId, ProjectId, StorageError, TableRef};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditScope, RequestContext};
use crate::auth::Principal;
use crate::errors::{map_catalog_err, map_engine_err};
use crate::metrics::METRICS;
use crate::resolver::ResolvedTable;
use crate::sql;

use super::tables::table_info;
use super::StorageService;

fn snapshot_info(row: &SnapshotRow) -> SnapshotInfo {
    SnapshotInfo {
        id: row.id.clone(),
        project: row.project.to_string(),
        bucket: row.bucket.clone(),
        table: row.table.clone(),
        kind: row.kind,
        row_count: row.row_count as u64,
        size_bytes: row.size_bytes as u64,
        schema: row.schema.clone(),
        primary_key: row.primary_key.clone(),
        created_at: row.created_at,
        created_by: row.created_by.clone(),
        expires_at: row.expires_at,
        description: row.description.clone(),
    }
}

/// Sidecar written next to every snapshot's data file.
#[derive(Serialize)]
struct SnapshotSidecar<'a> {
    id: &'a str,
    project: &'a str,
    bucket: &'a str,
    table: &'a str,
    kind: &'a str,
    row_count: i64,
    schema: &'a [strata_protocol::types::ColumnSpec],
    primary_key: &'a [String],
    created_at: String,
    created_by: &'a str,
}

/// Outcome of one retention sweep cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotSweepReport {
    pub removed: usize,
    pub failed: usize,
}

impl StorageService {
    /// Manual snapshot of a default-branch table.
    pub async fn create_snapshot(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        project: &ProjectId,
        bucket: &str,
        table: &str,
        description: Option<&str>,
    ) -> Result<SnapshotInfo, StorageError> {
        principal.authorize_project(project)?;
        let table_ref = TableRef::new(
            project.clone(),
            BranchId::default_branch(),
            bucket.to_string(),
            table.to_string(),
        );
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "snapshot.create",
            "snapshot",
            format!("{bucket}/{table}"),
            Some(project.clone()),
        );
        let result = self
            .create_snapshot_inner(ctx, &table_ref, description)
            .await;
        scope.finish(&result);
        result
    }

    async fn create_snapshot_inner(
        &self,
        ctx: &RequestContext,
        table: &TableRef,
        description: Option<&str>,
    ) -> Result<SnapshotInfo, StorageError> {
        let _lease = self.lock_table(table).await?;
        let ctx = ctx.clone();
        let table = table.clone();
        let description = description.map(|s| s.to_string());
        self.run_blocking(move |svc| {
            let resolved = svc.resolver().resolve_read(&table)?;
            let row = svc.snapshot_locked(
                &ctx,
                &resolved,
                SnapshotKind::Manual,
                description.as_deref(),
            )?;
            Ok(snapshot_info(&row))
        })
        .await
    }

    /// Export one table to a columnar snapshot. Caller holds the table lock.
    pub(crate) fn snapshot_locked(
        &self,
        ctx: &RequestContext,
        resolved: &ResolvedTable,
        kind: SnapshotKind,
        description: Option<&str>,
    ) -> Result<SnapshotRow, StorageError> {
        let table = &resolved.physical;
        if !table.branch.is_default() {
            return Err(StorageError::invalid_argument(
                "snapshots cover default-branch tables only",
            ));
        }

        let settings = self.effective_settings_for(
            &table.project,
            Some(table.bucket.as_str()),
            Some(table.table.as_str()),
        )?;
        let created_at = Utc::now();
        let expires_at = settings.effective.expires_at(kind, created_at);
        let id = self.unique_snapshot_id(&table.table, created_at)?;

        let snap_dir = self.layout.snapshot_dir(&table.project, &id);
        std::fs::create_dir_all(&snap_dir).map_err(|e| {
            StorageError::internal("cannot create snapshot directory").with_details(e.to_string())
        })?;
        let data_path = self.layout.snapshot_data_path(&table.project, &id);

        let result = (|| -> Result<SnapshotRow, StorageError> {
            let conn = EngineConnection::open_read(&resolved.path).map_err(map_engine_err)?;
            let row_count = sql::count_rows(&conn)?;
            conn.execute_batch(&format!(
                "COPY (SELECT * FROM {}) TO '{}' (FORMAT PARQUET, COMPRESSION ZSTD)",
                quote_ident(DATA_RELATION),
                escape_sql_string(&data_path.display().to_string())
            ))
            .map_err(map_engine_err)?;
            drop(conn);

            let sidecar = SnapshotSidecar {
                id: &id,
                project: table.project.as_str(),
                bucket: &table.bucket,
                table: &table.table,
                kind: kind.as_str(),
                row_count,
                schema: &resolved.row.columns,
                primary_key: &resolved.row.primary_key,
                created_at: created_at.to_rfc3339(),
                created_by: &ctx.actor,
            };
            let sidecar_path = self.layout.snapshot_metadata_path(&table.project, &id);
            std::fs::write(
                &sidecar_path,
                serde_json::to_vec_pretty(&sidecar).map_err(|e| {
                    StorageError::internal("sidecar serialization failed")
                        .with_details(e.to_string())
                })?,
            )
            .map_err(|e| {
                StorageError::internal("cannot write snapshot sidecar").with_details(e.to_string())
            })?;

            let row = SnapshotRow {
                id: id.clone(),
                project: table.project.clone(),
                bucket: table.bucket.clone(),
                table: table.table.clone(),
                kind,
                rel_path: format!("snapshots/{}/{}", table.project, id),
                row_count,
                size_bytes: sql::file_size(&data_path) as i64,
                schema: resolved.row.columns.clone(),
                primary_key: resolved.row.primary_key.clone(),
                created_at,
                created_by: ctx.actor.clone(),
                expires_at,
                description: description.map(|s| s.to_string()),
            };
            self.catalog.insert_snapshot(&row).map_err(map_catalog_err)?;
            Ok(row)
        })();

        match result {
            Ok(row) => {
                METRICS.inc(&METRICS.snapshots_created);
                info!("Created snapshot {} ({} rows)", row.id, row.row_count);
                Ok(row)
            }
            Err(e) => {
                // Leave no half-written snapshot directory behind.
                let _ = std::fs::remove_dir_all(&snap_dir);
                Err(e)
            }
        }
    }

    /// Consult the effective settings and snapshot before a destructive
    /// operation. A required snapshot that fails fails the operation.
    /// Branch-local tables are never auto-snapshotted (snapshots have no
    /// branch dimension); branch destructive ops only hide default data.
    pub(crate) fn maybe_auto_snapshot(
        &self,
        ctx: &RequestContext,
        resolved: &ResolvedTable,
        op: DestructiveOp,
    ) -> Result<Option<String>, StorageError> {
        if !resolved.physical.branch.is_default() {
            return Ok(None);
        }
        let settings = self.effective_settings_for(
            &resolved.physical.project,
            Some(resolved.physical.bucket.as_str()),
            Some(resolved.physical.table.as_str()),
        )?;
        if !settings.effective.trigger_enabled(op) {
            return Ok(None);
        }
        let row = self.snapshot_locked(ctx, resolved, op.snapshot_kind(), None)?;
        Ok(Some(row.id))
    }

    pub fn get_snapshot(
        &self,
        principal: &Principal,
        project: &ProjectId,
        id: &str,
    ) -> Result<SnapshotInfo, StorageError> {
        principal.authorize_project(project)?;
        let row = self.catalog.require_snapshot(id).map_err(map_catalog_err)?;
        if &row.project != project {
            return Err(StorageError::not_found(format!("snapshot '{id}'")));
        }
        Ok(snapshot_info(&row))
    }

    pub fn list_snapshots(
        &self,
        principal: &Principal,
        project: &ProjectId,
    ) -> Result<Vec<SnapshotInfo>, StorageError> {
        principal.authorize_project(project)?;
        self.catalog.require_project(project).map_err(map_catalog_err)?;
        let rows = self
            .catalog
            .list_snapshots(project)
            .map_err(map_catalog_err)?;
        Ok(rows.iter().map(snapshot_info).collect())
    }

    /// Remove a snapshot: files first, then the catalog row.
    pub fn delete_snapshot(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        project: &ProjectId,
        id: &str,
    ) -> Result<(), StorageError> {
        principal.authorize_project(project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "snapshot.delete",
            "snapshot",
            id.to_string(),
            Some(project.clone()),
        );
        let result = (|| {
            let row = self.catalog.require_snapshot(id).map_err(map_catalog_err)?;
            if &row.project != project {
                return Err(StorageError::not_found(format!("snapshot '{id}'")));
            }
            self.remove_snapshot_files_and_row(&row)
        })();
        scope.finish(&result);
        result
    }

    fn remove_snapshot_files_and_row(&self, row: &SnapshotRow) -> Result<(), StorageError> {
        let dir = self.layout.snapshot_dir(&row.project, &row.id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StorageError::internal("failed to remove snapshot files")
                    .with_details(e.to_string()))
            }
        }
        self.catalog
            .delete_snapshot_row(&row.id)
            .map_err(map_catalog_err)?;
        Ok(())
    }

    /// Restore a snapshot into a table (defaulting to its origin), replacing
    /// any existing table of that name.
    pub async fn restore_snapshot(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        project: &ProjectId,
        id: &str,
        req: &RestoreSnapshotRequest,
    ) -> Result<TableInfo, StorageError> {
        principal.authorize_project(project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "snapshot.restore",
            "snapshot",
            id.to_string(),
            Some(project.clone()),
        );
        let result = self.restore_inner(project, id, req).await;
        scope.finish(&result);
        result
    }

    async fn restore_inner(
        &self,
        project: &ProjectId,
        id: &str,
        req: &RestoreSnapshotRequest,
    ) -> Result<TableInfo, StorageError> {
        let snap = self.catalog.require_snapshot(id).map_err(map_catalog_err)?;
        if &snap.project != project {
            return Err(StorageError::not_found(format!("snapshot '{id}'")));
        }
        let bucket = req.bucket.clone().unwrap_or_else(|| snap.bucket.clone());
        let table_name = req.table.clone().unwrap_or_else(|| snap.table.clone());
        let target = TableRef::new(
            project.clone(),
            BranchId::default_branch(),
            bucket,
            table_name,
        );
        self.catalog
            .require_bucket(project, &target.branch, &target.bucket)
            .map_err(map_catalog_err)?;

        let data_path = self.layout.snapshot_data_path(project, id);
        if !data_path.exists() {
            return Err(StorageError::not_found(format!(
                "snapshot '{id}' data file is missing"
            )));
        }

        let _lease = self.lock_table(&target).await?;
        let snap_id = id.to_string();
        self.run_blocking(move |svc| {
            let target_path = svc.layout.table_path(
                &target.project,
                &target.branch,
                &target.bucket,
                &target.table,
            );
            let ddl = sql::table_ddl(&snap.schema, &snap.primary_key)?;

            create_atomic(&svc.layout.staging_dir(), &target_path, |conn| {
                conn.execute_batch(&ddl)?;
                conn.execute_batch(&format!(
                    "INSERT INTO {} SELECT * FROM read_parquet('{}')",
                    quote_ident(DATA_RELATION),
                    escape_sql_string(&data_path.display().to_string())
                ))
            })
            .map_err(map_engine_err)?;

            // Register-or-replace the catalog row.
            if svc
                .catalog
                .get_table(&target.project, &target.branch, &target.bucket, &target.table)
                .map_err(map_catalog_err)?
                .is_some()
            {
                svc.catalog
                    .delete_table_row(
                        &target.project,
                        &target.branch,
                        &target.bucket,
                        &target.table,
                    )
                    .map_err(map_catalog_err)?;
            }
            svc.catalog
                .register_table(
                    &target.project,
                    &target.branch,
                    &target.bucket,
                    &target.table,
                    &snap.schema,
                    &snap.primary_key,
                )
                .map_err(map_catalog_err)?;

            let resolved = svc.resolver().resolve_read(&target)?;
            svc.refresh_table_stats(&resolved)?;
            let row = svc
                .catalog
                .get_table(&target.project, &target.branch, &target.bucket, &target.table)
                .map_err(map_catalog_err)?
                .ok_or_else(|| StorageError::internal("restored table row vanished"))?;

            METRICS.inc(&METRICS.snapshots_restored);
            info!("Restored snapshot {} into {}", snap_id, target);
            Ok(table_info(&row))
        })
        .await
    }

    /// One retention sweep: delete snapshots past `expires-at`, files first,
    /// then the row. Failures are logged and the sweep continues.
    pub fn sweep_expired_snapshots(&self) -> SnapshotSweepReport {
        let mut report = SnapshotSweepReport::default();
        let expired = match self.catalog.list_expired_snapshots(Utc::now()) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Retention sweep could not list snapshots: {}", e);
                report.failed += 1;
                return report;
            }
        };
        for row in expired {
            match self.remove_snapshot_files_and_row(&row) {
                Ok(()) => {
                    METRICS.inc(&METRICS.snapshots_swept);
                    report.removed += 1;
                    info!("Retention sweep removed snapshot {}", row.id);
                }
                Err(e) => {
                    warn!("Retention sweep failed for {}: {}", row.id, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn unique_snapshot_id(
        &self,
        table: &str,
        created_at: chrono::DateTime<Utc>,
    ) -> Result<String, StorageError> {
        let stem: String = table
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        let base = format!("snap_{}_{}", stem, created_at.format("%Y%m%d%H%M%S"));
        if self
            .catalog
            .get_snapshot(&base)
            .map_err(map_catalog_err)?
            .is_none()
        {
            return Ok(base);
        }
        // Same table, same second: disambiguate.
        Ok(format!(
            "{}_{}",
            base,
            &Uuid::new_v4().simple().to_string()[..8]
        ))
    }
}
