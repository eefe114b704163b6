//! Table operations.

use strata_db::{quote_ident, EngineConnection, DATA_RELATION};
use strata_protocol::http_types::{
    AddColumnRequest, CreateTableRequest, DeleteRowsResponse, PreviewResponse, ReconcileOutcome,
    ReconcileResponse, TableInfo,
};
use strata_protocol::naming::{validate_column_name, validate_table_name};
use strata_protocol::options::validate_filter;
use strata_protocol::types::{ColumnSpec, DestructiveOp, TableStatus};
use strata_protocol::{BranchId, ProjectId, StorageError, TableRef};

use crate::audit::{AuditScope, RequestContext};
use crate::auth::Principal;
use crate::errors::{map_catalog_err, map_engine_err};
use crate::resolver::ResolvedTable;
use crate::sql;

use super::StorageService;

pub(crate) fn table_info(row: &strata_catalog::TableRow) -> TableInfo {
    TableInfo {
        name: row.name.clone(),
        bucket: row.bucket.clone(),
        columns: row.columns.clone(),
        primary_key: row.primary_key.clone(),
        status: row.status,
        row_count: row.row_count.map(|v| v as u64),
        size_bytes: row.size_bytes.map(|v| v as u64),
        created_at: row.created_at,
    }
}

impl StorageService {
    pub async fn create_table(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
        req: &CreateTableRequest,
    ) -> Result<TableInfo, StorageError> {
        principal.authorize_project(project)?;
        validate_table_name(&req.name).map_err(StorageError::invalid_argument)?;
        for col in &req.columns {
            validate_column_name(&col.name).map_err(StorageError::invalid_argument)?;
        }
        let table = TableRef::new(
            project.clone(),
            branch.clone(),
            bucket.to_string(),
            req.name.clone(),
        );
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "table.create",
            "table",
            format!("{}/{}", bucket, req.name),
            Some(project.clone()),
        );
        let result = self.create_table_inner(&table, req).await;
        scope.finish(&result);
        result
    }

    async fn create_table_inner(
        &self,
        table: &TableRef,
        req: &CreateTableRequest,
    ) -> Result<TableInfo, StorageError> {
        let _lease = self.lock_table(table).await?;
        let table = table.clone();
        let req = req.clone();
        let row = self
            .run_blocking(move |svc| {
                svc.overlay
                    .create_table(&table, &req.columns, &req.primary_key)
            })
            .await?;
        Ok(table_info(&row))
    }

    pub fn get_table(
        &self,
        principal: &Principal,
        table: &TableRef,
    ) -> Result<TableInfo, StorageError> {
        principal.authorize_project(&table.project)?;
        let resolved = self.resolver().resolve_read(table)?;
        Ok(table_info(&resolved.row))
    }

    pub fn list_tables(
        &self,
        principal: &Principal,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
    ) -> Result<Vec<TableInfo>, StorageError> {
        principal.authorize_project(project)?;
        let bucket_row = self
            .catalog
            .require_bucket(project, branch, bucket)
            .map_err(map_catalog_err)?;

        // Linked buckets list the source project's tables.
        if let Some((src_project, src_bucket)) = &bucket_row.linked_from {
            let rows = self
                .catalog
                .list_tables(src_project, &BranchId::default_branch(), src_bucket)
                .map_err(map_catalog_err)?;
            return Ok(rows.iter().map(table_info).collect());
        }

        let mut rows = self
            .catalog
            .list_tables(project, branch, bucket)
            .map_err(map_catalog_err)?;
        if !branch.is_default() {
            // Read-through: default tables not hidden and not already copied.
            let base = self
                .catalog
                .list_tables(project, &BranchId::default_branch(), bucket)
                .map_err(map_catalog_err)?;
            for row in base {
                let state = self
                    .catalog
                    .branch_table_state(project, branch, bucket, &row.name)
                    .map_err(map_catalog_err)?;
                if state.is_none() {
                    rows.push(row);
                }
            }
            rows.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Ok(rows.iter().map(table_info).collect())
    }

    /// First rows of a table, as JSON values.
    pub fn preview_table(
        &self,
        principal: &Principal,
        table: &TableRef,
        limit: u64,
    ) -> Result<PreviewResponse, StorageError> {
        principal.authorize_project(&table.project)?;
        let resolved = self.resolver().resolve_read(table)?;
        let conn = EngineConnection::open_read(&resolved.path).map_err(map_engine_err)?;

        let projection = sql::column_list(&resolved.row.columns);
        let rows = conn
            .query_all(
                &format!(
                    "SELECT {} FROM {} LIMIT {}",
                    projection,
                    quote_ident(DATA_RELATION),
                    limit.min(1000)
                ),
                &[],
            )
            .map_err(map_engine_err)?;

        Ok(PreviewResponse {
            columns: resolved.row.columns.iter().map(|c| c.name.clone()).collect(),
            rows: rows
                .iter()
                .map(|row| {
                    (0..row.width())
                        .map(|i| {
                            row.raw(i)
                                .map(sql::engine_value_to_json)
                                .unwrap_or(serde_json::Value::Null)
                        })
                        .collect()
                })
                .collect(),
        })
    }

    pub async fn drop_table(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        table: &TableRef,
    ) -> Result<(), StorageError> {
        principal.authorize_project(&table.project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "table.drop",
            "table",
            format!("{}/{}", table.bucket, table.table),
            Some(table.project.clone()),
        );
        let result = self.drop_table_inner(ctx, table).await;
        scope.finish(&result);
        result
    }

    async fn drop_table_inner(
        &self,
        ctx: &RequestContext,
        table: &TableRef,
    ) -> Result<(), StorageError> {
        let _lease = self.lock_table(table).await?;
        let ctx = ctx.clone();
        let table = table.clone();
        self.run_blocking(move |svc| {
            if let Ok(resolved) = svc.resolver().resolve_read(&table) {
                svc.maybe_auto_snapshot(&ctx, &resolved, DestructiveOp::DropTable)?;
            }
            svc.overlay.drop_table(&table)
        })
        .await
    }

    /// Add a column. NOT NULL additions are two-step: add nullable with the
    /// default backfilled, then tighten — the engine cannot do it in one.
    pub async fn add_column(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        table: &TableRef,
        req: &AddColumnRequest,
    ) -> Result<TableInfo, StorageError> {
        principal.authorize_project(&table.project)?;
        validate_column_name(&req.name).map_err(StorageError::invalid_argument)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "table.add_column",
            "table",
            format!("{}/{}/{}", table.bucket, table.table, req.name),
            Some(table.project.clone()),
        );
        let result = self.add_column_inner(table, req).await;
        scope.finish(&result);
        result
    }

    async fn add_column_inner(
        &self,
        table: &TableRef,
        req: &AddColumnRequest,
    ) -> Result<TableInfo, StorageError> {
        let _lease = self.lock_table(table).await?;
        let table = table.clone();
        let req = req.clone();
        self.run_blocking(move |svc| {
            let writable = svc.overlay.prepare_write(&table)?;
            if writable.row.columns.iter().any(|c| c.name == req.name) {
                return Err(StorageError::conflict(format!(
                    "column '{}' already exists",
                    req.name
                )));
            }
            let spec = ColumnSpec {
                name: req.name.clone(),
                data_type: req.data_type.clone(),
                nullable: true,
                default: req.default.clone(),
            };
            // Validates the type as a side effect.
            let clause = sql::column_ddl(&spec)?;
            if !req.nullable && req.default.is_none() {
                return Err(StorageError::invalid_argument(
                    "adding a NOT NULL column requires a default to backfill",
                ));
            }

            let conn = EngineConnection::open_write(&writable.path).map_err(map_engine_err)?;
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {clause}",
                quote_ident(DATA_RELATION)
            ))
            .map_err(map_engine_err)?;
            if !req.nullable {
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                    quote_ident(DATA_RELATION),
                    quote_ident(&req.name)
                ))
                .map_err(map_engine_err)?;
            }
            conn.checkpoint().map_err(map_engine_err)?;
            drop(conn);

            let mut columns = writable.row.columns.clone();
            columns.push(ColumnSpec {
                nullable: req.nullable,
                ..spec
            });
            svc.update_columns_and_info(&writable, columns)
        })
        .await
    }

    pub async fn drop_column(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        table: &TableRef,
        column: &str,
    ) -> Result<TableInfo, StorageError> {
        principal.authorize_project(&table.project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "table.drop_column",
            "table",
            format!("{}/{}/{}", table.bucket, table.table, column),
            Some(table.project.clone()),
        );
        let result = self.drop_column_inner(ctx, table, column).await;
        scope.finish(&result);
        result
    }

    async fn drop_column_inner(
        &self,
        ctx: &RequestContext,
        table: &TableRef,
        column: &str,
    ) -> Result<TableInfo, StorageError> {
        let _lease = self.lock_table(table).await?;
        let ctx = ctx.clone();
        let table = table.clone();
        let column = column.to_string();
        self.run_blocking(move |svc| {
            let writable = svc.overlay.prepare_write(&table)?;
            if !writable.row.columns.iter().any(|c| c.name == column) {
                return Err(StorageError::not_found(format!("column '{column}'")));
            }
            if writable.row.primary_key.iter().any(|c| *c == column) {
                return Err(StorageError::invalid_argument(format!(
                    "column '{column}' is part of the primary key"
                )));
            }
            svc.maybe_auto_snapshot(&ctx, &writable, DestructiveOp::AlterColumn)?;

            let conn = EngineConnection::open_write(&writable.path).map_err(map_engine_err)?;
            conn.execute_batch(&format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote_ident(DATA_RELATION),
                quote_ident(&column)
            ))
            .map_err(map_engine_err)?;
            conn.checkpoint().map_err(map_engine_err)?;
            drop(conn);

            let columns: Vec<ColumnSpec> = writable
                .row
                .columns
                .iter()
                .filter(|c| c.name != column)
                .cloned()
                .collect();
            svc.update_columns_and_info(&writable, columns)
        })
        .await
    }

    pub async fn truncate_table(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        table: &TableRef,
    ) -> Result<TableInfo, StorageError> {
        principal.authorize_project(&table.project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "table.truncate",
            "table",
            format!("{}/{}", table.bucket, table.table),
            Some(table.project.clone()),
        );
        let result = self.truncate_inner(ctx, table).await;
        scope.finish(&result);
        result
    }

    async fn truncate_inner(
        &self,
        ctx: &RequestContext,
        table: &TableRef,
    ) -> Result<TableInfo, StorageError> {
        let _lease = self.lock_table(table).await?;
        let ctx = ctx.clone();
        let table = table.clone();
        self.run_blocking(move |svc| {
            let writable = svc.overlay.prepare_write(&table)?;
            svc.maybe_auto_snapshot(&ctx, &writable, DestructiveOp::TruncateTable)?;

            let conn = EngineConnection::open_write(&writable.path).map_err(map_engine_err)?;
            conn.execute_batch(&format!("DELETE FROM {}", quote_ident(DATA_RELATION)))
                .map_err(map_engine_err)?;
            conn.checkpoint().map_err(map_engine_err)?;
            drop(conn);

            svc.refresh_table_stats(&writable)?;
            let row = svc
                .catalog
                .get_table(
                    &writable.physical.project,
                    &writable.physical.branch,
                    &writable.physical.bucket,
                    &writable.physical.table,
                )
                .map_err(map_catalog_err)?
                .ok_or_else(|| StorageError::internal("table row vanished during truncate"))?;
            Ok(table_info(&row))
        })
        .await
    }

    /// Delete rows matching a filter; no filter clears the table (and then
    /// counts as a destructive truncate for auto-snapshot purposes).
    pub async fn delete_rows(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        table: &TableRef,
        filter: Option<&str>,
    ) -> Result<DeleteRowsResponse, StorageError> {
        principal.authorize_project(&table.project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "table.delete_rows",
            "table",
            format!("{}/{}", table.bucket, table.table),
            Some(table.project.clone()),
        );
        let result = self.delete_rows_inner(ctx, table, filter).await;
        scope.finish(&result);
        result
    }

    async fn delete_rows_inner(
        &self,
        ctx: &RequestContext,
        table: &TableRef,
        filter: Option<&str>,
    ) -> Result<DeleteRowsResponse, StorageError> {
        if let Some(filter) = filter {
            validate_filter(filter).map_err(StorageError::invalid_argument)?;
        }
        let _lease = self.lock_table(table).await?;
        let ctx = ctx.clone();
        let table = table.clone();
        let filter = filter.map(|s| s.to_string());
        self.run_blocking(move |svc| {
            let writable = svc.overlay.prepare_write(&table)?;
            if filter.is_none() {
                svc.maybe_auto_snapshot(&ctx, &writable, DestructiveOp::TruncateTable)?;
            }

            let conn = EngineConnection::open_write(&writable.path).map_err(map_engine_err)?;
            let stmt = match filter.as_deref() {
                Some(predicate) => format!(
                    "DELETE FROM {} WHERE {}",
                    quote_ident(DATA_RELATION),
                    predicate
                ),
                None => format!("DELETE FROM {}", quote_ident(DATA_RELATION)),
            };
            let deleted = conn.execute(&stmt, &[]).map_err(map_engine_err)?;
            conn.checkpoint().map_err(map_engine_err)?;
            drop(conn);

            let (rows_after, _) = svc.refresh_table_stats(&writable)?;
            Ok(DeleteRowsResponse {
                rows_deleted: deleted,
                rows_after,
            })
        })
        .await
    }

    /// Rebuild or remove an orphaned row so the catalog matches the file.
    pub async fn reconcile_table(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        table: &TableRef,
    ) -> Result<ReconcileResponse, StorageError> {
        principal.authorize_project(&table.project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "table.reconcile",
            "table",
            format!("{}/{}", table.bucket, table.table),
            Some(table.project.clone()),
        );
        let result = self.reconcile_inner(table).await;
        scope.finish(&result);
        result
    }

    async fn reconcile_inner(&self, table: &TableRef) -> Result<ReconcileResponse, StorageError> {
        let _lease = self.lock_table(table).await?;
        let table = table.clone();
        self.run_blocking(move |svc| {
            let row = svc
                .catalog
                .get_table(&table.project, &table.branch, &table.bucket, &table.table)
                .map_err(map_catalog_err)?
                .ok_or_else(|| StorageError::not_found(format!("table '{}'", table)))?;

            let path = svc
                .layout
                .table_path(&table.project, &table.branch, &table.bucket, &table.table);

            let outcome = match (path.exists(), row.status) {
                (true, TableStatus::Active) => ReconcileOutcome::Consistent,
                (true, TableStatus::Orphaned) => {
                    let conn = EngineConnection::open_read(&path).map_err(map_engine_err)?;
                    let (columns, primary_key) = sql::introspect_columns(&conn)?;
                    drop(conn);
                    svc.catalog
                        .update_table_columns(
                            &table.project,
                            &table.branch,
                            &table.bucket,
                            &table.table,
                            &columns,
                        )
                        .map_err(map_catalog_err)?;
                    // Catalog keeps the PK it already had unless the file
                    // disagrees entirely.
                    let _ = primary_key;
                    svc.catalog
                        .set_table_status(
                            &table.project,
                            &table.branch,
                            &table.bucket,
                            &table.table,
                            TableStatus::Active,
                        )
                        .map_err(map_catalog_err)?;
                    ReconcileOutcome::Rebuilt
                }
                (false, _) => {
                    svc.catalog
                        .delete_table_row(&table.project, &table.branch, &table.bucket, &table.table)
                        .map_err(map_catalog_err)?;
                    if !table.branch.is_default() {
                        svc.catalog
                            .clear_branch_table_state(
                                &table.project,
                                &table.branch,
                                &table.bucket,
                                &table.table,
                            )
                            .map_err(map_catalog_err)?;
                    }
                    ReconcileOutcome::Removed
                }
            };
            Ok(ReconcileResponse { outcome })
        })
        .await
    }

    fn update_columns_and_info(
        &self,
        writable: &ResolvedTable,
        columns: Vec<ColumnSpec>,
    ) -> Result<TableInfo, StorageError> {
        self.catalog
            .update_table_columns(
                &writable.physical.project,
                &writable.physical.branch,
                &writable.physical.bucket,
                &writable.physical.table,
                &columns,
            )
            .map_err(map_catalog_err)?;
        self.refresh_table_stats(writable)?;
        let row = self
            .catalog
            .get_table(
                &writable.physical.project,
                &writable.physical.branch,
                &writable.physical.bucket,
                &writable.physical.table,
            )
            .map_err(map_catalog_err)?
            .ok_or_else(|| StorageError::internal("table row vanished during alter"))?;
        Ok(table_info(&row))
    }
}
