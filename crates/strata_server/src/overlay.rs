//! Branch overlay: write-side semantics.
//!
//! Reads go through the path resolver; this module implements the mutation
//! rules for non-default branches — lazy copy-on-write on first write,
//! branch-local creates, delete-markers that hide the production table —
//! and the plain direct behavior for the default branch.
//!
//! Every function here expects the caller to hold the table's write lock.

use strata_catalog::{BranchTableState, Catalog, TableRow};
use strata_db::{drop_file, EngineConnection, StagedEngineFile};
use strata_protocol::types::{BranchId, ColumnSpec};
use strata_protocol::{DataLayout, StorageError, TableRef};
use tracing::{info, warn};

use crate::errors::{map_catalog_err, map_engine_err};
use crate::metrics::METRICS;
use crate::resolver::{PathResolver, ResolvedTable};
use crate::sql;

#[derive(Clone)]
pub struct BranchOverlay {
    catalog: Catalog,
    layout: DataLayout,
    resolver: PathResolver,
}

impl BranchOverlay {
    pub fn new(catalog: Catalog, layout: DataLayout) -> Self {
        let resolver = PathResolver::new(catalog.clone(), layout.clone());
        Self {
            catalog,
            layout,
            resolver,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Reject writes through linked buckets.
    fn require_writable_bucket(&self, table: &TableRef) -> Result<(), StorageError> {
        let bucket = self
            .catalog
            .require_bucket(&table.project, &table.branch, &table.bucket)
            .map_err(map_catalog_err)?;
        if bucket.linked_from.is_some() {
            return Err(StorageError::invalid_argument(format!(
                "bucket '{}' is linked and read-only",
                table.bucket
            )));
        }
        Ok(())
    }

    /// Make `table` writable in its branch, copying the production file on
    /// the first branch write. Returns the branch-local resolution.
    pub fn prepare_write(&self, table: &TableRef) -> Result<ResolvedTable, StorageError> {
        self.require_writable_bucket(table)?;

        if table.branch.is_default() {
            return self.resolver.resolve_read(table);
        }

        match self
            .catalog
            .branch_table_state(&table.project, &table.branch, &table.bucket, &table.table)
            .map_err(map_catalog_err)?
        {
            Some(BranchTableState::Deleted) => Err(StorageError::not_found(format!(
                "table '{}' is deleted in branch '{}'",
                table.table, table.branch
            ))),
            Some(BranchTableState::Copied) => self.resolver.resolve_read(table),
            None => {
                let base = self.resolver.resolve_read(table)?;
                debug_assert!(base.physical.branch.is_default());
                self.copy_on_write(table, &base)?;
                self.resolver.resolve_read(table)
            }
        }
    }

    /// Copy the production table into the branch: schema and data, atomic,
    /// recorded in the copied set in the same transaction as the branch
    /// table row.
    fn copy_on_write(&self, table: &TableRef, base: &ResolvedTable) -> Result<(), StorageError> {
        let branch_path = self.layout.table_path(
            &table.project,
            &table.branch,
            &table.bucket,
            &table.table,
        );
        let ddl = sql::table_ddl(&base.row.columns, &base.row.primary_key)?;

        let staged =
            StagedEngineFile::new(&self.layout.staging_dir()).map_err(map_engine_err)?;
        {
            let conn = EngineConnection::open_write(staged.path()).map_err(map_engine_err)?;
            conn.execute_batch(&ddl).map_err(map_engine_err)?;
            let attached = conn.attach(&base.path, "base").map_err(map_engine_err)?;
            conn.execute_batch(&format!(
                "INSERT INTO data SELECT * FROM {}.data",
                strata_db::quote_ident(attached.alias())
            ))
            .map_err(map_engine_err)?;
            drop(attached);
            conn.checkpoint().map_err(map_engine_err)?;
        }

        let row = self
            .catalog
            .register_copied_table(
                &table.project,
                &table.branch,
                &table.bucket,
                &table.table,
                &base.row.columns,
                &base.row.primary_key,
            )
            .map_err(map_catalog_err)?;

        if let Err(e) = staged.commit(&branch_path) {
            // Roll the catalog back; the file never appeared.
            let _ = self.catalog.delete_table_row(
                &table.project,
                &table.branch,
                &table.bucket,
                &table.table,
            );
            let _ = self.catalog.clear_branch_table_state(
                &table.project,
                &table.branch,
                &table.bucket,
                &table.table,
            );
            return Err(map_engine_err(e));
        }

        METRICS.inc(&METRICS.tables_copied_on_write);
        info!(
            "Copied table on write: {} ({} rows)",
            table,
            row.row_count.unwrap_or(0)
        );
        Ok(())
    }

    /// Create a new table: an engine file built atomically plus the catalog
    /// row (branch-local with a copied marker inside a dev branch).
    pub fn create_table(
        &self,
        table: &TableRef,
        columns: &[ColumnSpec],
        primary_key: &[String],
    ) -> Result<TableRow, StorageError> {
        self.require_writable_bucket(table)?;

        // A name visible in this branch is taken, whether branch-local or
        // read-through.
        let state = self
            .catalog
            .branch_table_state(&table.project, &table.branch, &table.bucket, &table.table)
            .map_err(map_catalog_err)?;
        if state != Some(BranchTableState::Deleted) && self.resolver.resolve_read(table).is_ok() {
            return Err(StorageError::conflict(format!(
                "table '{}' already exists",
                table.table
            )));
        }

        let target = self.layout.table_path(
            &table.project,
            &table.branch,
            &table.bucket,
            &table.table,
        );
        let ddl = sql::table_ddl(columns, primary_key)?;

        let staged =
            StagedEngineFile::new(&self.layout.staging_dir()).map_err(map_engine_err)?;
        create_build(&staged, &ddl)?;

        let registered = if table.branch.is_default() {
            self.catalog.register_table(
                &table.project,
                &table.branch,
                &table.bucket,
                &table.table,
                columns,
                primary_key,
            )
        } else {
            // Branch-local; also clears a previous delete marker by
            // upserting the copied state.
            self.catalog.register_copied_table(
                &table.project,
                &table.branch,
                &table.bucket,
                &table.table,
                columns,
                primary_key,
            )
        }
        .map_err(map_catalog_err)?;

        if let Err(e) = staged.commit(&target) {
            let _ = self.catalog.delete_table_row(
                &table.project,
                &table.branch,
                &table.bucket,
                &table.table,
            );
            if !table.branch.is_default() {
                let _ = self.catalog.clear_branch_table_state(
                    &table.project,
                    &table.branch,
                    &table.bucket,
                    &table.table,
                );
            }
            return Err(map_engine_err(e));
        }

        info!("Created table {}", table);
        Ok(registered)
    }

    /// Drop a table. In the default branch the file and row go away; in a
    /// dev branch the pair is marked deleted and only a branch-local copy is
    /// removed — the production file is never touched.
    pub fn drop_table(&self, table: &TableRef) -> Result<(), StorageError> {
        self.require_writable_bucket(table)?;

        if table.branch.is_default() {
            let resolved = self.resolver.resolve_read(table)?;
            drop_file(&resolved.path).map_err(map_engine_err)?;
            self.catalog
                .delete_table_row(&table.project, &table.branch, &table.bucket, &table.table)
                .map_err(map_catalog_err)?;
            info!("Dropped table {}", table);
            return Ok(());
        }

        let state = self
            .catalog
            .branch_table_state(&table.project, &table.branch, &table.bucket, &table.table)
            .map_err(map_catalog_err)?;
        match state {
            Some(BranchTableState::Deleted) => Err(StorageError::not_found(format!(
                "table '{}' is deleted in branch '{}'",
                table.table, table.branch
            ))),
            Some(BranchTableState::Copied) => {
                let branch_path = self.layout.table_path(
                    &table.project,
                    &table.branch,
                    &table.bucket,
                    &table.table,
                );
                drop_file(&branch_path).map_err(map_engine_err)?;
                self.catalog
                    .delete_table_row(&table.project, &table.branch, &table.bucket, &table.table)
                    .map_err(map_catalog_err)?;
                self.catalog
                    .set_branch_table_state(
                        &table.project,
                        &table.branch,
                        &table.bucket,
                        &table.table,
                        BranchTableState::Deleted,
                    )
                    .map_err(map_catalog_err)?;
                info!("Dropped branch copy of {}", table);
                Ok(())
            }
            None => {
                // Must be visible through the default branch to be dropped.
                self.resolver.resolve_read(table)?;
                self.catalog
                    .set_branch_table_state(
                        &table.project,
                        &table.branch,
                        &table.bucket,
                        &table.table,
                        BranchTableState::Deleted,
                    )
                    .map_err(map_catalog_err)?;
                info!("Hid table {} in branch {}", table.table, table.branch);
                Ok(())
            }
        }
    }

    /// Delete a whole branch: branch files first, then the catalog cascade.
    /// Branch-local changes are discarded by design; the returned list names
    /// the discarded copies. Idempotent on re-run (missing files tolerated).
    pub fn delete_branch(
        &self,
        project: &strata_protocol::ProjectId,
        branch: &BranchId,
    ) -> Result<Vec<(String, String)>, StorageError> {
        if branch.is_default() {
            return Err(StorageError::conflict("the default branch cannot be deleted"));
        }
        self.catalog
            .require_branch(project, branch)
            .map_err(map_catalog_err)?;

        let discarded = self
            .catalog
            .list_branch_tables(project, branch, BranchTableState::Copied)
            .map_err(map_catalog_err)?;

        let branch_dir = self.layout.branch_dir(project, branch);
        if branch_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&branch_dir) {
                warn!(
                    "Failed to remove branch directory {}: {}",
                    branch_dir.display(),
                    e
                );
                return Err(StorageError::internal("failed to remove branch directory")
                    .with_details(e.to_string()));
            }
        }

        self.catalog
            .delete_branch(project, branch)
            .map_err(map_catalog_err)?;
        info!(
            "Deleted branch {}/{} ({} branch tables discarded)",
            project,
            branch,
            discarded.len()
        );
        Ok(discarded)
    }
}

fn create_build(staged: &StagedEngineFile, ddl: &str) -> Result<(), StorageError> {
    let conn = EngineConnection::open_write(staged.path()).map_err(map_engine_err)?;
    conn.execute_batch(ddl).map_err(map_engine_err)?;
    conn.checkpoint().map_err(map_engine_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_protocol::types::{BucketStage, ProjectId};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        overlay: BranchOverlay,
        catalog: Catalog,
        project: ProjectId,
    }

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec {
                name: "id".into(),
                data_type: "BIGINT".into(),
                nullable: false,
                default: None,
            },
            ColumnSpec {
                name: "amount".into(),
                data_type: "DOUBLE".into(),
                nullable: true,
                default: None,
            },
        ]
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());
        let catalog = Catalog::open_memory().unwrap();
        let project = ProjectId::new("p1").unwrap();
        catalog.create_project(&project, "p1").unwrap();
        catalog
            .create_bucket(
                &project,
                &BranchId::default_branch(),
                "in_c",
                BucketStage::In,
                None,
            )
            .unwrap();
        let overlay = BranchOverlay::new(catalog.clone(), layout);
        Fixture {
            _dir: dir,
            overlay,
            catalog,
            project,
        }
    }

    fn tref(f: &Fixture, branch: &str) -> TableRef {
        TableRef::new(
            f.project.clone(),
            BranchId::new(branch).unwrap(),
            "in_c".into(),
            "orders".into(),
        )
    }

    fn insert_rows(path: &std::path::Path, rows: &[(i64, f64)]) {
        let conn = EngineConnection::open_write(path).unwrap();
        for (id, amount) in rows {
            conn.execute(
                "INSERT INTO data VALUES (?, ?)",
                &[(*id).into(), (*amount).into()],
            )
            .unwrap();
        }
        conn.checkpoint().unwrap();
    }

    fn count(path: &std::path::Path) -> i64 {
        let conn = EngineConnection::open_read(path).unwrap();
        conn.query_scalar("SELECT COUNT(*) FROM data", &[]).unwrap()
    }

    #[test]
    fn create_in_default_builds_file_and_row() {
        let f = fixture();
        let t = tref(&f, "default");
        f.overlay.create_table(&t, &columns(), &["id".to_string()]).unwrap();

        let resolved = f.overlay.resolver().resolve_read(&t).unwrap();
        assert!(resolved.path.exists());
        assert_eq!(count(&resolved.path), 0);

        // duplicate create conflicts
        let err = f.overlay.create_table(&t, &columns(), &[]).unwrap_err();
        assert_eq!(err.kind, strata_protocol::ErrorKind::Conflict);
    }

    #[test]
    fn copy_on_write_happens_once_and_isolates() {
        let f = fixture();
        let t_default = tref(&f, "default");
        f.overlay.create_table(&t_default, &columns(), &[]).unwrap();
        let base = f.overlay.resolver().resolve_read(&t_default).unwrap();
        insert_rows(&base.path, &[(1, 10.0), (2, 20.0)]);

        let dev = BranchId::new("dev1").unwrap();
        f.catalog.create_branch(&f.project, &dev, "x").unwrap();
        let t_dev = tref(&f, "dev1");

        // live read-through before the first write
        let read = f.overlay.resolver().resolve_read(&t_dev).unwrap();
        assert_eq!(read.path, base.path);

        // first write copies
        let writable = f.overlay.prepare_write(&t_dev).unwrap();
        assert_ne!(writable.path, base.path);
        assert_eq!(count(&writable.path), 2);

        // second write reuses the copy (idempotent CoW)
        let again = f.overlay.prepare_write(&t_dev).unwrap();
        assert_eq!(again.path, writable.path);

        // branch writes do not touch the production file
        insert_rows(&writable.path, &[(3, 30.0)]);
        assert_eq!(count(&writable.path), 3);
        assert_eq!(count(&base.path), 2);
    }

    #[test]
    fn drop_in_branch_hides_but_preserves_default() {
        let f = fixture();
        let t_default = tref(&f, "default");
        f.overlay.create_table(&t_default, &columns(), &[]).unwrap();
        let base = f.overlay.resolver().resolve_read(&t_default).unwrap();

        let dev = BranchId::new("dev1").unwrap();
        f.catalog.create_branch(&f.project, &dev, "x").unwrap();
        let t_dev = tref(&f, "dev1");

        f.overlay.drop_table(&t_dev).unwrap();
        assert!(base.path.exists());
        let err = f.overlay.resolver().resolve_read(&t_dev).unwrap_err();
        assert_eq!(err.kind, strata_protocol::ErrorKind::NotFound);

        // default still readable
        f.overlay.resolver().resolve_read(&t_default).unwrap();

        // re-creating in the branch promotes the deleted marker
        f.overlay.create_table(&t_dev, &columns(), &[]).unwrap();
        let resolved = f.overlay.resolver().resolve_read(&t_dev).unwrap();
        assert!(!resolved.physical.branch.is_default());
    }

    #[test]
    fn delete_branch_discards_copies_and_keeps_default() {
        let f = fixture();
        let t_default = tref(&f, "default");
        f.overlay.create_table(&t_default, &columns(), &[]).unwrap();
        let base = f.overlay.resolver().resolve_read(&t_default).unwrap();
        insert_rows(&base.path, &[(1, 1.0)]);

        let dev = BranchId::new("dev1").unwrap();
        f.catalog.create_branch(&f.project, &dev, "x").unwrap();
        let t_dev = tref(&f, "dev1");
        let writable = f.overlay.prepare_write(&t_dev).unwrap();
        insert_rows(&writable.path, &[(2, 2.0)]);

        let discarded = f.overlay.delete_branch(&f.project, &dev).unwrap();
        assert_eq!(discarded, vec![("in_c".to_string(), "orders".to_string())]);
        assert!(!writable.path.exists());
        assert_eq!(count(&base.path), 1);

        // idempotent on re-run: branch is gone, second call is not-found
        let err = f.overlay.delete_branch(&f.project, &dev).unwrap_err();
        assert_eq!(err.kind, strata_protocol::ErrorKind::NotFound);
    }

    #[test]
    fn default_drop_removes_file_and_row() {
        let f = fixture();
        let t = tref(&f, "default");
        f.overlay.create_table(&t, &columns(), &[]).unwrap();
        let resolved = f.overlay.resolver().resolve_read(&t).unwrap();

        f.overlay.drop_table(&t).unwrap();
        assert!(!resolved.path.exists());
        let err = f.overlay.resolver().resolve_read(&t).unwrap_err();
        assert_eq!(err.kind, strata_protocol::ErrorKind::NotFound);
    }
}
