//! Path resolver.
//!
//! Maps logical (project, branch, bucket, table) onto the effective engine
//! file, honoring bucket links (one hop, into the source project's default
//! branch) and the branch overlay (deleted hides, copied redirects, absent
//! reads through to default). Pure over the catalog; no mutation.

use std::path::PathBuf;

use strata_catalog::{BranchTableState, Catalog, TableRow};
use strata_protocol::types::{BranchId, TableStatus};
use strata_protocol::{DataLayout, StorageError, TableRef};

use crate::errors::map_catalog_err;

/// Result of resolution: where the table physically lives.
#[derive(Debug, Clone)]
pub struct ResolvedTable {
    /// Physical identity after link/overlay redirection; may name another
    /// project (linked bucket) or the default branch (read-through).
    pub physical: TableRef,
    pub path: PathBuf,
    pub row: TableRow,
}

#[derive(Clone)]
pub struct PathResolver {
    catalog: Catalog,
    layout: DataLayout,
}

impl PathResolver {
    pub fn new(catalog: Catalog, layout: DataLayout) -> Self {
        Self { catalog, layout }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Resolve for reading.
    pub fn resolve_read(&self, table: &TableRef) -> Result<ResolvedTable, StorageError> {
        let bucket = self
            .catalog
            .require_bucket(&table.project, &table.branch, &table.bucket)
            .map_err(map_catalog_err)?;

        if let Some((src_project, src_bucket)) = &bucket.linked_from {
            // Linked buckets expose the source project's default branch.
            let src = self
                .catalog
                .require_bucket(src_project, &BranchId::default_branch(), src_bucket)
                .map_err(map_catalog_err)?;
            if src.linked_from.is_some() {
                return Err(StorageError::internal(
                    "linked bucket chains through another link; catalog is corrupt",
                ));
            }
            let physical = TableRef::new(
                src_project.clone(),
                BranchId::default_branch(),
                src_bucket.clone(),
                table.table.clone(),
            );
            return self.resolve_direct(&physical);
        }

        if table.branch.is_default() {
            return self.resolve_direct(table);
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
            Some(BranchTableState::Copied) => self.resolve_direct(table),
            None => {
                // Live read-through to the production branch.
                let physical = TableRef::new(
                    table.project.clone(),
                    BranchId::default_branch(),
                    table.bucket.clone(),
                    table.table.clone(),
                );
                self.resolve_direct(&physical)
            }
        }
    }

    /// Resolve a physical identity without link/overlay redirection.
    fn resolve_direct(&self, physical: &TableRef) -> Result<ResolvedTable, StorageError> {
        let row = self
            .catalog
            .get_table(
                &physical.project,
                &physical.branch,
                &physical.bucket,
                &physical.table,
            )
            .map_err(map_catalog_err)?
            .ok_or_else(|| StorageError::not_found(format!("table '{}'", physical)))?;

        if row.status == TableStatus::Orphaned {
            return Err(StorageError::not_found(format!(
                "table '{}' is orphaned (file missing); reconcile or drop it",
                physical
            )));
        }

        let path = self.layout.table_path(
            &physical.project,
            &physical.branch,
            &physical.bucket,
            &physical.table,
        );
        Ok(ResolvedTable {
            physical: physical.clone(),
            path,
            row,
        })
    }
}
