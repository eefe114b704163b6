//! Branch operations.

use strata_catalog::BranchTableState;
use strata_protocol::http_types::{BranchInfo, BranchTableRef, DeleteBranchResponse};
use strata_protocol::{BranchId, ProjectId, StorageError, TableRef};

use crate::audit::{AuditScope, RequestContext};
use crate::auth::Principal;
use crate::errors::map_catalog_err;

use super::StorageService;

impl StorageService {
    pub fn create_branch(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        project: &ProjectId,
        branch_id: &str,
    ) -> Result<BranchInfo, StorageError> {
        principal.authorize_project(project)?;
        let branch = BranchId::new(branch_id)
            .map_err(|e| StorageError::invalid_argument(e.to_string()))?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "branch.create",
            "branch",
            branch.to_string(),
            Some(project.clone()),
        );
        let result = self
            .catalog
            .create_branch(project, &branch, &ctx.actor)
            .map_err(map_catalog_err)
            .and_then(|row| self.branch_info(&row));
        scope.finish(&result);
        result
    }

    pub fn get_branch(
        &self,
        principal: &Principal,
        project: &ProjectId,
        branch: &BranchId,
    ) -> Result<BranchInfo, StorageError> {
        principal.authorize_project(project)?;
        let row = self
            .catalog
            .require_branch(project, branch)
            .map_err(map_catalog_err)?;
        self.branch_info(&row)
    }

    pub fn list_branches(
        &self,
        principal: &Principal,
        project: &ProjectId,
    ) -> Result<Vec<BranchInfo>, StorageError> {
        principal.authorize_project(project)?;
        self.catalog.require_project(project).map_err(map_catalog_err)?;
        let rows = self
            .catalog
            .list_branches(project)
            .map_err(map_catalog_err)?;
        rows.iter().map(|r| self.branch_info(r)).collect()
    }

    /// Delete a branch. Branch-local tables are discarded — callers needing
    /// them must export first. Locks all copied tables in the global order
    /// before touching files.
    pub async fn delete_branch(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        project: &ProjectId,
        branch: &BranchId,
    ) -> Result<DeleteBranchResponse, StorageError> {
        principal.authorize_project(project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "branch.delete",
            "branch",
            branch.to_string(),
            Some(project.clone()),
        );
        let result = self.delete_branch_inner(project, branch).await;
        scope.finish(&result);
        result
    }

    async fn delete_branch_inner(
        &self,
        project: &ProjectId,
        branch: &BranchId,
    ) -> Result<DeleteBranchResponse, StorageError> {
        let copied = self
            .catalog
            .list_branch_tables(project, branch, BranchTableState::Copied)
            .map_err(map_catalog_err)?;
        let tables: Vec<TableRef> = copied
            .iter()
            .map(|(bucket, table)| {
                TableRef::new(project.clone(), branch.clone(), bucket.clone(), table.clone())
            })
            .collect();
        let _leases = self
            .locks
            .acquire_write_many(&tables, self.config.lock_timeout)
            .await?;

        let project = project.clone();
        let branch_owned = branch.clone();
        let discarded = self
            .run_blocking(move |svc| svc.overlay.delete_branch(&project, &branch_owned))
            .await?;

        Ok(DeleteBranchResponse {
            id: branch.to_string(),
            discarded_tables: discarded
                .into_iter()
                .map(|(bucket, table)| BranchTableRef { bucket, table })
                .collect(),
        })
    }

    fn branch_info(&self, row: &strata_catalog::BranchRow) -> Result<BranchInfo, StorageError> {
        let copied = self
            .catalog
            .list_branch_tables(&row.project, &row.id, BranchTableState::Copied)
            .map_err(map_catalog_err)?;
        let deleted = self
            .catalog
            .list_branch_tables(&row.project, &row.id, BranchTableState::Deleted)
            .map_err(map_catalog_err)?;
        Ok(BranchInfo {
            id: row.id.to_string(),
            project: row.project.to_string(),
            created_at: row.created_at,
            created_by: row.created_by.clone(),
            copied: copied
                .into_iter()
                .map(|(bucket, table)| BranchTableRef { bucket, table })
                .collect(),
            deleted: deleted
                .into_iter()
                .map(|(bucket, table)| BranchTableRef { bucket, table })
                .collect(),
        })
    }
}
