//! Project operations.

use strata_protocol::http_types::{ProjectInfo, ProjectStats};
use strata_protocol::{ProjectId, StorageError};
use tracing::info;

use crate::audit::{AuditScope, RequestContext};
use crate::auth::{generate_project_key, hash_key, Principal};
use crate::errors::{map_catalog_err, map_engine_err};
use crate::sql;

use super::StorageService;

fn project_info(row: &strata_catalog::ProjectRow, api_key: Option<String>) -> ProjectInfo {
    ProjectInfo {
        id: row.id.to_string(),
        name: row.name.clone(),
        status: row.status,
        created_at: row.created_at,
        api_key,
    }
}

impl StorageService {
    /// Create a project (system admin only). The response carries the
    /// project admin key exactly once.
    pub fn create_project(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        id: &str,
        name: Option<&str>,
    ) -> Result<ProjectInfo, StorageError> {
        principal.require_system()?;
        let project = ProjectId::new(id)
            .map_err(|e| StorageError::invalid_argument(e.to_string()))?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "project.create",
            "project",
            project.to_string(),
            Some(project.clone()),
        );
        let result = self.create_project_inner(&project, name.unwrap_or(id));
        scope.finish(&result);
        result
    }

    fn create_project_inner(
        &self,
        project: &ProjectId,
        name: &str,
    ) -> Result<ProjectInfo, StorageError> {
        let row = self
            .catalog
            .create_project(project, name)
            .map_err(map_catalog_err)?;

        let key = generate_project_key(project);
        self.catalog
            .insert_api_key(&hash_key(&key), project)
            .map_err(map_catalog_err)?;

        std::fs::create_dir_all(self.layout.branch_dir(project, &strata_protocol::BranchId::default_branch()))
            .map_err(|e| StorageError::internal("cannot create project directory").with_details(e.to_string()))?;

        info!("Created project '{}'", project);
        Ok(project_info(&row, Some(key)))
    }

    pub fn get_project(
        &self,
        principal: &Principal,
        id: &ProjectId,
    ) -> Result<ProjectInfo, StorageError> {
        principal.authorize_project(id)?;
        let row = self.catalog.require_project(id).map_err(map_catalog_err)?;
        Ok(project_info(&row, None))
    }

    /// System keys list everything; a project key sees only its own project.
    pub fn list_projects(&self, principal: &Principal) -> Result<Vec<ProjectInfo>, StorageError> {
        let rows = self.catalog.list_projects().map_err(map_catalog_err)?;
        let rows = match principal {
            Principal::System => rows,
            Principal::Project(own) => rows.into_iter().filter(|r| &r.id == own).collect(),
        };
        Ok(rows.iter().map(|r| project_info(r, None)).collect())
    }

    /// Delete a project and everything it owns: files on disk first, then
    /// the catalog cascade.
    pub fn delete_project(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        id: &ProjectId,
    ) -> Result<(), StorageError> {
        principal.require_system()?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "project.delete",
            "project",
            id.to_string(),
            Some(id.clone()),
        );
        let result = self.delete_project_inner(id);
        scope.finish(&result);
        result
    }

    fn delete_project_inner(&self, id: &ProjectId) -> Result<(), StorageError> {
        self.catalog.require_project(id).map_err(map_catalog_err)?;

        // Branch trees, uploads, snapshots. Missing directories are fine:
        // the operation is idempotent on re-run.
        let branches = self.catalog.list_branches(id).map_err(map_catalog_err)?;
        for branch in branches {
            let dir = self.layout.branch_dir(id, &branch.id);
            remove_dir_if_present(&dir)?;
        }
        remove_dir_if_present(&self.layout.files_dir(id))?;
        remove_dir_if_present(&self.layout.snapshots_dir(id))?;

        self.catalog.delete_project(id).map_err(map_catalog_err)?;
        info!("Deleted project '{}'", id);
        Ok(())
    }

    /// Recompute per-project row counts and sizes from the files; the
    /// catalog only caches these numbers.
    pub fn project_stats(
        &self,
        principal: &Principal,
        id: &ProjectId,
    ) -> Result<ProjectStats, StorageError> {
        principal.authorize_project(id)?;
        self.catalog.require_project(id).map_err(map_catalog_err)?;

        let mut stats = ProjectStats {
            buckets: 0,
            tables: 0,
            rows: 0,
            bytes: 0,
        };
        let branches = self.catalog.list_branches(id).map_err(map_catalog_err)?;
        for branch in &branches {
            let buckets = self
                .catalog
                .list_buckets(id, &branch.id)
                .map_err(map_catalog_err)?;
            stats.buckets += buckets.len() as u64;
            for bucket in &buckets {
                let tables = self
                    .catalog
                    .list_tables(id, &branch.id, &bucket.name)
                    .map_err(map_catalog_err)?;
                for table in tables {
                    stats.tables += 1;
                    let path =
                        self.layout
                            .table_path(id, &branch.id, &bucket.name, &table.name);
                    if !path.exists() {
                        continue;
                    }
                    let conn = strata_db::EngineConnection::open_read(&path)
                        .map_err(map_engine_err)?;
                    let rows = sql::count_rows(&conn)?;
                    stats.rows += rows as u64;
                    stats.bytes += sql::file_size(&path);
                    self.catalog
                        .update_table_stats(
                            id,
                            &branch.id,
                            &bucket.name,
                            &table.name,
                            rows,
                            sql::file_size(&path) as i64,
                        )
                        .map_err(map_catalog_err)?;
                }
            }
        }
        Ok(stats)
    }
}

fn remove_dir_if_present(dir: &std::path::Path) -> Result<(), StorageError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::internal("failed to remove directory").with_details(e.to_string())),
    }
}
