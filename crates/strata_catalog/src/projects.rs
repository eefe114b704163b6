//! Project rows.

use chrono::Utc;
use strata_db::EngineValue;
use strata_protocol::types::{ProjectId, ProjectStatus, DEFAULT_BRANCH};

use crate::catalog::Catalog;
use crate::error::{CatalogError, Result};
use crate::models::{project_from_row, ProjectRow};

const SELECT_PROJECT: &str = "SELECT id, name, status, created_at FROM st_projects";

impl Catalog {
    /// Create a project together with its `default` branch.
    pub fn create_project(&self, id: &ProjectId, name: &str) -> Result<ProjectRow> {
        if self.get_project(id)?.is_some() {
            return Err(CatalogError::conflict(format!(
                "project '{id}' already exists"
            )));
        }
        let now = Utc::now();
        self.conn.transaction(|tx| {
            tx.execute(
                "INSERT INTO st_projects (id, name, status, created_at) VALUES (?, ?, 'active', ?)",
                &[
                    EngineValue::from(id.as_str()),
                    EngineValue::from(name),
                    EngineValue::from(now),
                ],
            )?;
            tx.execute(
                "INSERT INTO st_branches (project_id, id, created_at, created_by) VALUES (?, ?, ?, 'system')",
                &[
                    EngineValue::from(id.as_str()),
                    EngineValue::from(DEFAULT_BRANCH),
                    EngineValue::from(now),
                ],
            )?;
            Ok::<(), CatalogError>(())
        })?;
        Ok(ProjectRow {
            id: id.clone(),
            name: name.to_string(),
            status: ProjectStatus::Active,
            created_at: now,
        })
    }

    pub fn get_project(&self, id: &ProjectId) -> Result<Option<ProjectRow>> {
        let row = self.conn.query_optional(
            &format!("{SELECT_PROJECT} WHERE id = ?"),
            &[EngineValue::from(id.as_str())],
        )?;
        row.as_ref().map(project_from_row).transpose()
    }

    /// Get an active project or fail with `NotFound`.
    pub fn require_project(&self, id: &ProjectId) -> Result<ProjectRow> {
        match self.get_project(id)? {
            Some(row) if row.status == ProjectStatus::Active => Ok(row),
            _ => Err(CatalogError::not_found(format!("project '{id}'"))),
        }
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectRow>> {
        let rows = self.conn.query_all(
            &format!("{SELECT_PROJECT} WHERE status = 'active' ORDER BY id"),
            &[],
        )?;
        rows.iter().map(project_from_row).collect()
    }

    /// Remove a project and every row it owns. The caller removes files.
    pub fn delete_project(&self, id: &ProjectId) -> Result<()> {
        self.require_project(id)?;
        let p = EngineValue::from(id.as_str());
        self.conn.transaction(|tx| {
            tx.execute("DELETE FROM st_branch_tables WHERE project_id = ?", &[p.clone()])?;
            tx.execute("DELETE FROM st_tables WHERE project_id = ?", &[p.clone()])?;
            tx.execute("DELETE FROM st_bucket_shares WHERE project_id = ?", &[p.clone()])?;
            tx.execute("DELETE FROM st_buckets WHERE project_id = ?", &[p.clone()])?;
            tx.execute("DELETE FROM st_branches WHERE project_id = ?", &[p.clone()])?;
            tx.execute("DELETE FROM st_files WHERE project_id = ?", &[p.clone()])?;
            tx.execute("DELETE FROM st_snapshots WHERE project_id = ?", &[p.clone()])?;
            tx.execute("DELETE FROM st_settings WHERE project_id = ?", &[p.clone()])?;
            tx.execute("DELETE FROM st_api_keys WHERE project_id = ?", &[p.clone()])?;
            tx.execute("DELETE FROM st_projects WHERE id = ?", &[p.clone()])?;
            Ok::<(), CatalogError>(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ProjectId {
        ProjectId::new(s).unwrap()
    }

    #[test]
    fn create_get_list_delete() {
        let catalog = Catalog::open_memory().unwrap();
        let p1 = pid("p1");

        catalog.create_project(&p1, "Project One").unwrap();
        let row = catalog.get_project(&p1).unwrap().unwrap();
        assert_eq!(row.name, "Project One");
        assert_eq!(row.status, ProjectStatus::Active);

        // default branch created alongside
        assert!(catalog
            .get_branch(&p1, &strata_protocol::BranchId::default_branch())
            .unwrap()
            .is_some());

        assert_eq!(catalog.list_projects().unwrap().len(), 1);

        catalog.delete_project(&p1).unwrap();
        assert!(catalog.get_project(&p1).unwrap().is_none());
    }

    #[test]
    fn duplicate_project_conflicts() {
        let catalog = Catalog::open_memory().unwrap();
        let p1 = pid("p1");
        catalog.create_project(&p1, "one").unwrap();
        let err = catalog.create_project(&p1, "two").unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }
}
