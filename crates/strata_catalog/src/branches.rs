//! Branch rows and the overlay's copied/deleted sets.

use chrono::Utc;
use strata_db::EngineValue;
use strata_protocol::types::{BranchId, ProjectId};

use crate::catalog::Catalog;
use crate::error::{CatalogError, Result};
use crate::models::{branch_from_row, BranchRow, BranchTableState};

const SELECT_BRANCH: &str = "SELECT project_id, id, created_at, created_by FROM st_branches";

impl Catalog {
    pub fn create_branch(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        created_by: &str,
    ) -> Result<BranchRow> {
        if branch.is_default() {
            return Err(CatalogError::conflict("branch id 'default' is reserved"));
        }
        self.require_project(project)?;
        if self.get_branch(project, branch)?.is_some() {
            return Err(CatalogError::conflict(format!(
                "branch '{branch}' already exists in project '{project}'"
            )));
        }
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO st_branches (project_id, id, created_at, created_by) VALUES (?, ?, ?, ?)",
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(now),
                EngineValue::from(created_by),
            ],
        )?;
        Ok(BranchRow {
            project: project.clone(),
            id: branch.clone(),
            created_at: now,
            created_by: created_by.to_string(),
        })
    }

    pub fn get_branch(&self, project: &ProjectId, branch: &BranchId) -> Result<Option<BranchRow>> {
        let row = self.conn.query_optional(
            &format!("{SELECT_BRANCH} WHERE project_id = ? AND id = ?"),
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
            ],
        )?;
        row.as_ref().map(branch_from_row).transpose()
    }

    pub fn require_branch(&self, project: &ProjectId, branch: &BranchId) -> Result<BranchRow> {
        self.get_branch(project, branch)?.ok_or_else(|| {
            CatalogError::not_found(format!("branch '{branch}' in project '{project}'"))
        })
    }

    pub fn list_branches(&self, project: &ProjectId) -> Result<Vec<BranchRow>> {
        let rows = self.conn.query_all(
            &format!("{SELECT_BRANCH} WHERE project_id = ? ORDER BY id"),
            &[EngineValue::from(project.as_str())],
        )?;
        rows.iter().map(branch_from_row).collect()
    }

    /// Remove the branch row, its overlay sets, its buckets and table rows.
    pub fn delete_branch(&self, project: &ProjectId, branch: &BranchId) -> Result<()> {
        if branch.is_default() {
            return Err(CatalogError::conflict(
                "the default branch cannot be deleted",
            ));
        }
        self.require_branch(project, branch)?;
        let p = EngineValue::from(project.as_str());
        let b = EngineValue::from(branch.as_str());
        self.conn.transaction(|tx| {
            tx.execute(
                "DELETE FROM st_branch_tables WHERE project_id = ? AND branch_id = ?",
                &[p.clone(), b.clone()],
            )?;
            tx.execute(
                "DELETE FROM st_tables WHERE project_id = ? AND branch_id = ?",
                &[p.clone(), b.clone()],
            )?;
            tx.execute(
                "DELETE FROM st_buckets WHERE project_id = ? AND branch_id = ?",
                &[p.clone(), b.clone()],
            )?;
            tx.execute(
                "DELETE FROM st_branches WHERE project_id = ? AND id = ?",
                &[p.clone(), b.clone()],
            )?;
            Ok::<(), CatalogError>(())
        })?;
        Ok(())
    }

    /// Overlay state of a (bucket, table) in a branch, if any.
    pub fn branch_table_state(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
        table: &str,
    ) -> Result<Option<BranchTableState>> {
        let row = self.conn.query_optional(
            "SELECT state FROM st_branch_tables WHERE project_id = ? AND branch_id = ? AND bucket = ? AND table_name = ?",
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(bucket),
                EngineValue::from(table),
            ],
        )?;
        match row {
            Some(r) => {
                let raw: String = r.get("state")?;
                BranchTableState::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| CatalogError::corrupt(format!("branch table state '{raw}'")))
            }
            None => Ok(None),
        }
    }

    /// Upsert the overlay state of a (bucket, table) pair.
    pub fn set_branch_table_state(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
        table: &str,
        state: BranchTableState,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO st_branch_tables (project_id, branch_id, bucket, table_name, state)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(project_id, branch_id, bucket, table_name) DO UPDATE SET state = excluded.state
            "#,
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(bucket),
                EngineValue::from(table),
                EngineValue::from(state.as_str()),
            ],
        )?;
        Ok(())
    }

    pub fn clear_branch_table_state(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
        table: &str,
    ) -> Result<()> {
        self.conn.execute(
            "DELETE FROM st_branch_tables WHERE project_id = ? AND branch_id = ? AND bucket = ? AND table_name = ?",
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(bucket),
                EngineValue::from(table),
            ],
        )?;
        Ok(())
    }

    /// All (bucket, table) pairs of a branch in the given overlay state.
    pub fn list_branch_tables(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        state: BranchTableState,
    ) -> Result<Vec<(String, String)>> {
        let rows = self.conn.query_all(
            "SELECT bucket, table_name FROM st_branch_tables WHERE project_id = ? AND branch_id = ? AND state = ? ORDER BY bucket, table_name",
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(state.as_str()),
            ],
        )?;
        rows.iter()
            .map(|r| {
                let bucket: String = r.get("bucket")?;
                let table: String = r.get("table_name")?;
                Ok((bucket, table))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Catalog, ProjectId) {
        let catalog = Catalog::open_memory().unwrap();
        let p = ProjectId::new("p1").unwrap();
        catalog.create_project(&p, "p1").unwrap();
        (catalog, p)
    }

    #[test]
    fn branch_lifecycle() {
        let (catalog, p) = setup();
        let dev = BranchId::new("dev1").unwrap();

        catalog.create_branch(&p, &dev, "proj_p1_admin").unwrap();
        assert!(catalog.get_branch(&p, &dev).unwrap().is_some());

        // includes default
        assert_eq!(catalog.list_branches(&p).unwrap().len(), 2);

        catalog.delete_branch(&p, &dev).unwrap();
        assert!(catalog.get_branch(&p, &dev).unwrap().is_none());
    }

    #[test]
    fn default_branch_is_protected() {
        let (catalog, p) = setup();
        let default = BranchId::default_branch();
        assert!(catalog.create_branch(&p, &default, "x").is_err());
        assert!(catalog.delete_branch(&p, &default).is_err());
    }

    #[test]
    fn overlay_state_transitions() {
        let (catalog, p) = setup();
        let dev = BranchId::new("dev1").unwrap();
        catalog.create_branch(&p, &dev, "x").unwrap();

        assert_eq!(
            catalog.branch_table_state(&p, &dev, "in_c", "orders").unwrap(),
            None
        );

        catalog
            .set_branch_table_state(&p, &dev, "in_c", "orders", BranchTableState::Copied)
            .unwrap();
        assert_eq!(
            catalog.branch_table_state(&p, &dev, "in_c", "orders").unwrap(),
            Some(BranchTableState::Copied)
        );

        // copied -> deleted is an upsert
        catalog
            .set_branch_table_state(&p, &dev, "in_c", "orders", BranchTableState::Deleted)
            .unwrap();
        assert_eq!(
            catalog.branch_table_state(&p, &dev, "in_c", "orders").unwrap(),
            Some(BranchTableState::Deleted)
        );

        assert_eq!(
            catalog
                .list_branch_tables(&p, &dev, BranchTableState::Deleted)
                .unwrap(),
            vec![("in_c".to_string(), "orders".to_string())]
        );

        catalog
            .clear_branch_table_state(&p, &dev, "in_c", "orders")
            .unwrap();
        assert_eq!(
            catalog.branch_table_state(&p, &dev, "in_c", "orders").unwrap(),
            None
        );
    }
}
