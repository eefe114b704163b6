//! On-disk layout under the data root.
//!
//! ```text
//! metadata.duckdb                                   metadata catalog
//! <project>/<bucket>/<table>.duckdb                 production-branch tables
//! <project>_branch_<branch>/<bucket>/<table>.duckdb copy-on-write tables
//! _staging/<uuid>.duckdb                            transient staging files
//! files/<project>/<yyyy>/<mm>/<dd>/<id>_<name>      registered uploads
//! files/<project>/staging/<id>_<name>               staged uploads (TTL 24h)
//! snapshots/<project>/<snap-id>/{metadata.json, data.parquet}
//! ```

use chrono::{DateTime, Datelike, Utc};
use std::path::{Path, PathBuf};

use crate::types::{BranchId, ProjectId};

/// Engine file extension used across the layout.
pub const ENGINE_EXT: &str = "duckdb";

/// Resolver from logical names to filesystem paths.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The metadata catalog file.
    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(format!("metadata.{ENGINE_EXT}"))
    }

    /// Directory of a project branch. The default branch lives directly
    /// under the project directory; other branches get their own tree.
    pub fn branch_dir(&self, project: &ProjectId, branch: &BranchId) -> PathBuf {
        if branch.is_default() {
            self.root.join(project.as_str())
        } else {
            self.root
                .join(format!("{}_branch_{}", project.as_str(), branch.as_str()))
        }
    }

    pub fn bucket_dir(&self, project: &ProjectId, branch: &BranchId, bucket: &str) -> PathBuf {
        self.branch_dir(project, branch).join(bucket)
    }

    /// Path of a table's engine file on a branch (before overlay logic).
    pub fn table_path(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
        table: &str,
    ) -> PathBuf {
        self.bucket_dir(project, branch, bucket)
            .join(format!("{table}.{ENGINE_EXT}"))
    }

    /// Shared staging directory for transient engine files.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("_staging")
    }

    pub fn files_dir(&self, project: &ProjectId) -> PathBuf {
        self.root.join("files").join(project.as_str())
    }

    /// Final path for a registered upload, dated by registration time.
    pub fn file_path(
        &self,
        project: &ProjectId,
        registered_at: DateTime<Utc>,
        file_id: &str,
        name: &str,
    ) -> PathBuf {
        self.files_dir(project)
            .join(format!("{:04}", registered_at.year()))
            .join(format!("{:02}", registered_at.month()))
            .join(format!("{:02}", registered_at.day()))
            .join(format!("{file_id}_{name}"))
    }

    /// Staging area for uploads that have been prepared but not registered.
    pub fn file_staging_path(&self, project: &ProjectId, file_id: &str, name: &str) -> PathBuf {
        self.files_dir(project)
            .join("staging")
            .join(format!("{file_id}_{name}"))
    }

    pub fn snapshots_dir(&self, project: &ProjectId) -> PathBuf {
        self.root.join("snapshots").join(project.as_str())
    }

    pub fn snapshot_dir(&self, project: &ProjectId, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir(project).join(snapshot_id)
    }

    pub fn snapshot_data_path(&self, project: &ProjectId, snapshot_id: &str) -> PathBuf {
        self.snapshot_dir(project, snapshot_id).join("data.parquet")
    }

    pub fn snapshot_metadata_path(&self, project: &ProjectId, snapshot_id: &str) -> PathBuf {
        self.snapshot_dir(project, snapshot_id).join("metadata.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> DataLayout {
        DataLayout::new("/data")
    }

    fn p(id: &str) -> ProjectId {
        ProjectId::new(id).unwrap()
    }

    #[test]
    fn default_branch_tables_live_under_project() {
        let path = layout().table_path(&p("p1"), &BranchId::default_branch(), "in_c_sales", "orders");
        assert_eq!(
            path,
            PathBuf::from("/data/p1/in_c_sales/orders.duckdb")
        );
    }

    #[test]
    fn dev_branch_tables_live_in_branch_tree() {
        let branch = BranchId::new("dev1").unwrap();
        let path = layout().table_path(&p("p1"), &branch, "in_c_sales", "orders");
        assert_eq!(
            path,
            PathBuf::from("/data/p1_branch_dev1/in_c_sales/orders.duckdb")
        );
    }

    #[test]
    fn dated_file_path() {
        let ts = DateTime::parse_from_rfc3339("2026-03-05T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let path = layout().file_path(&p("p1"), ts, "abc", "export.csv");
        assert_eq!(
            path,
            PathBuf::from("/data/files/p1/2026/03/05/abc_export.csv")
        );
    }

    #[test]
    fn snapshot_layout() {
        let l = layout();
        assert_eq!(
            l.snapshot_data_path(&p("p1"), "snap_orders_20260305"),
            PathBuf::from("/data/snapshots/p1/snap_orders_20260305/data.parquet")
        );
        assert_eq!(
            l.snapshot_metadata_path(&p("p1"), "snap_orders_20260305"),
            PathBuf::from("/data/snapshots/p1/snap_orders_20260305/metadata.json")
        );
    }
}
