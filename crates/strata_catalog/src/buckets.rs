//! Bucket rows, shares, and links.

use chrono::Utc;
use strata_db::EngineValue;
use strata_protocol::types::{BranchId, BucketStage, ProjectId};

use crate::catalog::Catalog;
use crate::error::{CatalogError, Result};
use crate::models::{bucket_from_row, BucketRow};

const SELECT_BUCKET: &str = "SELECT project_id, branch_id, name, stage, linked_project, linked_bucket, created_at FROM st_buckets";

impl Catalog {
    pub fn create_bucket(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        name: &str,
        stage: BucketStage,
        linked_from: Option<(&ProjectId, &str)>,
    ) -> Result<BucketRow> {
        self.require_branch(project, branch)?;
        if self.get_bucket(project, branch, name)?.is_some() {
            return Err(CatalogError::conflict(format!(
                "bucket '{name}' already exists in branch '{branch}'"
            )));
        }
        if let Some((src_project, src_bucket)) = linked_from {
            // One-hop rule: the source bucket must not itself be a link.
            let src = self
                .get_bucket(src_project, &BranchId::default_branch(), src_bucket)?
                .ok_or_else(|| {
                    CatalogError::not_found(format!(
                        "source bucket '{src_bucket}' in project '{src_project}'"
                    ))
                })?;
            if src.linked_from.is_some() {
                return Err(CatalogError::conflict(
                    "linked buckets cannot be chained through another link",
                ));
            }
        }
        let now = Utc::now();
        self.conn.execute(
            r#"
            INSERT INTO st_buckets (project_id, branch_id, name, stage, linked_project, linked_bucket, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(name),
                EngineValue::from(stage.as_str()),
                EngineValue::from(linked_from.map(|(p, _)| p.as_str())),
                EngineValue::from(linked_from.map(|(_, b)| b)),
                EngineValue::from(now),
            ],
        )?;
        Ok(BucketRow {
            project: project.clone(),
            branch: branch.clone(),
            name: name.to_string(),
            stage,
            linked_from: linked_from.map(|(p, b)| (p.clone(), b.to_string())),
            created_at: now,
        })
    }

    pub fn get_bucket(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        name: &str,
    ) -> Result<Option<BucketRow>> {
        let row = self.conn.query_optional(
            &format!("{SELECT_BUCKET} WHERE project_id = ? AND branch_id = ? AND name = ?"),
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(name),
            ],
        )?;
        row.as_ref().map(bucket_from_row).transpose()
    }

    /// Bucket lookup honoring branch read-through: a dev branch sees the
    /// default branch's buckets unless it has created one of its own.
    pub fn resolve_bucket(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        name: &str,
    ) -> Result<Option<BucketRow>> {
        if let Some(row) = self.get_bucket(project, branch, name)? {
            return Ok(Some(row));
        }
        if !branch.is_default() {
            return self.get_bucket(project, &BranchId::default_branch(), name);
        }
        Ok(None)
    }

    pub fn require_bucket(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        name: &str,
    ) -> Result<BucketRow> {
        self.resolve_bucket(project, branch, name)?.ok_or_else(|| {
            CatalogError::not_found(format!("bucket '{name}' in project '{project}'"))
        })
    }

    pub fn list_buckets(&self, project: &ProjectId, branch: &BranchId) -> Result<Vec<BucketRow>> {
        let rows = self.conn.query_all(
            &format!("{SELECT_BUCKET} WHERE project_id = ? AND branch_id = ? ORDER BY name"),
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
            ],
        )?;
        rows.iter().map(bucket_from_row).collect()
    }

    /// Remove a bucket row; fails while tables remain in it.
    pub fn delete_bucket(&self, project: &ProjectId, branch: &BranchId, name: &str) -> Result<()> {
        if self
            .get_bucket(project, branch, name)?
            .is_none()
        {
            return Err(CatalogError::not_found(format!("bucket '{name}'")));
        }
        let remaining: i64 = self.conn.query_scalar(
            "SELECT COUNT(*) FROM st_tables WHERE project_id = ? AND branch_id = ? AND bucket = ?",
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(name),
            ],
        )?;
        if remaining > 0 {
            return Err(CatalogError::conflict(format!(
                "bucket '{name}' still holds {remaining} tables"
            )));
        }
        self.conn.transaction(|tx| {
            // Shares only exist for default-branch buckets.
            if branch.is_default() {
                tx.execute(
                    "DELETE FROM st_bucket_shares WHERE project_id = ? AND bucket = ?",
                    &[
                        EngineValue::from(project.as_str()),
                        EngineValue::from(name),
                    ],
                )?;
            }
            tx.execute(
                "DELETE FROM st_buckets WHERE project_id = ? AND branch_id = ? AND name = ?",
                &[
                    EngineValue::from(project.as_str()),
                    EngineValue::from(branch.as_str()),
                    EngineValue::from(name),
                ],
            )?;
            Ok::<(), CatalogError>(())
        })?;
        Ok(())
    }

    /// Share a default-branch bucket with other projects.
    pub fn share_bucket(
        &self,
        project: &ProjectId,
        bucket: &str,
        with_projects: &[ProjectId],
    ) -> Result<()> {
        let now = Utc::now();
        for target in with_projects {
            self.conn.execute(
                r#"
                INSERT INTO st_bucket_shares (project_id, bucket, shared_with, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(project_id, bucket, shared_with) DO NOTHING
                "#,
                &[
                    EngineValue::from(project.as_str()),
                    EngineValue::from(bucket),
                    EngineValue::from(target.as_str()),
                    EngineValue::from(now),
                ],
            )?;
        }
        Ok(())
    }

    pub fn list_bucket_shares(&self, project: &ProjectId, bucket: &str) -> Result<Vec<String>> {
        let rows = self.conn.query_all(
            "SELECT shared_with FROM st_bucket_shares WHERE project_id = ? AND bucket = ? ORDER BY shared_with",
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(bucket),
            ],
        )?;
        rows.iter()
            .map(|r| Ok(r.get::<String>("shared_with")?))
            .collect()
    }

    /// True when `bucket` of `owner` is shared with `reader`.
    pub fn bucket_shared_with(
        &self,
        owner: &ProjectId,
        bucket: &str,
        reader: &ProjectId,
    ) -> Result<bool> {
        let row = self.conn.query_optional(
            "SELECT 1 FROM st_bucket_shares WHERE project_id = ? AND bucket = ? AND shared_with = ?",
            &[
                EngineValue::from(owner.as_str()),
                EngineValue::from(bucket),
                EngineValue::from(reader.as_str()),
            ],
        )?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Catalog, ProjectId, BranchId) {
        let catalog = Catalog::open_memory().unwrap();
        let p = ProjectId::new("p1").unwrap();
        catalog.create_project(&p, "p1").unwrap();
        (catalog, p, BranchId::default_branch())
    }

    #[test]
    fn bucket_lifecycle() {
        let (catalog, p, b) = setup();
        catalog
            .create_bucket(&p, &b, "in_c_sales", BucketStage::In, None)
            .unwrap();
        assert!(catalog.get_bucket(&p, &b, "in_c_sales").unwrap().is_some());
        assert_eq!(catalog.list_buckets(&p, &b).unwrap().len(), 1);

        let err = catalog
            .create_bucket(&p, &b, "in_c_sales", BucketStage::In, None)
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));

        catalog.delete_bucket(&p, &b, "in_c_sales").unwrap();
        assert!(catalog.get_bucket(&p, &b, "in_c_sales").unwrap().is_none());
    }

    #[test]
    fn link_chain_is_rejected() {
        let (catalog, p1, b) = setup();
        let p2 = ProjectId::new("p2").unwrap();
        catalog.create_project(&p2, "p2").unwrap();

        catalog
            .create_bucket(&p1, &b, "in_src", BucketStage::In, None)
            .unwrap();
        catalog
            .create_bucket(&p2, &b, "in_linked", BucketStage::In, Some((&p1, "in_src")))
            .unwrap();

        // p1 tries to link to p2's link: two hops, refused
        let err = catalog
            .create_bucket(
                &p1,
                &b,
                "in_chained",
                BucketStage::In,
                Some((&p2, "in_linked")),
            )
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[test]
    fn shares_roundtrip() {
        let (catalog, p1, b) = setup();
        let p2 = ProjectId::new("p2").unwrap();
        catalog.create_project(&p2, "p2").unwrap();
        catalog
            .create_bucket(&p1, &b, "out_pub", BucketStage::Out, None)
            .unwrap();

        catalog
            .share_bucket(&p1, "out_pub", std::slice::from_ref(&p2))
            .unwrap();
        assert!(catalog.bucket_shared_with(&p1, "out_pub", &p2).unwrap());
        assert_eq!(
            catalog.list_bucket_shares(&p1, "out_pub").unwrap(),
            vec!["p2".to_string()]
        );

        // idempotent
        catalog
            .share_bucket(&p1, "out_pub", std::slice::from_ref(&p2))
            .unwrap();
    }

    #[test]
    fn dev_branch_reads_through_to_default_buckets() {
        let (catalog, p, b) = setup();
        catalog
            .create_bucket(&p, &b, "in_c", BucketStage::In, None)
            .unwrap();
        let dev = BranchId::new("dev1").unwrap();
        catalog.create_branch(&p, &dev, "x").unwrap();

        assert!(catalog.resolve_bucket(&p, &dev, "in_c").unwrap().is_some());
        assert!(catalog.get_bucket(&p, &dev, "in_c").unwrap().is_none());
    }
}
