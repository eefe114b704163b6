//! Bucket operations.

use strata_protocol::http_types::{BucketInfo, BucketLink, CreateBucketRequest};
use strata_protocol::naming::validate_bucket_name;
use strata_protocol::{BranchId, ProjectId, StorageError};

use crate::audit::{AuditScope, RequestContext};
use crate::auth::Principal;
use crate::errors::map_catalog_err;

use super::StorageService;

impl StorageService {
    pub fn create_bucket(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        project: &ProjectId,
        branch: &BranchId,
        req: &CreateBucketRequest,
    ) -> Result<BucketInfo, StorageError> {
        principal.authorize_project(project)?;
        validate_bucket_name(&req.name).map_err(StorageError::invalid_argument)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "bucket.create",
            "bucket",
            req.name.clone(),
            Some(project.clone()),
        );
        let result = self.create_bucket_inner(principal, project, branch, req);
        scope.finish(&result);
        result
    }

    fn create_bucket_inner(
        &self,
        principal: &Principal,
        project: &ProjectId,
        branch: &BranchId,
        req: &CreateBucketRequest,
    ) -> Result<BucketInfo, StorageError> {
        self.catalog
            .require_branch(project, branch)
            .map_err(map_catalog_err)?;

        let linked_source = match &req.linked_from {
            Some(link) => {
                if !branch.is_default() {
                    return Err(StorageError::invalid_argument(
                        "linked buckets can only be created in the default branch",
                    ));
                }
                let src_project = ProjectId::new(link.project.as_str())
                    .map_err(|e| StorageError::invalid_argument(e.to_string()))?;
                // Linking needs the source shared with this project (the
                // system key bypasses the share check).
                if *principal != Principal::System
                    && src_project != *project
                    && !self
                        .catalog
                        .bucket_shared_with(&src_project, &link.bucket, project)
                        .map_err(map_catalog_err)?
                {
                    return Err(StorageError::permission_denied(format!(
                        "bucket '{}' of project '{}' is not shared with '{}'",
                        link.bucket, src_project, project
                    )));
                }
                Some((src_project, link.bucket.clone()))
            }
            None => None,
        };

        let row = self
            .catalog
            .create_bucket(
                project,
                branch,
                &req.name,
                req.stage,
                linked_source.as_ref().map(|(p, b)| (p, b.as_str())),
            )
            .map_err(map_catalog_err)?;

        // Linked buckets own no directory; plain buckets get one.
        if row.linked_from.is_none() {
            let dir = self.layout.bucket_dir(project, branch, &req.name);
            std::fs::create_dir_all(&dir).map_err(|e| {
                StorageError::internal("cannot create bucket directory").with_details(e.to_string())
            })?;
        }

        self.bucket_info(&row)
    }

    pub fn get_bucket(
        &self,
        principal: &Principal,
        project: &ProjectId,
        branch: &BranchId,
        name: &str,
    ) -> Result<BucketInfo, StorageError> {
        principal.authorize_project(project)?;
        let row = self
            .catalog
            .require_bucket(project, branch, name)
            .map_err(map_catalog_err)?;
        self.bucket_info(&row)
    }

    pub fn list_buckets(
        &self,
        principal: &Principal,
        project: &ProjectId,
        branch: &BranchId,
    ) -> Result<Vec<BucketInfo>, StorageError> {
        principal.authorize_project(project)?;
        self.catalog
            .require_branch(project, branch)
            .map_err(map_catalog_err)?;
        // A dev branch sees the default branch's buckets plus its own.
        let mut rows = self
            .catalog
            .list_buckets(project, branch)
            .map_err(map_catalog_err)?;
        if !branch.is_default() {
            let base = self
                .catalog
                .list_buckets(project, &BranchId::default_branch())
                .map_err(map_catalog_err)?;
            for bucket in base {
                if !rows.iter().any(|r| r.name == bucket.name) {
                    rows.push(bucket);
                }
            }
            rows.sort_by(|a, b| a.name.cmp(&b.name));
        }
        rows.iter().map(|r| self.bucket_info(r)).collect()
    }

    pub fn delete_bucket(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        project: &ProjectId,
        branch: &BranchId,
        name: &str,
    ) -> Result<(), StorageError> {
        principal.authorize_project(project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "bucket.delete",
            "bucket",
            name.to_string(),
            Some(project.clone()),
        );
        let result = self.delete_bucket_inner(project, branch, name);
        scope.finish(&result);
        result
    }

    fn delete_bucket_inner(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        name: &str,
    ) -> Result<(), StorageError> {
        let row = self
            .catalog
            .get_bucket(project, branch, name)
            .map_err(map_catalog_err)?
            .ok_or_else(|| StorageError::not_found(format!("bucket '{name}'")))?;
        self.catalog
            .delete_bucket(project, branch, name)
            .map_err(map_catalog_err)?;
        if row.linked_from.is_none() {
            let dir = self.layout.bucket_dir(project, branch, name);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::internal("failed to remove bucket directory")
                        .with_details(e.to_string()))
                }
            }
        }
        Ok(())
    }

    /// Share a default-branch bucket with other projects.
    pub fn share_bucket(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        project: &ProjectId,
        bucket: &str,
        with_projects: &[String],
    ) -> Result<BucketInfo, StorageError> {
        principal.authorize_project(project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "bucket.share",
            "bucket",
            bucket.to_string(),
            Some(project.clone()),
        );
        let result = self.share_bucket_inner(project, bucket, with_projects);
        scope.finish(&result);
        result
    }

    fn share_bucket_inner(
        &self,
        project: &ProjectId,
        bucket: &str,
        with_projects: &[String],
    ) -> Result<BucketInfo, StorageError> {
        let row = self
            .catalog
            .require_bucket(project, &BranchId::default_branch(), bucket)
            .map_err(map_catalog_err)?;
        if row.linked_from.is_some() {
            return Err(StorageError::invalid_argument(
                "a linked bucket cannot be shared onward",
            ));
        }
        let targets: Vec<ProjectId> = with_projects
            .iter()
            .map(|raw| {
                ProjectId::new(raw.as_str())
                    .map_err(|e| StorageError::invalid_argument(e.to_string()))
            })
            .collect::<Result<_, _>>()?;
        for target in &targets {
            self.catalog.require_project(target).map_err(map_catalog_err)?;
        }
        self.catalog
            .share_bucket(project, bucket, &targets)
            .map_err(map_catalog_err)?;
        self.bucket_info(&row)
    }

    fn bucket_info(&self, row: &strata_catalog::BucketRow) -> Result<BucketInfo, StorageError> {
        let shared_with = if row.branch.is_default() {
            self.catalog
                .list_bucket_shares(&row.project, &row.name)
                .map_err(map_catalog_err)?
        } else {
            Vec::new()
        };
        Ok(BucketInfo {
            name: row.name.clone(),
            stage: row.stage,
            created_at: row.created_at,
            linked_from: row.linked_from.as_ref().map(|(p, b)| BucketLink {
                project: p.to_string(),
                bucket: b.clone(),
            }),
            shared_with,
        })
    }
}
