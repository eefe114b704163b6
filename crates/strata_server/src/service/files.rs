//! Uploaded file lifecycle: prepare → upload (external) → register → use.

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use strata_catalog::FileRow;
use strata_protocol::http_types::{FileInfo, PrepareFileRequest, PrepareFileResponse};
use strata_protocol::{ProjectId, StorageError};
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditScope, RequestContext};
use crate::auth::Principal;
use crate::config::STAGING_MAX_AGE_HOURS;
use crate::errors::map_catalog_err;

use super::StorageService;

pub(crate) fn file_info(row: &FileRow) -> FileInfo {
    FileInfo {
        id: row.id.clone(),
        name: row.name.clone(),
        path: row.rel_path.clone(),
        size_bytes: row.size_bytes as u64,
        sha256: row.sha256.clone(),
        content_type: row.content_type.clone(),
        is_staging: row.is_staging,
        created_at: row.created_at,
        expires_at: row.expires_at,
    }
}

impl StorageService {
    /// Allocate a staged upload slot: an id and a path the uploader writes
    /// into. Unregistered slots expire after 24 h.
    pub fn prepare_file(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        project: &ProjectId,
        req: &PrepareFileRequest,
    ) -> Result<PrepareFileResponse, StorageError> {
        principal.authorize_project(project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "file.prepare",
            "file",
            req.name.clone(),
            Some(project.clone()),
        );
        let result = self.prepare_file_inner(project, req);
        scope.finish(&result);
        result
    }

    fn prepare_file_inner(
        &self,
        project: &ProjectId,
        req: &PrepareFileRequest,
    ) -> Result<PrepareFileResponse, StorageError> {
        if req.name.is_empty() || req.name.contains('/') || req.name.contains('\\') {
            return Err(StorageError::invalid_argument("invalid file name"));
        }
        self.catalog.require_project(project).map_err(map_catalog_err)?;

        let id = Uuid::new_v4().to_string();
        let staging_path = self.layout.file_staging_path(project, &id, &req.name);
        if let Some(parent) = staging_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::internal("cannot create file staging directory")
                    .with_details(e.to_string())
            })?;
        }
        let expires_at = Utc::now() + Duration::hours(STAGING_MAX_AGE_HOURS);
        let rel = self.rel_path(&staging_path)?;
        self.catalog
            .insert_staged_file(
                &id,
                project,
                &req.name,
                &rel,
                req.content_type.as_deref(),
                expires_at,
            )
            .map_err(map_catalog_err)?;
        Ok(PrepareFileResponse {
            id,
            staging_path: staging_path.display().to_string(),
            expires_at,
        })
    }

    /// Finalize an uploaded file: checksum, size, move into the dated tree.
    pub fn register_file(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        project: &ProjectId,
        file_id: &str,
    ) -> Result<FileInfo, StorageError> {
        principal.authorize_project(project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "file.register",
            "file",
            file_id.to_string(),
            Some(project.clone()),
        );
        let result = self.register_file_inner(project, file_id);
        scope.finish(&result);
        result
    }

    fn register_file_inner(
        &self,
        project: &ProjectId,
        file_id: &str,
    ) -> Result<FileInfo, StorageError> {
        let row = self.catalog.require_file(file_id).map_err(map_catalog_err)?;
        if &row.project != project {
            return Err(StorageError::not_found(format!("file '{file_id}'")));
        }
        if !row.is_staging {
            return Err(StorageError::conflict(format!(
                "file '{file_id}' is already registered"
            )));
        }
        let staging_path = self.abs_path(&row.rel_path);
        if !staging_path.exists() {
            return Err(StorageError::invalid_argument(format!(
                "file '{file_id}' has not been uploaded"
            )));
        }

        let (size, sha256) = digest_file(&staging_path)?;
        let now = Utc::now();
        let final_path = self.layout.file_path(project, now, file_id, &row.name);
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::internal("cannot create files directory").with_details(e.to_string())
            })?;
        }
        std::fs::rename(&staging_path, &final_path).map_err(|e| {
            StorageError::internal("cannot move uploaded file").with_details(e.to_string())
        })?;

        let rel = self.rel_path(&final_path)?;
        let row = self
            .catalog
            .register_file(file_id, &rel, size as i64, &sha256)
            .map_err(map_catalog_err)?;
        info!("Registered file {} ({} bytes)", file_id, size);
        Ok(file_info(&row))
    }

    pub fn get_file(
        &self,
        principal: &Principal,
        project: &ProjectId,
        file_id: &str,
    ) -> Result<FileInfo, StorageError> {
        principal.authorize_project(project)?;
        let row = self.catalog.require_file(file_id).map_err(map_catalog_err)?;
        if &row.project != project {
            return Err(StorageError::not_found(format!("file '{file_id}'")));
        }
        Ok(file_info(&row))
    }

    pub fn list_files(
        &self,
        principal: &Principal,
        project: &ProjectId,
    ) -> Result<Vec<FileInfo>, StorageError> {
        principal.authorize_project(project)?;
        self.catalog.require_project(project).map_err(map_catalog_err)?;
        let rows = self.catalog.list_files(project).map_err(map_catalog_err)?;
        Ok(rows.iter().map(file_info).collect())
    }

    pub fn delete_file(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        project: &ProjectId,
        file_id: &str,
    ) -> Result<(), StorageError> {
        principal.authorize_project(project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "file.delete",
            "file",
            file_id.to_string(),
            Some(project.clone()),
        );
        let result = (|| {
            let row = self.catalog.require_file(file_id).map_err(map_catalog_err)?;
            if &row.project != project {
                return Err(StorageError::not_found(format!("file '{file_id}'")));
            }
            let path = self.abs_path(&row.rel_path);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(
                        StorageError::internal("cannot delete file").with_details(e.to_string())
                    )
                }
            }
            self.catalog.delete_file_row(file_id).map_err(map_catalog_err)?;
            Ok(())
        })();
        scope.finish(&result);
        result
    }

    /// Absolute path of a registered file (import sources).
    pub(crate) fn resolve_file_source(
        &self,
        project: &ProjectId,
        file_id: &str,
    ) -> Result<PathBuf, StorageError> {
        let row = self.catalog.require_file(file_id).map_err(map_catalog_err)?;
        if &row.project != project {
            return Err(StorageError::not_found(format!("file '{file_id}'")));
        }
        let path = self.abs_path(&row.rel_path);
        if !path.exists() {
            return Err(StorageError::not_found(format!(
                "file '{file_id}' is missing on disk"
            )));
        }
        Ok(path)
    }

    pub(crate) fn abs_path(&self, rel: &str) -> PathBuf {
        self.layout.root().join(rel)
    }

    pub(crate) fn rel_path(&self, abs: &Path) -> Result<String, StorageError> {
        abs.strip_prefix(self.layout.root())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .map_err(|_| StorageError::internal("path escapes the data root"))
    }
}

/// Stream a file through SHA-256.
pub(crate) fn digest_file(path: &Path) -> Result<(u64, String), StorageError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| StorageError::internal("cannot open file").with_details(e.to_string()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| StorageError::internal("cannot read file").with_details(e.to_string()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, format!("{:x}", hasher.finalize())))
}
