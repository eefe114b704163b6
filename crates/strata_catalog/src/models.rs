//! Catalog row models and row converters.

use chrono::{DateTime, Utc};
use strata_db::EngineRow;
use strata_protocol::types::{
    BranchId, BucketStage, ColumnSpec, ProjectId, ProjectStatus, SnapshotKind, TableStatus,
};

use crate::error::{CatalogError, Result};

#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub id: ProjectId,
    pub name: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BranchRow {
    pub project: ProjectId,
    pub id: BranchId,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Overlay state of a (bucket, table) pair in a dev branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchTableState {
    /// Copied-on-write into the branch; the branch file is authoritative.
    Copied,
    /// Hidden: the default-branch table is invisible in this branch.
    Deleted,
}

impl BranchTableState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copied => "copied",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "copied" => Some(Self::Copied),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BucketRow {
    pub project: ProjectId,
    pub branch: BranchId,
    pub name: String,
    pub stage: BucketStage,
    pub linked_from: Option<(ProjectId, String)>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TableRow {
    pub project: ProjectId,
    pub branch: BranchId,
    pub bucket: String,
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    pub status: TableStatus,
    pub row_count: Option<i64>,
    pub size_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: String,
    pub project: ProjectId,
    pub name: String,
    pub rel_path: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub content_type: Option<String>,
    pub is_staging: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub id: String,
    pub project: ProjectId,
    pub bucket: String,
    pub table: String,
    pub kind: SnapshotKind,
    pub rel_path: String,
    pub row_count: i64,
    pub size_bytes: i64,
    pub schema: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub expires_at: DateTime<Utc>,
    pub description: Option<String>,
}

pub(crate) fn project_from_row(row: &EngineRow) -> Result<ProjectRow> {
    let id: String = row.get("id")?;
    let status: String = row.get("status")?;
    Ok(ProjectRow {
        id: parse_project_id(&id)?,
        name: row.get("name")?,
        status: match status.as_str() {
            "active" => ProjectStatus::Active,
            "deleted" => ProjectStatus::Deleted,
            other => return Err(CatalogError::corrupt(format!("project status '{other}'"))),
        },
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn branch_from_row(row: &EngineRow) -> Result<BranchRow> {
    let project: String = row.get("project_id")?;
    let id: String = row.get("id")?;
    Ok(BranchRow {
        project: parse_project_id(&project)?,
        id: parse_branch_id(&id)?,
        created_at: row.get("created_at")?,
        created_by: row.get("created_by")?,
    })
}

pub(crate) fn bucket_from_row(row: &EngineRow) -> Result<BucketRow> {
    let project: String = row.get("project_id")?;
    let branch: String = row.get("branch_id")?;
    let stage: String = row.get("stage")?;
    let linked_project: Option<String> = row.get("linked_project")?;
    let linked_bucket: Option<String> = row.get("linked_bucket")?;
    let linked_from = match (linked_project, linked_bucket) {
        (Some(p), Some(b)) => Some((parse_project_id(&p)?, b)),
        (None, None) => None,
        _ => {
            return Err(CatalogError::corrupt(
                "bucket link has project without bucket (or vice versa)",
            ))
        }
    };
    Ok(BucketRow {
        project: parse_project_id(&project)?,
        branch: parse_branch_id(&branch)?,
        name: row.get("name")?,
        stage: BucketStage::parse(&stage)
            .ok_or_else(|| CatalogError::corrupt(format!("bucket stage '{stage}'")))?,
        linked_from,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn table_from_row(row: &EngineRow) -> Result<TableRow> {
    let project: String = row.get("project_id")?;
    let branch: String = row.get("branch_id")?;
    let columns_json: String = row.get("columns_json")?;
    let primary_key_json: String = row.get("primary_key_json")?;
    let status: String = row.get("status")?;
    Ok(TableRow {
        project: parse_project_id(&project)?,
        branch: parse_branch_id(&branch)?,
        bucket: row.get("bucket")?,
        name: row.get("name")?,
        columns: serde_json::from_str(&columns_json)?,
        primary_key: serde_json::from_str(&primary_key_json)?,
        status: TableStatus::parse(&status)
            .ok_or_else(|| CatalogError::corrupt(format!("table status '{status}'")))?,
        row_count: row.get("row_count")?,
        size_bytes: row.get("size_bytes")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn file_from_row(row: &EngineRow) -> Result<FileRow> {
    let project: String = row.get("project_id")?;
    Ok(FileRow {
        id: row.get("id")?,
        project: parse_project_id(&project)?,
        name: row.get("name")?,
        rel_path: row.get("rel_path")?,
        size_bytes: row.get("size_bytes")?,
        sha256: row.get("sha256")?,
        content_type: row.get("content_type")?,
        is_staging: row.get("is_staging")?,
        created_at: row.get("created_at")?,
        expires_at: row.get("expires_at")?,
    })
}

pub(crate) fn snapshot_from_row(row: &EngineRow) -> Result<SnapshotRow> {
    let project: String = row.get("project_id")?;
    let kind: String = row.get("kind")?;
    let schema_json: String = row.get("schema_json")?;
    let primary_key_json: String = row.get("primary_key_json")?;
    Ok(SnapshotRow {
        id: row.get("id")?,
        project: parse_project_id(&project)?,
        bucket: row.get("bucket")?,
        table: row.get("table_name")?,
        kind: SnapshotKind::parse(&kind)
            .ok_or_else(|| CatalogError::corrupt(format!("snapshot kind '{kind}'")))?,
        rel_path: row.get("rel_path")?,
        row_count: row.get("row_count")?,
        size_bytes: row.get("size_bytes")?,
        schema: serde_json::from_str(&schema_json)?,
        primary_key: serde_json::from_str(&primary_key_json)?,
        created_at: row.get("created_at")?,
        created_by: row.get("created_by")?,
        expires_at: row.get("expires_at")?,
        description: row.get("description")?,
    })
}

pub(crate) fn parse_project_id(raw: &str) -> Result<ProjectId> {
    ProjectId::new(raw).map_err(|_| CatalogError::corrupt(format!("project id '{raw}'")))
}

pub(crate) fn parse_branch_id(raw: &str) -> Result<BranchId> {
    BranchId::new(raw).map_err(|_| CatalogError::corrupt(format!("branch id '{raw}'")))
}
