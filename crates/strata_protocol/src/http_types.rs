//! API payload types shared by the REST and RPC transports.
//!
//! All types use serde with strict tagging; request option sets reject
//! unknown keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::options::{ExportOptions, ImportFormat, ImportOptions};
use crate::settings::EffectiveSettings;
use crate::types::{BucketStage, ColumnSpec, ProjectStatus, SnapshotKind, TableStatus};
use crate::ErrorKind;

// ============================================================================
// Error envelope
// ============================================================================

/// Error body returned by both transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateProjectRequest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    pub name: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    /// Project admin key; present only in the create response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStats {
    pub buckets: u64,
    pub tables: u64,
    pub rows: u64,
    pub bytes: u64,
}

// ============================================================================
// Branches
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateBranchRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub id: String,
    pub project: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    /// Tables copied-on-write into this branch.
    pub copied: Vec<BranchTableRef>,
    /// Default-branch tables hidden in this branch.
    pub deleted: Vec<BranchTableRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchTableRef {
    pub bucket: String,
    pub table: String,
}

/// Branch deletion discards branch-local tables; the response names them so
/// callers can see what was dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteBranchResponse {
    pub id: String,
    pub discarded_tables: Vec<BranchTableRef>,
}

// ============================================================================
// Buckets
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateBucketRequest {
    pub name: String,
    pub stage: BucketStage,
    /// Present when creating a linked bucket exposing a source bucket.
    #[serde(default)]
    pub linked_from: Option<BucketLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketLink {
    pub project: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub stage: BucketStage,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_from: Option<BucketLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_with: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShareBucketRequest {
    pub project_ids: Vec<String>,
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTableRequest {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub bucket: String,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    pub status: TableStatus,
    pub row_count: Option<u64>,
    pub size_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddColumnRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
}

pub(crate) fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DeleteRowsRequest {
    /// SQL predicate; absent deletes all rows.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRowsResponse {
    pub rows_deleted: u64,
    pub rows_after: u64,
}

// ============================================================================
// Import / export
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportRequest {
    /// A registered file id, or an absolute path for local sources.
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    pub format: ImportFormat,
    #[serde(default)]
    pub delimited: Option<crate::options::DelimitedOptions>,
    #[serde(default)]
    pub options: ImportOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResponse {
    pub rows_imported: u64,
    pub rows_after: u64,
    pub bytes_after: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExportRequest {
    pub options: ExportOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub file_id: String,
    pub path: String,
    pub size_bytes: u64,
    pub rows_exported: u64,
}

// ============================================================================
// Files
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrepareFileRequest {
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareFileResponse {
    pub id: String,
    /// Path the uploader writes into; registration finalizes it.
    pub staging_path: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub is_staging: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateSnapshotRequest {
    pub bucket: String,
    pub table: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub project: String,
    pub bucket: String,
    pub table: String,
    #[serde(rename = "type")]
    pub kind: SnapshotKind,
    pub row_count: u64,
    pub size_bytes: u64,
    pub schema: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RestoreSnapshotRequest {
    /// Target defaults to the snapshot's origin when absent.
    pub bucket: Option<String>,
    pub table: Option<String>,
}

// ============================================================================
// Settings
// ============================================================================

/// PUT body: a partial settings override (validated against the schema).
pub type SettingsUpdateRequest = Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsResponse {
    #[serde(flatten)]
    pub resolved: EffectiveSettings,
}

// ============================================================================
// Maintenance
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Catalog row rebuilt from the file on disk.
    Rebuilt,
    /// Row removed; the file is gone.
    Removed,
    /// Row and file already agree.
    Consistent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub outcome: ReconcileOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_request_parses_scenario_shape() {
        let raw = r#"{
            "name": "orders",
            "columns": [
                {"name": "id", "type": "BIGINT", "nullable": false},
                {"name": "amount", "type": "DECIMAL(10,2)", "nullable": true}
            ],
            "primary_key": ["id"]
        }"#;
        let req: CreateTableRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.name, "orders");
        assert_eq!(req.columns.len(), 2);
        assert_eq!(req.primary_key, vec!["id"]);
        assert!(!req.columns[0].nullable);
    }

    #[test]
    fn unknown_request_fields_rejected() {
        let raw = r#"{"name": "orders", "columns": [], "pkey": []}"#;
        assert!(serde_json::from_str::<CreateTableRequest>(raw).is_err());
    }

    #[test]
    fn error_body_shape() {
        let body = ErrorBody {
            error: ErrorKind::NotFound,
            message: "table not found".into(),
            details: None,
            request_id: Some("req-1".into()),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "not-found");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn import_request_with_options() {
        let raw = r#"{
            "file_id": "f-1",
            "format": "delimited",
            "options": {"incremental": true, "dedup_mode": "update-duplicates"}
        }"#;
        let req: ImportRequest = serde_json::from_str(raw).unwrap();
        assert!(req.options.incremental);
        assert_eq!(
            req.options.dedup_mode,
            crate::options::DedupMode::UpdateDuplicates
        );
    }
}
