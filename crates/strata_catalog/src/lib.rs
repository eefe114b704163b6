//! Metadata catalog for Strata.
//!
//! A single engine file (`metadata.duckdb`) is the authoritative registry of
//! projects, branches, buckets, tables, files, snapshots, settings, API keys,
//! and the audit log. The file is opened with the exclusive cross-process
//! lock at startup; in-process mutations serialize on the connection.
//!
//! Cross-file consistency with the table engine files is *not* transactional;
//! startup reconciliation flags drifted rows as `orphaned`.

mod api_keys;
mod audit;
mod branches;
mod buckets;
mod catalog;
mod error;
mod files;
mod models;
mod projects;
mod schema;
mod settings;
mod snapshots;
mod tables;

pub use audit::AuditRecord;
pub use catalog::Catalog;
pub use error::{CatalogError, Result};
pub use models::{
    BranchRow, BranchTableState, BucketRow, FileRow, ProjectRow, SnapshotRow, TableRow,
};
pub use schema::SCHEMA_VERSION;
pub use settings::SettingsScope;
