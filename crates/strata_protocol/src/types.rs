//! Core entity identities and models.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::naming;

/// Reserved branch id of the production branch.
pub const DEFAULT_BRANCH: &str = "default";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid project id: {0}")]
    Project(String),
    #[error("invalid branch id: {0}")]
    Branch(String),
}

/// Project identifier. Lowercase alphanumeric + underscore; becomes a
/// directory name under the data root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        if naming::is_safe_id(&raw) {
            Ok(Self(raw))
        } else {
            Err(IdError::Project(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ProjectId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Branch identifier. `default` denotes the production branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(String);

impl BranchId {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        if naming::is_safe_id(&raw) {
            Ok(Self(raw))
        } else {
            Err(IdError::Branch(raw))
        }
    }

    pub fn default_branch() -> Self {
        Self(DEFAULT_BRANCH.to_string())
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_BRANCH
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for BranchId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Bucket stage namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketStage {
    In,
    Out,
    Sys,
}

impl BucketStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::Sys => "sys",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in" => Some(Self::In),
            "out" => Some(Self::Out),
            "sys" => Some(Self::Sys),
            _ => None,
        }
    }
}

/// Globally-unique table identity.
///
/// Orders lexicographically by (project, branch, bucket, table); compound
/// operations acquire locks in this order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub project: ProjectId,
    pub branch: BranchId,
    pub bucket: String,
    pub table: String,
}

impl TableRef {
    pub fn new(project: ProjectId, branch: BranchId, bucket: String, table: String) -> Self {
        Self {
            project,
            branch,
            bucket,
            table,
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.project, self.branch, self.bucket, self.table
        )
    }
}

/// Column definition. The declared type is an engine type expression
/// (`BIGINT`, `DECIMAL(10,2)`, ...), validated against a closed family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

fn default_nullable() -> bool {
    true
}

/// Engine type families accepted for column declarations.
const COLUMN_TYPE_FAMILIES: &[&str] = &[
    "BOOLEAN", "TINYINT", "SMALLINT", "INTEGER", "BIGINT", "HUGEINT", "UTINYINT", "USMALLINT",
    "UINTEGER", "UBIGINT", "FLOAT", "DOUBLE", "DECIMAL", "NUMERIC", "VARCHAR", "TEXT", "BLOB",
    "DATE", "TIME", "TIMESTAMP", "TIMESTAMPTZ", "UUID", "JSON",
];

/// Check a declared column type against the accepted families.
///
/// Parameterized types (`DECIMAL(10,2)`, `VARCHAR(64)`) are accepted when
/// the base name matches and the parameter list is digits and commas.
pub fn is_valid_column_type(raw: &str) -> bool {
    let raw = raw.trim();
    if raw.is_empty() {
        return false;
    }
    let upper = raw.to_ascii_uppercase();
    let (base, params) = match upper.find('(') {
        Some(idx) => {
            if !upper.ends_with(')') {
                return false;
            }
            (&upper[..idx], Some(&upper[idx + 1..upper.len() - 1]))
        }
        None => (upper.as_str(), None),
    };
    if !COLUMN_TYPE_FAMILIES.contains(&base.trim()) {
        return false;
    }
    match params {
        None => true,
        Some(p) => {
            !p.is_empty()
                && p.chars()
                    .all(|c| c.is_ascii_digit() || c == ',' || c == ' ')
        }
    }
}

/// Project lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Deleted,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }
}

/// Table row status in the catalog. `orphaned` flags catalog/file drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Active,
    Orphaned,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Orphaned => "orphaned",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "orphaned" => Some(Self::Orphaned),
            _ => None,
        }
    }
}

/// Snapshot provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Manual,
    AutoPredrop,
    AutoPretruncate,
    AutoPrealtercolumn,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutoPredrop => "auto_predrop",
            Self::AutoPretruncate => "auto_pretruncate",
            Self::AutoPrealtercolumn => "auto_prealtercolumn",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "manual" => Some(Self::Manual),
            "auto_predrop" => Some(Self::AutoPredrop),
            "auto_pretruncate" => Some(Self::AutoPretruncate),
            "auto_prealtercolumn" => Some(Self::AutoPrealtercolumn),
            _ => None,
        }
    }

    pub fn is_auto(&self) -> bool {
        !matches!(self, Self::Manual)
    }
}

/// Destructive operations that consult the auto-snapshot settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestructiveOp {
    DropTable,
    TruncateTable,
    AlterColumn,
}

impl DestructiveOp {
    /// The snapshot kind recorded when the trigger fires.
    pub fn snapshot_kind(&self) -> SnapshotKind {
        match self {
            Self::DropTable => SnapshotKind::AutoPredrop,
            Self::TruncateTable => SnapshotKind::AutoPretruncate,
            Self::AlterColumn => SnapshotKind::AutoPrealtercolumn,
        }
    }

    /// The trigger key in the settings model.
    pub fn trigger_key(&self) -> &'static str {
        match self {
            Self::DropTable => "drop_table",
            Self::TruncateTable => "truncate_table",
            Self::AlterColumn => "alter_column",
        }
    }
}
