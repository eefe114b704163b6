//! Error types for the catalog layer.

use strata_db::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Underlying engine error (I/O, SQL).
    #[error("Catalog engine error: {0}")]
    Engine(#[from] EngineError),

    /// Named row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate name or violated precondition.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored JSON does not parse; the catalog is damaged.
    #[error("Corrupt catalog entry: {0}")]
    Corrupt(String),

    /// Serialization of a model failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The metadata file carries a newer schema than this binary knows.
    #[error("Unsupported catalog schema version {found} (supported: {supported})")]
    SchemaVersion { found: i64, supported: i64 },
}

impl CatalogError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}
