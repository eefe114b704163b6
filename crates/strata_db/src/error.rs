//! Error types for the engine layer.

use std::path::PathBuf;
use thiserror::Error;

/// Engine operation result type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors from engine file operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine file is locked by another writer: {0}")]
    Locked(PathBuf),

    #[error("Operation requires write access but connection is read-only")]
    ReadOnly,

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] duckdb::Error),
}

impl EngineError {
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// True for conditions where a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Locked(_) | Self::Io(_))
    }
}
