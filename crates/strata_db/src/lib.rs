//! Engine file layer for Strata.
//!
//! Every table lives in its own DuckDB file holding a single relation named
//! `data`. This crate owns all direct interaction with those files: exclusive
//! write opens, unlimited read-only opens, read-only attach fan-out for
//! cross-file queries, and atomic file creation via staging + rename.
//!
//! DuckDB enforces single-writer per file at the OS level; cross-process
//! coordination uses `fs2` file locks, in-process coordination is the
//! table-lock manager's job (this layer trusts that invariant).
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_db::EngineConnection;
//!
//! let conn = EngineConnection::open_write(Path::new("./orders.duckdb"))?;
//! conn.execute("INSERT INTO data (id) VALUES (?)", &[1.into()])?;
//! let rows = conn.query_all("SELECT * FROM data", &[])?;
//! ```

pub mod atomic;
pub mod backend;
pub mod error;
pub mod lock;

pub use atomic::{create_atomic, drop_file, StagedEngineFile};
pub use backend::{
    escape_sql_string, quote_ident, AccessMode, AttachedFile, EngineConnection, EngineRow,
    EngineTransaction, EngineValue, FromEngineValue, DEFAULT_ATTACH_LIMIT,
};
pub use error::{EngineError, Result};
pub use lock::{breadcrumb_path_for, lock_path_for, try_lock_exclusive, FileLockGuard, LockError};

/// Canonical name of the single relation inside every table file.
pub const DATA_RELATION: &str = "data";

/// File extension for engine files.
pub const ENGINE_FILE_EXT: &str = "duckdb";
