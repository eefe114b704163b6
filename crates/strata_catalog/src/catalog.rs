//! Catalog handle.

use std::path::Path;
use strata_db::EngineConnection;
use tracing::info;

use crate::error::Result;
use crate::schema::ensure_schema;

/// Handle to the metadata catalog.
///
/// Cloning is cheap; all clones share one engine connection. The connection's
/// internal mutex is the process-wide writer lock of the catalog; multi-row
/// mutations run inside `transaction()` which holds it end-to-end.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub(crate) conn: EngineConnection,
}

impl Catalog {
    /// Open (or create) the metadata file and bring it to the current schema.
    ///
    /// Acquires the exclusive cross-process lock; a second server instance on
    /// the same data root fails here.
    pub fn open(metadata_path: &Path) -> Result<Self> {
        if let Some(parent) = metadata_path.parent() {
            std::fs::create_dir_all(parent).map_err(strata_db::EngineError::Io)?;
        }
        let conn = EngineConnection::open_write(metadata_path)?;
        ensure_schema(&conn)?;
        info!("Opened metadata catalog: {}", metadata_path.display());
        Ok(Self { conn })
    }

    /// In-memory catalog for tests.
    pub fn open_memory() -> Result<Self> {
        let conn = EngineConnection::open_memory()?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Flush the catalog's write-ahead log.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn.checkpoint()?;
        Ok(())
    }
}
