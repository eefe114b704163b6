//! Atomic engine file creation via staging + rename.
//!
//! A new engine file is never built in place: the content is constructed at
//! a unique path under the staging directory, checkpointed, and renamed onto
//! the target in one step. A crash between stage and rename leaves only a
//! staging orphan for the janitor; the target either does not exist or is
//! complete.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::EngineConnection;
use crate::error::{EngineError, Result};
use crate::lock::{breadcrumb_path_for, lock_path_for};
use crate::ENGINE_FILE_EXT;

/// A staged engine file that unlinks itself unless committed.
pub struct StagedEngineFile {
    path: PathBuf,
    committed: bool,
}

impl StagedEngineFile {
    /// Reserve a unique staging path under `staging_dir`.
    pub fn new(staging_dir: &Path) -> Result<Self> {
        fs::create_dir_all(staging_dir)?;
        let path = staging_dir.join(format!("{}.{}", Uuid::new_v4(), ENGINE_FILE_EXT));
        Ok(Self {
            path,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically move the staged file onto `target`.
    ///
    /// Any connection to the staged file must be closed first; the rename
    /// fails on Windows otherwise and is undefined for the engine anyway.
    pub fn commit(mut self, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&self.path, target)?;
        remove_lock_residue(&self.path);
        self.committed = true;
        debug!("Committed staged engine file: {}", target.display());
        Ok(())
    }
}

impl Drop for StagedEngineFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to unlink staged engine file {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
        remove_lock_residue(&self.path);
    }
}

/// Build a new engine file at `target` atomically.
///
/// `build_fn` runs against a write connection to the staging path; on success
/// the staged file is checkpointed and renamed onto `target`. On any failure
/// the staging file is unlinked and the error re-raised. Catalog registration
/// is the caller's job and belongs between build and commit.
pub fn create_atomic<F>(staging_dir: &Path, target: &Path, build_fn: F) -> Result<()>
where
    F: FnOnce(&EngineConnection) -> Result<()>,
{
    let staged = StagedEngineFile::new(staging_dir)?;
    {
        let conn = EngineConnection::open_write(staged.path())?;
        build_fn(&conn)?;
        conn.checkpoint()?;
    }
    staged.commit(target)
}

/// Remove an engine file. Idempotent: a missing file is not an error.
pub fn drop_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            remove_lock_residue(path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::Io(e)),
    }
}

/// Clean up the lock file and breadcrumb left next to an engine file.
fn remove_lock_residue(db_path: &Path) {
    let lock_path = lock_path_for(db_path);
    let _ = fs::remove_file(breadcrumb_path_for(&lock_path));
    let _ = fs::remove_file(&lock_path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_atomic_builds_and_renames() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("_staging");
        let target = dir.path().join("p1").join("in").join("orders.duckdb");

        create_atomic(&staging, &target, |conn| {
            conn.execute_batch("CREATE TABLE data (id BIGINT); INSERT INTO data VALUES (1)")
        })
        .unwrap();

        assert!(target.exists());
        let conn = EngineConnection::open_read(&target).unwrap();
        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM data", &[]).unwrap();
        assert_eq!(count, 1);

        // No staging residue
        let leftovers: Vec<_> = fs::read_dir(&staging).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn create_atomic_failure_leaves_no_target() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("_staging");
        let target = dir.path().join("orders.duckdb");

        let result = create_atomic(&staging, &target, |conn| {
            conn.execute_batch("CREATE TABLE data (id BIGINT)")?;
            Err(EngineError::query("build failed"))
        });
        assert!(result.is_err());
        assert!(!target.exists());

        let leftovers: Vec<_> = fs::read_dir(&staging).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn drop_file_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.duckdb");
        drop_file(&path).unwrap();

        fs::write(&path, b"x").unwrap();
        drop_file(&path).unwrap();
        assert!(!path.exists());
        drop_file(&path).unwrap();
    }
}
