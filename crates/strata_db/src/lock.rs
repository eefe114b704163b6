//! Cross-process engine file locking.
//!
//! DuckDB only allows one writer process per file. The in-process table-lock
//! manager serializes writers within the server; this module guards against
//! a second process (a stray CLI, a second server instance) opening the same
//! file for write.
//!
//! Uses the `fs2` crate for cross-platform file locking (MSRV 1.75; the
//! std `File::lock()` API needs Rust 1.89+).

use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Engine file is locked by another process: {0}")]
    Locked(PathBuf),

    #[error("Failed to create lock file: {0}")]
    CreateFailed(#[source] io::Error),

    #[error("Failed to acquire lock: {0}")]
    AcquireFailed(#[source] io::Error),
}

/// Lock file path for an engine file: the file name plus a `.lock` suffix
/// (`orders.duckdb` → `orders.duckdb.lock`).
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    db_path.with_file_name(name)
}

/// Operator breadcrumb written next to a held lock: who holds it, since
/// when. Best-effort only; the flock is what actually excludes writers.
pub fn breadcrumb_path_for(lock_path: &Path) -> PathBuf {
    let mut name = lock_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".json");
    lock_path.with_file_name(name)
}

/// A guard holding an exclusive lock on an engine file.
///
/// Released when dropped (fs2 unlocks on close).
pub struct FileLockGuard {
    handle: File,
    lock_path: PathBuf,
}

impl FileLockGuard {
    fn held(handle: File, lock_path: PathBuf) -> Self {
        let guard = Self { handle, lock_path };
        guard.leave_breadcrumb();
        guard
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn leave_breadcrumb(&self) {
        let breadcrumb = serde_json::json!({
            "holder_pid": std::process::id(),
            "holder_exe": std::env::current_exe().ok().map(|p| p.display().to_string()),
            "acquired_at": Utc::now().to_rfc3339(),
        });
        let path = breadcrumb_path_for(&self.lock_path);
        if let Err(e) = fs::write(&path, breadcrumb.to_string()) {
            warn!("Failed to write lock breadcrumb {}: {}", path.display(), e);
        }
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        debug!("Releasing engine file lock: {}", self.lock_path.display());
        let breadcrumb = breadcrumb_path_for(&self.lock_path);
        if let Err(e) = fs::remove_file(&breadcrumb) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(
                    "Failed to remove lock breadcrumb {}: {}",
                    breadcrumb.display(),
                    e
                );
            }
        }
        // The flock itself goes away when `handle` closes.
        let _ = &self.handle;
    }
}

impl std::fmt::Debug for FileLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLockGuard")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

/// Try to acquire an exclusive lock on an engine file.
///
/// Non-blocking: a lock held by another process yields
/// `Err(LockError::Locked)` immediately rather than waiting. The returned
/// guard keeps the lock until dropped.
pub fn try_lock_exclusive(db_path: &Path) -> Result<FileLockGuard, LockError> {
    let lock_path = lock_path_for(db_path);
    let handle = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(LockError::CreateFailed)?;

    // Fully qualified: std::fs::File grows its own try_lock_exclusive in
    // Rust 1.89+ with a different error type.
    match FileExt::try_lock_exclusive(&handle) {
        Ok(()) => {
            debug!("Acquired exclusive lock: {}", lock_path.display());
            Ok(FileLockGuard::held(handle, lock_path))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            Err(LockError::Locked(db_path.to_path_buf()))
        }
        Err(e) => Err(LockError::AcquireFailed(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/data/p1/orders.duckdb")),
            PathBuf::from("/data/p1/orders.duckdb.lock")
        );
        assert_eq!(
            lock_path_for(Path::new("/data/metadata")),
            PathBuf::from("/data/metadata.lock")
        );
        assert_eq!(
            lock_path_for(Path::new("/data/my.old.db")),
            PathBuf::from("/data/my.old.db.lock")
        );
        assert_eq!(
            breadcrumb_path_for(Path::new("/data/orders.duckdb.lock")),
            PathBuf::from("/data/orders.duckdb.lock.json")
        );
    }

    #[test]
    fn exclusive_lock_roundtrip_with_breadcrumb() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("t.duckdb");

        let guard = try_lock_exclusive(&db_path).unwrap();
        assert!(guard.lock_path().exists());
        let breadcrumb = breadcrumb_path_for(guard.lock_path());
        assert!(breadcrumb.exists());

        drop(guard);
        assert!(!breadcrumb.exists());

        // Reacquirable after release
        let _guard2 = try_lock_exclusive(&db_path).unwrap();
    }

    #[test]
    fn exclusive_lock_contention() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("t.duckdb");

        let _guard = try_lock_exclusive(&db_path).unwrap();
        let result = try_lock_exclusive(&db_path);
        assert!(matches!(result, Err(LockError::Locked(_))));
    }
}
