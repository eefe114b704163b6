//! Background sweepers.
//!
//! Three periodic tasks: leaked staging engine files (crashed or abandoned
//! imports), staged uploads past their TTL, and expired snapshots. All are
//! best-effort and idempotent on re-run.

use chrono::Utc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::config::{JANITOR_INTERVAL_SECS, RETENTION_INTERVAL_SECS, STAGING_MAX_AGE_HOURS};
use crate::service::StorageService;

/// Remove staging engine files older than the leak threshold.
pub fn sweep_staging(service: &StorageService) -> usize {
    let staging_dir = service.layout().staging_dir();
    let entries = match std::fs::read_dir(&staging_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!("Janitor cannot read staging dir: {}", e);
            return 0;
        }
    };

    let cutoff = Duration::from_secs(STAGING_MAX_AGE_HOURS as u64 * 3600);
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok());
        match age {
            Some(age) if age > cutoff => match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!("Janitor removed leaked staging file {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Janitor failed to remove {}: {}", path.display(), e),
            },
            _ => {}
        }
    }
    removed
}

/// Remove staged uploads whose TTL has passed: file first, then the row.
pub fn sweep_expired_uploads(service: &StorageService) -> usize {
    let expired = match service.catalog().list_expired_staged_files(Utc::now()) {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Janitor cannot list expired uploads: {}", e);
            return 0;
        }
    };
    let mut removed = 0;
    for row in expired {
        let path = service.layout().root().join(&row.rel_path);
        match std::fs::remove_file(&path) {
            Ok(()) | Err(_) => {}
        }
        match service.catalog().delete_file_row(&row.id) {
            Ok(()) => {
                info!("Janitor expired staged upload {}", row.id);
                removed += 1;
            }
            Err(e) => warn!("Janitor failed to expire upload {}: {}", row.id, e),
        }
    }
    removed
}

/// Run the sweepers forever. Retention runs hourly, the rest more often.
pub async fn run(service: StorageService) {
    let mut janitor_tick = tokio::time::interval(Duration::from_secs(JANITOR_INTERVAL_SECS));
    let mut retention_tick = tokio::time::interval(Duration::from_secs(RETENTION_INTERVAL_SECS));
    // The first tick of an interval fires immediately; skip the initial
    // burst so startup stays quiet.
    janitor_tick.tick().await;
    retention_tick.tick().await;

    loop {
        tokio::select! {
            _ = janitor_tick.tick() => {
                let service = service.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    sweep_staging(&service);
                    sweep_expired_uploads(&service);
                })
                .await;
            }
            _ = retention_tick.tick() => {
                let service = service.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    let report = service.sweep_expired_snapshots();
                    if report.removed > 0 || report.failed > 0 {
                        info!(
                            "Retention sweep: {} removed, {} failed",
                            report.removed, report.failed
                        );
                    }
                })
                .await;
            }
        }
    }
}
