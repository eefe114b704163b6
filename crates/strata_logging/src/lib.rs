//! Shared logging utilities for Strata binaries.
//!
//! Tracing goes to two places: a size-capped log file under the data root
//! and stderr. The file sink rotates by renaming the active file to a
//! timestamped archive and pruning the oldest archives, so the directory
//! never grows past a handful of files.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "strata=info,strata_server=info,strata_catalog=info";

/// Rotate the active file once it reaches this size.
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;

/// Archived rotations kept next to the active file.
const MAX_ARCHIVES: usize = 4;

/// Logging configuration for a Strata binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub log_dir: PathBuf,
    pub verbose: bool,
}

/// Initialize tracing with the rotating file sink and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let sink = RotatingLog::open(&config.log_dir, &file_stem_for(config.app_name))
        .with_context(|| {
            format!(
                "Failed to open log sink in {}",
                config.log_dir.display()
            )
        })?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(sink)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// Reduce an app name to a filesystem-friendly log file stem.
fn file_stem_for(app: &str) -> String {
    let stem: String = app
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let stem = stem.trim_matches('-');
    if stem.is_empty() {
        "strata".to_string()
    } else {
        stem.to_string()
    }
}

/// Size-capped log sink.
///
/// The active file is `<stem>.log`. When a write would push it past the
/// cap, the file is renamed to `<stem>.<epoch-secs>.log` (with a counter
/// suffix on collision), archives beyond [`MAX_ARCHIVES`] are pruned
/// oldest-first, and a fresh active file is opened. Clones share one sink;
/// `tracing` hands a clone to every layer that wants a writer.
#[derive(Clone)]
pub struct RotatingLog {
    state: Arc<Mutex<Sink>>,
}

struct Sink {
    dir: PathBuf,
    stem: String,
    rotate_at: u64,
    max_archives: usize,
    file: File,
    written: u64,
}

impl RotatingLog {
    pub fn open(dir: &Path, stem: &str) -> io::Result<Self> {
        Self::with_limits(dir, stem, ROTATE_AT_BYTES, MAX_ARCHIVES)
    }

    fn with_limits(dir: &Path, stem: &str, rotate_at: u64, max_archives: usize) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let active = dir.join(format!("{stem}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&active)?;
        let written = file.metadata()?.len();
        Ok(Self {
            state: Arc::new(Mutex::new(Sink {
                dir: dir.to_path_buf(),
                stem: stem.to_string(),
                rotate_at: rotate_at.max(1),
                max_archives,
                file,
                written,
            })),
        })
    }
}

impl Sink {
    fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut archive = self.dir.join(format!("{}.{stamp}.log", self.stem));
        let mut bump = 1u32;
        while archive.exists() {
            archive = self.dir.join(format!("{}.{stamp}.{bump}.log", self.stem));
            bump += 1;
        }
        fs::rename(self.active_path(), &archive)?;
        self.prune_archives()?;

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())?;
        self.written = 0;
        Ok(())
    }

    /// Delete the oldest archives until at most `max_archives` remain.
    /// Epoch-stamped names sort chronologically, so a plain sort suffices.
    fn prune_archives(&self) -> io::Result<()> {
        let active_name = format!("{}.log", self.stem);
        let prefix = format!("{}.", self.stem);
        let mut archives: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".log") && n != active_name)
            })
            .collect();
        archives.sort();
        while archives.len() > self.max_archives {
            fs::remove_file(archives.remove(0))?;
        }
        Ok(())
    }
}

impl Write for RotatingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut sink = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink mutex poisoned"))?;
        if sink.written + buf.len() as u64 > sink.rotate_at {
            sink.roll()?;
        }
        let n = sink.file.write(buf)?;
        sink.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut sink = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink mutex poisoned"))?;
        sink.file.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingLog {
    type Writer = RotatingLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn rotation_archives_the_active_file() {
        let dir = TempDir::new().unwrap();
        let mut sink = RotatingLog::with_limits(dir.path(), "stratad", 32, 4).unwrap();

        sink.write_all(&[b'a'; 24]).unwrap();
        sink.write_all(&[b'b'; 24]).unwrap(); // pushes past the cap
        sink.flush().unwrap();

        let names = log_files(dir.path());
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|n| n == "stratad.log"));
        assert!(names
            .iter()
            .any(|n| n.starts_with("stratad.") && n != "stratad.log"));
    }

    #[test]
    fn pruning_keeps_the_archive_cap() {
        let dir = TempDir::new().unwrap();
        // Cap of 1 archive; each write rolls once the tiny cap is exceeded.
        let mut sink = RotatingLog::with_limits(dir.path(), "stratad", 8, 1).unwrap();
        for _ in 0..5 {
            sink.write_all(&[b'x'; 7]).unwrap();
        }
        sink.flush().unwrap();

        let archives = log_files(dir.path())
            .into_iter()
            .filter(|n| n != "stratad.log")
            .count();
        assert!(archives <= 1, "archives not pruned: {archives}");
    }

    #[test]
    fn clones_share_one_sink() {
        let dir = TempDir::new().unwrap();
        let sink = RotatingLog::with_limits(dir.path(), "stratad", 1024, 2).unwrap();
        let mut a = sink.clone();
        let mut b = sink;
        a.write_all(b"one\n").unwrap();
        b.write_all(b"two\n").unwrap();
        b.flush().unwrap();

        let content = fs::read_to_string(dir.path().join("stratad.log")).unwrap();
        assert!(content.contains("one"));
        assert!(content.contains("two"));
    }

    #[test]
    fn stems_are_filesystem_friendly() {
        assert_eq!(file_stem_for("stratad"), "stratad");
        assert_eq!(file_stem_for("strata d/1"), "strata-d-1");
        assert_eq!(file_stem_for("///"), "strata");
    }
}
