//! Service metrics.
//!
//! In-memory counters and gauges on lock-free atomics, scraped through the
//! `/metrics` endpoint in Prometheus exposition format.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Global metrics instance.
pub static METRICS: Metrics = Metrics::new();

/// Wait-time histogram bucket bounds in milliseconds (cumulative, `le`).
const WAIT_BUCKETS_MS: [u64; 8] = [1, 10, 50, 100, 500, 1_000, 5_000, 30_000];

pub struct Metrics {
    // Request counters
    pub http_requests: AtomicU64,
    pub http_errors: AtomicU64,
    pub rpc_requests: AtomicU64,
    pub rpc_errors: AtomicU64,

    // Operation counters
    pub imports_completed: AtomicU64,
    pub imports_failed: AtomicU64,
    pub exports_completed: AtomicU64,
    pub snapshots_created: AtomicU64,
    pub snapshots_restored: AtomicU64,
    pub snapshots_swept: AtomicU64,
    pub tables_copied_on_write: AtomicU64,

    // Row counters
    pub rows_imported: AtomicU64,
    pub rows_exported: AtomicU64,

    // Lock instrumentation
    pub locks_held: AtomicI64,
    pub lock_waiters: AtomicI64,
    pub lock_timeouts: AtomicU64,
    lock_wait_buckets: [AtomicU64; WAIT_BUCKETS_MS.len() + 1],
    lock_wait_sum_ms: AtomicU64,
    lock_wait_count: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::declare_interior_mutable_const)]
const ZERO: AtomicU64 = AtomicU64::new(0);

impl Metrics {
    pub const fn new() -> Self {
        Self {
            http_requests: AtomicU64::new(0),
            http_errors: AtomicU64::new(0),
            rpc_requests: AtomicU64::new(0),
            rpc_errors: AtomicU64::new(0),
            imports_completed: AtomicU64::new(0),
            imports_failed: AtomicU64::new(0),
            exports_completed: AtomicU64::new(0),
            snapshots_created: AtomicU64::new(0),
            snapshots_restored: AtomicU64::new(0),
            snapshots_swept: AtomicU64::new(0),
            tables_copied_on_write: AtomicU64::new(0),
            rows_imported: AtomicU64::new(0),
            rows_exported: AtomicU64::new(0),
            locks_held: AtomicI64::new(0),
            lock_waiters: AtomicI64::new(0),
            lock_timeouts: AtomicU64::new(0),
            lock_wait_buckets: [ZERO; WAIT_BUCKETS_MS.len() + 1],
            lock_wait_sum_ms: AtomicU64::new(0),
            lock_wait_count: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Record one completed lock wait.
    pub fn record_lock_wait(&self, waited: Duration) {
        let ms = waited.as_millis() as u64;
        let idx = WAIT_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(WAIT_BUCKETS_MS.len());
        self.lock_wait_buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.lock_wait_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.lock_wait_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Render the Prometheus exposition text.
    pub fn prometheus_format(&self) -> String {
        let mut out = String::with_capacity(4096);

        let counters: &[(&str, &str, &AtomicU64)] = &[
            ("strata_http_requests_total", "Total HTTP requests served", &self.http_requests),
            ("strata_http_errors_total", "Total HTTP requests that failed", &self.http_errors),
            ("strata_rpc_requests_total", "Total control RPC requests served", &self.rpc_requests),
            ("strata_rpc_errors_total", "Total control RPC requests that failed", &self.rpc_errors),
            ("strata_imports_completed_total", "Total import pipelines completed", &self.imports_completed),
            ("strata_imports_failed_total", "Total import pipelines failed", &self.imports_failed),
            ("strata_exports_completed_total", "Total exports completed", &self.exports_completed),
            ("strata_snapshots_created_total", "Total snapshots created", &self.snapshots_created),
            ("strata_snapshots_restored_total", "Total snapshots restored", &self.snapshots_restored),
            ("strata_snapshots_swept_total", "Total expired snapshots removed", &self.snapshots_swept),
            ("strata_tables_copied_on_write_total", "Total branch copy-on-write copies", &self.tables_copied_on_write),
            ("strata_rows_imported_total", "Total rows imported", &self.rows_imported),
            ("strata_rows_exported_total", "Total rows exported", &self.rows_exported),
            ("strata_lock_timeouts_total", "Total table-lock acquisition timeouts", &self.lock_timeouts),
        ];
        for (name, help, counter) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                counter.load(Ordering::Relaxed)
            ));
        }

        let gauges: &[(&str, &str, &AtomicI64)] = &[
            ("strata_table_locks_held", "Table write locks currently held", &self.locks_held),
            ("strata_table_lock_waiters", "Writers currently waiting on a table lock", &self.lock_waiters),
        ];
        for (name, help, gauge) in gauges {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {}\n\n",
                gauge.load(Ordering::Relaxed)
            ));
        }

        out.push_str("# HELP strata_table_lock_wait_ms Table-lock wait time in milliseconds\n");
        out.push_str("# TYPE strata_table_lock_wait_ms histogram\n");
        let mut cumulative = 0u64;
        for (idx, bound) in WAIT_BUCKETS_MS.iter().enumerate() {
            cumulative += self.lock_wait_buckets[idx].load(Ordering::Relaxed);
            out.push_str(&format!(
                "strata_table_lock_wait_ms_bucket{{le=\"{bound}\"}} {cumulative}\n"
            ));
        }
        cumulative += self.lock_wait_buckets[WAIT_BUCKETS_MS.len()].load(Ordering::Relaxed);
        out.push_str(&format!(
            "strata_table_lock_wait_ms_bucket{{le=\"+Inf\"}} {cumulative}\n"
        ));
        out.push_str(&format!(
            "strata_table_lock_wait_ms_sum {}\n",
            self.lock_wait_sum_ms.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "strata_table_lock_wait_ms_count {}\n",
            self.lock_wait_count.load(Ordering::Relaxed)
        ));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.inc(&metrics.imports_completed);
        metrics.inc(&metrics.imports_completed);
        metrics.add(&metrics.rows_imported, 50);

        let text = metrics.prometheus_format();
        assert!(text.contains("strata_imports_completed_total 2"));
        assert!(text.contains("strata_rows_imported_total 50"));
    }

    #[test]
    fn wait_histogram_buckets() {
        let metrics = Metrics::new();
        metrics.record_lock_wait(Duration::from_millis(5));
        metrics.record_lock_wait(Duration::from_millis(700));

        let text = metrics.prometheus_format();
        assert!(text.contains("strata_table_lock_wait_ms_count 2"));
        assert!(text.contains("strata_table_lock_wait_ms_bucket{le=\"10\"} 1"));
        assert!(text.contains("strata_table_lock_wait_ms_bucket{le=\"1000\"} 2"));
        assert!(text.contains("strata_table_lock_wait_ms_bucket{le=\"+Inf\"} 2"));
    }
}
