//! Table-lock manager.
//!
//! Process-wide map from table identity to a fair mutex. At most one writer
//! holds a table's lock at a time; readers never take it (they open the file
//! read-only). Tokio mutexes queue waiters FIFO, which gives the fairness
//! guarantee; a waiter that times out drops out of the queue and the caller
//! fails with `deadline-exceeded`. An abandoned lease is just a dropped
//! guard: the next waiter proceeds.
//!
//! Deadlock avoidance: a single operation takes at most one table lock;
//! compound operations must acquire in `TableRef` order (lexicographic).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use strata_protocol::{StorageError, TableRef};

use crate::metrics::METRICS;

/// Exclusive write lease on one table. Released on drop, including error and
/// cancellation paths.
pub struct TableLease {
    table: TableRef,
    _guard: OwnedMutexGuard<()>,
}

impl TableLease {
    pub fn table(&self) -> &TableRef {
        &self.table
    }
}

impl Drop for TableLease {
    fn drop(&mut self) {
        METRICS
            .locks_held
            .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        debug!("Released table lock: {}", self.table);
    }
}

/// Fair per-table write locks.
#[derive(Clone, Default)]
pub struct TableLockManager {
    entries: Arc<Mutex<HashMap<TableRef, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TableLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, table: &TableRef) -> Arc<tokio::sync::Mutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(table.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Acquire the write lease for `table`, waiting at most `timeout`.
    pub async fn acquire_write(
        &self,
        table: &TableRef,
        timeout: Duration,
    ) -> Result<TableLease, StorageError> {
        let mutex = self.entry(table);
        let started = Instant::now();

        METRICS
            .lock_waiters
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let acquired = tokio::time::timeout(timeout, mutex.lock_owned()).await;
        METRICS
            .lock_waiters
            .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);

        match acquired {
            Ok(guard) => {
                METRICS.record_lock_wait(started.elapsed());
                METRICS
                    .locks_held
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                debug!("Acquired table lock: {}", table);
                Ok(TableLease {
                    table: table.clone(),
                    _guard: guard,
                })
            }
            Err(_) => {
                METRICS.inc(&METRICS.lock_timeouts);
                Err(StorageError::deadline_exceeded(format!(
                    "timed out after {:?} waiting for write lock on {}",
                    timeout, table
                )))
            }
        }
    }

    /// Acquire leases for several tables in the global lock order,
    /// regardless of the order given.
    pub async fn acquire_write_many(
        &self,
        tables: &[TableRef],
        timeout: Duration,
    ) -> Result<Vec<TableLease>, StorageError> {
        let mut ordered: Vec<&TableRef> = tables.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut leases = Vec::with_capacity(ordered.len());
        for table in ordered {
            leases.push(self.acquire_write(table, timeout).await?);
        }
        Ok(leases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_protocol::{BranchId, ProjectId};

    fn table(name: &str) -> TableRef {
        TableRef::new(
            ProjectId::new("p1").unwrap(),
            BranchId::default_branch(),
            "in_c".to_string(),
            name.to_string(),
        )
    }

    #[tokio::test]
    async fn exclusive_per_table() {
        let locks = TableLockManager::new();
        let t = table("orders");

        let lease = locks.acquire_write(&t, Duration::from_secs(1)).await.unwrap();

        // Second writer times out while the lease is held
        let err = locks
            .acquire_write(&t, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(
            err.kind,
            strata_protocol::ErrorKind::DeadlineExceeded
        );

        drop(lease);
        locks
            .acquire_write(&t, Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn distinct_tables_do_not_contend() {
        let locks = TableLockManager::new();
        let _a = locks
            .acquire_write(&table("a"), Duration::from_millis(50))
            .await
            .unwrap();
        let _b = locks
            .acquire_write(&table("b"), Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn writers_are_served_in_fifo_order() {
        let locks = TableLockManager::new();
        let t = table("orders");
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = locks.acquire_write(&t, Duration::from_secs(1)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..3 {
            let locks = locks.clone();
            let t = t.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _lease = locks.acquire_write(&t, Duration::from_secs(5)).await.unwrap();
                order.lock().unwrap().push(i);
            }));
            // Let each waiter enqueue before spawning the next
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn compound_acquisition_sorts_and_dedups() {
        let locks = TableLockManager::new();
        let tables = vec![table("z"), table("a"), table("z")];
        let leases = locks
            .acquire_write_many(&tables, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(leases.len(), 2);
        assert_eq!(leases[0].table().table, "a");
        assert_eq!(leases[1].table().table, "z");
    }
}
