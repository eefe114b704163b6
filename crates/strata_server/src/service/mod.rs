//! The storage service facade.
//!
//! Both transports (REST and the control RPC socket) call into this layer.
//! Operations authorize, resolve the branch overlay, take table locks,
//! drive the engine, update the catalog, and append audit records.

mod branches;
mod buckets;
mod files;
mod imports;
mod exports;
mod projects;
mod settings_ops;
mod snapshots_ops;
mod tables;

use std::sync::Arc;
use tracing::{info, warn};

use strata_catalog::Catalog;
use strata_protocol::{DataLayout, IdempotencyCache, StorageError, TableRef};

use crate::auth::Principal;
use crate::config::ServerConfig;
use crate::errors::map_catalog_err;
use crate::locks::{TableLease, TableLockManager};
use crate::overlay::BranchOverlay;
use crate::resolver::PathResolver;
use crate::sql;

pub use snapshots_ops::SnapshotSweepReport;

#[derive(Clone)]
pub struct StorageService {
    pub(crate) catalog: Catalog,
    pub(crate) layout: DataLayout,
    pub(crate) overlay: BranchOverlay,
    pub(crate) locks: TableLockManager,
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) idempotency: Arc<IdempotencyCache>,
}

impl StorageService {
    /// Open the data root: metadata catalog, layout, startup reconciliation.
    pub fn open(config: ServerConfig) -> Result<Self, StorageError> {
        let layout = DataLayout::new(&config.data_root);
        std::fs::create_dir_all(layout.root())
            .map_err(|e| StorageError::internal("cannot create data root").with_details(e.to_string()))?;
        let catalog = Catalog::open(&layout.metadata_path()).map_err(map_catalog_err)?;
        let service = Self {
            overlay: BranchOverlay::new(catalog.clone(), layout.clone()),
            locks: TableLockManager::new(),
            catalog,
            layout,
            config: Arc::new(config),
            idempotency: Arc::new(IdempotencyCache::default()),
        };
        service.reconcile_on_open()?;
        Ok(service)
    }

    /// In-memory-catalog service over a temp root (tests).
    pub fn open_for_tests(config: ServerConfig) -> Result<Self, StorageError> {
        let layout = DataLayout::new(&config.data_root);
        std::fs::create_dir_all(layout.root())
            .map_err(|e| StorageError::internal("cannot create data root").with_details(e.to_string()))?;
        let catalog = Catalog::open_memory().map_err(map_catalog_err)?;
        Ok(Self {
            overlay: BranchOverlay::new(catalog.clone(), layout.clone()),
            locks: TableLockManager::new(),
            catalog,
            layout,
            config: Arc::new(config),
            idempotency: Arc::new(IdempotencyCache::default()),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn idempotency(&self) -> &IdempotencyCache {
        &self.idempotency
    }

    pub fn resolver(&self) -> &PathResolver {
        self.overlay.resolver()
    }

    /// Authenticate a bearer token.
    pub fn authenticate(&self, token: &str) -> Result<Principal, StorageError> {
        crate::auth::authenticate(&self.catalog, &self.config.admin_key, token)
    }

    /// Scan every table row against the filesystem: rows whose file is gone
    /// are flagged `orphaned`, flagged rows whose file came back are healed.
    pub fn reconcile_on_open(&self) -> Result<(), StorageError> {
        let rows = self.catalog.list_all_tables().map_err(map_catalog_err)?;
        let mut orphaned = 0usize;
        for row in rows {
            let path = self
                .layout
                .table_path(&row.project, &row.branch, &row.bucket, &row.name);
            let exists = path.exists();
            match (exists, row.status) {
                (false, strata_protocol::types::TableStatus::Active) => {
                    warn!("Table file missing, flagging orphaned: {}", path.display());
                    self.catalog
                        .set_table_status(
                            &row.project,
                            &row.branch,
                            &row.bucket,
                            &row.name,
                            strata_protocol::types::TableStatus::Orphaned,
                        )
                        .map_err(map_catalog_err)?;
                    orphaned += 1;
                }
                (true, strata_protocol::types::TableStatus::Orphaned) => {
                    self.catalog
                        .set_table_status(
                            &row.project,
                            &row.branch,
                            &row.bucket,
                            &row.name,
                            strata_protocol::types::TableStatus::Active,
                        )
                        .map_err(map_catalog_err)?;
                }
                _ => {}
            }
        }
        if orphaned > 0 {
            warn!("Startup reconciliation flagged {} orphaned tables", orphaned);
        } else {
            info!("Startup reconciliation: catalog and files agree");
        }
        Ok(())
    }

    /// Acquire the write lease for a table with the configured timeout.
    pub(crate) async fn lock_table(&self, table: &TableRef) -> Result<TableLease, StorageError> {
        self.locks
            .acquire_write(table, self.config.lock_timeout)
            .await
    }

    /// Run engine/filesystem work on the blocking pool. Works from runtime
    /// workers and from `Handle::block_on` on the control thread alike.
    pub(crate) async fn run_blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(StorageService) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(this))
            .await
            .map_err(|e| {
                StorageError::internal("blocking task failed").with_details(e.to_string())
            })?
    }

    /// Refresh a table row's cached row count and size from its file.
    pub(crate) fn refresh_table_stats(
        &self,
        resolved: &crate::resolver::ResolvedTable,
    ) -> Result<(u64, u64), StorageError> {
        let conn =
            strata_db::EngineConnection::open_read(&resolved.path).map_err(crate::errors::map_engine_err)?;
        let rows = sql::count_rows(&conn)?;
        drop(conn);
        let bytes = sql::file_size(&resolved.path);
        self.catalog
            .update_table_stats(
                &resolved.physical.project,
                &resolved.physical.branch,
                &resolved.physical.bucket,
                &resolved.physical.table,
                rows,
                bytes as i64,
            )
            .map_err(map_catalog_err)?;
        Ok((rows as u64, bytes))
    }
}
