//! Shared types for the Strata storage service.
//!
//! Entity identities and models, the public error taxonomy, REST/RPC payload
//! types, import/export option enumerations, the snapshot-settings model with
//! hierarchical deep merge, identifier naming rules, the on-disk layout, and
//! idempotency-key plumbing.

pub mod error;
pub mod http_types;
pub mod idempotency;
pub mod naming;
pub mod options;
pub mod paths;
pub mod settings;
pub mod types;

pub use error::{ErrorKind, StorageError};
pub use idempotency::{request_key, CachedResponse, IdempotencyCache, IDEMPOTENCY_TTL_SECS};
pub use options::{
    Compression, DedupMode, DelimitedOptions, ExportFormat, ExportOptions, ImportFormat,
    ImportOptions, OrderBy, OrderDirection,
};
pub use paths::DataLayout;
pub use settings::{
    resolve_effective, system_defaults, EffectiveSettings, SettingsLevel, SnapshotRetention,
    SnapshotSettings, SnapshotTriggers,
};
pub use types::{
    BranchId, BucketStage, ColumnSpec, DestructiveOp, ProjectId, ProjectStatus, SnapshotKind,
    TableRef, TableStatus, DEFAULT_BRANCH,
};
