//! Mapping of internal errors onto the public taxonomy.
//!
//! Engine-specific detail is logged here at the boundary and kept in the
//! `details` field; the public message stays generic.

use strata_catalog::CatalogError;
use strata_db::EngineError;
use strata_protocol::StorageError;
use tracing::warn;

pub fn map_catalog_err(err: CatalogError) -> StorageError {
    match err {
        CatalogError::NotFound(msg) => StorageError::not_found(msg),
        CatalogError::Conflict(msg) => StorageError::conflict(msg),
        CatalogError::Corrupt(msg) => {
            warn!("Corrupt catalog entry: {}", msg);
            StorageError::internal("catalog entry is corrupt").with_details(msg)
        }
        CatalogError::Serialization(e) => {
            warn!("Catalog serialization error: {}", e);
            StorageError::internal("catalog serialization failed").with_details(e.to_string())
        }
        CatalogError::SchemaVersion { found, supported } => StorageError::unavailable(format!(
            "catalog schema version {found} is newer than supported {supported}"
        )),
        CatalogError::Engine(e) => map_engine_err(e),
    }
}

pub fn map_engine_err(err: EngineError) -> StorageError {
    match err {
        EngineError::Locked(path) => {
            warn!("Engine file locked: {}", path.display());
            StorageError::unavailable("engine file is locked by another writer")
                .with_details(path.display().to_string())
        }
        EngineError::ReadOnly => {
            StorageError::invalid_argument("operation requires write access")
        }
        EngineError::ResourceExhausted(msg) => StorageError::resource_exhausted(msg),
        EngineError::InvalidInput(msg) => StorageError::invalid_argument(msg),
        EngineError::TypeConversion(msg) => {
            warn!("Engine type conversion error: {}", msg);
            StorageError::internal("unexpected engine value").with_details(msg)
        }
        EngineError::Io(e) => {
            warn!("Engine IO error: {}", e);
            StorageError::internal("engine IO error").with_details(e.to_string())
        }
        EngineError::Query(msg) | EngineError::Transaction(msg) => {
            warn!("Engine error: {}", msg);
            StorageError::internal("engine error").with_details(msg)
        }
        EngineError::Engine(e) => {
            let detail = e.to_string();
            warn!("Engine error: {}", detail);
            // Constraint violations surface as conflicts; everything else is
            // an internal engine failure.
            if detail.contains("Constraint Error")
                || detail.contains("PRIMARY KEY")
                || detail.contains("Duplicate key")
            {
                StorageError::conflict("constraint violation").with_details(detail)
            } else {
                StorageError::internal("engine error").with_details(detail)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_protocol::ErrorKind;

    #[test]
    fn catalog_kinds_map() {
        assert_eq!(
            map_catalog_err(CatalogError::NotFound("x".into())).kind,
            ErrorKind::NotFound
        );
        assert_eq!(
            map_catalog_err(CatalogError::Conflict("x".into())).kind,
            ErrorKind::Conflict
        );
        assert_eq!(
            map_catalog_err(CatalogError::SchemaVersion {
                found: 2,
                supported: 1
            })
            .kind,
            ErrorKind::Unavailable
        );
    }

    #[test]
    fn engine_kinds_map() {
        assert_eq!(
            map_engine_err(EngineError::ResourceExhausted("fds".into())).kind,
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            map_engine_err(EngineError::Locked("x".into())).kind,
            ErrorKind::Unavailable
        );
        let err = map_engine_err(EngineError::Query("boom".into()));
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.details.as_deref(), Some("boom"));
    }
}
