//! API-key authentication.
//!
//! Two key tiers: a single `admin_*` key from the environment authorizes
//! project creation and system operations; `proj_<project>_admin_*` keys
//! authorize everything within one project. Only SHA-256 digests of project
//! keys are stored.

use sha2::{Digest, Sha256};
use strata_catalog::Catalog;
use strata_protocol::{ProjectId, StorageError};
use uuid::Uuid;

use crate::errors::map_catalog_err;

/// Who a request acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Holder of the system admin key.
    System,
    /// Holder of a project admin key.
    Project(ProjectId),
}

impl Principal {
    /// Display name recorded in audit entries and snapshot provenance.
    pub fn actor_name(&self) -> String {
        match self {
            Self::System => "admin".to_string(),
            Self::Project(p) => format!("proj_{}_admin", p),
        }
    }

    /// System principals may do anything; project principals only touch
    /// their own project.
    pub fn authorize_project(&self, project: &ProjectId) -> Result<(), StorageError> {
        match self {
            Self::System => Ok(()),
            Self::Project(own) if own == project => Ok(()),
            Self::Project(_) => Err(StorageError::permission_denied(format!(
                "key is not authorized for project '{project}'"
            ))),
        }
    }

    pub fn require_system(&self) -> Result<(), StorageError> {
        match self {
            Self::System => Ok(()),
            Self::Project(_) => Err(StorageError::permission_denied(
                "operation requires the system admin key",
            )),
        }
    }
}

/// SHA-256 hex digest of a key.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Mint a fresh project admin key: `proj_<project>_admin_<random>`.
pub fn generate_project_key(project: &ProjectId) -> String {
    format!(
        "proj_{}_admin_{}",
        project,
        Uuid::new_v4().simple()
    )
}

/// Resolve a bearer token to a principal.
pub fn authenticate(
    catalog: &Catalog,
    admin_key: &str,
    token: &str,
) -> Result<Principal, StorageError> {
    if token.is_empty() {
        return Err(StorageError::unauthenticated("missing bearer token"));
    }
    if token.starts_with("admin_") {
        if !admin_key.is_empty() && constant_time_eq(token, admin_key) {
            return Ok(Principal::System);
        }
        return Err(StorageError::unauthenticated("invalid admin key"));
    }
    if token.starts_with("proj_") {
        let digest = hash_key(token);
        if let Some(project) = catalog
            .project_for_api_key(&digest)
            .map_err(map_catalog_err)?
        {
            let project = ProjectId::new(project)
                .map_err(|_| StorageError::internal("stored key references a bad project id"))?;
            return Ok(Principal::Project(project));
        }
        return Err(StorageError::unauthenticated("unknown project key"));
    }
    Err(StorageError::unauthenticated(
        "bearer token has an unrecognized prefix",
    ))
}

/// Compare credentials without leaking the mismatch position.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_key_authenticates_system() {
        let catalog = Catalog::open_memory().unwrap();
        let principal = authenticate(&catalog, "admin_s3cret", "admin_s3cret").unwrap();
        assert_eq!(principal, Principal::System);

        let err = authenticate(&catalog, "admin_s3cret", "admin_wrong").unwrap_err();
        assert_eq!(err.kind, strata_protocol::ErrorKind::Unauthenticated);
    }

    #[test]
    fn project_key_roundtrip() {
        let catalog = Catalog::open_memory().unwrap();
        let p = ProjectId::new("p1").unwrap();
        catalog.create_project(&p, "p1").unwrap();

        let key = generate_project_key(&p);
        assert!(key.starts_with("proj_p1_admin_"));
        catalog.insert_api_key(&hash_key(&key), &p).unwrap();

        let principal = authenticate(&catalog, "admin_x", &key).unwrap();
        assert_eq!(principal, Principal::Project(p.clone()));

        principal.authorize_project(&p).unwrap();
        let other = ProjectId::new("p2").unwrap();
        let err = principal.authorize_project(&other).unwrap_err();
        assert_eq!(err.kind, strata_protocol::ErrorKind::PermissionDenied);
    }

    #[test]
    fn unknown_prefixes_are_rejected() {
        let catalog = Catalog::open_memory().unwrap();
        let err = authenticate(&catalog, "admin_x", "sk-something").unwrap_err();
        assert_eq!(err.kind, strata_protocol::ErrorKind::Unauthenticated);
    }

    #[test]
    fn project_principal_cannot_use_system_ops() {
        let p = ProjectId::new("p1").unwrap();
        let principal = Principal::Project(p);
        assert!(principal.require_system().is_err());
        assert!(Principal::System.require_system().is_ok());
    }
}
