//! Request-scoped audit recording.

use chrono::Utc;
use std::time::Instant;
use strata_catalog::{AuditRecord, Catalog};
use strata_protocol::{ProjectId, StorageError};
use tracing::warn;
use uuid::Uuid;

/// Context carried through one API operation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub actor: String,
}

impl RequestContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            actor: actor.into(),
        }
    }

    pub fn with_request_id(actor: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            actor: actor.into(),
        }
    }
}

/// Timer + writer for one state-changing operation's audit entry.
pub struct AuditScope<'a> {
    catalog: &'a Catalog,
    ctx: &'a RequestContext,
    operation: &'a str,
    resource_type: &'a str,
    resource_id: String,
    project: Option<ProjectId>,
    started: Instant,
}

impl<'a> AuditScope<'a> {
    pub fn begin(
        catalog: &'a Catalog,
        ctx: &'a RequestContext,
        operation: &'a str,
        resource_type: &'a str,
        resource_id: impl Into<String>,
        project: Option<ProjectId>,
    ) -> Self {
        Self {
            catalog,
            ctx,
            operation,
            resource_type,
            resource_id: resource_id.into(),
            project,
            started: Instant::now(),
        }
    }

    /// Record the outcome. Audit failures are logged, never propagated: the
    /// operation's own result stands.
    pub fn finish<T>(self, result: &Result<T, StorageError>) {
        let (status, error) = match result {
            Ok(_) => ("ok".to_string(), None),
            Err(e) => (e.kind.as_str().to_string(), Some(e.message.clone())),
        };
        let record = AuditRecord {
            ts: Utc::now(),
            request_id: self.ctx.request_id.clone(),
            project: self.project,
            operation: self.operation.to_string(),
            resource_type: self.resource_type.to_string(),
            resource_id: self.resource_id,
            status,
            duration_ms: self.started.elapsed().as_millis() as i64,
            error,
        };
        if let Err(e) = self.catalog.append_audit(&record) {
            warn!("Failed to append audit record: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_records_ok_and_error() {
        let catalog = Catalog::open_memory().unwrap();
        let p = ProjectId::new("p1").unwrap();
        catalog.create_project(&p, "p1").unwrap();
        let ctx = RequestContext::new("admin");

        let scope = AuditScope::begin(&catalog, &ctx, "table.create", "table", "in_c/orders", Some(p.clone()));
        scope.finish::<()>(&Ok(()));

        let scope = AuditScope::begin(&catalog, &ctx, "table.drop", "table", "in_c/orders", Some(p.clone()));
        scope.finish::<()>(&Err(StorageError::not_found("table 'orders'")));

        let entries = catalog.list_audit(&p, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, "not-found");
        assert_eq!(entries[1].status, "ok");
        assert_eq!(entries[1].operation, "table.create");
    }
}
