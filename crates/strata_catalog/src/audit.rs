//! Append-only audit log.

use chrono::{DateTime, Utc};
use strata_db::EngineValue;
use strata_protocol::types::ProjectId;

use crate::catalog::Catalog;
use crate::error::Result;

/// One audit entry per state-changing operation.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub request_id: String,
    pub project: Option<ProjectId>,
    pub operation: String,
    pub resource_type: String,
    pub resource_id: String,
    pub status: String,
    pub duration_ms: i64,
    pub error: Option<String>,
}

impl Catalog {
    pub fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO st_audit (ts, request_id, project_id, operation, resource_type, resource_id, status, duration_ms, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            &[
                EngineValue::from(record.ts),
                EngineValue::from(record.request_id.as_str()),
                EngineValue::from(record.project.as_ref().map(|p| p.as_str())),
                EngineValue::from(record.operation.as_str()),
                EngineValue::from(record.resource_type.as_str()),
                EngineValue::from(record.resource_id.as_str()),
                EngineValue::from(record.status.as_str()),
                EngineValue::from(record.duration_ms),
                EngineValue::from(record.error.as_deref()),
            ],
        )?;
        Ok(())
    }

    /// Recent audit entries for a project, newest first.
    pub fn list_audit(&self, project: &ProjectId, limit: i64) -> Result<Vec<AuditRecord>> {
        let rows = self.conn.query_all(
            r#"
            SELECT ts, request_id, project_id, operation, resource_type, resource_id, status, duration_ms, error
            FROM st_audit WHERE project_id = ? ORDER BY id DESC LIMIT ?
            "#,
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(limit),
            ],
        )?;
        rows.iter()
            .map(|r| {
                let project_raw: Option<String> = r.get("project_id")?;
                Ok(AuditRecord {
                    ts: r.get("ts")?,
                    request_id: r.get("request_id")?,
                    project: project_raw
                        .map(|p| crate::models::parse_project_id(&p))
                        .transpose()?,
                    operation: r.get("operation")?,
                    resource_type: r.get("resource_type")?,
                    resource_id: r.get("resource_id")?,
                    status: r.get("status")?,
                    duration_ms: r.get("duration_ms")?,
                    error: r.get("error")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_list() {
        let catalog = Catalog::open_memory().unwrap();
        let p = ProjectId::new("p1").unwrap();
        catalog.create_project(&p, "p1").unwrap();

        for i in 0..3 {
            catalog
                .append_audit(&AuditRecord {
                    ts: Utc::now(),
                    request_id: format!("req-{i}"),
                    project: Some(p.clone()),
                    operation: "table.create".into(),
                    resource_type: "table".into(),
                    resource_id: format!("in_c/orders_{i}"),
                    status: "ok".into(),
                    duration_ms: 12,
                    error: None,
                })
                .unwrap();
        }

        let entries = catalog.list_audit(&p, 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].request_id, "req-2");
    }
}
