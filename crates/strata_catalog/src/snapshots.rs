//! Snapshot rows.

use chrono::{DateTime, Utc};
use strata_db::EngineValue;
use strata_protocol::types::ProjectId;

use crate::catalog::Catalog;
use crate::error::{CatalogError, Result};
use crate::models::{snapshot_from_row, SnapshotRow};

const SELECT_SNAPSHOT: &str = "SELECT id, project_id, bucket, table_name, kind, rel_path, row_count, size_bytes, schema_json, primary_key_json, created_at, created_by, expires_at, description FROM st_snapshots";

impl Catalog {
    pub fn insert_snapshot(&self, row: &SnapshotRow) -> Result<()> {
        if self.get_snapshot(&row.id)?.is_some() {
            return Err(CatalogError::conflict(format!(
                "snapshot '{}' already exists",
                row.id
            )));
        }
        let schema_json = serde_json::to_string(&row.schema)?;
        let primary_key_json = serde_json::to_string(&row.primary_key)?;
        self.conn.execute(
            r#"
            INSERT INTO st_snapshots (id, project_id, bucket, table_name, kind, rel_path, row_count, size_bytes, schema_json, primary_key_json, created_at, created_by, expires_at, description)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            &[
                EngineValue::from(row.id.as_str()),
                EngineValue::from(row.project.as_str()),
                EngineValue::from(row.bucket.as_str()),
                EngineValue::from(row.table.as_str()),
                EngineValue::from(row.kind.as_str()),
                EngineValue::from(row.rel_path.as_str()),
                EngineValue::from(row.row_count),
                EngineValue::from(row.size_bytes),
                EngineValue::from(schema_json),
                EngineValue::from(primary_key_json),
                EngineValue::from(row.created_at),
                EngineValue::from(row.created_by.as_str()),
                EngineValue::from(row.expires_at),
                EngineValue::from(row.description.as_deref()),
            ],
        )?;
        Ok(())
    }

    pub fn get_snapshot(&self, id: &str) -> Result<Option<SnapshotRow>> {
        let row = self.conn.query_optional(
            &format!("{SELECT_SNAPSHOT} WHERE id = ?"),
            &[EngineValue::from(id)],
        )?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    pub fn require_snapshot(&self, id: &str) -> Result<SnapshotRow> {
        self.get_snapshot(id)?
            .ok_or_else(|| CatalogError::not_found(format!("snapshot '{id}'")))
    }

    pub fn list_snapshots(&self, project: &ProjectId) -> Result<Vec<SnapshotRow>> {
        let rows = self.conn.query_all(
            &format!("{SELECT_SNAPSHOT} WHERE project_id = ? ORDER BY created_at DESC, id"),
            &[EngineValue::from(project.as_str())],
        )?;
        rows.iter().map(snapshot_from_row).collect()
    }

    pub fn delete_snapshot_row(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM st_snapshots WHERE id = ?",
            &[EngineValue::from(id)],
        )?;
        Ok(())
    }

    /// Snapshots past their retention; the sweeper removes files then rows.
    pub fn list_expired_snapshots(&self, now: DateTime<Utc>) -> Result<Vec<SnapshotRow>> {
        let rows = self.conn.query_all(
            &format!("{SELECT_SNAPSHOT} WHERE expires_at < ? ORDER BY expires_at"),
            &[EngineValue::from(now)],
        )?;
        rows.iter().map(snapshot_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use strata_protocol::types::{ColumnSpec, SnapshotKind};

    fn snapshot_row(id: &str, project: &ProjectId, expires_at: DateTime<Utc>) -> SnapshotRow {
        SnapshotRow {
            id: id.to_string(),
            project: project.clone(),
            bucket: "in_c".into(),
            table: "orders".into(),
            kind: SnapshotKind::Manual,
            rel_path: format!("snapshots/p1/{id}"),
            row_count: 10,
            size_bytes: 2048,
            schema: vec![ColumnSpec {
                name: "id".into(),
                data_type: "BIGINT".into(),
                nullable: false,
                default: None,
            }],
            primary_key: vec!["id".into()],
            created_at: Utc::now(),
            created_by: "proj_p1_admin".into(),
            expires_at,
            description: None,
        }
    }

    #[test]
    fn insert_fetch_delete() {
        let catalog = Catalog::open_memory().unwrap();
        let p = ProjectId::new("p1").unwrap();
        catalog.create_project(&p, "p1").unwrap();

        let row = snapshot_row("snap_orders_1", &p, Utc::now() + Duration::days(90));
        catalog.insert_snapshot(&row).unwrap();

        let fetched = catalog.require_snapshot("snap_orders_1").unwrap();
        assert_eq!(fetched.kind, SnapshotKind::Manual);
        assert_eq!(fetched.schema.len(), 1);

        assert!(matches!(
            catalog.insert_snapshot(&row).unwrap_err(),
            CatalogError::Conflict(_)
        ));

        catalog.delete_snapshot_row("snap_orders_1").unwrap();
        assert!(catalog.get_snapshot("snap_orders_1").unwrap().is_none());
    }

    #[test]
    fn expired_listing_honors_cutoff() {
        let catalog = Catalog::open_memory().unwrap();
        let p = ProjectId::new("p1").unwrap();
        catalog.create_project(&p, "p1").unwrap();

        catalog
            .insert_snapshot(&snapshot_row("snap_a", &p, Utc::now() - Duration::hours(2)))
            .unwrap();
        catalog
            .insert_snapshot(&snapshot_row("snap_b", &p, Utc::now() + Duration::days(1)))
            .unwrap();

        let expired = catalog.list_expired_snapshots(Utc::now()).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "snap_a");
    }
}
