//! Table rows.

use chrono::Utc;
use strata_db::{EngineTransaction, EngineValue};
use strata_protocol::types::{BranchId, ColumnSpec, ProjectId, TableStatus};

use crate::catalog::Catalog;
use crate::error::{CatalogError, Result};
use crate::models::{table_from_row, TableRow};

const SELECT_TABLE: &str = "SELECT project_id, branch_id, bucket, name, columns_json, primary_key_json, status, row_count, size_bytes, created_at FROM st_tables";

/// Parameters for registering a table row.
pub(crate) struct RegisterTable<'a> {
    pub project: &'a ProjectId,
    pub branch: &'a BranchId,
    pub bucket: &'a str,
    pub name: &'a str,
    pub columns: &'a [ColumnSpec],
    pub primary_key: &'a [String],
}

pub(crate) fn insert_table_tx(tx: &mut EngineTransaction<'_>, spec: &RegisterTable<'_>) -> Result<TableRow> {
    let now = Utc::now();
    let columns_json = serde_json::to_string(spec.columns)?;
    let primary_key_json = serde_json::to_string(spec.primary_key)?;
    tx.execute(
        r#"
        INSERT INTO st_tables (project_id, branch_id, bucket, name, columns_json, primary_key_json, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 'active', ?)
        "#,
        &[
            EngineValue::from(spec.project.as_str()),
            EngineValue::from(spec.branch.as_str()),
            EngineValue::from(spec.bucket),
            EngineValue::from(spec.name),
            EngineValue::from(columns_json),
            EngineValue::from(primary_key_json),
            EngineValue::from(now),
        ],
    )?;
    Ok(TableRow {
        project: spec.project.clone(),
        branch: spec.branch.clone(),
        bucket: spec.bucket.to_string(),
        name: spec.name.to_string(),
        columns: spec.columns.to_vec(),
        primary_key: spec.primary_key.to_vec(),
        status: TableStatus::Active,
        row_count: None,
        size_bytes: None,
        created_at: now,
    })
}

impl Catalog {
    /// Register a table row. Fails with `Conflict` when the name is taken.
    pub fn register_table(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
        name: &str,
        columns: &[ColumnSpec],
        primary_key: &[String],
    ) -> Result<TableRow> {
        if self.get_table(project, branch, bucket, name)?.is_some() {
            return Err(CatalogError::conflict(format!(
                "table '{name}' already exists in bucket '{bucket}'"
            )));
        }
        let spec = RegisterTable {
            project,
            branch,
            bucket,
            name,
            columns,
            primary_key,
        };
        self.conn.transaction(|tx| insert_table_tx(tx, &spec))
    }

    /// Register a table row and mark it copied in the branch overlay, in one
    /// transaction (the copy-on-write bookkeeping).
    pub fn register_copied_table(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
        name: &str,
        columns: &[ColumnSpec],
        primary_key: &[String],
    ) -> Result<TableRow> {
        let spec = RegisterTable {
            project,
            branch,
            bucket,
            name,
            columns,
            primary_key,
        };
        self.conn.transaction(|tx| {
            let row = insert_table_tx(tx, &spec)?;
            tx.execute(
                r#"
                INSERT INTO st_branch_tables (project_id, branch_id, bucket, table_name, state)
                VALUES (?, ?, ?, ?, 'copied')
                ON CONFLICT(project_id, branch_id, bucket, table_name) DO UPDATE SET state = 'copied'
                "#,
                &[
                    EngineValue::from(project.as_str()),
                    EngineValue::from(branch.as_str()),
                    EngineValue::from(bucket),
                    EngineValue::from(name),
                ],
            )?;
            Ok(row)
        })
    }

    pub fn get_table(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
        name: &str,
    ) -> Result<Option<TableRow>> {
        let row = self.conn.query_optional(
            &format!(
                "{SELECT_TABLE} WHERE project_id = ? AND branch_id = ? AND bucket = ? AND name = ?"
            ),
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(bucket),
                EngineValue::from(name),
            ],
        )?;
        row.as_ref().map(table_from_row).transpose()
    }

    pub fn list_tables(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
    ) -> Result<Vec<TableRow>> {
        let rows = self.conn.query_all(
            &format!(
                "{SELECT_TABLE} WHERE project_id = ? AND branch_id = ? AND bucket = ? ORDER BY name"
            ),
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(bucket),
            ],
        )?;
        rows.iter().map(table_from_row).collect()
    }

    /// Every table row in the catalog; startup reconciliation walks this.
    pub fn list_all_tables(&self) -> Result<Vec<TableRow>> {
        let rows = self.conn.query_all(
            &format!("{SELECT_TABLE} ORDER BY project_id, branch_id, bucket, name"),
            &[],
        )?;
        rows.iter().map(table_from_row).collect()
    }

    pub fn delete_table_row(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
        name: &str,
    ) -> Result<()> {
        self.conn.execute(
            "DELETE FROM st_tables WHERE project_id = ? AND branch_id = ? AND bucket = ? AND name = ?",
            &[
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(bucket),
                EngineValue::from(name),
            ],
        )?;
        Ok(())
    }

    /// Refresh the cached row count and size after a write.
    pub fn update_table_stats(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
        name: &str,
        row_count: i64,
        size_bytes: i64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE st_tables SET row_count = ?, size_bytes = ? WHERE project_id = ? AND branch_id = ? AND bucket = ? AND name = ?",
            &[
                EngineValue::from(row_count),
                EngineValue::from(size_bytes),
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(bucket),
                EngineValue::from(name),
            ],
        )?;
        Ok(())
    }

    /// Replace the stored column list (after ALTER).
    pub fn update_table_columns(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
        name: &str,
        columns: &[ColumnSpec],
    ) -> Result<()> {
        let columns_json = serde_json::to_string(columns)?;
        self.conn.execute(
            "UPDATE st_tables SET columns_json = ? WHERE project_id = ? AND branch_id = ? AND bucket = ? AND name = ?",
            &[
                EngineValue::from(columns_json),
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(bucket),
                EngineValue::from(name),
            ],
        )?;
        Ok(())
    }

    /// Flag or clear catalog/file drift.
    pub fn set_table_status(
        &self,
        project: &ProjectId,
        branch: &BranchId,
        bucket: &str,
        name: &str,
        status: TableStatus,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE st_tables SET status = ? WHERE project_id = ? AND branch_id = ? AND bucket = ? AND name = ?",
            &[
                EngineValue::from(status.as_str()),
                EngineValue::from(project.as_str()),
                EngineValue::from(branch.as_str()),
                EngineValue::from(bucket),
                EngineValue::from(name),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_protocol::types::BucketStage;

    fn setup() -> (Catalog, ProjectId, BranchId) {
        let catalog = Catalog::open_memory().unwrap();
        let p = ProjectId::new("p1").unwrap();
        let b = BranchId::default_branch();
        catalog.create_project(&p, "p1").unwrap();
        catalog
            .create_bucket(&p, &b, "in_c", BucketStage::In, None)
            .unwrap();
        (catalog, p, b)
    }

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec {
                name: "id".into(),
                data_type: "BIGINT".into(),
                nullable: false,
                default: None,
            },
            ColumnSpec {
                name: "amount".into(),
                data_type: "DECIMAL(10,2)".into(),
                nullable: true,
                default: None,
            },
        ]
    }

    #[test]
    fn register_and_fetch() {
        let (catalog, p, b) = setup();
        let cols = columns();
        let pk = vec!["id".to_string()];

        let row = catalog
            .register_table(&p, &b, "in_c", "orders", &cols, &pk)
            .unwrap();
        assert_eq!(row.status, TableStatus::Active);

        let fetched = catalog.get_table(&p, &b, "in_c", "orders").unwrap().unwrap();
        assert_eq!(fetched.columns, cols);
        assert_eq!(fetched.primary_key, pk);

        let err = catalog
            .register_table(&p, &b, "in_c", "orders", &cols, &pk)
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[test]
    fn stats_and_status_updates() {
        let (catalog, p, b) = setup();
        catalog
            .register_table(&p, &b, "in_c", "orders", &columns(), &[])
            .unwrap();

        catalog
            .update_table_stats(&p, &b, "in_c", "orders", 42, 4096)
            .unwrap();
        let row = catalog.get_table(&p, &b, "in_c", "orders").unwrap().unwrap();
        assert_eq!(row.row_count, Some(42));
        assert_eq!(row.size_bytes, Some(4096));

        catalog
            .set_table_status(&p, &b, "in_c", "orders", TableStatus::Orphaned)
            .unwrap();
        let row = catalog.get_table(&p, &b, "in_c", "orders").unwrap().unwrap();
        assert_eq!(row.status, TableStatus::Orphaned);
    }

    #[test]
    fn register_copied_marks_overlay() {
        let (catalog, p, _b) = setup();
        let dev = BranchId::new("dev1").unwrap();
        catalog.create_branch(&p, &dev, "x").unwrap();

        catalog
            .register_copied_table(&p, &dev, "in_c", "orders", &columns(), &[])
            .unwrap();
        assert_eq!(
            catalog
                .branch_table_state(&p, &dev, "in_c", "orders")
                .unwrap(),
            Some(crate::models::BranchTableState::Copied)
        );
    }
}
