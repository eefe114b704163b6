//! Stored settings partials.
//!
//! One JSON row per entity; the effective config is resolved by merging the
//! chain in `strata_protocol::settings`.

use chrono::Utc;
use serde_json::Value;
use strata_db::EngineValue;
use strata_protocol::types::ProjectId;

use crate::catalog::Catalog;
use crate::error::{CatalogError, Result};

/// Entity level a settings row belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsScope {
    Project(ProjectId),
    Bucket(ProjectId, String),
    Table(ProjectId, String, String),
}

impl SettingsScope {
    fn columns(&self) -> (&'static str, &str, &str, &str) {
        match self {
            Self::Project(p) => ("project", p.as_str(), "", ""),
            Self::Bucket(p, b) => ("bucket", p.as_str(), b.as_str(), ""),
            Self::Table(p, b, t) => ("table", p.as_str(), b.as_str(), t.as_str()),
        }
    }

    pub fn project(&self) -> &ProjectId {
        match self {
            Self::Project(p) | Self::Bucket(p, _) | Self::Table(p, _, _) => p,
        }
    }
}

impl Catalog {
    /// Stored partial for a scope, if any.
    pub fn get_settings(&self, scope: &SettingsScope) -> Result<Option<Value>> {
        let (scope_name, project, bucket, table) = scope.columns();
        let row = self.conn.query_optional(
            "SELECT config_json FROM st_settings WHERE scope = ? AND project_id = ? AND bucket = ? AND table_name = ?",
            &[
                EngineValue::from(scope_name),
                EngineValue::from(project),
                EngineValue::from(bucket),
                EngineValue::from(table),
            ],
        )?;
        match row {
            Some(r) => {
                let raw: String = r.get("config_json")?;
                let value = serde_json::from_str(&raw)
                    .map_err(|e| CatalogError::corrupt(format!("settings json: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Store a partial for a scope, replacing any previous row.
    pub fn put_settings(&self, scope: &SettingsScope, partial: &Value) -> Result<()> {
        let (scope_name, project, bucket, table) = scope.columns();
        let config_json = serde_json::to_string(partial)?;
        self.conn.execute(
            r#"
            INSERT INTO st_settings (scope, project_id, bucket, table_name, config_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(scope, project_id, bucket, table_name)
            DO UPDATE SET config_json = excluded.config_json, updated_at = excluded.updated_at
            "#,
            &[
                EngineValue::from(scope_name),
                EngineValue::from(project),
                EngineValue::from(bucket),
                EngineValue::from(table),
                EngineValue::from(config_json),
                EngineValue::from(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Remove a scope's partial entirely (full inheritance).
    pub fn delete_settings(&self, scope: &SettingsScope) -> Result<()> {
        let (scope_name, project, bucket, table) = scope.columns();
        self.conn.execute(
            "DELETE FROM st_settings WHERE scope = ? AND project_id = ? AND bucket = ? AND table_name = ?",
            &[
                EngineValue::from(scope_name),
                EngineValue::from(project),
                EngineValue::from(bucket),
                EngineValue::from(table),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scoped_rows_do_not_collide() {
        let catalog = Catalog::open_memory().unwrap();
        let p = ProjectId::new("p1").unwrap();
        catalog.create_project(&p, "p1").unwrap();

        let project_scope = SettingsScope::Project(p.clone());
        let bucket_scope = SettingsScope::Bucket(p.clone(), "in_c".into());
        let table_scope = SettingsScope::Table(p.clone(), "in_c".into(), "orders".into());

        catalog
            .put_settings(&project_scope, &json!({"enabled": false}))
            .unwrap();
        catalog
            .put_settings(
                &bucket_scope,
                &json!({"auto_snapshot_triggers": {"truncate_table": true}}),
            )
            .unwrap();

        assert_eq!(
            catalog.get_settings(&project_scope).unwrap(),
            Some(json!({"enabled": false}))
        );
        assert!(catalog.get_settings(&table_scope).unwrap().is_none());

        // replace, then delete
        catalog
            .put_settings(&project_scope, &json!({"enabled": true}))
            .unwrap();
        assert_eq!(
            catalog.get_settings(&project_scope).unwrap(),
            Some(json!({"enabled": true}))
        );

        catalog.delete_settings(&project_scope).unwrap();
        assert!(catalog.get_settings(&project_scope).unwrap().is_none());
        assert!(catalog.get_settings(&bucket_scope).unwrap().is_some());
    }
}
