//! Uploaded file rows.

use chrono::{DateTime, Utc};
use strata_db::EngineValue;
use strata_protocol::types::ProjectId;

use crate::catalog::Catalog;
use crate::error::{CatalogError, Result};
use crate::models::{file_from_row, FileRow};

const SELECT_FILE: &str = "SELECT id, project_id, name, rel_path, size_bytes, sha256, content_type, is_staging, created_at, expires_at FROM st_files";

impl Catalog {
    /// Insert a staged upload row (prepare step).
    pub fn insert_staged_file(
        &self,
        id: &str,
        project: &ProjectId,
        name: &str,
        rel_path: &str,
        content_type: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<FileRow> {
        let now = Utc::now();
        self.conn.execute(
            r#"
            INSERT INTO st_files (id, project_id, name, rel_path, size_bytes, sha256, content_type, is_staging, created_at, expires_at)
            VALUES (?, ?, ?, ?, 0, '', ?, TRUE, ?, ?)
            "#,
            &[
                EngineValue::from(id),
                EngineValue::from(project.as_str()),
                EngineValue::from(name),
                EngineValue::from(rel_path),
                EngineValue::from(content_type),
                EngineValue::from(now),
                EngineValue::from(expires_at),
            ],
        )?;
        Ok(FileRow {
            id: id.to_string(),
            project: project.clone(),
            name: name.to_string(),
            rel_path: rel_path.to_string(),
            size_bytes: 0,
            sha256: String::new(),
            content_type: content_type.map(|s| s.to_string()),
            is_staging: true,
            created_at: now,
            expires_at: Some(expires_at),
        })
    }

    /// Finalize a staged upload: final path, size, checksum; drops the TTL.
    pub fn register_file(
        &self,
        id: &str,
        rel_path: &str,
        size_bytes: i64,
        sha256: &str,
    ) -> Result<FileRow> {
        let updated = self.conn.execute(
            r#"
            UPDATE st_files
            SET rel_path = ?, size_bytes = ?, sha256 = ?, is_staging = FALSE, expires_at = NULL
            WHERE id = ? AND is_staging
            "#,
            &[
                EngineValue::from(rel_path),
                EngineValue::from(size_bytes),
                EngineValue::from(sha256),
                EngineValue::from(id),
            ],
        )?;
        if updated == 0 {
            return Err(CatalogError::not_found(format!("staged file '{id}'")));
        }
        self.require_file(id)
    }

    /// Insert an already-materialized file row (export outputs).
    #[allow(clippy::too_many_arguments)]
    pub fn insert_registered_file(
        &self,
        id: &str,
        project: &ProjectId,
        name: &str,
        rel_path: &str,
        size_bytes: i64,
        sha256: &str,
        content_type: Option<&str>,
    ) -> Result<FileRow> {
        let now = Utc::now();
        self.conn.execute(
            r#"
            INSERT INTO st_files (id, project_id, name, rel_path, size_bytes, sha256, content_type, is_staging, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, FALSE, ?, NULL)
            "#,
            &[
                EngineValue::from(id),
                EngineValue::from(project.as_str()),
                EngineValue::from(name),
                EngineValue::from(rel_path),
                EngineValue::from(size_bytes),
                EngineValue::from(sha256),
                EngineValue::from(content_type),
                EngineValue::from(now),
            ],
        )?;
        self.require_file(id)
    }

    pub fn get_file(&self, id: &str) -> Result<Option<FileRow>> {
        let row = self.conn.query_optional(
            &format!("{SELECT_FILE} WHERE id = ?"),
            &[EngineValue::from(id)],
        )?;
        row.as_ref().map(file_from_row).transpose()
    }

    pub fn require_file(&self, id: &str) -> Result<FileRow> {
        self.get_file(id)?
            .ok_or_else(|| CatalogError::not_found(format!("file '{id}'")))
    }

    pub fn list_files(&self, project: &ProjectId) -> Result<Vec<FileRow>> {
        let rows = self.conn.query_all(
            &format!("{SELECT_FILE} WHERE project_id = ? ORDER BY created_at DESC, id"),
            &[EngineValue::from(project.as_str())],
        )?;
        rows.iter().map(file_from_row).collect()
    }

    pub fn delete_file_row(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM st_files WHERE id = ?", &[EngineValue::from(id)])?;
        Ok(())
    }

    /// Staged uploads whose TTL has passed; the janitor unlinks and removes.
    pub fn list_expired_staged_files(&self, now: DateTime<Utc>) -> Result<Vec<FileRow>> {
        let rows = self.conn.query_all(
            &format!("{SELECT_FILE} WHERE is_staging AND expires_at IS NOT NULL AND expires_at < ?"),
            &[EngineValue::from(now)],
        )?;
        rows.iter().map(file_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn setup() -> (Catalog, ProjectId) {
        let catalog = Catalog::open_memory().unwrap();
        let p = ProjectId::new("p1").unwrap();
        catalog.create_project(&p, "p1").unwrap();
        (catalog, p)
    }

    #[test]
    fn staged_upload_lifecycle() {
        let (catalog, p) = setup();
        let expires = Utc::now() + Duration::hours(24);

        catalog
            .insert_staged_file("f-1", &p, "data.csv", "files/p1/staging/f-1_data.csv", Some("text/csv"), expires)
            .unwrap();
        let staged = catalog.require_file("f-1").unwrap();
        assert!(staged.is_staging);
        assert!(staged.expires_at.is_some());

        catalog
            .register_file("f-1", "files/p1/2026/08/01/f-1_data.csv", 1024, "abcd")
            .unwrap();
        let registered = catalog.require_file("f-1").unwrap();
        assert!(!registered.is_staging);
        assert_eq!(registered.size_bytes, 1024);
        assert!(registered.expires_at.is_none());

        // double-register is not-found (no longer staged)
        assert!(matches!(
            catalog.register_file("f-1", "x", 1, "y").unwrap_err(),
            CatalogError::NotFound(_)
        ));
    }

    #[test]
    fn expired_staged_files_listed() {
        let (catalog, p) = setup();
        let past = Utc::now() - Duration::hours(1);
        catalog
            .insert_staged_file("f-old", &p, "a.csv", "files/p1/staging/f-old_a.csv", None, past)
            .unwrap();
        let future = Utc::now() + Duration::hours(1);
        catalog
            .insert_staged_file("f-new", &p, "b.csv", "files/p1/staging/f-new_b.csv", None, future)
            .unwrap();

        let expired = catalog.list_expired_staged_files(Utc::now()).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "f-old");
    }
}
