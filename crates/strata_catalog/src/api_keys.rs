//! API key digests.
//!
//! Only SHA-256 digests are stored; the plaintext key is returned once at
//! project creation and never persisted.

use chrono::Utc;
use strata_db::EngineValue;
use strata_protocol::types::ProjectId;

use crate::catalog::Catalog;
use crate::error::Result;

impl Catalog {
    pub fn insert_api_key(&self, key_hash: &str, project: &ProjectId) -> Result<()> {
        self.conn.execute(
            "INSERT INTO st_api_keys (key_hash, project_id, created_at) VALUES (?, ?, ?)",
            &[
                EngineValue::from(key_hash),
                EngineValue::from(project.as_str()),
                EngineValue::from(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Project the digest authorizes, if the key is known.
    pub fn project_for_api_key(&self, key_hash: &str) -> Result<Option<String>> {
        let row = self.conn.query_optional(
            "SELECT project_id FROM st_api_keys WHERE key_hash = ?",
            &[EngineValue::from(key_hash)],
        )?;
        match row {
            Some(r) => Ok(Some(r.get("project_id")?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_digest_lookup() {
        let catalog = Catalog::open_memory().unwrap();
        let p = ProjectId::new("p1").unwrap();
        catalog.create_project(&p, "p1").unwrap();

        catalog.insert_api_key("digest-1", &p).unwrap();
        assert_eq!(
            catalog.project_for_api_key("digest-1").unwrap(),
            Some("p1".to_string())
        );
        assert_eq!(catalog.project_for_api_key("unknown").unwrap(), None);
    }
}
