//! SQL builders for table engine files.
//!
//! Every table file holds one relation named `data`; these helpers render
//! its DDL and the common statements over it, with identifier quoting
//! throughout.

use strata_db::{quote_ident, EngineConnection, DATA_RELATION};
use strata_protocol::types::{is_valid_column_type, ColumnSpec};
use strata_protocol::StorageError;

use crate::errors::map_engine_err;

/// Render `CREATE TABLE data (...)` from the declared columns.
///
/// The primary key, when present, is declared inline so the engine enforces
/// it (unlike the cloud backends this replaces, which treat PK as metadata).
pub fn table_ddl(columns: &[ColumnSpec], primary_key: &[String]) -> Result<String, StorageError> {
    if columns.is_empty() {
        return Err(StorageError::invalid_argument(
            "a table needs at least one column",
        ));
    }
    let mut parts = Vec::with_capacity(columns.len() + 1);
    for col in columns {
        parts.push(column_ddl(col)?);
    }
    for key_col in primary_key {
        if !columns.iter().any(|c| &c.name == key_col) {
            return Err(StorageError::invalid_argument(format!(
                "primary key column '{key_col}' is not a table column"
            )));
        }
    }
    if !primary_key.is_empty() {
        let cols = primary_key
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("PRIMARY KEY ({cols})"));
    }
    Ok(format!(
        "CREATE TABLE {} ({})",
        quote_ident(DATA_RELATION),
        parts.join(", ")
    ))
}

/// Render one column clause.
pub fn column_ddl(col: &ColumnSpec) -> Result<String, StorageError> {
    if !is_valid_column_type(&col.data_type) {
        return Err(StorageError::invalid_argument(format!(
            "unknown column type '{}' for column '{}'",
            col.data_type, col.name
        )));
    }
    let mut clause = format!("{} {}", quote_ident(&col.name), col.data_type.trim());
    if let Some(default) = &col.default {
        clause.push_str(&format!(" DEFAULT {}", render_default(default)?));
    }
    if !col.nullable {
        clause.push_str(" NOT NULL");
    }
    Ok(clause)
}

/// Defaults are embedded in DDL; only literals are accepted.
pub fn render_default(raw: &str) -> Result<String, StorageError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("false")
    {
        return Ok(trimmed.to_ascii_uppercase());
    }
    if !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+')
        && trimmed.parse::<f64>().is_ok()
    {
        return Ok(trimmed.to_string());
    }
    // Everything else is a string literal
    Ok(format!("'{}'", trimmed.replace('\'', "''")))
}

/// Quoted column projection list.
pub fn column_list(columns: &[ColumnSpec]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Quoted list from plain names.
pub fn name_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Row count of the canonical relation.
pub fn count_rows(conn: &EngineConnection) -> Result<i64, StorageError> {
    conn.query_scalar(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(DATA_RELATION)),
        &[],
    )
    .map_err(map_engine_err)
}

/// File size on disk; zero when the file is gone.
pub fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Read the relation's declared structure back from an engine file.
/// Used when rebuilding an orphaned catalog row from the file on disk.
pub fn introspect_columns(
    conn: &EngineConnection,
) -> Result<(Vec<ColumnSpec>, Vec<String>), StorageError> {
    let rows = conn
        .query_all(
            "SELECT name, type, \"notnull\", pk FROM pragma_table_info('data') ORDER BY cid",
            &[],
        )
        .map_err(map_engine_err)?;
    let mut columns = Vec::with_capacity(rows.len());
    let mut primary_key = Vec::new();
    for row in &rows {
        let name: String = row.get("name").map_err(map_engine_err)?;
        let data_type: String = row.get("type").map_err(map_engine_err)?;
        let notnull: bool = row.get("notnull").map_err(map_engine_err)?;
        let pk: bool = row.get("pk").map_err(map_engine_err)?;
        if pk {
            primary_key.push(name.clone());
        }
        columns.push(ColumnSpec {
            name,
            data_type,
            nullable: !notnull,
            default: None,
        });
    }
    Ok((columns, primary_key))
}

/// Engine value to a JSON value (preview responses).
pub fn engine_value_to_json(value: &strata_db::EngineValue) -> serde_json::Value {
    use strata_db::EngineValue;
    match value {
        EngineValue::Null => serde_json::Value::Null,
        EngineValue::Integer(v) => serde_json::Value::from(*v),
        EngineValue::Real(v) => serde_json::Value::from(*v),
        EngineValue::Text(v) => serde_json::Value::from(v.clone()),
        EngineValue::Boolean(v) => serde_json::Value::from(*v),
        EngineValue::Timestamp(v) => serde_json::Value::from(v.to_rfc3339()),
        EngineValue::Blob(v) => serde_json::Value::from(format!("<{} bytes>", v.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: &str, nullable: bool) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            data_type: ty.into(),
            nullable,
            default: None,
        }
    }

    #[test]
    fn ddl_with_primary_key() {
        let columns = vec![col("id", "BIGINT", false), col("amount", "DECIMAL(10,2)", true)];
        let pk = vec!["id".to_string()];
        let ddl = table_ddl(&columns, &pk).unwrap();
        assert_eq!(
            ddl,
            "CREATE TABLE \"data\" (\"id\" BIGINT NOT NULL, \"amount\" DECIMAL(10,2), PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn ddl_quotes_awkward_names() {
        let columns = vec![col("select", "BIGINT", true), col("weird\"col", "TEXT", true)];
        let ddl = table_ddl(&columns, &[]).unwrap();
        assert!(ddl.contains("\"select\" BIGINT"));
        assert!(ddl.contains("\"weird\"\"col\" TEXT"));
    }

    #[test]
    fn ddl_rejects_unknown_type_and_bad_pk() {
        let bad_type = vec![col("id", "BIGSERIAL", false)];
        assert!(table_ddl(&bad_type, &[]).is_err());

        let columns = vec![col("id", "BIGINT", false)];
        let missing_pk = vec!["other".to_string()];
        assert!(table_ddl(&columns, &missing_pk).is_err());
    }

    #[test]
    fn default_rendering() {
        assert_eq!(render_default("42").unwrap(), "42");
        assert_eq!(render_default("-1.5").unwrap(), "-1.5");
        assert_eq!(render_default("true").unwrap(), "TRUE");
        assert_eq!(render_default("null").unwrap(), "NULL");
        assert_eq!(render_default("it's").unwrap(), "'it''s'");
    }

    #[test]
    fn ddl_executes_and_enforces_pk() {
        let conn = EngineConnection::open_memory().unwrap();
        let columns = vec![col("id", "BIGINT", false), col("name", "VARCHAR", true)];
        let ddl = table_ddl(&columns, &["id".to_string()]).unwrap();
        conn.execute_batch(&ddl).unwrap();

        conn.execute("INSERT INTO data VALUES (1, 'a')", &[]).unwrap();
        let dup = conn.execute("INSERT INTO data VALUES (1, 'b')", &[]);
        assert!(dup.is_err());
        assert_eq!(count_rows(&conn).unwrap(), 1);
    }
}
