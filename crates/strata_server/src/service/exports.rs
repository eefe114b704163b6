//! Table export: read-only SELECT copied atomically into a registered file.

use chrono::Utc;
use strata_db::{escape_sql_string, quote_ident, EngineConnection, DATA_RELATION};
use strata_protocol::http_types::{ExportRequest, ExportResponse};
use strata_protocol::options::{validate_filter, Compression, ExportFormat, ExportOptions};
use strata_protocol::types::ColumnSpec;
use strata_protocol::{StorageError, TableRef};
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditScope, RequestContext};
use crate::auth::Principal;
use crate::errors::{map_catalog_err, map_engine_err};
use crate::metrics::METRICS;
use crate::sql;

use super::files::{digest_file, file_info};
use super::StorageService;

impl StorageService {
    /// Export a table. Takes read-only access only: exports never contend
    /// with writers of other tables and never block readers.
    pub async fn export_table(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        table: &TableRef,
        req: &ExportRequest,
    ) -> Result<ExportResponse, StorageError> {
        principal.authorize_project(&table.project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "table.export",
            "table",
            format!("{}/{}", table.bucket, table.table),
            Some(table.project.clone()),
        );
        let table_owned = table.clone();
        let options = req.options.clone();
        let result = self
            .run_blocking(move |svc| svc.export_inner(&table_owned, &options))
            .await;
        if result.is_ok() {
            METRICS.inc(&METRICS.exports_completed);
        }
        scope.finish(&result);
        result
    }

    fn export_inner(
        &self,
        table: &TableRef,
        options: &ExportOptions,
    ) -> Result<ExportResponse, StorageError> {
        let resolved = self.resolver().resolve_read(table)?;
        let select = build_select(&resolved.row.columns, options)?;

        // Stage the output next to the engine staging files, then rename.
        let ext = output_extension(options);
        let staging_path = self
            .layout
            .staging_dir()
            .join(format!("{}.{ext}", Uuid::new_v4()));
        std::fs::create_dir_all(self.layout.staging_dir()).map_err(|e| {
            StorageError::internal("cannot create staging directory").with_details(e.to_string())
        })?;

        let conn = EngineConnection::open_read(&resolved.path).map_err(map_engine_err)?;
        let rows_exported: i64 = conn
            .query_scalar(&format!("SELECT COUNT(*) FROM ({select})"), &[])
            .map_err(map_engine_err)?;
        let copy_result = conn.execute_batch(&format!(
            "COPY ({select}) TO '{}' ({})",
            escape_sql_string(&staging_path.display().to_string()),
            copy_options(options)
        ));
        drop(conn);
        if let Err(e) = copy_result {
            let _ = std::fs::remove_file(&staging_path);
            return Err(map_engine_err(e));
        }

        let file_id = Uuid::new_v4().to_string();
        let file_name = format!(
            "{}_{}.{ext}",
            sanitize_stem(&table.table),
            Utc::now().format("%Y%m%d%H%M%S")
        );
        let final_path = self
            .layout
            .file_path(&table.project, Utc::now(), &file_id, &file_name);
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::internal("cannot create files directory").with_details(e.to_string())
            })?;
        }
        if let Err(e) = std::fs::rename(&staging_path, &final_path) {
            let _ = std::fs::remove_file(&staging_path);
            return Err(
                StorageError::internal("cannot move export output").with_details(e.to_string())
            );
        }

        let (size, sha256) = digest_file(&final_path)?;
        let rel = self.rel_path(&final_path)?;
        let row = self
            .catalog
            .insert_registered_file(
                &file_id,
                &table.project,
                &file_name,
                &rel,
                size as i64,
                &sha256,
                Some(content_type(options)),
            )
            .map_err(map_catalog_err)?;

        METRICS.add(&METRICS.rows_exported, rows_exported as u64);
        info!(
            "Exported {} rows from {} to {}",
            rows_exported, table, file_name
        );
        let info = file_info(&row);
        Ok(ExportResponse {
            file_id: info.id,
            path: info.path,
            size_bytes: info.size_bytes,
            rows_exported: rows_exported as u64,
        })
    }
}

fn build_select(columns: &[ColumnSpec], options: &ExportOptions) -> Result<String, StorageError> {
    let projection = match &options.columns {
        Some(selected) => {
            if selected.is_empty() {
                return Err(StorageError::invalid_argument("empty column projection"));
            }
            for name in selected {
                if !columns.iter().any(|c| &c.name == name) {
                    return Err(StorageError::invalid_argument(format!(
                        "unknown column '{name}' in projection"
                    )));
                }
            }
            sql::name_list(selected)
        }
        None => sql::column_list(columns),
    };

    let mut select = format!(
        "SELECT {projection} FROM {}",
        quote_ident(DATA_RELATION)
    );
    if let Some(filter) = &options.filter {
        validate_filter(filter).map_err(StorageError::invalid_argument)?;
        select.push_str(&format!(" WHERE {filter}"));
    }
    if !options.order_by.is_empty() {
        let terms = options
            .order_by
            .iter()
            .map(|term| {
                if !columns.iter().any(|c| c.name == term.column) {
                    return Err(StorageError::invalid_argument(format!(
                        "unknown column '{}' in order_by",
                        term.column
                    )));
                }
                Ok(format!(
                    "{} {}",
                    quote_ident(&term.column),
                    match term.direction {
                        strata_protocol::OrderDirection::Asc => "ASC",
                        strata_protocol::OrderDirection::Desc => "DESC",
                    }
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;
        select.push_str(&format!(" ORDER BY {}", terms.join(", ")));
    }
    if let Some(limit) = options.limit {
        select.push_str(&format!(" LIMIT {limit}"));
    }
    Ok(select)
}

fn copy_options(options: &ExportOptions) -> String {
    match options.format {
        ExportFormat::Delimited => {
            let mut parts = vec!["FORMAT CSV".to_string(), "HEADER".to_string()];
            match options.compression {
                Compression::None => {}
                Compression::Gzip => parts.push("COMPRESSION GZIP".to_string()),
                Compression::Zstd => parts.push("COMPRESSION ZSTD".to_string()),
            }
            parts.join(", ")
        }
        ExportFormat::Columnar => {
            let codec = match options.compression {
                Compression::None => "SNAPPY",
                Compression::Gzip => "GZIP",
                Compression::Zstd => "ZSTD",
            };
            format!("FORMAT PARQUET, COMPRESSION {codec}")
        }
    }
}

fn output_extension(options: &ExportOptions) -> &'static str {
    match (options.format, options.compression) {
        (ExportFormat::Delimited, Compression::None) => "csv",
        (ExportFormat::Delimited, Compression::Gzip) => "csv.gz",
        (ExportFormat::Delimited, Compression::Zstd) => "csv.zst",
        (ExportFormat::Columnar, _) => "parquet",
    }
}

fn content_type(options: &ExportOptions) -> &'static str {
    match options.format {
        ExportFormat::Delimited => "text/csv",
        ExportFormat::Columnar => "application/vnd.apache.parquet",
    }
}

fn sanitize_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_protocol::options::OrderBy;

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
                data_type: "DOUBLE".into(),
                nullable: true,
                default: None,
            },
        ]
    }

    #[test]
    fn select_with_all_options() {
        let options = ExportOptions {
            format: ExportFormat::Delimited,
            filter: Some("amount > 10".into()),
            columns: Some(vec!["id".into()]),
            order_by: vec![OrderBy {
                column: "id".into(),
                direction: strata_protocol::OrderDirection::Desc,
            }],
            limit: Some(5),
            compression: Compression::None,
        };
        let select = build_select(&columns(), &options).unwrap();
        assert_eq!(
            select,
            "SELECT \"id\" FROM \"data\" WHERE amount > 10 ORDER BY \"id\" DESC LIMIT 5"
        );
    }

    #[test]
    fn select_rejects_unknown_columns() {
        let options = ExportOptions {
            columns: Some(vec!["missing".into()]),
            ..Default::default()
        };
        assert!(build_select(&columns(), &options).is_err());

        let options = ExportOptions {
            order_by: vec![OrderBy {
                column: "missing".into(),
                direction: strata_protocol::OrderDirection::Asc,
            }],
            ..Default::default()
        };
        assert!(build_select(&columns(), &options).is_err());
    }

    #[test]
    fn copy_option_rendering() {
        let csv_gz = ExportOptions {
            format: ExportFormat::Delimited,
            compression: Compression::Gzip,
            ..Default::default()
        };
        assert_eq!(copy_options(&csv_gz), "FORMAT CSV, HEADER, COMPRESSION GZIP");
        assert_eq!(output_extension(&csv_gz), "csv.gz");

        let parquet = ExportOptions {
            format: ExportFormat::Columnar,
            compression: Compression::Zstd,
            ..Default::default()
        };
        assert_eq!(copy_options(&parquet), "FORMAT PARQUET, COMPRESSION ZSTD");
        assert_eq!(output_extension(&parquet), "parquet");
    }
}
