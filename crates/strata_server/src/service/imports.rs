//! Import pipeline: stage → merge/replace → cleanup.
//!
//! External data is bulk-loaded into a transient staging engine file, then
//! reconciled into the target relation inside one engine transaction while
//! the table's write lock is held end-to-end. The staging file is unlinked
//! on every exit path (RAII guard); a janitor sweeps anything a crash
//! leaves behind.

use std::path::{Path, PathBuf};
use strata_db::{
    escape_sql_string, quote_ident, EngineConnection, StagedEngineFile, DATA_RELATION,
};
use strata_protocol::http_types::{ImportRequest, ImportResponse};
use strata_protocol::options::{DedupMode, DelimitedOptions, ImportFormat};
use strata_protocol::types::{ColumnSpec, DestructiveOp};
use strata_protocol::{StorageError, TableRef};
use tracing::info;

use crate::audit::{AuditScope, RequestContext};
use crate::auth::Principal;
use crate::errors::map_engine_err;
use crate::metrics::METRICS;
use crate::sql;

use super::StorageService;

/// Tombstone column driving the delete leg of the full MERGE variant.
const TOMBSTONE_COLUMN: &str = "_deleted";

/// How staged columns land in the target.
struct MergePlan {
    /// Target column names receiving data, in target declaration order.
    insert_cols: Vec<String>,
    /// Matching select expressions over the staged relation (casts applied).
    select_exprs: Vec<String>,
    /// Present when the source carries the `_deleted` tombstone.
    has_tombstone: bool,
}

impl StorageService {
    pub async fn import_table(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        table: &TableRef,
        req: &ImportRequest,
    ) -> Result<ImportResponse, StorageError> {
        principal.authorize_project(&table.project)?;
        let scope = AuditScope::begin(
            &self.catalog,
            ctx,
            "table.import",
            "table",
            format!("{}/{}", table.bucket, table.table),
            Some(table.project.clone()),
        );
        let result = self.import_inner(ctx, principal, table, req).await;
        match &result {
            Ok(resp) => {
                METRICS.inc(&METRICS.imports_completed);
                METRICS.add(&METRICS.rows_imported, resp.rows_imported);
            }
            Err(_) => METRICS.inc(&METRICS.imports_failed),
        }
        scope.finish(&result);
        result
    }

    async fn import_inner(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        table: &TableRef,
        req: &ImportRequest,
    ) -> Result<ImportResponse, StorageError> {
        let source = self.resolve_import_source(principal, table, req)?;

        // The lock is held for the whole pipeline. Staging could run
        // without it, but simplicity wins.
        let _lease = self.lock_table(table).await?;
        let ctx = ctx.clone();
        let table = table.clone();
        let req = req.clone();
        self.run_blocking(move |svc| svc.run_pipeline(&ctx, &table, &req, &source))
            .await
    }

    fn resolve_import_source(
        &self,
        principal: &Principal,
        table: &TableRef,
        req: &ImportRequest,
    ) -> Result<PathBuf, StorageError> {
        match (&req.file_id, &req.path) {
            (Some(_), Some(_)) => Err(StorageError::invalid_argument(
                "give either file_id or path, not both",
            )),
            (Some(file_id), None) => self.resolve_file_source(&table.project, file_id),
            (None, Some(raw)) => {
                // Raw filesystem paths bypass the file service; system only.
                principal.require_system()?;
                let path = PathBuf::from(raw);
                if !path.is_absolute() {
                    return Err(StorageError::invalid_argument("path must be absolute"));
                }
                if !path.exists() {
                    return Err(StorageError::not_found(format!("source path '{raw}'")));
                }
                Ok(path)
            }
            (None, None) => Err(StorageError::invalid_argument(
                "import needs a file_id or a path",
            )),
        }
    }

    fn run_pipeline(
        &self,
        ctx: &RequestContext,
        table: &TableRef,
        req: &ImportRequest,
        source: &Path,
    ) -> Result<ImportResponse, StorageError> {
        let writable = self.overlay.prepare_write(table)?;

        // Stage 1: bulk-load the source into a transient engine file.
        let staged = StagedEngineFile::new(&self.layout.staging_dir()).map_err(map_engine_err)?;
        let (staged_columns, rows_staged) = self.load_staging(&staged, req, source)?;

        // Plan the merge before touching the target; schema mismatches
        // beyond the documented coercions fail here.
        let plan = build_merge_plan(&writable.row.columns, &staged_columns, req)?;

        // Auto-snapshot before the destructive full replace.
        if !req.options.incremental {
            self.maybe_auto_snapshot(ctx, &writable, DestructiveOp::TruncateTable)?;
        }

        // Stage 2: reconcile within one engine transaction on the target.
        let conn = EngineConnection::open_write(&writable.path).map_err(map_engine_err)?;
        let attached = conn.attach(staged.path(), "stg").map_err(map_engine_err)?;
        let merge_result = conn.transaction(|tx| {
            run_merge(tx, &writable.row.primary_key, &plan, &req.options.dedup_mode, req)
        });
        drop(attached);
        match merge_result {
            Ok(()) => {}
            Err(e) => {
                drop(conn);
                // Stage 3 (error path): the staging guard unlinks on drop.
                return Err(match e {
                    strata_db::EngineError::InvalidInput(msg) => {
                        StorageError::invalid_argument(msg)
                    }
                    strata_db::EngineError::Query(msg) if msg == "duplicate-keys" => {
                        StorageError::conflict(
                            "staging keys collide with target keys (fail-on-duplicates)",
                        )
                    }
                    other => map_engine_err(other),
                });
            }
        }
        conn.checkpoint().map_err(map_engine_err)?;
        let rows_after = sql::count_rows(&conn)? as u64;
        drop(conn);

        // Stage 3: cleanup. The guard also covers every early return above.
        drop(staged);

        let (_, bytes_after) = self.refresh_table_stats(&writable)?;
        info!(
            "Imported {} rows into {} ({} rows after)",
            rows_staged, table, rows_after
        );
        Ok(ImportResponse {
            rows_imported: rows_staged,
            rows_after,
            bytes_after,
        })
    }

    /// Build the staging relation from the source file.
    fn load_staging(
        &self,
        staged: &StagedEngineFile,
        req: &ImportRequest,
        source: &Path,
    ) -> Result<(Vec<ColumnSpec>, u64), StorageError> {
        let conn = EngineConnection::open_write(staged.path()).map_err(map_engine_err)?;
        let reader = match req.format {
            ImportFormat::Delimited => {
                let opts = req.delimited.clone().unwrap_or_default();
                delimited_reader(source, &opts)
            }
            ImportFormat::Columnar => format!(
                "read_parquet('{}')",
                escape_sql_string(&source.display().to_string())
            ),
        };
        conn.execute_batch(&format!(
            "CREATE TABLE {} AS SELECT * FROM {reader}",
            quote_ident(DATA_RELATION)
        ))
        .map_err(|e| {
            // Parse errors carry line/column context from the engine.
            StorageError::invalid_argument("source data could not be parsed")
                .with_details(e.to_string())
        })?;

        let (columns, _) = sql::introspect_columns(&conn)?;
        let rows = sql::count_rows(&conn)? as u64;
        conn.checkpoint().map_err(map_engine_err)?;
        Ok((columns, rows))
    }
}

fn delimited_reader(source: &Path, opts: &DelimitedOptions) -> String {
    let mut args = vec![
        format!("'{}'", escape_sql_string(&source.display().to_string())),
        format!("header = {}", opts.header),
        format!("delim = '{}'", escape_sql_string(&opts.delimiter.to_string())),
        format!("quote = '{}'", escape_sql_string(&opts.quote.to_string())),
        format!("nullstr = '{}'", escape_sql_string(&opts.null_literal)),
    ];
    if let Some(escape) = opts.escape {
        args.push(format!("escape = '{}'", escape_sql_string(&escape.to_string())));
    }
    format!("read_csv({})", args.join(", "))
}

/// Match staged columns onto the target schema.
///
/// Documented coercions only: numeric widening and nullable loosening happen
/// through the CAST; an explicit column mapping may reorder and subset;
/// anything else is a schema mismatch.
fn build_merge_plan(
    target_columns: &[ColumnSpec],
    staged_columns: &[ColumnSpec],
    req: &ImportRequest,
) -> Result<MergePlan, StorageError> {
    let has_tombstone = staged_columns.iter().any(|c| c.name == TOMBSTONE_COLUMN);
    let data_columns: Vec<&ColumnSpec> = staged_columns
        .iter()
        .filter(|c| c.name != TOMBSTONE_COLUMN)
        .collect();

    // source column name -> target column name
    let pairs: Vec<(String, String)> = match &req.options.column_mapping {
        Some(mapping) => {
            if mapping.len() != data_columns.len() {
                return Err(StorageError::invalid_argument(format!(
                    "column mapping has {} entries for {} source columns",
                    mapping.len(),
                    data_columns.len()
                )));
            }
            let mut seen = std::collections::HashSet::new();
            for name in mapping {
                if !seen.insert(name) {
                    return Err(StorageError::invalid_argument(format!(
                        "column mapping names '{name}' twice"
                    )));
                }
            }
            data_columns
                .iter()
                .zip(mapping.iter())
                .map(|(src, dst)| (src.name.clone(), dst.clone()))
                .collect()
        }
        None => data_columns
            .iter()
            .map(|src| (src.name.clone(), src.name.clone()))
            .collect(),
    };

    let mut insert_cols = Vec::new();
    let mut select_exprs = Vec::new();
    for target in target_columns {
        match pairs.iter().find(|(_, dst)| dst == &target.name) {
            Some((src, _)) => {
                insert_cols.push(target.name.clone());
                select_exprs.push(format!(
                    "CAST({} AS {})",
                    quote_ident(src),
                    target.data_type.trim()
                ));
            }
            None => {
                if !target.nullable && target.default.is_none() {
                    return Err(StorageError::invalid_argument(format!(
                        "source is missing required column '{}'",
                        target.name
                    )));
                }
            }
        }
    }

    // Source columns that map nowhere are a mismatch, not silently dropped.
    for (src, dst) in &pairs {
        if !target_columns.iter().any(|c| &c.name == dst) {
            return Err(StorageError::invalid_argument(format!(
                "source column '{src}' has no target column '{dst}'"
            )));
        }
    }
    if insert_cols.is_empty() {
        return Err(StorageError::invalid_argument(
            "no source columns map onto the target",
        ));
    }

    Ok(MergePlan {
        insert_cols,
        select_exprs,
        has_tombstone,
    })
}

/// Stage-2 SQL inside the target transaction.
fn run_merge(
    tx: &mut strata_db::EngineTransaction<'_>,
    primary_key: &[String],
    plan: &MergePlan,
    dedup_mode: &DedupMode,
    req: &ImportRequest,
) -> Result<(), strata_db::EngineError> {
    let data = quote_ident(DATA_RELATION);
    let cols = sql::name_list(&plan.insert_cols);
    let select = plan.select_exprs.join(", ");

    if !req.options.incremental {
        // Full replace.
        tx.execute_batch(&format!("DELETE FROM {data}"))?;
        tx.execute_batch(&format!(
            "INSERT INTO {data} ({cols}) SELECT {select} FROM stg.{data}"
        ))?;
        return Ok(());
    }

    if primary_key.is_empty() {
        // Append-only incremental.
        tx.execute_batch(&format!(
            "INSERT INTO {data} ({cols}) SELECT {select} FROM stg.{data}"
        ))?;
        return Ok(());
    }

    let key_cols = sql::name_list(primary_key);
    let key_match = primary_key
        .iter()
        .map(|k| format!("t.{0} = s.{0}", quote_ident(k)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let non_key: Vec<&String> = plan
        .insert_cols
        .iter()
        .filter(|c| !primary_key.contains(c))
        .collect();

    if plan.has_tombstone {
        // Full MERGE: update, insert-not-exists, then delete tombstoned.
        let staged_view = format!(
            "(SELECT {proj}, COALESCE({tomb}, FALSE) AS __tomb FROM stg.{data})",
            proj = plan
                .select_exprs
                .iter()
                .zip(plan.insert_cols.iter())
                .map(|(expr, name)| format!("{expr} AS {}", quote_ident(name)))
                .collect::<Vec<_>>()
                .join(", "),
            tomb = quote_ident(TOMBSTONE_COLUMN)
        );

        if !non_key.is_empty() {
            let set_clause = non_key
                .iter()
                .map(|c| format!("{0} = s.{0}", quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            tx.execute_batch(&format!(
                "UPDATE {data} AS t SET {set_clause} FROM {staged_view} s WHERE {key_match} AND NOT s.__tomb"
            ))?;
        }
        tx.execute_batch(&format!(
            "INSERT INTO {data} ({cols}) SELECT {cols} FROM {staged_view} s \
             WHERE NOT s.__tomb AND NOT EXISTS (SELECT 1 FROM {data} t WHERE {key_match})"
        ))?;
        tx.execute_batch(&format!(
            "DELETE FROM {data} WHERE ({key_cols}) IN \
             (SELECT {key_cols} FROM {staged_view} s WHERE s.__tomb)"
        ))?;
        return Ok(());
    }

    match dedup_mode {
        DedupMode::UpdateDuplicates => {
            let conflict_action = if non_key.is_empty() {
                "DO NOTHING".to_string()
            } else {
                format!(
                    "DO UPDATE SET {}",
                    non_key
                        .iter()
                        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            tx.execute_batch(&format!(
                "INSERT INTO {data} ({cols}) SELECT {select} FROM stg.{data} \
                 ON CONFLICT ({key_cols}) {conflict_action}"
            ))?;
        }
        DedupMode::InsertDuplicates => {
            // Unconditional; the engine's uniqueness constraint decides.
            tx.execute_batch(&format!(
                "INSERT INTO {data} ({cols}) SELECT {select} FROM stg.{data}"
            ))?;
        }
        DedupMode::FailOnDuplicates => {
            let staged_view = format!(
                "(SELECT {proj} FROM stg.{data})",
                proj = plan
                    .select_exprs
                    .iter()
                    .zip(plan.insert_cols.iter())
                    .map(|(expr, name)| format!("{expr} AS {}", quote_ident(name)))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let clashes: i64 = tx.query_scalar(
                &format!(
                    "SELECT COUNT(*) FROM {staged_view} s WHERE EXISTS \
                     (SELECT 1 FROM {data} t WHERE {key_match})"
                ),
                &[],
            )?;
            if clashes > 0 {
                // Sentinel unwound into a `conflict` by the caller.
                return Err(strata_db::EngineError::Query("duplicate-keys".to_string()));
            }
            tx.execute_batch(&format!(
                "INSERT INTO {data} ({cols}) SELECT {select} FROM stg.{data}"
            ))?;
        }
    }
    Ok(())
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

    fn request(mapping: Option<Vec<&str>>) -> ImportRequest {
        ImportRequest {
            file_id: None,
            path: None,
            format: ImportFormat::Delimited,
            delimited: None,
            options: strata_protocol::options::ImportOptions {
                incremental: false,
                dedup_mode: DedupMode::UpdateDuplicates,
                column_mapping: mapping.map(|m| m.into_iter().map(String::from).collect()),
            },
        }
    }

    #[test]
    fn plan_matches_by_name() {
        let target = vec![col("id", "BIGINT", false), col("amount", "DOUBLE", true)];
        let staged = vec![col("id", "BIGINT", true), col("amount", "VARCHAR", true)];
        let plan = build_merge_plan(&target, &staged, &request(None)).unwrap();
        assert_eq!(plan.insert_cols, vec!["id", "amount"]);
        assert!(plan.select_exprs[1].contains("CAST"));
        assert!(!plan.has_tombstone);
    }

    #[test]
    fn plan_applies_ordered_mapping() {
        let target = vec![col("id", "BIGINT", false), col("amount", "DOUBLE", true)];
        let staged = vec![col("c0", "BIGINT", true), col("c1", "DOUBLE", true)];
        let plan = build_merge_plan(&target, &staged, &request(Some(vec!["id", "amount"]))).unwrap();
        assert_eq!(plan.insert_cols, vec!["id", "amount"]);
        assert!(plan.select_exprs[0].contains("\"c0\""));
    }

    #[test]
    fn plan_rejects_missing_required_column() {
        let target = vec![col("id", "BIGINT", false), col("amount", "DOUBLE", true)];
        let staged = vec![col("amount", "DOUBLE", true)];
        let err = build_merge_plan(&target, &staged, &request(None)).unwrap_err();
        assert_eq!(err.kind, strata_protocol::ErrorKind::InvalidArgument);
    }

    #[test]
    fn plan_rejects_unknown_source_column() {
        let target = vec![col("id", "BIGINT", false)];
        let staged = vec![col("id", "BIGINT", true), col("extra", "VARCHAR", true)];
        let err = build_merge_plan(&target, &staged, &request(None)).unwrap_err();
        assert_eq!(err.kind, strata_protocol::ErrorKind::InvalidArgument);
    }

    #[test]
    fn plan_detects_tombstone() {
        let target = vec![col("id", "BIGINT", false)];
        let staged = vec![col("id", "BIGINT", true), col("_deleted", "BOOLEAN", true)];
        let plan = build_merge_plan(&target, &staged, &request(None)).unwrap();
        assert!(plan.has_tombstone);
        assert_eq!(plan.insert_cols, vec!["id"]);
    }

    #[test]
    fn delimited_reader_renders_options() {
        let opts = DelimitedOptions {
            delimiter: ';',
            quote: '\'',
            escape: Some('\\'),
            header: false,
            null_literal: "NA".into(),
        };
        let sql = delimited_reader(Path::new("/tmp/in.csv"), &opts);
        assert!(sql.contains("header = false"));
        assert!(sql.contains("delim = ';'"));
        assert!(sql.contains("nullstr = 'NA'"));
        assert!(sql.contains("escape = '\\'"));
    }
}
