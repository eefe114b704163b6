//! Engine connection wrapper.
//!
//! One `EngineConnection` per open engine file. Writers open with an
//! exclusive cross-process lock; readers open read-only and never lock.
//! Connections are `Send + Sync`: the underlying DuckDB connection sits
//! behind a mutex so engine work can run on blocking tasks.
//!
//! The value/row surface here is deliberately narrow. Engine files hold a
//! single relation of declared column types (see the catalog's closed type
//! family), so results are flat rows over one shared header, values are a
//! small scalar enum, and anything the engine returns outside that family
//! is carried as text.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{EngineError, Result};
use crate::lock::{try_lock_exclusive, FileLockGuard, LockError};

/// Per-connection ceiling on read-only attaches.
///
/// DuckDB tolerates a few thousand attached files per connection before
/// descriptor pressure sets in; past this we fail with a clean error instead
/// of letting the process hit the OS limit.
pub const DEFAULT_ATTACH_LIMIT: usize = 4096;

/// Soft process-wide ceiling on open engine files (80% of a 65k allow-list).
const FD_SOFT_LIMIT: usize = 52_000;

/// Memory ceiling applied to every connection.
const DEFAULT_MEMORY_LIMIT: &str = "4GB";

static OPEN_FILES: AtomicUsize = AtomicUsize::new(0);

/// Engine file access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Exclusive read/write (one writer per file).
    ReadWrite,
    /// Read-only; any number of concurrent readers.
    ReadOnly,
}

/// Scalar value crossing the engine boundary, as parameter or result.
#[derive(Debug, Clone)]
pub enum EngineValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    Timestamp(chrono::DateTime<chrono::Utc>),
}

impl EngineValue {
    /// Short name used in conversion errors.
    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Boolean(_) => "boolean",
            Self::Timestamp(_) => "timestamp",
        }
    }
}

macro_rules! engine_value_from {
    ($($src:ty => $variant:ident),* $(,)?) => {$(
        impl From<$src> for EngineValue {
            fn from(v: $src) -> Self {
                EngineValue::$variant(v.into())
            }
        }
    )*};
}

engine_value_from! {
    i32 => Integer,
    i64 => Integer,
    f64 => Real,
    bool => Boolean,
    String => Text,
    Vec<u8> => Blob,
    chrono::DateTime<chrono::Utc> => Timestamp,
}

impl From<u64> for EngineValue {
    fn from(v: u64) -> Self {
        EngineValue::Integer(v as i64)
    }
}

impl From<&str> for EngineValue {
    fn from(v: &str) -> Self {
        EngineValue::Text(v.to_owned())
    }
}

impl<T: Into<EngineValue>> From<Option<T>> for EngineValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(EngineValue::Null)
    }
}

fn conversion_err(wanted: &'static str, found: &EngineValue) -> EngineError {
    EngineError::TypeConversion(match found {
        EngineValue::Null => {
            format!("NULL where {wanted} was required (wrap the binding in Option)")
        }
        other => format!("wanted {wanted}, found {}", other.kind()),
    })
}

/// Conversion out of an [`EngineValue`].
pub trait FromEngineValue: Sized {
    fn from_engine_value(value: &EngineValue) -> Result<Self>;
}

impl FromEngineValue for i64 {
    fn from_engine_value(value: &EngineValue) -> Result<Self> {
        match value {
            EngineValue::Integer(v) => Ok(*v),
            other => Err(conversion_err("integer", other)),
        }
    }
}

impl FromEngineValue for i32 {
    fn from_engine_value(value: &EngineValue) -> Result<Self> {
        let wide = i64::from_engine_value(value)?;
        i32::try_from(wide).map_err(|_| {
            EngineError::TypeConversion(format!("integer {wide} does not fit in 32 bits"))
        })
    }
}

impl FromEngineValue for f64 {
    fn from_engine_value(value: &EngineValue) -> Result<Self> {
        match value {
            EngineValue::Real(v) => Ok(*v),
            EngineValue::Integer(v) => Ok(*v as f64),
            other => Err(conversion_err("real", other)),
        }
    }
}

impl FromEngineValue for String {
    fn from_engine_value(value: &EngineValue) -> Result<Self> {
        match value {
            EngineValue::Text(v) => Ok(v.clone()),
            other => Err(conversion_err("text", other)),
        }
    }
}

impl FromEngineValue for bool {
    fn from_engine_value(value: &EngineValue) -> Result<Self> {
        match value {
            EngineValue::Boolean(v) => Ok(*v),
            // Some pragma results report flags as 0/1.
            EngineValue::Integer(v) => Ok(*v != 0),
            other => Err(conversion_err("boolean", other)),
        }
    }
}

impl FromEngineValue for chrono::DateTime<chrono::Utc> {
    fn from_engine_value(value: &EngineValue) -> Result<Self> {
        match value {
            EngineValue::Timestamp(v) => Ok(*v),
            EngineValue::Text(v) => chrono::DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| EngineError::TypeConversion(format!("bad timestamp text: {e}"))),
            other => Err(conversion_err("timestamp", other)),
        }
    }
}

impl FromEngineValue for Vec<u8> {
    fn from_engine_value(value: &EngineValue) -> Result<Self> {
        match value {
            EngineValue::Blob(v) => Ok(v.clone()),
            other => Err(conversion_err("blob", other)),
        }
    }
}

impl<T: FromEngineValue> FromEngineValue for Option<T> {
    fn from_engine_value(value: &EngineValue) -> Result<Self> {
        match value {
            EngineValue::Null => Ok(None),
            present => T::from_engine_value(present).map(Some),
        }
    }
}

/// One result row. All rows of a result set share one header allocation.
#[derive(Debug, Clone)]
pub struct EngineRow {
    header: Arc<[String]>,
    values: Vec<EngineValue>,
}

impl EngineRow {
    pub fn new(header: Arc<[String]>, values: Vec<EngineValue>) -> Self {
        Self { header, values }
    }

    /// Typed access by column name.
    pub fn get<T: FromEngineValue>(&self, column: &str) -> Result<T> {
        let idx = self
            .header
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| {
                EngineError::TypeConversion(format!("result has no column '{column}'"))
            })?;
        T::from_engine_value(&self.values[idx])
    }

    /// Typed access by position.
    pub fn at<T: FromEngineValue>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or_else(|| {
            EngineError::TypeConversion(format!(
                "column index {index} out of range (row width {})",
                self.values.len()
            ))
        })?;
        T::from_engine_value(value)
    }

    /// Raw value by position, if present.
    pub fn raw(&self, index: usize) -> Option<&EngineValue> {
        self.values.get(index)
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }
}

/// Coarse statement classification for the read-only guard.
fn is_read_statement(sql: &str) -> bool {
    matches!(
        sql.trim_start()
            .split_whitespace()
            .next()
            .map(str::to_ascii_uppercase)
            .as_deref(),
        Some("SELECT" | "WITH" | "DESCRIBE" | "SHOW" | "EXPLAIN" | "SET")
    )
}

/// Open engine file connection.
#[derive(Clone)]
pub struct EngineConnection {
    conn: Arc<Mutex<duckdb::Connection>>,
    access_mode: AccessMode,
    attached: Arc<AtomicUsize>,
    /// Holds the exclusive file lock via RAII; dropping it releases the lock.
    #[allow(dead_code)]
    lock_guard: Option<Arc<FileLockGuard>>,
    /// Ties this connection into the process-wide open-file count.
    #[allow(dead_code)]
    fd_slot: Arc<FdSlot>,
}

struct FdSlot;

impl Drop for FdSlot {
    fn drop(&mut self) {
        OPEN_FILES.fetch_sub(1, Ordering::Relaxed);
    }
}

fn claim_fd_slot() -> Result<Arc<FdSlot>> {
    let open = OPEN_FILES.fetch_add(1, Ordering::Relaxed) + 1;
    if open > FD_SOFT_LIMIT {
        OPEN_FILES.fetch_sub(1, Ordering::Relaxed);
        return Err(EngineError::ResourceExhausted(format!(
            "open engine file count {} exceeds soft limit {}",
            open, FD_SOFT_LIMIT
        )));
    }
    Ok(Arc::new(FdSlot))
}

impl std::fmt::Debug for EngineConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConnection")
            .field("access_mode", &self.access_mode)
            .field("attached", &self.attached.load(Ordering::Relaxed))
            .finish()
    }
}

impl EngineConnection {
    /// Open an engine file for exclusive read/write.
    ///
    /// Acquires the cross-process file lock first; a concurrent writer in
    /// another process yields `EngineError::Locked`.
    pub fn open_write(path: &Path) -> Result<Self> {
        let fd_slot = claim_fd_slot()?;
        let lock_guard = try_lock_exclusive(path).map_err(|e| match e {
            LockError::Locked(p) => EngineError::Locked(p),
            LockError::CreateFailed(io) | LockError::AcquireFailed(io) => EngineError::Io(io),
        })?;

        let conn = duckdb::Connection::open(path)?;
        apply_session_limits(&conn)?;
        debug!("Opened engine file for write: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            access_mode: AccessMode::ReadWrite,
            attached: Arc::new(AtomicUsize::new(0)),
            lock_guard: Some(Arc::new(lock_guard)),
            fd_slot,
        })
    }

    /// Open an engine file read-only. No lock required; readers coexist with
    /// each other.
    pub fn open_read(path: &Path) -> Result<Self> {
        use duckdb::{AccessMode as DuckAccessMode, Config};

        let fd_slot = claim_fd_slot()?;
        let config = Config::default().access_mode(DuckAccessMode::ReadOnly)?;
        let conn = duckdb::Connection::open_with_flags(path, config)?;
        apply_session_limits(&conn)?;
        debug!("Opened engine file read-only: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            access_mode: AccessMode::ReadOnly,
            attached: Arc::new(AtomicUsize::new(0)),
            lock_guard: None,
            fd_slot,
        })
    }

    /// Open an in-memory engine (tests and staging previews).
    pub fn open_memory() -> Result<Self> {
        let fd_slot = claim_fd_slot()?;
        let conn = duckdb::Connection::open_in_memory()?;
        apply_session_limits(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            access_mode: AccessMode::ReadWrite,
            attached: Arc::new(AtomicUsize::new(0)),
            lock_guard: None,
            fd_slot,
        })
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn is_writable(&self) -> bool {
        self.access_mode == AccessMode::ReadWrite
    }

    fn lock(&self) -> MutexGuard<'_, duckdb::Connection> {
        // A poisoned mutex only means a panic mid-statement; the connection
        // itself stays usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Execute a SQL statement (no results).
    pub fn execute(&self, sql: &str, params: &[EngineValue]) -> Result<u64> {
        if self.access_mode == AccessMode::ReadOnly && !is_read_statement(sql) {
            return Err(EngineError::ReadOnly);
        }
        let conn = self.lock();
        execute_on_conn(&conn, sql, params)
    }

    /// Execute a batch of SQL statements.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.lock();
        execute_batch_on_conn(&conn, sql)
    }

    /// Query and return all rows.
    pub fn query_all(&self, sql: &str, params: &[EngineValue]) -> Result<Vec<EngineRow>> {
        let conn = self.lock();
        query_on_conn(&conn, sql, params)
    }

    /// Query and return the first row, if any.
    pub fn query_optional(&self, sql: &str, params: &[EngineValue]) -> Result<Option<EngineRow>> {
        Ok(self.query_all(sql, params)?.into_iter().next())
    }

    /// Query and return exactly one row.
    pub fn query_one(&self, sql: &str, params: &[EngineValue]) -> Result<EngineRow> {
        self.query_optional(sql, params)?
            .ok_or_else(|| EngineError::Query("Expected one row, got none".to_string()))
    }

    /// Query and return a single scalar value.
    pub fn query_scalar<T: FromEngineValue>(&self, sql: &str, params: &[EngineValue]) -> Result<T> {
        self.query_one(sql, params)?.at(0)
    }

    /// Run `op` inside a transaction; commits on Ok, rolls back on Err.
    ///
    /// Generic over the error so higher layers can thread their own error
    /// type through as long as engine errors convert into it.
    pub fn transaction<T, E, F>(&self, op: F) -> std::result::Result<T, E>
    where
        E: From<EngineError> + std::fmt::Display,
        F: FnOnce(&mut EngineTransaction<'_>) -> std::result::Result<T, E>,
    {
        let conn = self.lock();
        conn.execute_batch("BEGIN").map_err(EngineError::from)?;
        let mut tx = EngineTransaction { conn: &conn };
        let result = op(&mut tx);

        match result {
            Ok(value) => {
                conn.execute_batch("COMMIT").map_err(EngineError::from)?;
                Ok(value)
            }
            Err(err) => match conn.execute_batch("ROLLBACK") {
                Ok(()) => Err(err),
                Err(rollback_err) => Err(E::from(EngineError::Transaction(format!(
                    "Transaction failed: {}; rollback failed: {}",
                    err, rollback_err
                )))),
            },
        }
    }

    /// Attach another engine file read-only under `alias`.
    ///
    /// The attached file's relation is visible as `<alias>.data`. Returns a
    /// guard that detaches on drop.
    pub fn attach(&self, path: &Path, alias: &str) -> Result<AttachedFile> {
        let count = self.attached.fetch_add(1, Ordering::Relaxed) + 1;
        if count > DEFAULT_ATTACH_LIMIT {
            self.attached.fetch_sub(1, Ordering::Relaxed);
            return Err(EngineError::ResourceExhausted(format!(
                "attach fan-out limit reached ({} files)",
                DEFAULT_ATTACH_LIMIT
            )));
        }
        let _fd_slot = match claim_fd_slot() {
            Ok(slot) => slot,
            Err(e) => {
                self.attached.fetch_sub(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let sql = format!(
            "ATTACH '{}' AS {} (READ_ONLY)",
            escape_sql_string(&path.display().to_string()),
            quote_ident(alias)
        );
        if let Err(e) = self.execute_batch(&sql) {
            self.attached.fetch_sub(1, Ordering::Relaxed);
            return Err(e);
        }

        Ok(AttachedFile {
            conn: self.conn.clone(),
            attached: self.attached.clone(),
            alias: alias.to_string(),
            _fd_slot,
        })
    }

    /// Number of files currently attached to this connection.
    pub fn attached_count(&self) -> usize {
        self.attached.load(Ordering::Relaxed)
    }

    /// Flush the write-ahead log into the file.
    pub fn checkpoint(&self) -> Result<()> {
        self.execute_batch("CHECKPOINT")
    }

    /// Bulk insert via the engine appender. Column order must match the
    /// relation's column order.
    pub fn append_rows(&self, table: &str, rows: &[Vec<EngineValue>]) -> Result<u64> {
        if self.access_mode == AccessMode::ReadOnly {
            return Err(EngineError::ReadOnly);
        }
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.lock();
        let mut appender = conn.appender(table)?;
        for row in rows {
            let params = bind_params(row);
            let param_refs: Vec<&dyn duckdb::ToSql> =
                params.iter().map(|v| v as &dyn duckdb::ToSql).collect();
            appender.append_row(param_refs.as_slice())?;
        }
        appender.flush()?;
        Ok(rows.len() as u64)
    }
}

/// Guard for a read-only attached file; detaches on drop.
pub struct AttachedFile {
    conn: Arc<Mutex<duckdb::Connection>>,
    attached: Arc<AtomicUsize>,
    alias: String,
    _fd_slot: Arc<FdSlot>,
}

impl AttachedFile {
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl Drop for AttachedFile {
    fn drop(&mut self) {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let sql = format!("DETACH {}", quote_ident(&self.alias));
        if let Err(e) = conn.execute_batch(&sql) {
            warn!("Failed to detach {}: {}", self.alias, e);
        }
        self.attached.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Session limits applied to every connection.
fn apply_session_limits(conn: &duckdb::Connection) -> Result<()> {
    conn.execute_batch(&format!("SET memory_limit = '{}'", DEFAULT_MEMORY_LIMIT))?;
    Ok(())
}

fn execute_on_conn(conn: &duckdb::Connection, sql: &str, params: &[EngineValue]) -> Result<u64> {
    let started = Instant::now();
    let mut stmt = conn.prepare(sql)?;
    let bound = bind_params(params);
    let refs: Vec<&dyn duckdb::ToSql> = bound.iter().map(|v| v as &dyn duckdb::ToSql).collect();
    let rows = stmt.execute(refs.as_slice())? as u64;
    trace!(rows, elapsed_ms = started.elapsed().as_millis() as u64, "engine execute");
    Ok(rows)
}

fn execute_batch_on_conn(conn: &duckdb::Connection, sql: &str) -> Result<()> {
    let started = Instant::now();
    conn.execute_batch(sql)?;
    trace!(elapsed_ms = started.elapsed().as_millis() as u64, "engine batch");
    Ok(())
}

fn query_on_conn(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[EngineValue],
) -> Result<Vec<EngineRow>> {
    let started = Instant::now();
    let mut stmt = conn.prepare(sql)?;
    let bound = bind_params(params);
    let refs: Vec<&dyn duckdb::ToSql> = bound.iter().map(|v| v as &dyn duckdb::ToSql).collect();

    let mut raw_rows = stmt.query(refs.as_slice())?;

    let header: Arc<[String]> = match raw_rows.as_ref() {
        Some(prepared) => (0..prepared.column_count())
            .map(|i| {
                prepared
                    .column_name(i)
                    .map(|name| name.to_owned())
                    .unwrap_or_else(|_| format!("col{i}"))
            })
            .collect::<Vec<_>>()
            .into(),
        None => return Ok(Vec::new()),
    };

    let mut result = Vec::new();
    while let Some(row) = raw_rows.next()? {
        let values = (0..header.len())
            .map(|i| read_value(row, i))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        result.push(EngineRow::new(header.clone(), values));
    }

    trace!(
        rows = result.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "engine query"
    );
    Ok(result)
}

fn bind_params(params: &[EngineValue]) -> Vec<duckdb::types::Value> {
    use duckdb::types::{TimeUnit, Value};
    params
        .iter()
        .map(|p| match p {
            EngineValue::Null => Value::Null,
            EngineValue::Integer(v) => Value::BigInt(*v),
            EngineValue::Real(v) => Value::Double(*v),
            EngineValue::Text(v) => Value::Text(v.clone()),
            EngineValue::Blob(v) => Value::Blob(v.clone()),
            EngineValue::Boolean(v) => Value::Boolean(*v),
            EngineValue::Timestamp(v) => {
                Value::Timestamp(TimeUnit::Microsecond, v.timestamp_micros())
            }
        })
        .collect()
}

/// Convert one result cell.
///
/// The declared column-type family maps onto the scalar enum directly;
/// dates and times come back as ISO text, and anything outside the family
/// degrades to its display form rather than failing the whole row.
fn read_value(row: &duckdb::Row, index: usize) -> std::result::Result<EngineValue, duckdb::Error> {
    use duckdb::types::{TimeUnit, ValueRef};

    fn as_micros(unit: TimeUnit, v: i64) -> i64 {
        match unit {
            TimeUnit::Second => v * 1_000_000,
            TimeUnit::Millisecond => v * 1_000,
            TimeUnit::Microsecond => v,
            TimeUnit::Nanosecond => v / 1_000,
        }
    }

    let cell = row.get_ref(index)?;
    Ok(match cell {
        ValueRef::Null => EngineValue::Null,
        ValueRef::Boolean(v) => EngineValue::Boolean(v),
        ValueRef::TinyInt(v) => EngineValue::Integer(v.into()),
        ValueRef::SmallInt(v) => EngineValue::Integer(v.into()),
        ValueRef::Int(v) => EngineValue::Integer(v.into()),
        ValueRef::BigInt(v) => EngineValue::Integer(v),
        ValueRef::HugeInt(v) => EngineValue::Integer(v as i64),
        ValueRef::UTinyInt(v) => EngineValue::Integer(v.into()),
        ValueRef::USmallInt(v) => EngineValue::Integer(v.into()),
        ValueRef::UInt(v) => EngineValue::Integer(v.into()),
        ValueRef::UBigInt(v) => EngineValue::Integer(v as i64),
        ValueRef::Float(v) => EngineValue::Real(v.into()),
        ValueRef::Double(v) => EngineValue::Real(v),
        ValueRef::Decimal(v) => {
            let text = v.to_string();
            text.parse::<f64>()
                .map(EngineValue::Real)
                .unwrap_or(EngineValue::Text(text))
        }
        ValueRef::Text(bytes) => EngineValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => EngineValue::Blob(bytes.to_vec()),
        ValueRef::Timestamp(unit, v) => {
            let micros = as_micros(unit, v);
            chrono::DateTime::from_timestamp_micros(micros)
                .map(EngineValue::Timestamp)
                .unwrap_or(EngineValue::Integer(micros))
        }
        ValueRef::Date32(days) => {
            // Days since the Unix epoch; render as a date.
            chrono::DateTime::from_timestamp(i64::from(days) * 86_400, 0)
                .map(|dt| EngineValue::Text(dt.date_naive().to_string()))
                .unwrap_or(EngineValue::Integer(days.into()))
        }
        ValueRef::Time64(unit, v) => {
            let micros = as_micros(unit, v);
            let (secs, sub_micros) = (micros.div_euclid(1_000_000), micros.rem_euclid(1_000_000));
            chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                secs as u32,
                (sub_micros * 1_000) as u32,
            )
            .map(|t| EngineValue::Text(t.to_string()))
            .unwrap_or(EngineValue::Integer(micros))
        }
        other => {
            warn!("Engine returned an undeclared type at column {index}; carrying as text");
            EngineValue::Text(format!("{other:?}"))
        }
    })
}

/// Transaction handle; holds the connection mutex for its lifetime.
pub struct EngineTransaction<'a> {
    conn: &'a duckdb::Connection,
}

impl<'a> EngineTransaction<'a> {
    pub fn execute(&mut self, sql: &str, params: &[EngineValue]) -> Result<u64> {
        execute_on_conn(self.conn, sql, params)
    }

    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        execute_batch_on_conn(self.conn, sql)
    }

    pub fn query_all(&mut self, sql: &str, params: &[EngineValue]) -> Result<Vec<EngineRow>> {
        query_on_conn(self.conn, sql, params)
    }

    pub fn query_optional(
        &mut self,
        sql: &str,
        params: &[EngineValue],
    ) -> Result<Option<EngineRow>> {
        Ok(self.query_all(sql, params)?.into_iter().next())
    }

    pub fn query_one(&mut self, sql: &str, params: &[EngineValue]) -> Result<EngineRow> {
        self.query_optional(sql, params)?
            .ok_or_else(|| EngineError::Query("Expected one row, got none".to_string()))
    }

    pub fn query_scalar<T: FromEngineValue>(
        &mut self,
        sql: &str,
        params: &[EngineValue],
    ) -> Result<T> {
        self.query_one(sql, params)?.at(0)
    }
}

/// Quote an identifier for use in engine SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape a string literal for use in engine SQL.
pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_and_query_roundtrip() {
        let conn = EngineConnection::open_memory().unwrap();
        conn.execute_batch("CREATE TABLE data (id BIGINT, name TEXT)")
            .unwrap();
        conn.execute(
            "INSERT INTO data VALUES (?, ?)",
            &[EngineValue::from(1_i64), EngineValue::from("alpha")],
        )
        .unwrap();

        let row = conn.query_one("SELECT id, name FROM data", &[]).unwrap();
        assert_eq!(row.get::<i64>("id").unwrap(), 1);
        assert_eq!(row.get::<String>("name").unwrap(), "alpha");
        assert_eq!(row.width(), 2);
        assert_eq!(row.header(), ["id", "name"]);
    }

    #[test]
    fn rows_share_one_header() {
        let conn = EngineConnection::open_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE data (id BIGINT); INSERT INTO data VALUES (1), (2), (3)",
        )
        .unwrap();
        let rows = conn.query_all("SELECT id FROM data", &[]).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(Arc::ptr_eq(&rows[0].header, &rows[2].header));
    }

    #[test]
    fn conversion_errors_name_the_mismatch() {
        let row = EngineRow::new(
            vec!["flag".to_string()].into(),
            vec![EngineValue::Text("yes".into())],
        );
        let err = row.get::<bool>("flag").unwrap_err();
        assert!(err.to_string().contains("wanted boolean"));

        let err = row.get::<i64>("missing").unwrap_err();
        assert!(err.to_string().contains("no column 'missing'"));

        let null_row = EngineRow::new(vec!["n".to_string()].into(), vec![EngineValue::Null]);
        assert_eq!(null_row.get::<Option<i64>>("n").unwrap(), None);
        assert!(null_row.get::<i64>("n").is_err());
    }

    #[test]
    fn append_rows_uses_appender() {
        let conn = EngineConnection::open_memory().unwrap();
        conn.execute_batch("CREATE TABLE data (id BIGINT, name TEXT)")
            .unwrap();

        let rows = vec![
            vec![EngineValue::from(1_i64), EngineValue::from("alpha")],
            vec![EngineValue::from(2_i64), EngineValue::from("beta")],
        ];
        let inserted = conn.append_rows("data", &rows).unwrap();
        assert_eq!(inserted, 2);

        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM data", &[]).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let conn = EngineConnection::open_memory().unwrap();
        conn.execute_batch("CREATE TABLE data (id BIGINT)").unwrap();

        let result: Result<()> = conn.transaction(|tx| {
            tx.execute("INSERT INTO data VALUES (1)", &[])?;
            Err(EngineError::query("boom"))
        });
        assert!(result.is_err());

        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM data", &[]).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn readonly_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.duckdb");
        {
            let conn = EngineConnection::open_write(&path).unwrap();
            conn.execute_batch("CREATE TABLE data (id BIGINT)").unwrap();
            conn.checkpoint().unwrap();
        }

        let ro = EngineConnection::open_read(&path).unwrap();
        let err = ro.execute("INSERT INTO data VALUES (1)", &[]).unwrap_err();
        assert!(matches!(err, EngineError::ReadOnly));

        let count: i64 = ro.query_scalar("SELECT COUNT(*) FROM data", &[]).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn attach_exposes_relation_under_alias() {
        let dir = tempfile::tempdir().unwrap();
        let other_path = dir.path().join("other.duckdb");
        {
            let other = EngineConnection::open_write(&other_path).unwrap();
            other
                .execute_batch("CREATE TABLE data (id BIGINT); INSERT INTO data VALUES (7)")
                .unwrap();
            other.checkpoint().unwrap();
        }

        let conn = EngineConnection::open_memory().unwrap();
        let attached = conn.attach(&other_path, "base").unwrap();
        assert_eq!(conn.attached_count(), 1);

        let id: i64 = conn.query_scalar("SELECT id FROM base.data", &[]).unwrap();
        assert_eq!(id, 7);

        drop(attached);
        assert_eq!(conn.attached_count(), 0);
    }

    #[test]
    fn concurrent_readers_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.duckdb");
        {
            let conn = EngineConnection::open_write(&path).unwrap();
            conn.execute_batch("CREATE TABLE data (id BIGINT); INSERT INTO data VALUES (1)")
                .unwrap();
            conn.checkpoint().unwrap();
        }

        let r1 = EngineConnection::open_read(&path).unwrap();
        let r2 = EngineConnection::open_read(&path).unwrap();
        let a: i64 = r1.query_scalar("SELECT COUNT(*) FROM data", &[]).unwrap();
        let b: i64 = r2.query_scalar("SELECT COUNT(*) FROM data", &[]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn quoting_and_escaping() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
        assert_eq!(escape_sql_string("it's"), "it''s");
    }
}
