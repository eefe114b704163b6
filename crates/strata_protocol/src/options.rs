//! Import/export option sets.
//!
//! Every option set is a closed enumeration: unknown keys are rejected at
//! deserialization (`deny_unknown_fields`) instead of being silently ignored.

use serde::{Deserialize, Serialize};

/// Source data format for imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportFormat {
    /// Delimiter-separated text (CSV and friends).
    Delimited,
    /// Columnar files (Parquet).
    Columnar,
}

/// Options for parsing delimited sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DelimitedOptions {
    pub delimiter: char,
    pub quote: char,
    pub escape: Option<char>,
    pub header: bool,
    pub null_literal: String,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            escape: None,
            header: true,
            null_literal: String::new(),
        }
    }
}

/// Duplicate-key handling for incremental imports into keyed tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupMode {
    /// Upsert: update matching rows, insert new ones.
    #[default]
    UpdateDuplicates,
    /// Unconditional insert; fails if the engine enforces uniqueness.
    InsertDuplicates,
    /// Fail the operation when any staging key matches a target key.
    FailOnDuplicates,
}

impl DedupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateDuplicates => "update-duplicates",
            Self::InsertDuplicates => "insert-duplicates",
            Self::FailOnDuplicates => "fail-on-duplicates",
        }
    }
}

/// Import behavior options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ImportOptions {
    /// false = full replace; true = merge into existing rows.
    pub incremental: bool,
    pub dedup_mode: DedupMode,
    /// Reorder/subset source columns onto target columns by name.
    pub column_mapping: Option<Vec<String>>,
}

/// Output format for exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Delimited,
    Columnar,
}

/// Compression applied to export output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

/// Sort direction in export ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: OrderDirection,
}

/// Export behavior options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Optional row filter (a SQL predicate over the table's columns).
    pub filter: Option<String>,
    /// Column projection; defaults to all columns in declared order.
    pub columns: Option<Vec<String>>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub compression: Compression,
}

/// Filter predicates are embedded into a read-only SELECT; reject anything
/// that could terminate the statement or smuggle another one in.
pub fn validate_filter(filter: &str) -> Result<(), String> {
    if filter.trim().is_empty() {
        return Err("filter must not be empty".to_string());
    }
    if filter.len() > 4096 {
        return Err("filter too long".to_string());
    }
    if filter.contains(';') || filter.contains("--") || filter.contains("/*") {
        return Err("filter may not contain statement separators or comments".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_option_keys_are_rejected() {
        let raw = r#"{"incremental": true, "dedupe": "update-duplicates"}"#;
        let err = serde_json::from_str::<ImportOptions>(raw).unwrap_err();
        assert!(err.to_string().contains("dedupe"));
    }

    #[test]
    fn dedup_mode_kebab_case() {
        let parsed: DedupMode = serde_json::from_str("\"fail-on-duplicates\"").unwrap();
        assert_eq!(parsed, DedupMode::FailOnDuplicates);
        assert_eq!(
            serde_json::to_string(&DedupMode::UpdateDuplicates).unwrap(),
            "\"update-duplicates\""
        );
    }

    #[test]
    fn delimited_defaults() {
        let opts: DelimitedOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.delimiter, ',');
        assert_eq!(opts.quote, '"');
        assert!(opts.header);
        assert_eq!(opts.null_literal, "");
    }

    #[test]
    fn filter_validation() {
        assert!(validate_filter("amount > 100").is_ok());
        assert!(validate_filter("id = 1; DROP TABLE data").is_err());
        assert!(validate_filter("x -- comment").is_err());
        assert!(validate_filter("  ").is_err());
    }
}
