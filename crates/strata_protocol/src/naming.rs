//! Identifier rules.
//!
//! Project ids, branch ids, and bucket names become directory names, so they
//! are restricted to a filesystem-safe alphabet. Table and column names only
//! need SQL quoting and may carry a wider character set; the path layer
//! forbids separators and dot-specials.

/// True for identifiers safe to use as directory names without escaping.
pub fn is_safe_id(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with('_')
}

/// Validate a bucket name (directory-safe, like project ids).
pub fn validate_bucket_name(name: &str) -> Result<(), String> {
    if is_safe_id(name) {
        Ok(())
    } else {
        Err(format!(
            "bucket name '{}' must be lowercase alphanumeric/underscore, not start with '_', max 64 chars",
            name
        ))
    }
}

/// Validate a table name.
///
/// Table names may need SQL quoting (spaces, mixed case) but must still be
/// usable as a file stem: no path separators, no NUL, no leading dot.
pub fn validate_table_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 128 {
        return Err(format!("table name '{}' must be 1..=128 chars", name));
    }
    if name.starts_with('.') || name.ends_with(' ') || name.starts_with(' ') {
        return Err(format!(
            "table name '{}' may not start with '.' or have edge whitespace",
            name
        ));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err(format!(
            "table name '{}' contains path separators or control characters",
            name
        ));
    }
    Ok(())
}

/// Validate a column name. Quoting handles the rest.
pub fn validate_column_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 128 {
        return Err(format!("column name '{}' must be 1..=128 chars", name));
    }
    if name.chars().any(|c| c == '\0' || c.is_control()) {
        return Err(format!("column name '{}' contains control characters", name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_ids() {
        assert!(is_safe_id("p1"));
        assert!(is_safe_id("in_c_sales"));
        assert!(!is_safe_id("_staging"));
        assert!(!is_safe_id("Sales"));
        assert!(!is_safe_id("a b"));
        assert!(!is_safe_id(""));
    }

    #[test]
    fn table_names_allow_quoted_characters() {
        assert!(validate_table_name("orders").is_ok());
        assert!(validate_table_name("Orders 2024").is_ok());
        assert!(validate_table_name("weird\"name").is_ok());
        assert!(validate_table_name("a/b").is_err());
        assert!(validate_table_name(".hidden").is_err());
        assert!(validate_table_name("").is_err());
    }

    #[test]
    fn column_names() {
        assert!(validate_column_name("id").is_ok());
        assert!(validate_column_name("select").is_ok());
        assert!(validate_column_name("bad\0col").is_err());
    }
}
