//! Snapshot settings with four-level inheritance.
//!
//! Effective config for (project, bucket, table) = deep-merge of hard-coded
//! system defaults, then the stored *partial* project, bucket, and table
//! configs. The merge recurses on object nodes; leaves override lower
//! levels; a `null` leaf in a partial restores inheritance. A parallel
//! source map records which level contributed each leaf.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{DestructiveOp, SnapshotKind};

/// Automatic snapshot triggers per destructive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTriggers {
    pub drop_table: bool,
    pub truncate_table: bool,
    pub alter_column: bool,
}

/// Retention windows in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRetention {
    pub manual_days: i64,
    pub auto_days: i64,
}

/// Fully-resolved snapshot settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSettings {
    pub enabled: bool,
    pub auto_snapshot_triggers: SnapshotTriggers,
    pub retention: SnapshotRetention,
}

impl SnapshotSettings {
    /// Whether the given destructive operation requires an auto-snapshot.
    pub fn trigger_enabled(&self, op: DestructiveOp) -> bool {
        if !self.enabled {
            return false;
        }
        match op {
            DestructiveOp::DropTable => self.auto_snapshot_triggers.drop_table,
            DestructiveOp::TruncateTable => self.auto_snapshot_triggers.truncate_table,
            DestructiveOp::AlterColumn => self.auto_snapshot_triggers.alter_column,
        }
    }

    /// Expiry computed from the retention window for the snapshot kind.
    pub fn expires_at(&self, kind: SnapshotKind, created_at: DateTime<Utc>) -> DateTime<Utc> {
        let days = if kind.is_auto() {
            self.retention.auto_days
        } else {
            self.retention.manual_days
        };
        created_at + Duration::days(days)
    }
}

/// Hard-coded system defaults: only `drop_table` triggers automatically;
/// manual snapshots keep 90 days, automatic 7.
pub fn system_defaults() -> SnapshotSettings {
    SnapshotSettings {
        enabled: true,
        auto_snapshot_triggers: SnapshotTriggers {
            drop_table: true,
            truncate_table: false,
            alter_column: false,
        },
        retention: SnapshotRetention {
            manual_days: 90,
            auto_days: 7,
        },
    }
}

/// Level of the inheritance chain that contributed a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsLevel {
    System,
    Project,
    Bucket,
    Table,
}

impl SettingsLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Project => "project",
            Self::Bucket => "bucket",
            Self::Table => "table",
        }
    }
}

/// Resolution result: effective values plus the per-leaf source map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveSettings {
    pub effective: SnapshotSettings,
    pub sources: Value,
}

/// Resolve the effective settings for an entity from its stored partials.
///
/// Partials apply in order project → bucket → table; pass `None` for levels
/// with no stored override (e.g. resolving a bucket passes `table: None`).
pub fn resolve_effective(
    project: Option<&Value>,
    bucket: Option<&Value>,
    table: Option<&Value>,
) -> Result<EffectiveSettings, String> {
    let mut effective =
        serde_json::to_value(system_defaults()).map_err(|e| format!("defaults: {e}"))?;
    let mut sources = leaf_sources(&effective, SettingsLevel::System);

    for (level, partial) in [
        (SettingsLevel::Project, project),
        (SettingsLevel::Bucket, bucket),
        (SettingsLevel::Table, table),
    ] {
        if let Some(partial) = partial {
            merge_level(&mut effective, &mut sources, partial, level)?;
        }
    }

    let settings: SnapshotSettings = serde_json::from_value(effective)
        .map_err(|e| format!("merged settings do not match the schema: {e}"))?;
    Ok(EffectiveSettings {
        effective: settings,
        sources,
    })
}

/// Validate a stored partial against the settings schema: only known keys,
/// leaf types matching the defaults, `null` allowed anywhere as "inherit".
pub fn validate_partial(partial: &Value) -> Result<(), String> {
    let schema = serde_json::to_value(system_defaults()).map_err(|e| format!("defaults: {e}"))?;
    check_against(&schema, partial, "")
}

/// Drop `null` leaves (and the empty objects they leave behind) from a
/// partial before storing it; a `null` override means "inherit".
pub fn prune_nulls(partial: &Value) -> Value {
    match partial {
        Value::Object(map) => {
            let mut pruned = Map::new();
            for (k, v) in map {
                if v.is_null() {
                    continue;
                }
                let inner = prune_nulls(v);
                if inner.is_object() && inner.as_object().map(|m| m.is_empty()).unwrap_or(false) {
                    continue;
                }
                pruned.insert(k.clone(), inner);
            }
            Value::Object(pruned)
        }
        other => other.clone(),
    }
}

fn leaf_sources(value: &Value, level: SettingsLevel) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), leaf_sources(v, level));
            }
            Value::Object(out)
        }
        _ => Value::String(level.as_str().to_string()),
    }
}

fn merge_level(
    effective: &mut Value,
    sources: &mut Value,
    overlay: &Value,
    level: SettingsLevel,
) -> Result<(), String> {
    let overlay_map = overlay
        .as_object()
        .ok_or_else(|| "settings partial must be a JSON object".to_string())?;
    let eff_map = effective
        .as_object_mut()
        .expect("effective settings are an object");
    let src_map = sources
        .as_object_mut()
        .expect("source map mirrors effective settings");

    for (key, value) in overlay_map {
        let Some(eff_slot) = eff_map.get_mut(key) else {
            return Err(format!("unknown settings key '{key}'"));
        };
        let src_slot = src_map.get_mut(key).expect("source map in sync");

        match value {
            // null restores inheritance: keep the lower level's value
            Value::Null => {}
            Value::Object(_) if eff_slot.is_object() => {
                merge_level(eff_slot, src_slot, value, level)?;
            }
            Value::Object(_) => {
                return Err(format!("settings key '{key}' is a leaf, got an object"));
            }
            leaf => {
                if !leaf_types_match(eff_slot, leaf) {
                    return Err(format!("settings key '{key}' has the wrong type"));
                }
                *eff_slot = leaf.clone();
                *src_slot = Value::String(level.as_str().to_string());
            }
        }
    }
    Ok(())
}

fn check_against(schema: &Value, partial: &Value, path: &str) -> Result<(), String> {
    let Some(partial_map) = partial.as_object() else {
        return Err(format!("settings at '{path}' must be a JSON object"));
    };
    let schema_map = schema.as_object().expect("schema is an object");

    for (key, value) in partial_map {
        let full_key = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        let Some(schema_slot) = schema_map.get(key) else {
            return Err(format!("unknown settings key '{full_key}'"));
        };
        match value {
            Value::Null => {}
            Value::Object(_) if schema_slot.is_object() => {
                check_against(schema_slot, value, &full_key)?;
            }
            Value::Object(_) => {
                return Err(format!("settings key '{full_key}' is a leaf, got an object"));
            }
            leaf => {
                if !leaf_types_match(schema_slot, leaf) {
                    return Err(format!("settings key '{full_key}' has the wrong type"));
                }
            }
        }
    }
    Ok(())
}

fn leaf_types_match(expected: &Value, got: &Value) -> bool {
    matches!(
        (expected, got),
        (Value::Bool(_), Value::Bool(_))
            | (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_only() {
        let resolved = resolve_effective(None, None, None).unwrap();
        assert!(resolved.effective.enabled);
        assert!(resolved.effective.auto_snapshot_triggers.drop_table);
        assert!(!resolved.effective.auto_snapshot_triggers.truncate_table);
        assert_eq!(resolved.effective.retention.manual_days, 90);
        assert_eq!(resolved.sources["enabled"], "system");
    }

    #[test]
    fn project_and_bucket_overrides_with_source_map() {
        // Scenario: project enables the truncate trigger, bucket disables
        // snapshots entirely.
        let project = json!({"auto_snapshot_triggers": {"truncate_table": true}});
        let bucket = json!({"enabled": false});

        let resolved = resolve_effective(Some(&project), Some(&bucket), None).unwrap();
        assert!(!resolved.effective.enabled);
        assert!(resolved.effective.auto_snapshot_triggers.truncate_table);
        assert!(resolved.effective.auto_snapshot_triggers.drop_table);

        assert_eq!(resolved.sources["enabled"], "bucket");
        assert_eq!(
            resolved.sources["auto_snapshot_triggers"]["truncate_table"],
            "project"
        );
        assert_eq!(
            resolved.sources["auto_snapshot_triggers"]["drop_table"],
            "system"
        );
    }

    #[test]
    fn null_leaf_restores_inheritance() {
        let project = json!({"enabled": false});
        let table = json!({"enabled": null});
        let resolved = resolve_effective(Some(&project), None, Some(&table)).unwrap();
        assert!(!resolved.effective.enabled);
        assert_eq!(resolved.sources["enabled"], "project");
    }

    #[test]
    fn unknown_keys_rejected() {
        let partial = json!({"auto_backup": true});
        assert!(validate_partial(&partial).is_err());
        assert!(resolve_effective(Some(&partial), None, None).is_err());
    }

    #[test]
    fn wrong_leaf_type_rejected() {
        let partial = json!({"enabled": "yes"});
        assert!(validate_partial(&partial).is_err());
    }

    #[test]
    fn prune_nulls_drops_inherit_markers() {
        let partial = json!({
            "enabled": null,
            "retention": {"manual_days": 30, "auto_days": null}
        });
        let pruned = prune_nulls(&partial);
        assert_eq!(pruned, json!({"retention": {"manual_days": 30}}));
    }

    #[test]
    fn disabled_master_switch_suppresses_triggers() {
        let settings = SnapshotSettings {
            enabled: false,
            ..system_defaults()
        };
        assert!(!settings.trigger_enabled(DestructiveOp::DropTable));
    }

    #[test]
    fn retention_drives_expiry() {
        let settings = system_defaults();
        let t0 = Utc::now();
        let manual = settings.expires_at(SnapshotKind::Manual, t0);
        let auto = settings.expires_at(SnapshotKind::AutoPredrop, t0);
        assert_eq!(manual - t0, Duration::days(90));
        assert_eq!(auto - t0, Duration::days(7));
    }
}
