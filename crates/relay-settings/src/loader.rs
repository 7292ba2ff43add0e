//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If `~/.relay/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `RELAY_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{LogFormat, RelaySettings, relay_home};

/// Resolve the path to the settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    relay_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus env overrides). If the
/// file contains invalid JSON, or the merged result fails validation, returns
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_overrides_from(settings: &mut RelaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let number = |name: &str, min: u64, max: u64| env_u64(&lookup, name, min, max);

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = number("RELAY_PORT", 0, u64::from(u16::MAX)) {
        settings.server.port = u16::try_from(v).unwrap_or(settings.server.port);
    }
    if let Some(v) = number("RELAY_MAX_CONNECTIONS", 0, 1_000_000) {
        settings.server.max_connections = usize::try_from(v).unwrap_or(usize::MAX);
    }
    if let Some(v) = number("RELAY_SEND_QUEUE", 1, 65_536) {
        settings.server.send_queue_capacity = usize::try_from(v).unwrap_or(usize::MAX);
    }

    // ── Heartbeat ───────────────────────────────────────────────────
    if let Some(v) = number("RELAY_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        settings.heartbeat.interval_ms = v;
    }
    if let Some(v) = number("RELAY_HEARTBEAT_TIMEOUT_MS", 100, 3_600_000) {
        settings.heartbeat.timeout_ms = v;
    }

    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = string("RELAY_DB_PATH") {
        settings.storage.db_path = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("RELAY_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(value = %v, "invalid RELAY_LOG_FORMAT, ignoring"),
        }
    }
}

fn env_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    min: u64,
    max: u64,
) -> Option<u64> {
    let raw = lookup(name)?;
    let parsed = parse_u64_range(&raw, min, max);
    if parsed.is_none() {
        tracing::warn!(key = name, value = %raw, min, max, "invalid numeric env var, ignoring");
    }
    parsed
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a log format name (case-insensitive).
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "pretty" | "text" => Some(LogFormat::Pretty),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn deep_merge_nested_objects() {
        let target = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
        let source = serde_json::json!({"a": {"b": 10}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"]["b"], 10);
        assert_eq!(merged["a"]["c"], 2);
        assert_eq!(merged["d"], 3);
    }

    #[test]
    fn deep_merge_skips_null() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let merged = deep_merge(
            serde_json::json!({"a": [1, 2, 3]}),
            serde_json::json!({"a": [9]}),
        );
        assert_eq!(merged["a"], serde_json::json!([9]));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.heartbeat.interval_ms, 15_000);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"port":9100},"heartbeat":{"intervalMs":5000,"timeoutMs":12000}}"#,
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.send_queue_capacity, 256);
        assert_eq!(settings.heartbeat.interval_ms, 5000);
        assert_eq!(settings.heartbeat.timeout_ms, 12_000);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    #[test]
    fn invalid_combination_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"heartbeat":{"intervalMs":20000,"timeoutMs":1000}}"#).unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = RelaySettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("RELAY_HOST", "127.0.0.1"),
                ("RELAY_PORT", "9999"),
                ("RELAY_MAX_CONNECTIONS", "5"),
                ("RELAY_SEND_QUEUE", "16"),
                ("RELAY_HEARTBEAT_INTERVAL_MS", "1000"),
                ("RELAY_HEARTBEAT_TIMEOUT_MS", "2500"),
                ("RELAY_DB_PATH", "/tmp/rooms.db"),
                ("RELAY_LOG_LEVEL", "debug"),
                ("RELAY_LOG_FORMAT", "JSON"),
            ]),
        );
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9999);
        assert_eq!(settings.server.max_connections, 5);
        assert_eq!(settings.server.send_queue_capacity, 16);
        assert_eq!(settings.heartbeat.interval_ms, 1000);
        assert_eq!(settings.heartbeat.timeout_ms, 2500);
        assert_eq!(settings.storage.db_path.as_deref(), Some("/tmp/rooms.db"));
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = RelaySettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("RELAY_PORT", "70000"),
                ("RELAY_HEARTBEAT_INTERVAL_MS", "abc"),
                ("RELAY_LOG_FORMAT", "xml"),
                ("RELAY_HOST", ""),
            ]),
        );
        assert_eq!(settings, RelaySettings::default());
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_u64_range("10", 1, 10), Some(10));
        assert_eq!(parse_u64_range("0", 1, 10), None);
        assert_eq!(parse_u64_range(" 5 ", 1, 10), Some(5));
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }

    #[test]
    fn parse_log_formats() {
        assert_eq!(parse_log_format("json"), Some(LogFormat::Json));
        assert_eq!(parse_log_format("Text"), Some(LogFormat::Pretty));
        assert_eq!(parse_log_format("yaml"), None);
    }
}
