//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RetroSettings::default()`]
//! 2. If `~/.retro/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::RetroSettings;

/// Resolve the path to the settings file (`~/.retro/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".retro").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RetroSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, or the merged result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RetroSettings> {
    let defaults = serde_json::to_value(RetroSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RetroSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `RETRO_*` environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut RetroSettings) {
    apply_overrides_from(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`. Invalid values are logged and
/// ignored, falling back to file/default values.
pub fn apply_overrides_from<F>(settings: &mut RetroSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let millis = |name: &str, min: u64, max: u64| {
        let val = lookup(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid millisecond env var, ignoring");
        }
        result
    };

    if let Some(v) = string("RETRO_BASE_URL") {
        settings.server.base_url = v;
    }

    // ── Session timing ──────────────────────────────────────────────
    if let Some(v) = millis("RETRO_BACKOFF_BASE_MS", 1, 600_000) {
        settings.session.backoff_base_ms = v;
    }
    if let Some(v) = millis("RETRO_BACKOFF_MAX_MS", 1, 3_600_000) {
        settings.session.backoff_max_ms = v;
    }
    if let Some(v) = millis("RETRO_MONITOR_INTERVAL_MS", 100, 600_000) {
        settings.session.monitor_interval_ms = v;
    }
    if let Some(v) = millis("RETRO_KEEPALIVE_THRESHOLD_MS", 100, 3_600_000) {
        settings.session.keep_alive_threshold_ms = v;
    }
    if let Some(v) = millis("RETRO_STREAM_IDLE_TIMEOUT_MS", 1_000, 3_600_000) {
        settings.session.stream_idle_timeout_ms = v;
    }
    if let Some(v) = millis("RETRO_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.session.connect_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("RETRO_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(val) = lookup("RETRO_LOG_JSON") {
        match parse_bool(&val) {
            Some(v) => settings.logging.json = v,
            None => tracing::warn!(key = "RETRO_LOG_JSON", value = %val, "invalid boolean env var, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
