//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RotondeSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `ROTONDE_*` environment variable overrides
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use rotonde_core::NoticeScope;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::RotondeSettings;

/// Resolve the default settings file (`~/.rotonde/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".rotonde").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RotondeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RotondeSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<RotondeSettings> {
    let defaults = serde_json::to_value(RotondeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply `ROTONDE_*` environment variables to loaded settings.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut RotondeSettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. [`apply_env_overrides`] passes
/// the process environment.
pub fn apply_overrides_with<F>(settings: &mut RotondeSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("ROTONDE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("ROTONDE_PORT", |s| parse_u16_range(s, 0, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = env.parsed("ROTONDE_MAX_CONNECTIONS", |s| {
        parse_usize_range(s, 1, 1_000_000)
    }) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.parsed("ROTONDE_MAX_SEND_QUEUE", |s| {
        parse_usize_range(s, 1, 1_000_000)
    }) {
        settings.server.max_send_queue = v;
    }
    if let Some(v) = env.parsed("ROTONDE_HEARTBEAT_INTERVAL_SECS", |s| {
        parse_u64_range(s, 1, 3600)
    }) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.parsed("ROTONDE_HEARTBEAT_TIMEOUT_SECS", |s| {
        parse_u64_range(s, 2, 7200)
    }) {
        settings.server.heartbeat_timeout_secs = v;
    }

    // ── Routing ─────────────────────────────────────────────────────
    if let Some(v) = env.parsed("ROTONDE_DEFINITION_NOTICES", |s| {
        s.parse::<NoticeScope>().ok()
    }) {
        settings.routing.definition_notices = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("ROTONDE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("ROTONDE_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
