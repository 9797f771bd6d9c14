//! Reads `settings.json` over the compiled defaults, then applies `PANTRY_*`
//! variables. A user file may be partial: only the keys it names change.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::PantrySettings;

/// Resolve the default settings file (`~/.pantrybot/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pantrybot").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PantrySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an invalid merged value is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<PantrySettings> {
    let defaults = serde_json::to_value(PantrySettings::default())?;

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

    let mut settings: PantrySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Overlay `overlay` onto `base`.
///
/// Objects merge key by key; any other overlay value (arrays included)
/// replaces the base value outright. `null` in the overlay leaves the base
/// value alone, so a user can blank a key without losing its default.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Apply `PANTRY_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut PantrySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Invalid values are logged and ignored.
pub fn apply_overrides(settings: &mut PantrySettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let checked = |name: &str, parsed: Option<u64>, raw: Option<String>| {
        if parsed.is_none() {
            if let Some(raw) = raw {
                tracing::warn!(key = name, value = %raw, "invalid numeric env var, ignoring");
            }
        }
        parsed
    };

    if let Some(v) = string("PANTRY_HOST") {
        settings.server.host = v;
    }
    let raw = string("PANTRY_PORT");
    if let Some(v) = raw.as_deref().and_then(|v| parse_u16_range(v, 0, 65535)) {
        settings.server.port = v;
    } else if let Some(raw) = raw {
        tracing::warn!(key = "PANTRY_PORT", value = %raw, "invalid port env var, ignoring");
    }
    let raw = string("PANTRY_HEARTBEAT_INTERVAL_MS");
    let parsed = raw.as_deref().and_then(|v| parse_u64_range(v, 1_000, 600_000));
    if let Some(v) = checked("PANTRY_HEARTBEAT_INTERVAL_MS", parsed, raw) {
        settings.server.heartbeat_interval_ms = v;
    }

    if let Some(v) = string("PANTRY_SERVER_URL") {
        settings.transport.url = v;
    }
    let raw = string("PANTRY_HANDSHAKE_TIMEOUT_MS");
    let parsed = raw.as_deref().and_then(|v| parse_u64_range(v, 100, 120_000));
    if let Some(v) = checked("PANTRY_HANDSHAKE_TIMEOUT_MS", parsed, raw) {
        settings.transport.handshake_timeout_ms = v;
    }
    let raw = string("PANTRY_RECONNECT_DELAY_MS");
    let parsed = raw.as_deref().and_then(|v| parse_u64_range(v, 10, 600_000));
    if let Some(v) = checked("PANTRY_RECONNECT_DELAY_MS", parsed, raw) {
        settings.transport.reconnect_delay_ms = v;
    }

    if let Some(v) = string("PANTRY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(raw) = string("PANTRY_LOG_JSON") {
        match parse_bool(&raw) {
            Some(v) => settings.logging.json = v,
            None => tracing::warn!(key = "PANTRY_LOG_JSON", value = %raw, "invalid boolean env var, ignoring"),
        }
    }
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
