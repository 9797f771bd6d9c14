//! # pantry-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PantrySettings::default()`]
//! 2. **User file**: `~/.pantrybot/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PANTRY_*` overrides (highest priority)
//!
//! The loaded value is passed explicitly to the hub, the transport and the
//! telemetry layer; there is no process-wide settings instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{LoggingSettings, PantrySettings, ServerSettings, TransportSettings};
