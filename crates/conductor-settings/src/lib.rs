//! # conductor-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ConductorSettings::default()`]
//! 2. **User file**: `~/.conductor/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CONDUCTOR_*` and `NGROK_AUTH_TOKEN`
//!    overrides (highest priority)
//!
//! Unlike a global singleton, settings are loaded once by the process holder
//! and handed to each component as a plain value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
