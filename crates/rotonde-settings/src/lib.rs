//! # rotonde-settings
//!
//! Layered configuration for the Rotonde broker.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`RotondeSettings::default()`])
//! 2. **Settings file**, `~/.rotonde/settings.json` unless a path is given (deep-merged over defaults)
//! 3. **Environment variables**, `ROTONDE_*` overrides
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_with, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{LoggingSettings, RotondeSettings, RoutingSettings, ServerSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = RotondeSettings::default();
        let path = settings_path();
        assert!(path.ends_with(".rotonde/settings.json"));
    }
}
