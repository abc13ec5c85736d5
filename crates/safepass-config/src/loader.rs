// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./safepass.toml` > `~/.config/safepass/safepass.toml` > `/etc/safepass/safepass.toml`
//! with environment variable overrides via `SAFEPASS_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::SafepassConfig;

/// Environment variables with the `SAFEPASS_` prefix that are secrets, not
/// config keys. They must never reach the figment extractor, where
/// `deny_unknown_fields` would reject them.
const NON_CONFIG_ENV_VARS: &[&str] = &["app_secret", "master_password"];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/safepass/safepass.toml` (system-wide)
/// 3. `~/.config/safepass/safepass.toml` (user XDG config)
/// 4. `./safepass.toml` (local directory)
/// 5. `SAFEPASS_*` environment variables
pub fn load_config() -> Result<SafepassConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env vars).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<SafepassConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SafepassConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<SafepassConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SafepassConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
///
/// Returns the Figment before extraction so callers can inspect metadata.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(SafepassConfig::default()))
        .merge(Toml::file("/etc/safepass/safepass.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("safepass/safepass.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("safepass.toml"))
        .merge(env_provider())
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` so underscore-containing key names
/// survive: `SAFEPASS_KDF_MEMORY_COST` maps to `kdf.memory_cost`, not
/// `kdf.memory.cost`.
fn env_provider() -> Env {
    Env::prefixed("SAFEPASS_")
        .filter(|key| {
            !NON_CONFIG_ENV_VARS
                .iter()
                .any(|secret| key.as_str().eq_ignore_ascii_case(secret))
        })
        .map(|key| map_env_key(&key.as_str().to_ascii_lowercase()).into())
}

/// Map a lowercased, prefix-stripped env var name to a dotted config path.
pub fn map_env_key(key: &str) -> String {
    key.replacen("kdf_", "kdf.", 1)
        .replacen("envelope_", "envelope.", 1)
        .replacen("rotation_", "rotation.", 1)
        .replacen("storage_", "storage.", 1)
        .replacen("log_", "log.", 1)
}
