// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.

use crate::diagnostic::ConfigError;
use crate::model::SafepassConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Collects every violation instead of failing fast.
pub fn validate_config(config: &SafepassConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if config.kdf.memory_cost < 32768 {
        fail(format!(
            "kdf.memory_cost must be at least 32768 (32 MiB), got {}",
            config.kdf.memory_cost
        ));
    }

    if config.kdf.iterations < 2 {
        fail(format!(
            "kdf.iterations must be at least 2, got {}",
            config.kdf.iterations
        ));
    }

    if config.kdf.parallelism < 1 {
        fail(format!(
            "kdf.parallelism must be at least 1, got {}",
            config.kdf.parallelism
        ));
    }

    if config.envelope.retry_attempts < 1 {
        fail("envelope.retry_attempts must be at least 1".to_string());
    }

    if config.envelope.retry_backoff_ms > 60_000 {
        fail(format!(
            "envelope.retry_backoff_ms must be at most 60000, got {}",
            config.envelope.retry_backoff_ms
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    if !LOG_LEVELS.contains(&config.log.level.as_str()) {
        fail(format!(
            "log.level `{}` is not one of: {}",
            config.log.level,
            LOG_LEVELS.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
