// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Safepass vault.

use thiserror::Error;

/// The error type returned by every fallible Safepass operation.
///
/// Key-lifecycle failures are distinct variants so callers can tell
/// "log in again" apart from "your data may be damaged" without
/// matching on message text. See [`SafepassError::requires_reauthentication`]
/// and [`SafepassError::indicates_corruption`].
#[derive(Debug, Error)]
pub enum SafepassError {
    /// Configuration errors (invalid TOML, bad values, missing secrets).
    #[error("configuration error: {0}")]
    Config(String),

    /// Document store errors (connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Password-based key derivation failed (bad parameters, empty password).
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// No session key is cached and none could be resolved without a password.
    #[error("no encryption key available for user {user_id}")]
    KeyUnavailable { user_id: String },

    /// Ciphertext was not produced by a compatible key, or is corrupted.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The key envelope could not be written to the document store.
    #[error("failed to store key envelope for user {user_id}: {source}")]
    EnvelopeWrite {
        user_id: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The key envelope could not be read or unwrapped after all retries.
    #[error("failed to retrieve key envelope for user {user_id} after {attempts} attempt(s): {reason}")]
    Retrieve {
        user_id: String,
        attempts: u32,
        reason: String,
    },

    /// A key rotation finished, but not every item was fully migrated.
    #[error(
        "key rotation incomplete: {} item(s) failed, {} item(s) degraded",
        failed.len(),
        degraded.len()
    )]
    RotationPartialFailure {
        /// Ids of items that were not updated at all.
        failed: Vec<String>,
        /// Ids of items updated with a stale or dropped field.
        degraded: Vec<String>,
    },

    /// A referenced document does not exist.
    #[error("{collection} document not found: {id}")]
    NotFound { collection: String, id: String },

    /// Caller-supplied input was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SafepassError {
    /// Shorthand for wrapping a message as a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            source: message.into().into(),
        }
    }

    /// True when the caller should ask the user to authenticate again.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::KeyUnavailable { .. } | Self::Retrieve { .. })
    }

    /// True when stored ciphertext may be damaged or only partly migrated.
    pub fn indicates_corruption(&self) -> bool {
        matches!(
            self,
            Self::Decryption(_) | Self::RotationPartialFailure { .. }
        )
    }
}
