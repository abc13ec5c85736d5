// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Argon2id key derivation from a master password.
//!
//! Derives a 32-byte key using Argon2id (Algorithm::Argon2id, Version::V0x13).
//! The same password and salt always produce the same key.

use std::fmt;

use ring::{constant_time, hmac};
use safepass_config::model::KdfConfig;
use safepass_core::SafepassError;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::crypto;

/// Length of a derived key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of a KDF salt in bytes.
pub const SALT_LEN: usize = 16;

/// Application-wide salt used in fixed-salt mode and for legacy envelopes.
pub const FIXED_SALT: [u8; SALT_LEN] = *b"safepass-salt\0\0\0";

const KEY_ID_LABEL: &[u8] = b"safepass-key-id";

/// A 16-byte Argon2id salt. Not secret.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    /// The application-wide fixed salt.
    pub fn fixed() -> Self {
        Self(FIXED_SALT)
    }

    /// A fresh random salt from the system CSPRNG.
    pub fn generate() -> Result<Self, SafepassError> {
        let mut salt = [0u8; SALT_LEN];
        crypto::fill_random(&mut salt)?;
        Ok(Self(salt))
    }

    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a hex-encoded salt as stored in the key envelope.
    pub fn from_hex(value: &str) -> Result<Self, SafepassError> {
        let bytes = hex::decode(value)
            .map_err(|e| SafepassError::Decryption(format!("malformed salt: {e}")))?;
        let bytes: [u8; SALT_LEN] = bytes.try_into().map_err(|_| {
            SafepassError::Decryption(format!("malformed salt: expected {SALT_LEN} bytes"))
        })?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }

    pub fn is_fixed(&self) -> bool {
        self.0 == FIXED_SALT
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", self.to_hex())
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::from(&KdfConfig::default())
    }
}

impl From<&KdfConfig> for KdfParams {
    fn from(config: &KdfConfig) -> Self {
        Self {
            memory_cost: config.memory_cost,
            iterations: config.iterations,
            parallelism: config.parallelism,
        }
    }
}

/// A 256-bit symmetric key derived from a master password.
///
/// The bytes are zeroed on drop. Debug output shows only the key id, and
/// equality runs in constant time.
#[derive(Clone)]
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub(crate) fn expose(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Non-secret fingerprint: the first 8 bytes of HMAC-SHA256 over a fixed
    /// label, hex encoded.
    pub fn key_id(&self) -> String {
        let mac_key = hmac::Key::new(hmac::HMAC_SHA256, self.0.as_ref());
        let tag = hmac::sign(&mac_key, KEY_ID_LABEL);
        hex::encode(&tag.as_ref()[..8])
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time::verify_slices_are_equal(self.0.as_ref(), other.0.as_ref()).is_ok()
    }
}

impl Eq for DerivedKey {}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("id", &self.key_id())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 32-byte key from `password` using Argon2id.
pub fn derive_key(
    password: &SecretString,
    salt: &Salt,
    params: &KdfParams,
) -> Result<DerivedKey, SafepassError> {
    let password = password.expose_secret();
    if password.is_empty() {
        return Err(SafepassError::KeyDerivation(
            "empty master password not allowed".to_string(),
        ));
    }

    let argon_params = argon2::Params::new(
        params.memory_cost,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| SafepassError::KeyDerivation(format!("invalid Argon2id parameters: {e}")))?;

    let argon2 =
        argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon_params);

    let mut output = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt.as_bytes(), output.as_mut())
        .map_err(|e| SafepassError::KeyDerivation(format!("Argon2id key derivation failed: {e}")))?;

    Ok(DerivedKey(output))
}

/// Low-cost parameters for unit tests.
#[cfg(test)]
pub(crate) const TEST_PARAMS: KdfParams = KdfParams {
    memory_cost: 8,
    iterations: 1,
    parallelism: 1,
};
