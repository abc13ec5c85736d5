// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The application-wide secret that wraps key envelopes.

use std::fmt;

use safepass_core::SafepassError;
use zeroize::Zeroizing;

/// Environment variable holding the application secret as 64 hex characters.
pub const APP_SECRET_ENV_VAR: &str = "SAFEPASS_APP_SECRET";

/// 32-byte key-encryption key shared by the deployment.
///
/// Never read from a config file. Debug output is redacted.
#[derive(Clone)]
pub struct AppSecret(Zeroizing<[u8; 32]>);

impl AppSecret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Parse 64 hex characters.
    pub fn from_hex(value: &str) -> Result<Self, SafepassError> {
        let bytes = Zeroizing::new(
            hex::decode(value.trim())
                .map_err(|_| SafepassError::Config("application secret is not valid hex".into()))?,
        );
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            SafepassError::Config(format!(
                "application secret must be 32 bytes (64 hex chars), got {} bytes",
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Read the secret from `SAFEPASS_APP_SECRET`.
    pub fn from_env() -> Result<Self, SafepassError> {
        match std::env::var(APP_SECRET_ENV_VAR) {
            Ok(value) if !value.is_empty() => Self::from_hex(&value),
            _ => Err(SafepassError::Config(format!(
                "{APP_SECRET_ENV_VAR} is not set; provide the 64-hex-char application secret"
            ))),
        }
    }

    pub(crate) fn expose(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for AppSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AppSecret([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn parses_hex() {
        let secret = AppSecret::from_hex(HEX).unwrap();
        assert_eq!(secret.expose()[31], 0x1f);
    }

    #[test]
    fn rejects_wrong_length_and_bad_hex() {
        assert!(matches!(AppSecret::from_hex("abcd"), Err(SafepassError::Config(_))));
        assert!(matches!(AppSecret::from_hex("zz"), Err(SafepassError::Config(_))));
    }

    #[test]
    fn debug_is_redacted() {
        let secret = AppSecret::from_hex(HEX).unwrap();
        assert_eq!(format!("{secret:?}"), "AppSecret([REDACTED])");
    }

    #[test]
    #[serial]
    fn reads_from_env() {
        // SAFETY: test-only env mutation, serialized with #[serial].
        unsafe { std::env::set_var(APP_SECRET_ENV_VAR, HEX) };
        let result = AppSecret::from_env();
        unsafe { std::env::remove_var(APP_SECRET_ENV_VAR) };
        assert!(result.is_ok());
    }

    #[test]
    #[serial]
    fn missing_env_is_a_config_error() {
        unsafe { std::env::remove_var(APP_SECRET_ENV_VAR) };
        assert!(matches!(AppSecret::from_env(), Err(SafepassError::Config(_))));
    }
}
