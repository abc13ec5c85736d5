// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Field cipher: encrypts one sensitive text field at a time.
//!
//! Ciphertext is a self-describing string:
//! `sp1$aes-256-gcm$<base64 nonce>$<base64 ciphertext+tag>`.
//! Anything that does not parse, fails authentication, or does not decrypt
//! to UTF-8 is a [`SafepassError::Decryption`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::aead::NONCE_LEN;
use safepass_core::SafepassError;
use zeroize::Zeroizing;

use crate::crypto;
use crate::kdf::DerivedKey;

const FORMAT_VERSION: &str = "sp1";
const ALGORITHM: &str = "aes-256-gcm";

/// Seal raw bytes under a 32-byte key into the ciphertext string format.
pub(crate) fn seal_to_string(key: &[u8; 32], plaintext: &[u8]) -> Result<String, SafepassError> {
    let (ciphertext, nonce) = crypto::seal(key, plaintext)?;
    Ok(format!(
        "{FORMAT_VERSION}${ALGORITHM}${}${}",
        STANDARD.encode(nonce),
        STANDARD.encode(ciphertext)
    ))
}

/// Open a string produced by [`seal_to_string`].
pub(crate) fn open_from_string(
    key: &[u8; 32],
    blob: &str,
) -> Result<Zeroizing<Vec<u8>>, SafepassError> {
    let (nonce, ciphertext) = parse(blob)?;
    crypto::open(key, &nonce, &ciphertext)
}

fn parse(blob: &str) -> Result<([u8; NONCE_LEN], Vec<u8>), SafepassError> {
    let mut parts = blob.splitn(4, '$');
    let (Some(version), Some(algorithm), Some(nonce), Some(ciphertext)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(SafepassError::Decryption("not a field ciphertext".to_string()));
    };
    if version != FORMAT_VERSION || algorithm != ALGORITHM {
        return Err(SafepassError::Decryption(format!(
            "unsupported ciphertext format {version}/{algorithm}"
        )));
    }

    let nonce = STANDARD
        .decode(nonce)
        .map_err(|e| SafepassError::Decryption(format!("malformed nonce: {e}")))?;
    let nonce: [u8; NONCE_LEN] = nonce
        .try_into()
        .map_err(|_| SafepassError::Decryption("malformed nonce length".to_string()))?;
    let ciphertext = STANDARD
        .decode(ciphertext)
        .map_err(|e| SafepassError::Decryption(format!("malformed ciphertext: {e}")))?;

    Ok((nonce, ciphertext))
}

/// Encrypt a text field. Two calls with the same input yield different output.
pub fn encrypt_field(plaintext: &str, key: &DerivedKey) -> Result<String, SafepassError> {
    seal_to_string(key.expose(), plaintext.as_bytes())
}

/// Decrypt a text field produced by [`encrypt_field`] under the same key.
pub fn decrypt_field(ciphertext: &str, key: &DerivedKey) -> Result<String, SafepassError> {
    let plaintext = open_from_string(key.expose(), ciphertext)?;
    String::from_utf8(plaintext.to_vec())
        .map_err(|_| SafepassError::Decryption("plaintext is not valid UTF-8".to_string()))
}

/// Whether `value` has the shape of a field ciphertext. Does not authenticate.
pub fn is_ciphertext(value: &str) -> bool {
    parse(value).is_ok()
}
