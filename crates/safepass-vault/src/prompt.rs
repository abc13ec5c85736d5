// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Master password acquisition via TTY prompt or environment variables.

use safepass_core::SafepassError;
use secrecy::SecretString;

/// Environment variable providing the current master password.
pub const MASTER_PASSWORD_ENV_VAR: &str = "SAFEPASS_MASTER_PASSWORD";

/// Environment variable providing the new master password for a password change.
pub const NEW_MASTER_PASSWORD_ENV_VAR: &str = "SAFEPASS_NEW_MASTER_PASSWORD";

fn from_env(var: &str) -> Option<SecretString> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Some(SecretString::from(value)),
        _ => None,
    }
}

fn read_password(prompt: &str) -> Result<String, SafepassError> {
    eprint!("{prompt}");
    rpassword::read_password()
        .map_err(|e| SafepassError::InvalidInput(format!("failed to read password: {e}")))
}

fn not_provided(var: &str) -> SafepassError {
    SafepassError::InvalidInput(format!(
        "No master password provided. Set {var} or run interactively."
    ))
}

/// Get the master password from `SAFEPASS_MASTER_PASSWORD` or a TTY prompt.
pub fn get_master_password() -> Result<SecretString, SafepassError> {
    if let Some(password) = from_env(MASTER_PASSWORD_ENV_VAR) {
        return Ok(password);
    }

    if std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        let password = read_password("Master password: ")?;
        if password.is_empty() {
            return Err(SafepassError::InvalidInput(
                "empty master password not allowed".to_string(),
            ));
        }
        return Ok(SecretString::from(password));
    }

    Err(not_provided(MASTER_PASSWORD_ENV_VAR))
}

/// Get a new master password, prompting twice when interactive.
///
/// `SAFEPASS_NEW_MASTER_PASSWORD` skips the confirmation.
pub fn get_new_master_password() -> Result<SecretString, SafepassError> {
    if let Some(password) = from_env(NEW_MASTER_PASSWORD_ENV_VAR) {
        return Ok(password);
    }

    if std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        let first = read_password("New master password: ")?;
        let second = read_password("Confirm new master password: ")?;
        if first != second {
            return Err(SafepassError::InvalidInput("passwords do not match".to_string()));
        }
        if first.is_empty() {
            return Err(SafepassError::InvalidInput(
                "empty master password not allowed".to_string(),
            ));
        }
        return Ok(SecretString::from(first));
    }

    Err(not_provided(NEW_MASTER_PASSWORD_ENV_VAR))
}

/// Read one secret value: a hidden TTY prompt, or one line of piped stdin.
pub fn read_secret(label: &str) -> Result<SecretString, SafepassError> {
    if std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        return read_password(&format!("{label}: ")).map(SecretString::from);
    }

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| SafepassError::InvalidInput(format!("failed to read {label}: {e}")))?;
    let value = line.trim_end_matches(['\r', '\n']).to_string();
    Ok(SecretString::from(value))
}
