// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encryption-key lifecycle for the Safepass vault.
//!
//! Derives a key from the master password (Argon2id), keeps a copy wrapped
//! under the application secret so sessions can recover it, caches it per
//! session, encrypts individual item fields with AES-256-GCM, and rotates
//! every item to a new key when the master password changes.

pub mod cipher;
pub mod crypto;
pub mod envelope;
pub mod items;
pub mod kdf;
pub mod model;
pub mod prompt;
pub mod retry;
pub mod rotation;
pub mod secret;
pub mod session;
pub mod vault;

pub use cipher::{decrypt_field, encrypt_field};
pub use envelope::{EnvelopeRecord, EnvelopeStore};
pub use items::ItemService;
pub use kdf::{derive_key, DerivedKey, KdfParams, Salt};
pub use model::{Credential, CredentialInput, Note, NoteInput, VaultItem};
pub use prompt::{get_master_password, get_new_master_password, read_secret};
pub use retry::RetryPolicy;
pub use rotation::{ItemState, KeyRotationCoordinator, RotationReport};
pub use secret::AppSecret;
pub use session::{Session, SessionKeyCache};
pub use vault::Vault;
