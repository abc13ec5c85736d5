// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vault item types and their stored field layout.

use std::fmt;

use chrono::{DateTime, Utc};
use safepass_core::{Collection, Document, Fields, SafepassError};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored on every item: id of the key its encrypted fields were written under.
pub const KEY_ID_FIELD: &str = "keyId";
pub const CREATED_AT_FIELD: &str = "createdAt";

/// How much an encrypted field matters to its item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Losing it destroys the item's identity (the credential secret).
    Primary,
    /// Free-form content that may be dropped.
    Secondary,
}

/// An encrypted attribute of a stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptedFieldSpec {
    pub name: &'static str,
    pub role: FieldRole,
}

const CREDENTIAL_FIELDS: &[EncryptedFieldSpec] = &[
    EncryptedFieldSpec {
        name: "password",
        role: FieldRole::Primary,
    },
    EncryptedFieldSpec {
        name: "notes",
        role: FieldRole::Secondary,
    },
];

const NOTE_FIELDS: &[EncryptedFieldSpec] = &[EncryptedFieldSpec {
    name: "content",
    role: FieldRole::Secondary,
}];

/// Encrypted fields of the items in `collection`.
pub fn encrypted_fields(collection: Collection) -> &'static [EncryptedFieldSpec] {
    match collection {
        Collection::Passwords => CREDENTIAL_FIELDS,
        Collection::Notes => NOTE_FIELDS,
        Collection::Encryption => &[],
    }
}

/// Ciphertext of one field. Opaque outside the field cipher.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedField(String);

impl EncryptedField {
    pub(crate) fn new(ciphertext: String) -> Self {
        Self(ciphertext)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedField({} bytes)", self.0.len())
    }
}

/// A stored login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(skip)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub username: String,
    pub password: EncryptedField,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub notes: Option<EncryptedField>,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A stored free-form note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(skip)]
    pub id: String,
    pub title: String,
    /// `None` once a rotation dropped unreadable content.
    #[serde(default)]
    pub content: Option<EncryptedField>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Either kind of vault item.
#[derive(Debug, Clone, PartialEq)]
pub enum VaultItem {
    Credential(Credential),
    Note(Note),
}

impl VaultItem {
    pub fn id(&self) -> &str {
        match self {
            Self::Credential(c) => &c.id,
            Self::Note(n) => &n.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Credential(c) => &c.title,
            Self::Note(n) => &n.title,
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Self::Credential(_) => Collection::Passwords,
            Self::Note(_) => Collection::Notes,
        }
    }
}

/// Plaintext input for creating or editing a credential.
#[derive(Debug)]
pub struct CredentialInput {
    pub title: String,
    pub username: String,
    pub password: SecretString,
    pub url: Option<String>,
    pub website: Option<String>,
    pub category: Option<String>,
    pub notes: Option<SecretString>,
}

/// Plaintext input for creating or editing a note.
#[derive(Debug)]
pub struct NoteInput {
    pub title: String,
    pub content: SecretString,
    pub category: Option<String>,
}

pub(crate) fn from_document<T: DeserializeOwned>(doc: &Document) -> Result<T, SafepassError> {
    serde_json::from_value(Value::Object(doc.fields.clone())).map_err(|e| {
        SafepassError::storage(format!("malformed item {}: {e}", doc.id))
    })
}

pub(crate) fn to_fields<T: Serialize>(item: &T) -> Result<Fields, SafepassError> {
    match serde_json::to_value(item) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(SafepassError::Internal("item did not serialize to an object".into())),
        Err(e) => Err(SafepassError::Internal(format!("failed to serialize item: {e}"))),
    }
}

impl Credential {
    pub fn from_document(doc: &Document) -> Result<Self, SafepassError> {
        let mut credential: Self = from_document(doc)?;
        credential.id = doc.id.clone();
        Ok(credential)
    }
}

impl Note {
    pub fn from_document(doc: &Document) -> Result<Self, SafepassError> {
        let mut note: Self = from_document(doc)?;
        note.id = doc.id.clone();
        Ok(note)
    }
}
