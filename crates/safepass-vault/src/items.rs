// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credential and note CRUD with field encryption under the session key.

use std::sync::Arc;

use chrono::Utc;
use safepass_core::{Collection, DocumentStore, SafepassError};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::cipher::{decrypt_field, encrypt_field};
use crate::envelope::EnvelopeStore;
use crate::kdf::DerivedKey;
use crate::model::{
    to_fields, Credential, CredentialInput, EncryptedField, Note, NoteInput, VaultItem,
    CREATED_AT_FIELD,
};
use crate::session::Session;

/// Item operations for one session.
pub struct ItemService<'a> {
    envelope: &'a EnvelopeStore,
    session: &'a Session,
}

fn require_title(title: &str) -> Result<(), SafepassError> {
    if title.trim().is_empty() {
        return Err(SafepassError::InvalidInput("title must not be empty".to_string()));
    }
    Ok(())
}

fn encrypt(secret: &SecretString, key: &DerivedKey) -> Result<EncryptedField, SafepassError> {
    encrypt_field(secret.expose_secret(), key).map(EncryptedField::new)
}

fn decrypt(field: &EncryptedField, key: &DerivedKey) -> Result<SecretString, SafepassError> {
    decrypt_field(field.as_str(), key).map(SecretString::from)
}

fn contains(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

impl<'a> ItemService<'a> {
    pub fn new(envelope: &'a EnvelopeStore, session: &'a Session) -> Self {
        Self { envelope, session }
    }

    fn store(&self) -> &Arc<dyn DocumentStore> {
        self.envelope.document_store()
    }

    async fn key(&self) -> Result<Arc<DerivedKey>, SafepassError> {
        self.envelope.require_key(self.session).await
    }

    fn not_found(collection: Collection, id: &str) -> SafepassError {
        SafepassError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    fn build_credential(
        input: &CredentialInput,
        key: &DerivedKey,
    ) -> Result<Credential, SafepassError> {
        require_title(&input.title)?;
        let now = Utc::now();
        Ok(Credential {
            id: String::new(),
            title: input.title.clone(),
            username: input.username.clone(),
            password: encrypt(&input.password, key)?,
            url: input.url.clone(),
            website: input.website.clone(),
            category: input.category.clone(),
            notes: input
                .notes
                .as_ref()
                .map(|notes| encrypt(notes, key))
                .transpose()?,
            key_id: Some(key.key_id()),
            created_at: Some(now),
            updated_at: Some(now),
        })
    }

    fn build_note(input: &NoteInput, key: &DerivedKey) -> Result<Note, SafepassError> {
        require_title(&input.title)?;
        let now = Utc::now();
        Ok(Note {
            id: String::new(),
            title: input.title.clone(),
            content: Some(encrypt(&input.content, key)?),
            category: input.category.clone(),
            key_id: Some(key.key_id()),
            created_at: Some(now),
            updated_at: Some(now),
        })
    }

    pub async fn add_credential(&self, input: &CredentialInput) -> Result<Credential, SafepassError> {
        let key = self.key().await?;
        let mut credential = Self::build_credential(input, &key)?;
        credential.id = self
            .store()
            .add_document(self.session.user_id(), Collection::Passwords, to_fields(&credential)?)
            .await?;
        debug!(user = %self.session.user_id(), item = %credential.id, "credential added");
        Ok(credential)
    }

    pub async fn add_note(&self, input: &NoteInput) -> Result<Note, SafepassError> {
        let key = self.key().await?;
        let mut note = Self::build_note(input, &key)?;
        note.id = self
            .store()
            .add_document(self.session.user_id(), Collection::Notes, to_fields(&note)?)
            .await?;
        debug!(user = %self.session.user_id(), item = %note.id, "note added");
        Ok(note)
    }

    pub async fn list_credentials(&self) -> Result<Vec<Credential>, SafepassError> {
        self.store()
            .list_documents(self.session.user_id(), Collection::Passwords)
            .await?
            .iter()
            .map(Credential::from_document)
            .collect()
    }

    pub async fn list_notes(&self) -> Result<Vec<Note>, SafepassError> {
        self.store()
            .list_documents(self.session.user_id(), Collection::Notes)
            .await?
            .iter()
            .map(Note::from_document)
            .collect()
    }

    pub async fn get_credential(&self, id: &str) -> Result<Credential, SafepassError> {
        let doc = self
            .store()
            .get_document(self.session.user_id(), Collection::Passwords, id)
            .await?
            .ok_or_else(|| Self::not_found(Collection::Passwords, id))?;
        Credential::from_document(&doc)
    }

    pub async fn get_note(&self, id: &str) -> Result<Note, SafepassError> {
        let doc = self
            .store()
            .get_document(self.session.user_id(), Collection::Notes, id)
            .await?
            .ok_or_else(|| Self::not_found(Collection::Notes, id))?;
        Note::from_document(&doc)
    }

    /// Replace every editable field of a credential. `createdAt` is kept.
    pub async fn update_credential(
        &self,
        id: &str,
        input: &CredentialInput,
    ) -> Result<Credential, SafepassError> {
        let key = self.key().await?;
        let mut patch = to_fields(&Self::build_credential(input, &key)?)?;
        patch.remove(CREATED_AT_FIELD);
        self.store()
            .update_document(self.session.user_id(), Collection::Passwords, id, patch)
            .await?;
        debug!(user = %self.session.user_id(), item = id, "credential updated");
        self.get_credential(id).await
    }

    /// Replace every editable field of a note. `createdAt` is kept.
    pub async fn update_note(&self, id: &str, input: &NoteInput) -> Result<Note, SafepassError> {
        let key = self.key().await?;
        let mut patch = to_fields(&Self::build_note(input, &key)?)?;
        patch.remove(CREATED_AT_FIELD);
        self.store()
            .update_document(self.session.user_id(), Collection::Notes, id, patch)
            .await?;
        debug!(user = %self.session.user_id(), item = id, "note updated");
        self.get_note(id).await
    }

    pub async fn delete_credential(&self, id: &str) -> Result<bool, SafepassError> {
        self.store()
            .delete_document(self.session.user_id(), Collection::Passwords, id)
            .await
    }

    pub async fn delete_note(&self, id: &str) -> Result<bool, SafepassError> {
        self.store()
            .delete_document(self.session.user_id(), Collection::Notes, id)
            .await
    }

    pub async fn reveal_password(&self, credential: &Credential) -> Result<SecretString, SafepassError> {
        let key = self.key().await?;
        decrypt(&credential.password, &key)
    }

    pub async fn reveal_notes(
        &self,
        credential: &Credential,
    ) -> Result<Option<SecretString>, SafepassError> {
        let key = self.key().await?;
        credential.notes.as_ref().map(|n| decrypt(n, &key)).transpose()
    }

    pub async fn reveal_content(&self, note: &Note) -> Result<Option<SecretString>, SafepassError> {
        let key = self.key().await?;
        note.content.as_ref().map(|c| decrypt(c, &key)).transpose()
    }

    /// Case-insensitive search over plaintext metadata. Encrypted fields are
    /// never searched. A blank query returns every item.
    pub async fn search(&self, query: &str) -> Result<Vec<VaultItem>, SafepassError> {
        let needle = query.trim().to_lowercase();
        let mut items = Vec::new();

        for credential in self.list_credentials().await? {
            let hit = needle.is_empty()
                || contains(Some(credential.title.as_str()), &needle)
                || contains(Some(credential.username.as_str()), &needle)
                || contains(credential.website.as_deref(), &needle)
                || contains(credential.url.as_deref(), &needle)
                || contains(credential.category.as_deref(), &needle);
            if hit {
                items.push(VaultItem::Credential(credential));
            }
        }

        for note in self.list_notes().await? {
            let hit = needle.is_empty()
                || contains(Some(note.title.as_str()), &needle)
                || contains(note.category.as_deref(), &needle);
            if hit {
                items.push(VaultItem::Note(note));
            }
        }

        Ok(items)
    }
}
