// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key envelope store.
//!
//! Each user has one envelope document (`encryption/key`) holding their
//! derived key wrapped under the application secret, so a session can recover
//! the key without asking for the master password again:
//!
//! ```json
//! {
//!   "encryptedKey": "sp1$aes-256-gcm$...",
//!   "salt": "<hex>",
//!   "updatedAt": "2026-01-01T00:00:00Z",
//!   "pending": { "encryptedKey": "...", "salt": "<hex>" },
//!   "previous": [{ "encryptedKey": "..." }]
//! }
//! ```
//!
//! `pending` is staged by an in-flight rotation. `previous` holds every older
//! key that an item left behind by a rotation is still encrypted under. Both
//! are optional, and a single `previous` object is read as a one-entry list.

use std::sync::Arc;

use chrono::Utc;
use safepass_config::{SafepassConfig, SaltMode};
use safepass_core::{Collection, DocumentStore, Fields, SafepassError, UserId};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cipher;
use crate::kdf::{self, DerivedKey, KdfParams, Salt, KEY_LEN};
use crate::retry::RetryPolicy;
use crate::secret::AppSecret;
use crate::session::Session;

/// Document id of the envelope inside the `encryption` collection.
pub const ENVELOPE_ID: &str = "key";

const ENCRYPTED_KEY: &str = "encryptedKey";
const SALT: &str = "salt";
const UPDATED_AT: &str = "updatedAt";
const PENDING: &str = "pending";
const PREVIOUS: &str = "previous";

/// A key wrapped under the application secret, with the salt it was derived with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKey {
    pub encrypted_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

impl WrappedKey {
    fn into_value(self) -> Value {
        let mut map = Fields::new();
        map.insert(ENCRYPTED_KEY.into(), Value::String(self.encrypted_key));
        if let Some(salt) = self.salt {
            map.insert(SALT.into(), Value::String(salt));
        }
        Value::Object(map)
    }
}

/// The envelope document as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeRecord {
    #[serde(default)]
    pub encrypted_key: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub pending: Option<WrappedKey>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub previous: Vec<WrappedKey>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<WrappedKey>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(WrappedKey),
        Many(Vec<WrappedKey>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(key)) => vec![key],
        Some(OneOrMany::Many(keys)) => keys,
    })
}

impl EnvelopeRecord {
    fn from_fields(fields: Fields) -> Result<Self, SafepassError> {
        serde_json::from_value(Value::Object(fields))
            .map_err(|e| SafepassError::Decryption(format!("malformed key envelope: {e}")))
    }

    /// Salt of the current key. Records without one predate per-user salts.
    pub fn salt(&self) -> Result<Salt, SafepassError> {
        parse_salt(self.salt.as_deref())
    }
}

fn parse_salt(salt: Option<&str>) -> Result<Salt, SafepassError> {
    match salt {
        Some(hex) => Salt::from_hex(hex),
        None => Ok(Salt::fixed()),
    }
}

/// Wraps, persists, and recovers per-user derived keys.
pub struct EnvelopeStore {
    store: Arc<dyn DocumentStore>,
    secret: AppSecret,
    params: KdfParams,
    salt_mode: SaltMode,
    retry: RetryPolicy,
}

impl std::fmt::Debug for EnvelopeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeStore")
            .field("params", &self.params)
            .field("salt_mode", &self.salt_mode)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl EnvelopeStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        secret: AppSecret,
        params: KdfParams,
        salt_mode: SaltMode,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            secret,
            params,
            salt_mode,
            retry,
        }
    }

    /// Build from the `[kdf]` and `[envelope]` config sections.
    pub fn from_config(
        store: Arc<dyn DocumentStore>,
        secret: AppSecret,
        config: &SafepassConfig,
    ) -> Self {
        Self::new(
            store,
            secret,
            KdfParams::from(&config.kdf),
            config.kdf.salt_mode,
            RetryPolicy::from(&config.envelope),
        )
    }

    pub fn document_store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Derive a key with a new salt chosen per the configured salt mode.
    pub fn derive_fresh(&self, password: &SecretString) -> Result<(DerivedKey, Salt), SafepassError> {
        let salt = match self.salt_mode {
            SaltMode::PerUser => Salt::generate()?,
            SaltMode::Fixed => Salt::fixed(),
        };
        let key = self.derive_with(password, &salt)?;
        Ok((key, salt))
    }

    pub fn derive_with(&self, password: &SecretString, salt: &Salt) -> Result<DerivedKey, SafepassError> {
        kdf::derive_key(password, salt, &self.params)
    }

    fn wrap(&self, key: &DerivedKey) -> Result<String, SafepassError> {
        cipher::seal_to_string(self.secret.expose(), key.expose())
    }

    fn unwrap(&self, encrypted_key: &str) -> Result<DerivedKey, SafepassError> {
        let bytes = cipher::open_from_string(self.secret.expose(), encrypted_key)?;
        let bytes: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            SafepassError::Decryption(format!("wrapped key is not {KEY_LEN} bytes"))
        })?;
        Ok(DerivedKey::from_bytes(bytes))
    }

    /// Unwrap a staged or previous key together with its salt.
    pub fn unwrap_wrapped(&self, wrapped: &WrappedKey) -> Result<(DerivedKey, Salt), SafepassError> {
        let key = self.unwrap(&wrapped.encrypted_key)?;
        let salt = parse_salt(wrapped.salt.as_deref())?;
        Ok((key, salt))
    }

    /// Read the envelope once, without retry or cache.
    pub async fn read_record(&self, user: &UserId) -> Result<Option<EnvelopeRecord>, SafepassError> {
        match self
            .store
            .get_document(user, Collection::Encryption, ENVELOPE_ID)
            .await?
        {
            Some(doc) => EnvelopeRecord::from_fields(doc.fields).map(Some),
            None => Ok(None),
        }
    }

    async fn write(&self, user: &UserId, fields: Fields) -> Result<(), SafepassError> {
        self.store
            .set_document(user, Collection::Encryption, ENVELOPE_ID, fields, true)
            .await
            .map_err(|e| SafepassError::EnvelopeWrite {
                user_id: user.to_string(),
                source: Box::new(e),
            })
    }

    fn current_key_fields(&self, key: &DerivedKey, salt: &Salt) -> Result<Fields, SafepassError> {
        let mut fields = Fields::new();
        fields.insert(ENCRYPTED_KEY.into(), Value::String(self.wrap(key)?));
        fields.insert(SALT.into(), Value::String(salt.to_hex()));
        fields.insert(UPDATED_AT.into(), Value::String(Utc::now().to_rfc3339()));
        Ok(fields)
    }

    /// Wrap `key` and upsert it as the user's envelope, then cache it.
    pub async fn store(
        &self,
        session: &Session,
        key: DerivedKey,
        salt: &Salt,
    ) -> Result<Arc<DerivedKey>, SafepassError> {
        let user = session.user_id();
        let fields = self.current_key_fields(&key, salt)?;
        self.write(user, fields).await?;
        info!(user = %user, key_id = %key.key_id(), "key envelope stored");
        Ok(session.keys().install(key))
    }

    /// Stage the key of an in-flight rotation without touching the current key.
    pub async fn stage_pending(
        &self,
        session: &Session,
        key: &DerivedKey,
        salt: &Salt,
    ) -> Result<(), SafepassError> {
        let user = session.user_id();
        let pending = WrappedKey {
            encrypted_key: self.wrap(key)?,
            salt: Some(salt.to_hex()),
        };
        let mut fields = Fields::new();
        fields.insert(PENDING.into(), pending.into_value());
        self.write(user, fields).await?;
        debug!(user = %user, key_id = %key.key_id(), "rotation key staged");
        Ok(())
    }

    /// Finish a rotation: install `key` as current and drop the staged key.
    ///
    /// `previous` replaces the stored list of older keys. Pass the keys that
    /// items left behind still need; an empty slice clears the list. The new
    /// key itself is never recorded as previous.
    pub async fn replace(
        &self,
        session: &Session,
        key: DerivedKey,
        salt: &Salt,
        previous: &[Arc<DerivedKey>],
    ) -> Result<Arc<DerivedKey>, SafepassError> {
        let user = session.user_id();
        let mut fields = self.current_key_fields(&key, salt)?;
        fields.insert(PENDING.into(), Value::Null);

        let mut kept = Vec::with_capacity(previous.len());
        for old in previous.iter().filter(|old| ***old != key) {
            let wrapped = WrappedKey {
                encrypted_key: self.wrap(old)?,
                salt: None,
            };
            kept.push(wrapped.into_value());
        }
        let kept_count = kept.len();
        let previous = if kept.is_empty() {
            Value::Null
        } else {
            Value::Array(kept)
        };
        fields.insert(PREVIOUS.into(), previous);

        self.write(user, fields).await?;
        info!(user = %user, key_id = %key.key_id(), previous_keys = kept_count, "key envelope replaced");
        Ok(session.keys().install(key))
    }

    /// Unwrap every readable key in `previous`. Unreadable entries are skipped.
    pub fn unwrap_previous(&self, record: &EnvelopeRecord) -> Vec<DerivedKey> {
        record
            .previous
            .iter()
            .filter_map(|wrapped| match self.unwrap_wrapped(wrapped) {
                Ok((key, _)) => Some(key),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable previous key");
                    None
                }
            })
            .collect()
    }

    /// Resolve the session key.
    ///
    /// Returns the cached key if there is one. Otherwise reads the envelope:
    /// a missing envelope with a `password` bootstraps a new one, a missing
    /// envelope without one is retried and then reported as `Ok(None)`, and
    /// an unreadable envelope is retried and then reported as
    /// [`SafepassError::Retrieve`].
    pub async fn retrieve(
        &self,
        session: &Session,
        password: Option<&SecretString>,
    ) -> Result<Option<Arc<DerivedKey>>, SafepassError> {
        if let Some(key) = session.keys().get() {
            debug!(user = %session.user_id(), "session key cache hit");
            return Ok(Some(key));
        }

        let user = session.user_id();
        let mut reason = String::from("envelope unreadable");

        for attempt in self.retry.attempts() {
            let last = self.retry.is_last(attempt);
            match self.read_record(user).await {
                Err(e) => {
                    warn!(user = %user, attempt, error = %e, "key envelope read failed");
                    reason = e.to_string();
                }
                Ok(Some(EnvelopeRecord {
                    encrypted_key: Some(encrypted_key),
                    ..
                })) => match self.unwrap(&encrypted_key) {
                    Ok(key) => {
                        debug!(user = %user, attempt, key_id = %key.key_id(), "key envelope unwrapped");
                        return Ok(Some(session.keys().install(key)));
                    }
                    Err(e) => {
                        warn!(user = %user, attempt, error = %e, "key envelope unwrap failed");
                        reason = e.to_string();
                    }
                },
                Ok(_) => {
                    if let Some(password) = password {
                        let (key, salt) = self.derive_fresh(password)?;
                        info!(user = %user, "no key envelope, creating one");
                        return self.store(session, key, &salt).await.map(Some);
                    }
                    if last {
                        info!(user = %user, attempts = attempt, "no key envelope found");
                        return Ok(None);
                    }
                    debug!(user = %user, attempt, "key envelope missing, retrying");
                }
            }

            if !last {
                self.retry.pause().await;
            }
        }

        Err(SafepassError::Retrieve {
            user_id: user.to_string(),
            attempts: self.retry.max_attempts.max(1),
            reason,
        })
    }

    /// Resolve the session key without a password.
    pub async fn require_key(&self, session: &Session) -> Result<Arc<DerivedKey>, SafepassError> {
        self.retrieve(session, None)
            .await?
            .ok_or_else(|| SafepassError::KeyUnavailable {
                user_id: session.user_id().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::kdf::TEST_PARAMS;
    use safepass_test_utils::MemoryDocumentStore;
    use serde_json::json;

    fn pw(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    fn envelope_with(store: &MemoryDocumentStore, mode: SaltMode, secret: [u8; 32]) -> EnvelopeStore {
        EnvelopeStore::new(
            Arc::new(store.clone()),
            AppSecret::from_bytes(secret),
            TEST_PARAMS,
            mode,
            RetryPolicy::default(),
        )
    }

    fn envelope(store: &MemoryDocumentStore, mode: SaltMode) -> EnvelopeStore {
        envelope_with(store, mode, [9; 32])
    }

    fn session() -> Session {
        Session::new(UserId::from("alice"))
    }

    #[tokio::test]
    async fn bootstrap_with_fixed_salt_returns_derived_key() {
        let store = MemoryDocumentStore::new();
        let envelope = envelope(&store, SaltMode::Fixed);
        let session = session();

        let key = envelope.retrieve(&session, Some(&pw("master"))).await.unwrap().unwrap();

        let expected = kdf::derive_key(&pw("master"), &Salt::fixed(), &TEST_PARAMS).unwrap();
        assert_eq!(*key, expected);
        assert!(session.keys().is_set());
        let record = envelope.read_record(session.user_id()).await.unwrap().unwrap();
        assert!(record.encrypted_key.is_some());
        assert!(record.updated_at.is_some());
    }

    #[tokio::test]
    async fn bootstrap_with_per_user_salt_persists_the_salt() {
        let store = MemoryDocumentStore::new();
        let envelope = envelope(&store, SaltMode::PerUser);
        let session = session();

        let key = envelope.retrieve(&session, Some(&pw("master"))).await.unwrap().unwrap();

        let record = envelope.read_record(session.user_id()).await.unwrap().unwrap();
        let salt = record.salt().unwrap();
        assert!(!salt.is_fixed());
        assert_eq!(*key, envelope.derive_with(&pw("master"), &salt).unwrap());
    }

    #[tokio::test]
    async fn stored_key_wins_over_password_derivation() {
        let store = MemoryDocumentStore::new();
        let envelope = envelope(&store, SaltMode::Fixed);
        let original = envelope
            .retrieve(&session(), Some(&pw("first")))
            .await
            .unwrap()
            .unwrap();

        let fresh = session();
        let key = envelope.retrieve(&fresh, Some(&pw("second"))).await.unwrap().unwrap();
        assert_eq!(*key, *original);
    }

    #[tokio::test]
    async fn cached_key_skips_the_store() {
        let store = MemoryDocumentStore::new();
        let envelope = envelope(&store, SaltMode::Fixed);
        let session = session();
        envelope.retrieve(&session, Some(&pw("master"))).await.unwrap();
        let reads = store.read_count();

        assert!(envelope.retrieve(&session, None).await.unwrap().is_some());
        assert_eq!(store.read_count(), reads);
    }

    #[tokio::test]
    async fn key_recovered_without_password_in_new_session() {
        let store = MemoryDocumentStore::new();
        let envelope = envelope(&store, SaltMode::PerUser);
        let original = envelope
            .retrieve(&session(), Some(&pw("master")))
            .await
            .unwrap()
            .unwrap();

        let key = envelope.require_key(&session()).await.unwrap();
        assert_eq!(*key, *original);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_envelope_is_read_exactly_three_times() {
        let store = MemoryDocumentStore::new();
        let envelope = envelope(&store, SaltMode::PerUser);
        let start = tokio::time::Instant::now();

        let result = envelope.retrieve(&session(), None).await.unwrap();

        assert!(result.is_none());
        assert_eq!(store.read_count(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_read_failure_is_a_retrieve_error_after_three_attempts() {
        let store = MemoryDocumentStore::new();
        store.fail_next_reads(100).await;
        let envelope = envelope(&store, SaltMode::PerUser);

        let err = envelope.retrieve(&session(), None).await.unwrap_err();

        assert!(matches!(err, SafepassError::Retrieve { attempts: 3, .. }));
        assert!(err.requires_reauthentication());
        assert_eq!(store.read_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_read_failure_recovers() {
        let store = MemoryDocumentStore::new();
        let envelope = envelope(&store, SaltMode::Fixed);
        envelope.retrieve(&session(), Some(&pw("master"))).await.unwrap();

        store.fail_next_reads(2).await;
        let before = store.read_count();
        let key = envelope.retrieve(&session(), None).await.unwrap();

        assert!(key.is_some());
        assert_eq!(store.read_count() - before, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupted_envelope_is_a_retrieve_error_not_none() {
        let store = MemoryDocumentStore::new();
        let user = UserId::from("alice");
        store
            .insert_raw(
                &user,
                Collection::Encryption,
                ENVELOPE_ID,
                json!({"encryptedKey": "garbage"}).as_object().cloned().unwrap(),
            )
            .await;
        let envelope = envelope(&store, SaltMode::Fixed);

        let err = envelope.retrieve(&session(), Some(&pw("master"))).await.unwrap_err();

        assert!(matches!(err, SafepassError::Retrieve { attempts: 3, .. }));
        assert_eq!(store.read_count(), 3);
        // The unreadable envelope is not overwritten by a bootstrap.
        let doc = store.snapshot(&user, Collection::Encryption, ENVELOPE_ID).await.unwrap();
        assert_eq!(doc.str_field("encryptedKey"), Some("garbage"));
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_application_secret_cannot_unwrap() {
        let store = MemoryDocumentStore::new();
        envelope_with(&store, SaltMode::Fixed, [1; 32])
            .retrieve(&session(), Some(&pw("master")))
            .await
            .unwrap();

        let err = envelope_with(&store, SaltMode::Fixed, [2; 32])
            .retrieve(&session(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SafepassError::Retrieve { .. }));
    }

    #[tokio::test]
    async fn envelope_write_failure_surfaces_on_bootstrap() {
        let store = MemoryDocumentStore::new();
        store.fail_envelope_writes(true).await;
        let envelope = envelope(&store, SaltMode::Fixed);
        let session = session();

        let err = envelope.retrieve(&session, Some(&pw("master"))).await.unwrap_err();

        assert!(matches!(err, SafepassError::EnvelopeWrite { .. }));
        assert!(!session.keys().is_set());
    }

    #[tokio::test(start_paused = true)]
    async fn require_key_without_envelope_is_key_unavailable() {
        let store = MemoryDocumentStore::new();
        let envelope = envelope(&store, SaltMode::Fixed);

        let err = envelope.require_key(&session()).await.unwrap_err();
        assert!(matches!(err, SafepassError::KeyUnavailable { .. }));
    }

    #[tokio::test]
    async fn legacy_record_without_salt_uses_fixed_salt() {
        let record = EnvelopeRecord {
            encrypted_key: Some("x".into()),
            ..Default::default()
        };
        assert!(record.salt().unwrap().is_fixed());
    }

    #[tokio::test]
    async fn stage_then_replace_clears_pending_and_records_previous() {
        let store = MemoryDocumentStore::new();
        let envelope = envelope(&store, SaltMode::PerUser);
        let session = session();
        let old = envelope.retrieve(&session, Some(&pw("old"))).await.unwrap().unwrap();

        let before = envelope.read_record(session.user_id()).await.unwrap().unwrap();

        let (new_key, salt) = envelope.derive_fresh(&pw("new")).unwrap();
        envelope.stage_pending(&session, &new_key, &salt).await.unwrap();
        let staged = envelope.read_record(session.user_id()).await.unwrap().unwrap();
        let (pending_key, pending_salt) =
            envelope.unwrap_wrapped(staged.pending.as_ref().unwrap()).unwrap();
        assert_eq!(pending_key, new_key);
        assert_eq!(pending_salt, salt);
        // Staging leaves the current key in place.
        assert_eq!(staged.encrypted_key, before.encrypted_key);
        assert_eq!(staged.salt, before.salt);

        envelope
            .replace(&session, new_key.clone(), &salt, &[Arc::clone(&old)])
            .await
            .unwrap();
        let record = envelope.read_record(session.user_id()).await.unwrap().unwrap();
        assert!(record.pending.is_none());
        assert_eq!(envelope.unwrap_previous(&record), vec![(*old).clone()]);
        assert_eq!(*session.keys().get().unwrap(), new_key);

        envelope.replace(&session, new_key, &salt, &[]).await.unwrap();
        let record = envelope.read_record(session.user_id()).await.unwrap().unwrap();
        assert!(record.previous.is_empty());
    }

    #[tokio::test]
    async fn replace_never_records_the_new_key_as_previous() {
        let store = MemoryDocumentStore::new();
        let envelope = envelope(&store, SaltMode::PerUser);
        let session = session();
        let old = envelope.retrieve(&session, Some(&pw("old"))).await.unwrap().unwrap();
        let (new_key, salt) = envelope.derive_fresh(&pw("new")).unwrap();

        envelope
            .replace(
                &session,
                new_key.clone(),
                &salt,
                &[Arc::new(new_key.clone()), Arc::clone(&old)],
            )
            .await
            .unwrap();

        let record = envelope.read_record(session.user_id()).await.unwrap().unwrap();
        assert_eq!(envelope.unwrap_previous(&record), vec![(*old).clone()]);
    }

    #[tokio::test]
    async fn single_previous_object_reads_as_one_entry() {
        let store = MemoryDocumentStore::new();
        let envelope = envelope(&store, SaltMode::Fixed);
        let session = session();
        let old = envelope.retrieve(&session, Some(&pw("old"))).await.unwrap().unwrap();
        let wrapped = envelope.read_record(session.user_id()).await.unwrap().unwrap().encrypted_key;
        store
            .insert_raw(
                session.user_id(),
                Collection::Encryption,
                ENVELOPE_ID,
                json!({"encryptedKey": wrapped, "previous": {"encryptedKey": wrapped}})
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .await;

        let record = envelope.read_record(session.user_id()).await.unwrap().unwrap();
        assert_eq!(record.previous.len(), 1);
        assert_eq!(envelope.unwrap_previous(&record), vec![(*old).clone()]);
    }
}
