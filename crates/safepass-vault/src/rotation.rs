// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key rotation after a master-password change.
//!
//! Rotation re-encrypts every vault item under a key derived from the new
//! password, then replaces the envelope. It is not atomic across items, so
//! it is built to be re-run:
//!
//! - The new key is staged in the envelope before any item is touched, and a
//!   re-run with the same password picks it up again.
//! - Items already stamped with the new key id are skipped.
//! - A field that no old key can open but the new key can is left alone.
//! - Every older key that an item left behind still needs is kept in the
//!   envelope's `previous` list, so a later run can still open it.
//!
//! Each item moves through [`ItemState`] and every transition is logged.

use std::sync::Arc;

use safepass_config::DegradePolicy;
use safepass_core::{Collection, Document, Fields, SafepassError, UserId};
use secrecy::SecretString;
use serde_json::Value;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cipher::{decrypt_field, encrypt_field};
use crate::envelope::{EnvelopeRecord, EnvelopeStore};
use crate::kdf::{DerivedKey, Salt};
use crate::model::{encrypted_fields, FieldRole, KEY_ID_FIELD};
use crate::session::Session;

/// Where one item is in its rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    /// Every encrypted field is now under the new key.
    Reencrypted,
    /// Already stamped with the new key id; nothing written.
    AlreadyRotated,
    /// Written, but the listed fields were unreadable and were left stale
    /// (primary) or dropped (secondary).
    Degraded { fields: Vec<String> },
    /// Not written.
    Failed { reason: String },
}

impl ItemState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reencrypted => "reencrypted",
            Self::AlreadyRotated => "already_rotated",
            Self::Degraded { .. } => "degraded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Final state of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub collection: Collection,
    pub id: String,
    pub state: ItemState,
}

/// Summary of a rotation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    /// Id of the key now in the envelope.
    pub new_key_id: String,
    /// No key existed, so the new password only created the envelope.
    pub bootstrapped: bool,
    /// A key staged by an earlier, interrupted run was reused.
    pub resumed: bool,
    pub items: Vec<ItemOutcome>,
}

impl RotationReport {
    fn ids_where(&self, pred: impl Fn(&ItemState) -> bool) -> Vec<String> {
        self.items
            .iter()
            .filter(|o| pred(&o.state))
            .map(|o| o.id.clone())
            .collect()
    }

    pub fn reencrypted(&self) -> usize {
        self.items
            .iter()
            .filter(|o| o.state == ItemState::Reencrypted)
            .count()
    }

    pub fn already_rotated(&self) -> usize {
        self.items
            .iter()
            .filter(|o| o.state == ItemState::AlreadyRotated)
            .count()
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.ids_where(|s| matches!(s, ItemState::Failed { .. }))
    }

    pub fn degraded_ids(&self) -> Vec<String> {
        self.ids_where(|s| matches!(s, ItemState::Degraded { .. }))
    }

    pub fn is_clean(&self) -> bool {
        self.failed_ids().is_empty() && self.degraded_ids().is_empty()
    }
}

/// Keys resolved before any item is touched.
struct KeyPlan {
    new_key: DerivedKey,
    new_salt: Salt,
    new_key_id: String,
    /// Keys an item may still be encrypted under, most likely first. Never
    /// contains the new key.
    old_keys: Vec<Arc<DerivedKey>>,
    stage: bool,
    resumed: bool,
}

enum FieldOutcome {
    /// Opened by `old_keys[opened_by]` and sealed under the new key.
    Reencrypted { ciphertext: String, opened_by: usize },
    AlreadyCurrent,
}

/// Result of one item: its state, plus the indexes into `old_keys` of the
/// keys its stored fields still need when it was not written.
struct ItemRun {
    state: ItemState,
    needs: Vec<usize>,
}

/// Drives a rotation for one session.
pub struct KeyRotationCoordinator<'a> {
    envelope: &'a EnvelopeStore,
    policy: DegradePolicy,
}

impl<'a> KeyRotationCoordinator<'a> {
    pub fn new(envelope: &'a EnvelopeStore, policy: DegradePolicy) -> Self {
        Self { envelope, policy }
    }

    /// Re-encrypt every vault item of the session's user under a key derived
    /// from `new_password` and replace the envelope.
    ///
    /// Without a resolvable current key this only bootstraps the envelope.
    /// If any item failed or was degraded the envelope is still replaced and
    /// [`SafepassError::RotationPartialFailure`] is returned.
    pub async fn rotate(
        &self,
        session: &Session,
        new_password: &SecretString,
    ) -> Result<RotationReport, SafepassError> {
        let user = session.user_id();

        let Some(old_key) = self.envelope.retrieve(session, None).await? else {
            let (key, salt) = self.envelope.derive_fresh(new_password)?;
            let key = self.envelope.store(session, key, &salt).await?;
            info!(user = %user, key_id = %key.key_id(), "no current key, envelope bootstrapped from new password");
            return Ok(RotationReport {
                new_key_id: key.key_id(),
                bootstrapped: true,
                ..RotationReport::default()
            });
        };

        let record = self.envelope.read_record(user).await?.unwrap_or_default();
        let plan = self.plan_keys(&record, old_key, new_password)?;
        if plan.stage {
            self.envelope
                .stage_pending(session, &plan.new_key, &plan.new_salt)
                .await?;
        }
        info!(
            user = %user,
            key_id = %plan.new_key_id,
            resumed = plan.resumed,
            candidates = plan.old_keys.len(),
            "key rotation started"
        );

        let mut report = RotationReport {
            new_key_id: plan.new_key_id.clone(),
            resumed: plan.resumed,
            ..RotationReport::default()
        };
        let mut needed = vec![false; plan.old_keys.len()];

        for collection in Collection::ITEMS {
            let documents = self
                .envelope
                .document_store()
                .list_documents(user, collection)
                .await?;
            debug!(user = %user, %collection, count = documents.len(), "rotating collection");

            for doc in documents {
                debug!(user = %user, %collection, item = %doc.id, to = ItemState::Pending.label(), "rotation item state");
                let ItemRun { state, needs } = self.rotate_item(user, collection, &doc, &plan).await;
                match &state {
                    ItemState::Failed { reason } => {
                        warn!(user = %user, %collection, item = %doc.id, to = state.label(), reason = %reason, "rotation item state");
                    }
                    ItemState::Degraded { fields } => {
                        warn!(user = %user, %collection, item = %doc.id, to = state.label(), fields = ?fields, "rotation item state");
                    }
                    _ => {
                        info!(user = %user, %collection, item = %doc.id, to = state.label(), "rotation item state");
                    }
                }
                for index in needs {
                    needed[index] = true;
                }
                report.items.push(ItemOutcome {
                    collection,
                    id: doc.id,
                    state,
                });
            }
        }

        let previous: Vec<Arc<DerivedKey>> = plan
            .old_keys
            .iter()
            .zip(&needed)
            .filter(|(_, needed)| **needed)
            .map(|(key, _)| Arc::clone(key))
            .collect();
        self.envelope
            .replace(session, plan.new_key.clone(), &plan.new_salt, &previous)
            .await?;

        let failed = report.failed_ids();
        let degraded = report.degraded_ids();
        if failed.is_empty() && degraded.is_empty() {
            info!(
                user = %user,
                reencrypted = report.reencrypted(),
                already_rotated = report.already_rotated(),
                "key rotation complete"
            );
            Ok(report)
        } else {
            warn!(
                user = %user,
                failed = failed.len(),
                degraded = degraded.len(),
                previous_keys = previous.len(),
                "key rotation incomplete"
            );
            Err(SafepassError::RotationPartialFailure { failed, degraded })
        }
    }

    fn plan_keys(
        &self,
        record: &EnvelopeRecord,
        old_key: Arc<DerivedKey>,
        new_password: &SecretString,
    ) -> Result<KeyPlan, SafepassError> {
        let mut old_keys = vec![Arc::clone(&old_key)];
        let mut add_candidate = |key: DerivedKey| {
            if !old_keys.iter().any(|k| **k == key) {
                old_keys.push(Arc::new(key));
            }
        };

        for key in self.envelope.unwrap_previous(record) {
            add_candidate(key);
        }

        let mut resumed = None;
        if let Some(pending) = &record.pending {
            match self.envelope.unwrap_wrapped(pending) {
                Ok((staged, salt)) => {
                    if self.envelope.derive_with(new_password, &salt)? == staged {
                        resumed = Some((staged, salt));
                    } else {
                        debug!("staged key belongs to an abandoned rotation");
                        add_candidate(staged);
                    }
                }
                Err(e) => warn!(error = %e, "ignoring unreadable staged key"),
            }
        }

        let plan = |new_key: DerivedKey, new_salt: Salt, mut old_keys: Vec<Arc<DerivedKey>>, stage, resumed| {
            old_keys.retain(|k| **k != new_key);
            KeyPlan {
                new_key_id: new_key.key_id(),
                new_key,
                new_salt,
                old_keys,
                stage,
                resumed,
            }
        };

        if let Some((key, salt)) = resumed {
            return Ok(plan(key, salt, old_keys, false, true));
        }

        let current_salt = record.salt()?;
        let same_password = self.envelope.derive_with(new_password, &current_salt)?;
        if same_password == *old_key {
            debug!("new password derives the current key");
            return Ok(plan(same_password, current_salt, old_keys, false, false));
        }

        let (key, salt) = self.envelope.derive_fresh(new_password)?;
        Ok(plan(key, salt, old_keys, true, false))
    }

    async fn rotate_item(
        &self,
        user: &UserId,
        collection: Collection,
        doc: &Document,
        plan: &KeyPlan,
    ) -> ItemRun {
        if doc.str_field(KEY_ID_FIELD) == Some(plan.new_key_id.as_str()) {
            return ItemRun {
                state: ItemState::AlreadyRotated,
                needs: Vec::new(),
            };
        }

        let mut patch = Fields::new();
        let mut degraded = Vec::new();
        let mut opened_by = Vec::new();
        let mut stale = false;
        let mut refused = None;

        for spec in encrypted_fields(collection) {
            let Some(ciphertext) = doc.str_field(spec.name).filter(|c| !c.is_empty()) else {
                continue;
            };
            match reencrypt_field(ciphertext, plan) {
                Ok(FieldOutcome::Reencrypted { ciphertext, opened_by: index }) => {
                    patch.insert(spec.name.to_string(), Value::String(ciphertext));
                    opened_by.push(index);
                }
                Ok(FieldOutcome::AlreadyCurrent) => {}
                Err(e) => {
                    debug!(item = %doc.id, field = spec.name, error = %e, "field unreadable under every old key");
                    match (self.policy, spec.role) {
                        (DegradePolicy::Strict, _) => {
                            if refused.is_none() {
                                refused = Some(format!("field `{}` could not be decrypted", spec.name));
                            }
                        }
                        (DegradePolicy::Lenient, FieldRole::Primary) => {
                            stale = true;
                            degraded.push(spec.name.to_string());
                        }
                        (DegradePolicy::Lenient, FieldRole::Secondary) => {
                            patch.insert(spec.name.to_string(), Value::Null);
                            degraded.push(spec.name.to_string());
                        }
                    }
                }
            }
        }

        // Nothing is written, so the item keeps needing every key that opened it.
        let failed = |reason: String| ItemRun {
            state: ItemState::Failed { reason },
            needs: opened_by.clone(),
        };

        if let Some(reason) = refused {
            return failed(reason);
        }

        if !stale {
            patch.insert(KEY_ID_FIELD.to_string(), Value::String(plan.new_key_id.clone()));
        }

        if !patch.is_empty()
            && let Err(e) = self
                .envelope
                .document_store()
                .update_document(user, collection, &doc.id, patch)
                .await
        {
            return failed(e.to_string());
        }

        let state = if degraded.is_empty() {
            ItemState::Reencrypted
        } else {
            ItemState::Degraded { fields: degraded }
        };
        ItemRun {
            state,
            needs: Vec::new(),
        }
    }
}

fn reencrypt_field(ciphertext: &str, plan: &KeyPlan) -> Result<FieldOutcome, SafepassError> {
    for (index, key) in plan.old_keys.iter().enumerate() {
        if let Ok(plaintext) = decrypt_field(ciphertext, key) {
            let plaintext = Zeroizing::new(plaintext);
            return encrypt_field(&plaintext, &plan.new_key).map(|ciphertext| {
                FieldOutcome::Reencrypted {
                    ciphertext,
                    opened_by: index,
                }
            });
        }
    }
    if decrypt_field(ciphertext, &plan.new_key).is_ok() {
        return Ok(FieldOutcome::AlreadyCurrent);
    }
    Err(SafepassError::Decryption(
        "no candidate key opens this field".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ENVELOPE_ID;
    use crate::kdf::{derive_key, KEY_LEN, TEST_PARAMS};
    use crate::retry::RetryPolicy;
    use crate::secret::AppSecret;
    use safepass_config::SaltMode;
    use safepass_test_utils::MemoryDocumentStore;
    use serde_json::json;
    use tracing_test::traced_test;

    fn pw(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    struct Fixture {
        store: MemoryDocumentStore,
        envelope: EnvelopeStore,
        session: Session,
        old_key: Arc<DerivedKey>,
    }

    impl Fixture {
        async fn new(mode: SaltMode) -> Self {
            let store = MemoryDocumentStore::new();
            let envelope = EnvelopeStore::new(
                Arc::new(store.clone()),
                AppSecret::from_bytes([5; 32]),
                TEST_PARAMS,
                mode,
                RetryPolicy::default(),
            );
            let session = Session::new(UserId::from("carol"));
            let old_key = envelope
                .retrieve(&session, Some(&pw("oldMasterPw")))
                .await
                .unwrap()
                .unwrap();
            Self {
                store,
                envelope,
                session,
                old_key,
            }
        }

        fn user(&self) -> &UserId {
            self.session.user_id()
        }

        async fn rotate(&self, policy: DegradePolicy, password: &str) -> Result<RotationReport, SafepassError> {
            KeyRotationCoordinator::new(&self.envelope, policy)
                .rotate(&self.session, &pw(password))
                .await
        }

        async fn insert(&self, collection: Collection, id: &str, fields: serde_json::Value) {
            self.store
                .insert_raw(self.user(), collection, id, fields.as_object().cloned().unwrap())
                .await;
        }

        async fn credential(&self, id: &str, password: &str, notes: Option<&str>, key: &DerivedKey) {
            let notes = notes.map(|n| encrypt_field(n, key).unwrap());
            self.insert(
                Collection::Passwords,
                id,
                json!({
                    "title": id,
                    "username": "carol",
                    "password": encrypt_field(password, key).unwrap(),
                    "notes": notes,
                    "keyId": key.key_id(),
                }),
            )
            .await;
        }

        async fn raw(&self, collection: Collection, id: &str) -> Document {
            self.store.snapshot(self.user(), collection, id).await.unwrap()
        }

        async fn record(&self) -> EnvelopeRecord {
            self.envelope.read_record(self.user()).await.unwrap().unwrap()
        }

        async fn previous_keys(&self) -> Vec<DerivedKey> {
            self.envelope.unwrap_previous(&self.record().await)
        }

        /// Decrypt a credential password with the current key or any
        /// previous key the envelope holds.
        async fn open_with_envelope_keys(&self, id: &str) -> Option<String> {
            let doc = self.raw(Collection::Passwords, id).await;
            let ciphertext = doc.str_field("password")?.to_string();
            let current = self.session.keys().get()?;
            std::iter::once((*current).clone())
                .chain(self.previous_keys().await)
                .find_map(|key| decrypt_field(&ciphertext, &key).ok())
        }
    }

    fn unrelated_key() -> DerivedKey {
        DerivedKey::from_bytes([0x55; KEY_LEN])
    }

    #[tokio::test]
    async fn rotation_reencrypts_under_the_new_password_key() {
        let fx = Fixture::new(SaltMode::Fixed).await;
        fx.credential("c1", "s3cr3t", Some("memo"), &fx.old_key).await;

        let report = fx.rotate(DegradePolicy::Lenient, "newMasterPw").await.unwrap();

        let new_key = derive_key(&pw("newMasterPw"), &Salt::fixed(), &TEST_PARAMS).unwrap();
        let doc = fx.raw(Collection::Passwords, "c1").await;
        let password = doc.str_field("password").unwrap();
        assert_eq!(decrypt_field(password, &new_key).unwrap(), "s3cr3t");
        assert!(matches!(
            decrypt_field(password, &fx.old_key),
            Err(SafepassError::Decryption(_))
        ));
        assert_eq!(decrypt_field(doc.str_field("notes").unwrap(), &new_key).unwrap(), "memo");
        assert_eq!(doc.str_field(KEY_ID_FIELD), Some(new_key.key_id().as_str()));

        assert_eq!(report.reencrypted(), 1);
        assert_eq!(report.new_key_id, new_key.key_id());
        assert!(report.is_clean());
        assert_eq!(*fx.session.keys().get().unwrap(), new_key);

        let record = fx.record().await;
        assert!(record.pending.is_none());
        assert!(record.previous.is_empty());
    }

    #[tokio::test]
    async fn per_user_salt_rotation_persists_new_salt() {
        let fx = Fixture::new(SaltMode::PerUser).await;
        let old_salt = fx.record().await.salt().unwrap();
        fx.credential("c1", "s3cr3t", None, &fx.old_key).await;
        fx.insert(
            Collection::Notes,
            "n1",
            json!({"title": "n", "content": encrypt_field("body", &fx.old_key).unwrap()}),
        )
        .await;

        let report = fx.rotate(DegradePolicy::Lenient, "newMasterPw").await.unwrap();
        assert_eq!(report.reencrypted(), 2);

        let salt = fx.record().await.salt().unwrap();
        assert_ne!(salt, old_salt);
        let new_key = fx.envelope.derive_with(&pw("newMasterPw"), &salt).unwrap();
        assert_eq!(*fx.session.keys().get().unwrap(), new_key);

        let note = fx.raw(Collection::Notes, "n1").await;
        assert_eq!(decrypt_field(note.str_field("content").unwrap(), &new_key).unwrap(), "body");
    }

    #[tokio::test]
    async fn rotating_twice_with_the_same_password_is_idempotent() {
        for mode in [SaltMode::Fixed, SaltMode::PerUser] {
            let fx = Fixture::new(mode).await;
            fx.credential("c1", "s3cr3t", Some("memo"), &fx.old_key).await;

            fx.rotate(DegradePolicy::Lenient, "newMasterPw").await.unwrap();
            let key_after_first = fx.session.keys().get().unwrap();
            let doc_after_first = fx.raw(Collection::Passwords, "c1").await;

            let second = fx.rotate(DegradePolicy::Lenient, "newMasterPw").await.unwrap();

            assert_eq!(second.already_rotated(), 1, "mode {mode:?}");
            assert_eq!(*fx.session.keys().get().unwrap(), *key_after_first);
            assert_eq!(fx.raw(Collection::Passwords, "c1").await, doc_after_first);
            let password = doc_after_first.str_field("password").unwrap();
            assert_eq!(decrypt_field(password, &key_after_first).unwrap(), "s3cr3t");
        }
    }

    #[tokio::test]
    async fn unreadable_notes_are_dropped_and_reported() {
        let fx = Fixture::new(SaltMode::Fixed).await;
        fx.insert(
            Collection::Passwords,
            "c1",
            json!({
                "title": "bank",
                "password": encrypt_field("s3cr3t", &fx.old_key).unwrap(),
                "notes": encrypt_field("lost", &unrelated_key()).unwrap(),
            }),
        )
        .await;
        fx.credential("c2", "other", None, &fx.old_key).await;

        let err = fx.rotate(DegradePolicy::Lenient, "newMasterPw").await.unwrap_err();

        match &err {
            SafepassError::RotationPartialFailure { failed, degraded } => {
                assert!(failed.is_empty());
                assert_eq!(degraded, &vec!["c1".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.indicates_corruption());

        let new_key = fx.session.keys().get().unwrap();
        let doc = fx.raw(Collection::Passwords, "c1").await;
        assert_eq!(decrypt_field(doc.str_field("password").unwrap(), &new_key).unwrap(), "s3cr3t");
        assert!(doc.fields["notes"].is_null());
        assert_eq!(doc.str_field(KEY_ID_FIELD), Some(new_key.key_id().as_str()));

        // Envelope still moved to the new key and needs no old key.
        let record = fx.record().await;
        assert!(record.previous.is_empty());
        assert_ne!(*new_key, *fx.old_key);
    }

    #[tokio::test]
    async fn unreadable_primary_field_is_left_stale() {
        let fx = Fixture::new(SaltMode::Fixed).await;
        let stale = encrypt_field("unknown", &unrelated_key()).unwrap();
        fx.insert(
            Collection::Passwords,
            "c1",
            json!({"title": "bank", "password": stale, "notes": encrypt_field("memo", &fx.old_key).unwrap()}),
        )
        .await;

        let err = fx.rotate(DegradePolicy::Lenient, "newMasterPw").await.unwrap_err();
        assert!(matches!(err, SafepassError::RotationPartialFailure { ref degraded, .. } if degraded.len() == 1));

        let new_key = fx.session.keys().get().unwrap();
        let doc = fx.raw(Collection::Passwords, "c1").await;
        assert_eq!(doc.str_field("password"), Some(stale.as_str()));
        assert_eq!(decrypt_field(doc.str_field("notes").unwrap(), &new_key).unwrap(), "memo");
        assert_ne!(doc.str_field(KEY_ID_FIELD), Some(new_key.key_id().as_str()));

        // No candidate opened the stale field, so there is no key worth keeping.
        assert!(fx.record().await.previous.is_empty());
    }

    #[tokio::test]
    async fn strict_policy_fails_the_whole_item() {
        let fx = Fixture::new(SaltMode::Fixed).await;
        fx.insert(
            Collection::Passwords,
            "c1",
            json!({
                "title": "bank",
                "password": encrypt_field("s3cr3t", &fx.old_key).unwrap(),
                "notes": encrypt_field("lost", &unrelated_key()).unwrap(),
            }),
        )
        .await;
        let before = fx.raw(Collection::Passwords, "c1").await;

        let err = fx.rotate(DegradePolicy::Strict, "newMasterPw").await.unwrap_err();

        match err {
            SafepassError::RotationPartialFailure { failed, degraded } => {
                assert_eq!(failed, vec!["c1".to_string()]);
                assert!(degraded.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fx.raw(Collection::Passwords, "c1").await, before);
        assert_eq!(fx.previous_keys().await, vec![(*fx.old_key).clone()]);
        assert_eq!(fx.open_with_envelope_keys("c1").await.as_deref(), Some("s3cr3t"));
    }

    #[tokio::test]
    async fn update_failure_does_not_stop_other_items() {
        let fx = Fixture::new(SaltMode::Fixed).await;
        fx.credential("c1", "one", None, &fx.old_key).await;
        fx.credential("c2", "two", None, &fx.old_key).await;
        fx.store.fail_updates_for("c1").await;

        let err = fx.rotate(DegradePolicy::Lenient, "newMasterPw").await.unwrap_err();
        assert!(matches!(err, SafepassError::RotationPartialFailure { ref failed, .. } if failed == &vec!["c1".to_string()]));

        let new_key = fx.session.keys().get().unwrap();
        let c2 = fx.raw(Collection::Passwords, "c2").await;
        assert_eq!(decrypt_field(c2.str_field("password").unwrap(), &new_key).unwrap(), "two");

        // The failed item is still readable through the kept old key.
        assert_eq!(fx.previous_keys().await, vec![(*fx.old_key).clone()]);
        assert_eq!(fx.open_with_envelope_keys("c1").await.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn rerun_while_an_item_keeps_failing_keeps_its_old_key() {
        for mode in [SaltMode::Fixed, SaltMode::PerUser] {
            let fx = Fixture::new(mode).await;
            fx.credential("c1", "one", None, &fx.old_key).await;
            fx.credential("c2", "two", None, &fx.old_key).await;
            fx.store.fail_updates_for("c1").await;

            assert!(fx.rotate(DegradePolicy::Lenient, "newMasterPw").await.is_err());
            let new_key = fx.session.keys().get().unwrap();
            let err = fx.rotate(DegradePolicy::Lenient, "newMasterPw").await.unwrap_err();

            assert!(
                matches!(err, SafepassError::RotationPartialFailure { ref failed, .. } if failed == &vec!["c1".to_string()]),
                "mode {mode:?}"
            );
            assert_eq!(*fx.session.keys().get().unwrap(), *new_key, "mode {mode:?}");
            let previous = fx.previous_keys().await;
            assert!(!previous.contains(&new_key), "mode {mode:?}");
            assert_eq!(previous, vec![(*fx.old_key).clone()], "mode {mode:?}");
            assert_eq!(fx.open_with_envelope_keys("c1").await.as_deref(), Some("one"), "mode {mode:?}");
            assert_eq!(fx.open_with_envelope_keys("c2").await.as_deref(), Some("two"), "mode {mode:?}");
        }
    }

    #[tokio::test]
    async fn chained_rotations_keep_the_key_a_failed_item_needs() {
        let fx = Fixture::new(SaltMode::PerUser).await;
        fx.credential("c1", "one", None, &fx.old_key).await;
        fx.credential("c2", "two", None, &fx.old_key).await;
        fx.store.fail_updates_for("c1").await;

        assert!(fx.rotate(DegradePolicy::Lenient, "secondPw").await.is_err());
        let second_key = fx.session.keys().get().unwrap();
        assert!(fx.rotate(DegradePolicy::Lenient, "thirdPw").await.is_err());
        let third_key = fx.session.keys().get().unwrap();

        assert_ne!(*third_key, *second_key);
        let previous = fx.previous_keys().await;
        assert_eq!(previous, vec![(*fx.old_key).clone()]);
        assert!(!previous.contains(&third_key));
        assert_eq!(fx.open_with_envelope_keys("c1").await.as_deref(), Some("one"));

        let c2 = fx.raw(Collection::Passwords, "c2").await;
        assert_eq!(decrypt_field(c2.str_field("password").unwrap(), &third_key).unwrap(), "two");
        assert_eq!(c2.str_field(KEY_ID_FIELD), Some(third_key.key_id().as_str()));
    }

    #[tokio::test]
    async fn rerun_after_a_failed_item_finishes_the_job() {
        let fx = Fixture::new(SaltMode::PerUser).await;
        fx.credential("c1", "one", None, &fx.old_key).await;
        fx.credential("c2", "two", None, &fx.old_key).await;
        fx.store.fail_updates_for("c1").await;
        assert!(fx.rotate(DegradePolicy::Lenient, "newMasterPw").await.is_err());

        // A second store handle without the injected fault, over the same data.
        let healthy = MemoryDocumentStore::new();
        for id in ["c1", "c2"] {
            let doc = fx.raw(Collection::Passwords, id).await;
            healthy.insert_raw(fx.user(), Collection::Passwords, id, doc.fields).await;
        }
        let envelope_doc = fx.raw(Collection::Encryption, ENVELOPE_ID).await;
        healthy
            .insert_raw(fx.user(), Collection::Encryption, ENVELOPE_ID, envelope_doc.fields)
            .await;
        let envelope = EnvelopeStore::new(
            Arc::new(healthy.clone()),
            AppSecret::from_bytes([5; 32]),
            TEST_PARAMS,
            SaltMode::PerUser,
            RetryPolicy::default(),
        );
        let session = Session::new(fx.user().clone());

        let report = KeyRotationCoordinator::new(&envelope, DegradePolicy::Lenient)
            .rotate(&session, &pw("newMasterPw"))
            .await
            .unwrap();

        assert_eq!(report.reencrypted(), 1);
        assert_eq!(report.already_rotated(), 1);
        let key = session.keys().get().unwrap();
        let c1 = healthy.snapshot(fx.user(), Collection::Passwords, "c1").await.unwrap();
        assert_eq!(decrypt_field(c1.str_field("password").unwrap(), &key).unwrap(), "one");
        let record = envelope.read_record(fx.user()).await.unwrap().unwrap();
        assert!(record.previous.is_empty());
    }

    #[tokio::test]
    async fn interrupted_rotation_resumes_with_the_staged_key() {
        let fx = Fixture::new(SaltMode::PerUser).await;
        // First run staged its key and rotated c1 before the process died.
        let (staged, salt) = fx.envelope.derive_fresh(&pw("newMasterPw")).unwrap();
        fx.envelope.stage_pending(&fx.session, &staged, &salt).await.unwrap();
        fx.credential("c1", "one", None, &staged).await;
        fx.credential("c2", "two", None, &fx.old_key).await;
        // c3 has a new-key field but no stamp yet.
        fx.insert(
            Collection::Passwords,
            "c3",
            json!({"title": "c3", "password": encrypt_field("three", &staged).unwrap()}),
        )
        .await;

        let report = fx.rotate(DegradePolicy::Lenient, "newMasterPw").await.unwrap();

        assert!(report.resumed);
        assert_eq!(report.new_key_id, staged.key_id());
        assert_eq!(report.already_rotated(), 1);
        assert_eq!(report.reencrypted(), 2);
        assert_eq!(*fx.session.keys().get().unwrap(), staged);
        let c3 = fx.raw(Collection::Passwords, "c3").await;
        assert_eq!(c3.str_field(KEY_ID_FIELD), Some(staged.key_id().as_str()));
        assert_eq!(fx.record().await.salt().unwrap(), salt);
    }

    #[tokio::test]
    async fn abandoned_staged_key_is_used_to_read_items() {
        let fx = Fixture::new(SaltMode::PerUser).await;
        let (abandoned, salt) = fx.envelope.derive_fresh(&pw("abandonedPw")).unwrap();
        fx.envelope.stage_pending(&fx.session, &abandoned, &salt).await.unwrap();
        fx.credential("c1", "one", None, &abandoned).await;

        let report = fx.rotate(DegradePolicy::Lenient, "finalPw").await.unwrap();

        assert!(!report.resumed);
        let key = fx.session.keys().get().unwrap();
        assert_ne!(*key, abandoned);
        let c1 = fx.raw(Collection::Passwords, "c1").await;
        assert_eq!(decrypt_field(c1.str_field("password").unwrap(), &key).unwrap(), "one");
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_without_a_key_bootstraps_the_envelope() {
        let store = MemoryDocumentStore::new();
        let envelope = EnvelopeStore::new(
            Arc::new(store.clone()),
            AppSecret::from_bytes([5; 32]),
            TEST_PARAMS,
            SaltMode::Fixed,
            RetryPolicy::default(),
        );
        let session = Session::new(UserId::from("dave"));

        let report = KeyRotationCoordinator::new(&envelope, DegradePolicy::Lenient)
            .rotate(&session, &pw("firstPw"))
            .await
            .unwrap();

        assert!(report.bootstrapped);
        assert!(report.items.is_empty());
        let expected = derive_key(&pw("firstPw"), &Salt::fixed(), &TEST_PARAMS).unwrap();
        assert_eq!(*session.keys().get().unwrap(), expected);
        assert!(envelope.read_record(session.user_id()).await.unwrap().is_some());
    }

    #[tokio::test]
    #[traced_test]
    async fn item_state_transitions_are_logged_without_plaintext() {
        let fx = Fixture::new(SaltMode::Fixed).await;
        fx.credential("c1", "s3cr3t", None, &fx.old_key).await;

        fx.rotate(DegradePolicy::Lenient, "newMasterPw").await.unwrap();

        assert!(logs_contain("rotation item state"));
        assert!(logs_contain("reencrypted"));
        assert!(logs_contain("key rotation complete"));
        assert!(!logs_contain("s3cr3t"));
        assert!(!logs_contain("newMasterPw"));
    }
}
