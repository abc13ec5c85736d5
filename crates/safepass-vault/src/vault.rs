// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vault lifecycle: login, logout, item access, and master-password change.
//!
//! The vault uses a key-wrapping pattern:
//! - A key derived from the master password encrypts every sensitive field.
//! - That key is wrapped under the application secret and stored as the
//!   user's envelope, so later sessions recover it without the password.
//! - Changing the password derives a new key and re-encrypts every item.

use std::sync::Arc;

use safepass_config::{DegradePolicy, SafepassConfig};
use safepass_core::{DocumentStore, SafepassError, UserId};
use secrecy::SecretString;
use tracing::info;

use crate::envelope::EnvelopeStore;
use crate::items::ItemService;
use crate::rotation::{KeyRotationCoordinator, RotationReport};
use crate::secret::AppSecret;
use crate::session::Session;

/// Entry point tying the envelope store, sessions, items, and rotation together.
pub struct Vault {
    envelope: EnvelopeStore,
    degrade_policy: DegradePolicy,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("envelope", &self.envelope)
            .field("degrade_policy", &self.degrade_policy)
            .finish()
    }
}

impl Vault {
    pub fn new(store: Arc<dyn DocumentStore>, secret: AppSecret, config: &SafepassConfig) -> Self {
        Self::from_parts(
            EnvelopeStore::from_config(store, secret, config),
            config.rotation.degrade_policy,
        )
    }

    pub fn from_parts(envelope: EnvelopeStore, degrade_policy: DegradePolicy) -> Self {
        Self {
            envelope,
            degrade_policy,
        }
    }

    pub fn envelope(&self) -> &EnvelopeStore {
        &self.envelope
    }

    /// Open a session for `user_id`.
    ///
    /// Recovers the stored key when there is one. With a `password` and no
    /// envelope yet, creates the envelope (first login). Without either,
    /// fails with [`SafepassError::KeyUnavailable`].
    pub async fn login(
        &self,
        user_id: UserId,
        password: Option<&SecretString>,
    ) -> Result<Session, SafepassError> {
        let session = Session::new(user_id);
        match self.envelope.retrieve(&session, password).await? {
            Some(key) => {
                info!(user = %session.user_id(), key_id = %key.key_id(), "session opened");
                Ok(session)
            }
            None => Err(SafepassError::KeyUnavailable {
                user_id: session.user_id().to_string(),
            }),
        }
    }

    /// Close a session, clearing its cached key.
    pub fn logout(&self, session: Session) {
        session.keys().clear();
        info!(user = %session.user_id(), "session closed");
    }

    pub fn items<'a>(&'a self, session: &'a Session) -> ItemService<'a> {
        ItemService::new(&self.envelope, session)
    }

    pub fn rotation(&self) -> KeyRotationCoordinator<'_> {
        KeyRotationCoordinator::new(&self.envelope, self.degrade_policy)
    }

    /// Change the master password, re-encrypting every item.
    pub async fn change_password(
        &self,
        session: &Session,
        new_password: &SecretString,
    ) -> Result<RotationReport, SafepassError> {
        self.rotation().rotate(session, new_password).await
    }
}
