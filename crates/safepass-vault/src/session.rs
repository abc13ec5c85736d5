// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session-scoped key cache.
//!
//! A [`Session`] is created at login and dropped at logout; its
//! [`SessionKeyCache`] holds the unwrapped key in between. Nothing here is
//! persisted, so a process restart always starts with an empty cache.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use safepass_core::UserId;

use crate::kdf::DerivedKey;

/// Holder of the active unwrapped key.
///
/// Lock-free reads via `arc-swap`; the key is dropped (and zeroed) once the
/// last outstanding `Arc` goes away.
#[derive(Default)]
pub struct SessionKeyCache {
    slot: ArcSwapOption<DerivedKey>,
}

impl SessionKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<DerivedKey>> {
        self.slot.load_full()
    }

    /// Install `key`, or clear the cache with `None`.
    pub fn set(&self, key: Option<DerivedKey>) {
        self.slot.store(key.map(Arc::new));
    }

    /// Install a key and return the shared handle.
    pub fn install(&self, key: DerivedKey) -> Arc<DerivedKey> {
        let key = Arc::new(key);
        self.slot.store(Some(Arc::clone(&key)));
        key
    }

    pub fn clear(&self) {
        self.slot.store(None);
    }

    pub fn is_set(&self) -> bool {
        self.slot.load().is_some()
    }
}

impl fmt::Debug for SessionKeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyCache")
            .field("cached", &self.is_set())
            .finish()
    }
}

/// One authenticated user's session.
#[derive(Debug)]
pub struct Session {
    user_id: UserId,
    keys: SessionKeyCache,
}

impl Session {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            keys: SessionKeyCache::new(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn keys(&self) -> &SessionKeyCache {
        &self.keys
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.keys.clear();
    }
}
