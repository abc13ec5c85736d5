// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory document store for deterministic testing.
//!
//! `MemoryDocumentStore` implements `DocumentStore` over a map guarded by a
//! tokio mutex. Faults can be injected per operation so envelope retries and
//! best-effort rotation can be exercised without a real backend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use safepass_core::{
    merge_fields, Collection, Document, DocumentStore, Fields, SafepassError, UserId,
};

#[derive(Default)]
struct State {
    /// Documents per (user, collection), in insertion order.
    docs: HashMap<(UserId, Collection), Vec<Document>>,
    /// Number of upcoming `get_document` calls that fail.
    failing_reads: u32,
    /// Envelope (`encryption` collection) writes fail while set.
    fail_envelope_writes: bool,
    /// Ids whose `update_document` calls fail.
    failing_updates: HashSet<String>,
}

/// A document store that keeps everything in memory.
///
/// Cloning shares the underlying state, so a test can keep a handle while the
/// vault owns another as `Arc<dyn DocumentStore>`.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<State>>,
    reads: Arc<AtomicU32>,
    writes: Arc<AtomicU32>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `get_document` fail with a storage error.
    pub async fn fail_next_reads(&self, count: u32) {
        self.state.lock().await.failing_reads = count;
    }

    /// Make every write to the `encryption` collection fail while `fail` is set.
    pub async fn fail_envelope_writes(&self, fail: bool) {
        self.state.lock().await.fail_envelope_writes = fail;
    }

    /// Make `update_document` fail for the item with this id.
    pub async fn fail_updates_for(&self, id: &str) {
        self.state
            .lock()
            .await
            .failing_updates
            .insert(id.to_string());
    }

    /// Number of `get_document` calls so far, failed ones included.
    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful writes (set, add, update, delete) so far.
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Insert or overwrite a document directly, bypassing fault injection.
    pub async fn insert_raw(&self, user: &UserId, collection: Collection, id: &str, fields: Fields) {
        let mut state = self.state.lock().await;
        let docs = state.docs.entry((user.clone(), collection)).or_default();
        match docs.iter_mut().find(|d| d.id == id) {
            Some(doc) => doc.fields = fields,
            None => docs.push(Document::new(id, fields)),
        }
    }

    /// Read a document directly, bypassing counters and fault injection.
    pub async fn snapshot(&self, user: &UserId, collection: Collection, id: &str) -> Option<Document> {
        let state = self.state.lock().await;
        state
            .docs
            .get(&(user.clone(), collection))
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(
        &self,
        user: &UserId,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Document>, SafepassError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            debug!(%collection, id, "injected read failure");
            return Err(SafepassError::storage("injected read failure"));
        }
        Ok(state
            .docs
            .get(&(user.clone(), collection))
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned()))
    }

    async fn set_document(
        &self,
        user: &UserId,
        collection: Collection,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<(), SafepassError> {
        let mut state = self.state.lock().await;
        if collection == Collection::Encryption && state.fail_envelope_writes {
            return Err(SafepassError::storage("injected envelope write failure"));
        }
        let docs = state.docs.entry((user.clone(), collection)).or_default();
        match docs.iter_mut().find(|d| d.id == id) {
            Some(doc) if merge => merge_fields(&mut doc.fields, fields),
            Some(doc) => doc.fields = fields,
            None => docs.push(Document::new(id, fields)),
        }
        drop(state);
        self.record_write();
        Ok(())
    }

    async fn list_documents(
        &self,
        user: &UserId,
        collection: Collection,
    ) -> Result<Vec<Document>, SafepassError> {
        let state = self.state.lock().await;
        Ok(state
            .docs
            .get(&(user.clone(), collection))
            .cloned()
            .unwrap_or_default())
    }

    async fn add_document(
        &self,
        user: &UserId,
        collection: Collection,
        fields: Fields,
    ) -> Result<String, SafepassError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.state
            .lock()
            .await
            .docs
            .entry((user.clone(), collection))
            .or_default()
            .push(Document::new(id.clone(), fields));
        self.record_write();
        Ok(id)
    }

    async fn update_document(
        &self,
        user: &UserId,
        collection: Collection,
        id: &str,
        patch: Fields,
    ) -> Result<(), SafepassError> {
        let mut state = self.state.lock().await;
        if state.failing_updates.contains(id) {
            return Err(SafepassError::storage(format!("injected update failure for {id}")));
        }
        let doc = state
            .docs
            .get_mut(&(user.clone(), collection))
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
            .ok_or_else(|| SafepassError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        merge_fields(&mut doc.fields, patch);
        drop(state);
        self.record_write();
        Ok(())
    }

    async fn delete_document(
        &self,
        user: &UserId,
        collection: Collection,
        id: &str,
    ) -> Result<bool, SafepassError> {
        let mut state = self.state.lock().await;
        let Some(docs) = state.docs.get_mut(&(user.clone(), collection)) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|d| d.id != id);
        let removed = docs.len() != before;
        drop(state);
        if removed {
            self.record_write();
        }
        Ok(removed)
    }
}
