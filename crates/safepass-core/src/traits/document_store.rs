// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document store trait for per-user collections of key/value records.

use async_trait::async_trait;

use crate::error::SafepassError;
use crate::types::{Collection, Document, Fields, UserId};

/// Per-user document persistence.
///
/// Every call is a suspension point; implementations must not assume
/// calls from one user are serialized. Used as `Arc<dyn DocumentStore>`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches one document, or `None` if it does not exist.
    async fn get_document(
        &self,
        user: &UserId,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Document>, SafepassError>;

    /// Creates or replaces a document. With `merge`, existing fields not in
    /// `fields` are kept.
    async fn set_document(
        &self,
        user: &UserId,
        collection: Collection,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<(), SafepassError>;

    /// Lists every document in a collection.
    async fn list_documents(
        &self,
        user: &UserId,
        collection: Collection,
    ) -> Result<Vec<Document>, SafepassError>;

    /// Adds a document under a freshly generated id and returns that id.
    async fn add_document(
        &self,
        user: &UserId,
        collection: Collection,
        fields: Fields,
    ) -> Result<String, SafepassError>;

    /// Merges `patch` into an existing document.
    ///
    /// Fails with [`SafepassError::NotFound`] if the document does not exist.
    async fn update_document(
        &self,
        user: &UserId,
        collection: Collection,
        id: &str,
        patch: Fields,
    ) -> Result<(), SafepassError>;

    /// Deletes a document. Returns whether it existed.
    async fn delete_document(
        &self,
        user: &UserId,
        collection: Collection,
        id: &str,
    ) -> Result<bool, SafepassError>;
}
