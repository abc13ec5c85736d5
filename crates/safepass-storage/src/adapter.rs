// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`DocumentStore`] trait.

use async_trait::async_trait;
use safepass_config::model::StorageConfig;
use safepass_core::{Collection, Document, DocumentStore, Fields, SafepassError, UserId};
use tracing::debug;

use crate::database::Database;
use crate::queries::documents;

/// SQLite-backed document store.
///
/// Wraps a [`Database`] handle and delegates to the typed query functions.
#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    db: Database,
}

impl SqliteDocumentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open the configured database and wrap it.
    pub async fn open(config: &StorageConfig) -> Result<Self, SafepassError> {
        let db = Database::open_with(config).await?;
        debug!(path = %config.database_path, "SQLite document store ready");
        Ok(Self::new(db))
    }

    /// Returns the underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Checkpoint and close the database.
    pub async fn close(self) -> Result<(), SafepassError> {
        self.db.close().await
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get_document(
        &self,
        user: &UserId,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Document>, SafepassError> {
        documents::get_document(&self.db, user, collection, id).await
    }

    async fn set_document(
        &self,
        user: &UserId,
        collection: Collection,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<(), SafepassError> {
        documents::set_document(&self.db, user, collection, id, fields, merge).await
    }

    async fn list_documents(
        &self,
        user: &UserId,
        collection: Collection,
    ) -> Result<Vec<Document>, SafepassError> {
        documents::list_documents(&self.db, user, collection).await
    }

    async fn add_document(
        &self,
        user: &UserId,
        collection: Collection,
        fields: Fields,
    ) -> Result<String, SafepassError> {
        documents::add_document(&self.db, user, collection, fields).await
    }

    async fn update_document(
        &self,
        user: &UserId,
        collection: Collection,
        id: &str,
        patch: Fields,
    ) -> Result<(), SafepassError> {
        if documents::update_document(&self.db, user, collection, id, patch).await? {
            Ok(())
        } else {
            Err(SafepassError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
        }
    }

    async fn delete_document(
        &self,
        user: &UserId,
        collection: Collection,
        id: &str,
    ) -> Result<bool, SafepassError> {
        documents::delete_document(&self.db, user, collection, id).await
    }
}
