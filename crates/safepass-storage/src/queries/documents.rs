// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document CRUD operations.
//!
//! Bodies are stored as JSON object text. Merge writes read, patch and
//! write back inside one transaction on the writer thread.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Transaction};
use safepass_core::{merge_fields, Collection, Document, Fields, SafepassError, UserId};

use crate::database::{map_tr_err, Database};

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn encode(fields: &Fields) -> Result<String, rusqlite::Error> {
    serde_json::to_string(fields).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn decode(body: &str) -> Result<Fields, rusqlite::Error> {
    serde_json::from_str(body).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn read_body(
    tx: &Transaction<'_>,
    user: &str,
    collection: &str,
    id: &str,
) -> Result<Option<Fields>, rusqlite::Error> {
    let body: Option<String> = tx
        .query_row(
            "SELECT body FROM documents WHERE user_id = ?1 AND collection = ?2 AND id = ?3",
            params![user, collection, id],
            |row| row.get(0),
        )
        .optional()?;
    body.as_deref().map(decode).transpose()
}

fn upsert_body(
    tx: &Transaction<'_>,
    user: &str,
    collection: &str,
    id: &str,
    fields: &Fields,
) -> Result<(), rusqlite::Error> {
    let ts = now();
    tx.execute(
        "INSERT INTO documents (user_id, collection, id, body, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT (user_id, collection, id)
         DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        params![user, collection, id, encode(fields)?, ts],
    )?;
    Ok(())
}

/// Get one document by id.
pub async fn get_document(
    db: &Database,
    user: &UserId,
    collection: Collection,
    id: &str,
) -> Result<Option<Document>, SafepassError> {
    let (user, collection, id) = (user.0.clone(), collection.to_string(), id.to_string());
    db.connection()
        .call(move |conn| -> Result<_, rusqlite::Error> {
            let tx = conn.transaction()?;
            let fields = read_body(&tx, &user, &collection, &id)?;
            Ok(fields.map(|fields| Document { id, fields }))
        })
        .await
        .map_err(map_tr_err)
}

/// Create or replace a document; with `merge`, patch the existing body instead.
pub async fn set_document(
    db: &Database,
    user: &UserId,
    collection: Collection,
    id: &str,
    fields: Fields,
    merge: bool,
) -> Result<(), SafepassError> {
    let (user, collection, id) = (user.0.clone(), collection.to_string(), id.to_string());
    db.connection()
        .call(move |conn| -> Result<_, rusqlite::Error> {
            let tx = conn.transaction()?;
            let body = match (merge, read_body(&tx, &user, &collection, &id)?) {
                (true, Some(mut existing)) => {
                    merge_fields(&mut existing, fields);
                    existing
                }
                _ => fields,
            };
            upsert_body(&tx, &user, &collection, &id, &body)?;
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

/// List all documents of a collection, oldest first.
pub async fn list_documents(
    db: &Database,
    user: &UserId,
    collection: Collection,
) -> Result<Vec<Document>, SafepassError> {
    let (user, collection) = (user.0.clone(), collection.to_string());
    db.connection()
        .call(move |conn| -> Result<_, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT id, body FROM documents
                 WHERE user_id = ?1 AND collection = ?2
                 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![user, collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut documents = Vec::new();
            for row in rows {
                let (id, body) = row?;
                documents.push(Document {
                    id,
                    fields: decode(&body)?,
                });
            }
            Ok(documents)
        })
        .await
        .map_err(map_tr_err)
}

/// Insert a document under a new random id and return the id.
pub async fn add_document(
    db: &Database,
    user: &UserId,
    collection: Collection,
    fields: Fields,
) -> Result<String, SafepassError> {
    let (user, collection) = (user.0.clone(), collection.to_string());
    let id = uuid::Uuid::new_v4().to_string();
    let new_id = id.clone();
    db.connection()
        .call(move |conn| -> Result<_, rusqlite::Error> {
            let tx = conn.transaction()?;
            upsert_body(&tx, &user, &collection, &new_id, &fields)?;
            tx.commit()
        })
        .await
        .map_err(map_tr_err)?;
    Ok(id)
}

/// Merge `patch` into an existing document. Returns `false` if it does not exist.
pub async fn update_document(
    db: &Database,
    user: &UserId,
    collection: Collection,
    id: &str,
    patch: Fields,
) -> Result<bool, SafepassError> {
    let (user, collection, id) = (user.0.clone(), collection.to_string(), id.to_string());
    db.connection()
        .call(move |conn| -> Result<_, rusqlite::Error> {
            let tx = conn.transaction()?;
            let Some(mut body) = read_body(&tx, &user, &collection, &id)? else {
                return Ok(false);
            };
            merge_fields(&mut body, patch);
            upsert_body(&tx, &user, &collection, &id, &body)?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a document. Returns whether a row was removed.
pub async fn delete_document(
    db: &Database,
    user: &UserId,
    collection: Collection,
    id: &str,
) -> Result<bool, SafepassError> {
    let (user, collection, id) = (user.0.clone(), collection.to_string(), id.to_string());
    db.connection()
        .call(move |conn| -> Result<_, rusqlite::Error> {
            let removed = conn.execute(
                "DELETE FROM documents WHERE user_id = ?1 AND collection = ?2 AND id = ?3",
                params![user, collection, id],
            )?;
            Ok(removed > 0)
        })
        .await
        .map_err(map_tr_err)
}
