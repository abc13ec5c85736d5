// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Safepass vault.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single-writer
//! concurrency model via `tokio-rusqlite`, and a [`DocumentStore`]
//! implementation over one JSON-bodied `documents` table.
//!
//! [`DocumentStore`]: safepass_core::DocumentStore

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod queries;

pub use adapter::SqliteDocumentStore;
pub use database::Database;
