// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Safepass vault.
//!
//! This crate provides the error taxonomy, the shared document types, and
//! the [`DocumentStore`] trait that storage backends implement.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::SafepassError;
pub use traits::DocumentStore;
pub use types::{merge_fields, Collection, Document, Fields, UserId};
