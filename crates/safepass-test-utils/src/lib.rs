// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Safepass integration tests.
//!
//! Provides fakes for fast, deterministic tests without a database.
//!
//! # Components
//!
//! - [`MemoryDocumentStore`] - In-memory document store with fault injection
//!   and call counters

pub mod memory_store;

pub use memory_store::MemoryDocumentStore;
