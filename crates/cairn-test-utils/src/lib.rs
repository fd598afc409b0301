// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Cairn integration tests.
//!
//! Provides mock adapters and a throwaway SQLite store for fast,
//! deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`TempStore`] - Initialized SQLite storage in a temp directory
//! - [`MockEmbedder`] - Deterministic bag-of-words embedding adapter
//! - [`FailingEmbedder`] - Embedding adapter that always errors
//! - [`RecordBuilder`] - Fluent construction of versioned records

pub mod builders;
pub mod mock_embedder;
pub mod store;

pub use builders::RecordBuilder;
pub use mock_embedder::{FailingEmbedder, MockEmbedder};
pub use store::TempStore;
