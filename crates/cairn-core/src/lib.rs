// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Cairn knowledge store.
//!
//! This crate provides the error taxonomy, the branch/record domain model, and
//! the adapter traits that the versioning engines are written against.
//! Storage and embedding backends implement traits defined here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::CairnError;
pub use types::{
    AdapterType, Branch, BranchStatus, HealthStatus, RecordKind, RecordStatus, VersionedRecord,
    ROOT_BRANCH,
};

pub use traits::{EmbeddingAdapter, PluginAdapter, StorageAdapter};
