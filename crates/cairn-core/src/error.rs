// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Cairn knowledge store.

use thiserror::Error;

/// The primary error type used across all Cairn adapter traits and engine operations.
///
/// Everything except [`CairnError::Storage`] and [`CairnError::Internal`] is a
/// recoverable, caller-facing condition. Merge conflicts are not errors: they
/// are returned as data inside diff and merge results.
#[derive(Debug, Error)]
pub enum CairnError {
    /// The named branch is not registered (or only exists as an archived row
    /// where a live branch is required).
    #[error("branch not found: {name}")]
    BranchNotFound { name: String },

    /// A live (active or merged) branch with this name already exists.
    #[error("branch already exists: {name}")]
    BranchExists { name: String },

    /// The operation is forbidden by registry policy (e.g. archiving `main`).
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Lost a per-branch compare-and-swap race. The competing caller completed
    /// the same intent, so this is safe to ignore or retry.
    #[error("concurrent update on branch {branch}; operation aborted")]
    ConcurrencyAborted { branch: String },

    /// A consolidation pass was invoked against an invalid scope.
    #[error("consolidation error: {0}")]
    Consolidation(String),

    /// Caller supplied an argument that can never succeed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The embedding provider failed to produce a vector.
    #[error("embedding error: {message}")]
    Embedding { message: String },

    /// Configuration errors (invalid TOML, out-of-range thresholds).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CairnError {
    /// Shorthand for [`CairnError::BranchNotFound`].
    pub fn branch_not_found(name: impl Into<String>) -> Self {
        Self::BranchNotFound { name: name.into() }
    }

    /// Returns true for errors raised by the storage layer itself.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Internal(_))
    }
}
