// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Branch lifecycle: creation (fork), lookup, listing, and archival.
//!
//! Archival is a compare-and-swap on the branch row's status, so concurrent
//! archivers of one branch apply the side effect exactly once.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use cairn_core::types::{Branch, BranchStatus, ROOT_BRANCH};
use cairn_core::{CairnError, StorageAdapter};

/// What an archive call observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// This call performed the archive.
    Archived,
    /// The branch was already archived before this call.
    AlreadyArchived,
}

/// Owns the branch registry invariants.
#[derive(Clone)]
pub struct BranchManager {
    storage: Arc<dyn StorageAdapter>,
}

impl BranchManager {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    /// Fork `parent_name` into a new active branch `name`.
    ///
    /// The parent's active records are copied onto the child in the same
    /// transaction that registers it.
    pub async fn create_branch(
        &self,
        name: &str,
        parent_name: &str,
        description: Option<&str>,
    ) -> Result<Branch, CairnError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CairnError::InvalidInput("branch name must not be empty".into()));
        }
        if name == ROOT_BRANCH {
            return Err(CairnError::BranchExists { name: name.into() });
        }

        let mut branch = Branch::new(name, parent_name, Utc::now());
        branch.metadata.description = description.map(str::to_string);
        let branch = self.storage.fork_branch(&branch).await?;
        info!(branch = %branch.name, parent = %branch.parent_name, "branch created");
        Ok(branch)
    }

    /// The current row for `name`: live if one exists, else the latest archived.
    pub async fn get_branch(&self, name: &str) -> Result<Branch, CairnError> {
        self.storage
            .get_branch(name)
            .await?
            .ok_or_else(|| CairnError::branch_not_found(name))
    }

    /// Branch rows, optionally filtered by status, newest fork first.
    pub async fn list_branches(
        &self,
        status: Option<BranchStatus>,
    ) -> Result<Vec<Branch>, CairnError> {
        self.storage.list_branches(status).await
    }

    /// Archive `name`, dropping its branch-local records.
    ///
    /// Idempotent: archiving an archived branch reports `AlreadyArchived`.
    /// Losing a race against a concurrent status change yields
    /// `ConcurrencyAborted`.
    pub async fn archive_branch(&self, name: &str) -> Result<ArchiveOutcome, CairnError> {
        if name == ROOT_BRANCH {
            return Err(CairnError::PolicyViolation(format!(
                "the {ROOT_BRANCH} branch can never be archived"
            )));
        }
        let branch = self.get_branch(name).await?;
        if branch.status == BranchStatus::Archived {
            debug!(branch = %name, "already archived");
            return Ok(ArchiveOutcome::AlreadyArchived);
        }
        if self.archive_row(&branch).await? {
            Ok(ArchiveOutcome::Archived)
        } else {
            Err(CairnError::ConcurrencyAborted {
                branch: name.to_string(),
            })
        }
    }

    /// Compare-and-swap `branch` from its observed status to archived.
    ///
    /// Returns `false` when another caller changed the status first.
    pub(crate) async fn archive_row(&self, branch: &Branch) -> Result<bool, CairnError> {
        if branch.is_root() {
            return Err(CairnError::PolicyViolation(format!(
                "the {ROOT_BRANCH} branch can never be archived"
            )));
        }
        let archived = self.storage.archive_branch(&branch.id, branch.status).await?;
        if archived {
            info!(branch = %branch.name, from = %branch.status, "branch archived");
        } else {
            debug!(branch = %branch.name, expected = %branch.status, "archive lost status race");
        }
        Ok(archived)
    }
}
