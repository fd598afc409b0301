// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter trait for the branch registry, record store, and audit log.

use async_trait::async_trait;

use crate::error::CairnError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    Branch, BranchActivity, BranchMetadata, BranchStatus, ConsolidationHistory, ConsolidationPlan,
    MergeHistory, MergePlan, RecordFilter, VersionedRecord,
};

/// Adapter for persistence backends.
///
/// Single-row reads and writes are plain methods. Multi-row mutations
/// (fork, archive, merge, consolidation) are expressed as one call each so the
/// backend can commit registry changes, record changes, and the audit row in a
/// single transaction.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Initializes the backend (migrations, root branch bootstrap).
    async fn initialize(&self) -> Result<(), CairnError>;

    /// Closes the backend, flushing pending writes.
    async fn close(&self) -> Result<(), CairnError>;

    // --- Branch registry ---

    /// The current row for `name`: the live row if one exists, otherwise the
    /// most recently archived one.
    async fn get_branch(&self, name: &str) -> Result<Option<Branch>, CairnError>;

    /// All branch rows, optionally filtered by status, newest fork first.
    async fn list_branches(&self, status: Option<BranchStatus>) -> Result<Vec<Branch>, CairnError>;

    /// Registers `branch` and copies the parent's active records onto it.
    ///
    /// Fails with `BranchExists` if a live row holds the name and with
    /// `BranchNotFound` if the parent has no live row, both checked inside
    /// the write transaction.
    async fn fork_branch(&self, branch: &Branch) -> Result<Branch, CairnError>;

    /// Compare-and-swap the branch row `branch_id` from `expected` to archived,
    /// dropping its branch-local records in the same transaction.
    ///
    /// Returns `false` when the row no longer has status `expected`.
    async fn archive_branch(&self, branch_id: &str, expected: BranchStatus)
    -> Result<bool, CairnError>;

    /// Replaces the metadata of the live row for `name`.
    async fn update_branch_metadata(
        &self,
        name: &str,
        metadata: &BranchMetadata,
    ) -> Result<(), CairnError>;

    // --- Records ---

    /// Inserts `record` without checking its branch.
    async fn insert_record(&self, record: &VersionedRecord) -> Result<(), CairnError>;

    /// Inserts `record` atomically with a check that its branch is live.
    ///
    /// Fails with `BranchNotFound` for unknown branches and `PolicyViolation`
    /// for archived ones, writing nothing.
    async fn insert_live_record(&self, record: &VersionedRecord) -> Result<(), CairnError>;

    async fn get_record(&self, id: &str) -> Result<Option<VersionedRecord>, CairnError>;

    /// Records on `branch` matching `filter`, oldest first.
    async fn list_records(
        &self,
        branch: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<VersionedRecord>, CairnError>;

    /// Active-record counts per kind, distinct agents, and the latest record
    /// creation time on `branch`.
    async fn branch_activity(&self, branch: &str) -> Result<BranchActivity, CairnError>;

    // --- Atomic units ---

    /// Applies a merge plan. Returns the ids of the target rows written.
    ///
    /// Inserts whose lineage is already active on the target are skipped.
    ///
    /// Fails with `ConcurrencyAborted` (and writes nothing) if the plan's
    /// source status transition no longer holds.
    async fn apply_merge(&self, plan: &MergePlan) -> Result<Vec<String>, CairnError>;

    /// Applies a consolidation plan and its audit row.
    async fn apply_consolidation(&self, plan: &ConsolidationPlan) -> Result<(), CairnError>;

    // --- Audit ---

    /// Merge audit rows touching `branch` (as source or target), newest first.
    async fn merge_history(&self, branch: Option<&str>) -> Result<Vec<MergeHistory>, CairnError>;

    /// Consolidation audit rows for `branch`, newest first.
    async fn consolidation_history(
        &self,
        branch: Option<&str>,
    ) -> Result<Vec<ConsolidationHistory>, CairnError>;
}
