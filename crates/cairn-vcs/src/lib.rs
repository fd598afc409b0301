// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Branch versioning for the Cairn knowledge store.
//!
//! ## Architecture
//!
//! - **BranchManager**: fork, lookup, listing, and race-safe archival
//! - **MergeEngine**: diff and four merge strategies with similarity-based
//!   conflict detection
//! - **ConsolidationEngine**: session, agent, and task consolidation passes
//! - **BranchTopologyEngine**: hierarchy, stats, enrichment, TTL, auto-archive
//! - **RecordWriter**: embedding-aware record ingestion
//!
//! [`KnowledgeBase`] wires all of them to one storage backend.

pub mod branch;
pub mod consolidation;
pub mod merge;
pub mod similarity;
pub mod topology;
pub mod writer;

use std::sync::Arc;

use cairn_config::CairnConfig;
use cairn_core::types::Branch;
use cairn_core::{CairnError, EmbeddingAdapter, StorageAdapter};

pub use branch::{ArchiveOutcome, BranchManager};
pub use consolidation::{
    AgentConsolidation, ConsolidationEngine, ConsolidationScope, SessionConsolidation,
    TaskConsolidation,
};
pub use merge::{DiffResult, MergeEngine, MergeResult, MergeStrategy};
pub use topology::{
    validate_branch_name, AutoArchivePolicy, AutoArchiveReport, BranchNode, BranchStats,
    BranchTopologyEngine, ExpiredBranch, NameValidation,
};
pub use writer::{NewRecord, RecordWriter, SoftEmbedder};

/// The four engines and the record writer over one shared storage backend.
#[derive(Clone)]
pub struct KnowledgeBase {
    storage: Arc<dyn StorageAdapter>,
    default_branch: String,
    lifecycle: AutoArchivePolicy,
    branches: BranchManager,
    merges: MergeEngine,
    consolidation: ConsolidationEngine,
    topology: BranchTopologyEngine,
    writer: RecordWriter,
}

impl KnowledgeBase {
    /// Wire the engines to `storage`, which must already be initialized.
    ///
    /// Rejects configurations that fail validation.
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        embedder: Option<Arc<dyn EmbeddingAdapter>>,
        config: &CairnConfig,
    ) -> Result<Self, CairnError> {
        cairn_config::ensure_valid(config)?;

        let embedder = SoftEmbedder::new(embedder);
        let branches = BranchManager::new(storage.clone());
        Ok(Self {
            default_branch: config.branches.default_branch.clone(),
            lifecycle: AutoArchivePolicy {
                inactive_days: config.lifecycle.inactive_days,
                archive_merged: config.lifecycle.archive_merged,
                dry_run: false,
            },
            merges: MergeEngine::new(
                storage.clone(),
                branches.clone(),
                config.merge.match_threshold,
            ),
            consolidation: ConsolidationEngine::new(
                storage.clone(),
                embedder.clone(),
                config.consolidation.clone(),
            ),
            topology: BranchTopologyEngine::new(storage.clone(), branches.clone()),
            writer: RecordWriter::new(storage.clone(), embedder),
            branches,
            storage,
        })
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    pub fn branches(&self) -> &BranchManager {
        &self.branches
    }

    pub fn merges(&self) -> &MergeEngine {
        &self.merges
    }

    pub fn consolidation(&self) -> &ConsolidationEngine {
        &self.consolidation
    }

    pub fn topology(&self) -> &BranchTopologyEngine {
        &self.topology
    }

    pub fn writer(&self) -> &RecordWriter {
        &self.writer
    }

    /// Branch used when a caller names no parent or merge target.
    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    /// The configured auto-archive policy.
    pub fn lifecycle_policy(&self) -> AutoArchivePolicy {
        self.lifecycle
    }

    /// Fork `name` from `parent`, or from the default branch when `None`.
    pub async fn create_branch(
        &self,
        name: &str,
        parent: Option<&str>,
        description: Option<&str>,
    ) -> Result<Branch, CairnError> {
        let parent = parent.unwrap_or(&self.default_branch);
        self.branches.create_branch(name, parent, description).await
    }

    /// Merge `source` into `target`, or into the default branch when `None`.
    pub async fn merge(
        &self,
        source: &str,
        target: Option<&str>,
        strategy: MergeStrategy,
    ) -> Result<MergeResult, CairnError> {
        let target = target.unwrap_or(&self.default_branch);
        self.merges.merge(source, target, strategy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::types::{BranchStatus, RecordFilter};
    use cairn_test_utils::{MockEmbedder, TempStore};

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let store = TempStore::new().await.unwrap();
        let mut config = store.config();
        config.merge.match_threshold = 3.0;
        let err = KnowledgeBase::new(store.storage(), None, &config).err().unwrap();
        assert!(matches!(err, CairnError::Config(_)));
    }

    #[tokio::test]
    async fn defaults_route_through_the_configured_branch() {
        let store = TempStore::new().await.unwrap();
        let config = store.config();
        let embedder: Arc<dyn EmbeddingAdapter> = Arc::new(MockEmbedder::new());
        let kb = KnowledgeBase::new(store.storage(), Some(embedder), &config).unwrap();
        assert_eq!(kb.default_branch(), "main");
        assert_eq!(kb.lifecycle_policy(), AutoArchivePolicy::default());

        let branch = kb.create_branch("task/kb", None, None).await.unwrap();
        assert_eq!(branch.parent_name, "main");

        let written = kb
            .writer()
            .write(NewRecord::fact("task/kb", "the facade wires engines"))
            .await
            .unwrap();
        assert!(written.embedding.is_some());

        let result = kb.merge("task/kb", None, MergeStrategy::Auto).await.unwrap();
        assert_eq!(result.target, "main");
        assert_eq!(result.merged_count, 1);
        assert_eq!(
            kb.branches().get_branch("task/kb").await.unwrap().status,
            BranchStatus::Merged
        );

        let on_main = kb
            .storage()
            .list_records("main", &RecordFilter::active_facts())
            .await
            .unwrap();
        assert_eq!(on_main.len(), 1);
    }
}
