// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-branch diff and merge.
//!
//! A diff classifies every active source record against the target as an
//! exact match, a soft conflict (same referent, divergent text), or new.
//! Facts match by similarity; relations by their `(source, target, type)`
//! key; observations and conversation markers by lineage.
//!
//! A merge turns a diff (or a lineage join, for [`MergeStrategy::Native`])
//! into a [`MergePlan`] that storage applies atomically together with the
//! source status transition and one audit row.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use cairn_core::types::{
    Branch, BranchStatus, ConflictPolicy, MergeConflict, MergeHistory, MergePlan,
    MergeStrategyKind, RecordFilter, RecordKind, RecordOverwrite, RelationKey, SourceType,
    StatusTransition, VersionedRecord,
};
use cairn_core::{CairnError, StorageAdapter};

use crate::branch::BranchManager;
use crate::similarity::{cosine, jaccard_sets, tokenize};

/// How a merge moves records from source to target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Merge every new record; on conflict keep the target's version.
    Auto,
    /// Merge only the listed source record ids. Source status is unchanged.
    CherryPick { items: Vec<String> },
    /// Merge new and conflicting records as fresh entries.
    Squash,
    /// Join on lineage and resolve collisions with `conflict_policy`.
    Native { conflict_policy: ConflictPolicy },
}

impl MergeStrategy {
    pub fn kind(&self) -> MergeStrategyKind {
        match self {
            MergeStrategy::Auto => MergeStrategyKind::Auto,
            MergeStrategy::CherryPick { .. } => MergeStrategyKind::CherryPick,
            MergeStrategy::Squash => MergeStrategyKind::Squash,
            MergeStrategy::Native { .. } => MergeStrategyKind::Native,
        }
    }

    fn marks_source_merged(&self) -> bool {
        !matches!(self, MergeStrategy::CherryPick { .. })
    }
}

/// Outcome of [`MergeEngine::diff`].
#[derive(Debug, Clone, Serialize)]
pub struct DiffResult {
    pub source: String,
    pub target: String,
    /// Source records with no counterpart on the target.
    pub new_records: Vec<VersionedRecord>,
    /// Soft conflicts; never raised as errors.
    pub conflicts: Vec<MergeConflict>,
}

/// Outcome of [`MergeEngine::merge`].
#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub source: String,
    pub target: String,
    pub strategy: MergeStrategyKind,
    pub merged_count: u64,
    pub rejected_count: u64,
    /// Populated by `auto`, so callers can re-run with another strategy.
    pub conflicts: Vec<MergeConflict>,
    /// Target record ids inserted or overwritten.
    pub merged_ids: Vec<String>,
}

enum Classification {
    Exact,
    Conflict(MergeConflict),
    New,
}

/// Active target records, indexed for each matching rule.
struct TargetIndex<'a> {
    fact_texts: HashSet<&'a str>,
    facts: Vec<(&'a VersionedRecord, HashSet<String>)>,
    relation_keys: HashSet<&'a RelationKey>,
    lineages: HashSet<&'a str>,
}

impl<'a> TargetIndex<'a> {
    fn build(records: &'a [VersionedRecord]) -> Self {
        let mut index = Self {
            fact_texts: HashSet::new(),
            facts: Vec::new(),
            relation_keys: HashSet::new(),
            lineages: HashSet::new(),
        };
        for record in records {
            index.lineages.insert(record.lineage_id.as_str());
            match record.kind {
                RecordKind::Fact => {
                    index.fact_texts.insert(record.text.as_str());
                    index.facts.push((record, tokenize(&record.text)));
                }
                RecordKind::Relation => {
                    if let Some(key) = &record.relation {
                        index.relation_keys.insert(key);
                    }
                }
                RecordKind::Observation | RecordKind::Conversation => {}
            }
        }
        index
    }
}

/// Source records split by how they relate to the target.
struct Comparison {
    new: Vec<VersionedRecord>,
    conflicting: Vec<VersionedRecord>,
    conflicts: Vec<MergeConflict>,
}

/// Diffs and merges branches.
#[derive(Clone)]
pub struct MergeEngine {
    storage: Arc<dyn StorageAdapter>,
    branches: BranchManager,
    match_threshold: f64,
}

impl MergeEngine {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        branches: BranchManager,
        match_threshold: f64,
    ) -> Self {
        Self {
            storage,
            branches,
            match_threshold,
        }
    }

    /// Compare the active records of `source` (optionally one category)
    /// against the active records of `target`.
    pub async fn diff(
        &self,
        source: &str,
        target: &str,
        category: Option<&str>,
    ) -> Result<DiffResult, CairnError> {
        self.branches.get_branch(source).await?;
        self.branches.get_branch(target).await?;
        let comparison = self.compare(source, target, category).await?;
        Ok(DiffResult {
            source: source.to_string(),
            target: target.to_string(),
            new_records: comparison.new,
            conflicts: comparison.conflicts,
        })
    }

    /// Merge `source` into `target` under `strategy`.
    ///
    /// Writes exactly one history row per call, even when nothing moves.
    pub async fn merge(
        &self,
        source: &str,
        target: &str,
        strategy: MergeStrategy,
    ) -> Result<MergeResult, CairnError> {
        if source == target {
            return Err(CairnError::PolicyViolation(format!(
                "cannot merge branch {source} into itself"
            )));
        }
        let source_branch = self.branches.get_branch(source).await?;
        let target_branch = self.branches.get_branch(target).await?;
        for branch in [&source_branch, &target_branch] {
            if branch.status == BranchStatus::Archived {
                return Err(CairnError::PolicyViolation(format!(
                    "cannot merge with archived branch {}",
                    branch.name
                )));
            }
        }

        let now = Utc::now();
        let mut inserts = Vec::new();
        let mut overwrites = Vec::new();
        let mut conflicts = Vec::new();
        let rejected: usize;
        let resolution: String;

        match &strategy {
            MergeStrategy::Auto => {
                let comparison = self.compare(source, target, None).await?;
                inserts = copy_all(&comparison.new, target, now);
                rejected = comparison.conflicts.len();
                conflicts = comparison.conflicts;
                resolution = "target_wins".into();
            }
            MergeStrategy::Squash => {
                let comparison = self.compare(source, target, None).await?;
                inserts = copy_all(&comparison.new, target, now);
                inserts.extend(copy_all(&comparison.conflicting, target, now));
                rejected = 0;
                resolution = "none".into();
            }
            MergeStrategy::CherryPick { items } => {
                let records = self
                    .storage
                    .list_records(source, &RecordFilter::active())
                    .await?;
                let by_id: HashMap<&str, &VersionedRecord> =
                    records.iter().map(|r| (r.id.as_str(), r)).collect();
                let mut seen = HashSet::new();
                let mut missing = 0;
                for id in items.iter().filter(|id| seen.insert(id.as_str())) {
                    match by_id.get(id.as_str()) {
                        Some(record) => inserts.push(copy_for_target(record, target, now)),
                        None => missing += 1,
                    }
                }
                rejected = missing;
                resolution = "cherry_pick".into();
            }
            MergeStrategy::Native { conflict_policy } => {
                let (native_inserts, native_overwrites, skipped) = self
                    .native_join(source, target, *conflict_policy, now)
                    .await?;
                inserts = native_inserts;
                overwrites = native_overwrites;
                rejected = skipped;
                resolution = conflict_policy.to_string();
            }
        }

        let planned = inserts.len() + overwrites.len();
        let source_transition = (strategy.marks_source_merged() && !source_branch.is_root())
            .then(|| status_transition(&source_branch, strategy.kind(), now));
        let plan = MergePlan {
            source: source.to_string(),
            target: target.to_string(),
            inserts,
            overwrites,
            source_transition,
            history: MergeHistory {
                id: None,
                source_branch: source.to_string(),
                target_branch: target.to_string(),
                strategy: strategy.kind(),
                items_merged: planned as u64,
                items_rejected: rejected as u64,
                conflict_resolution: resolution,
                created_at: now,
            },
        };
        let merged_ids = self.storage.apply_merge(&plan).await?;
        let merged = merged_ids.len();
        if merged < planned {
            debug!(
                source = %source,
                target = %target,
                skipped = planned - merged,
                "records already present on target"
            );
        }

        info!(
            source = %source,
            target = %target,
            strategy = %strategy.kind(),
            merged,
            rejected,
            conflicts = conflicts.len(),
            "merge applied"
        );
        Ok(MergeResult {
            source: source.to_string(),
            target: target.to_string(),
            strategy: strategy.kind(),
            merged_count: merged as u64,
            rejected_count: rejected as u64,
            conflicts,
            merged_ids,
        })
    }

    /// Merge audit rows touching `branch` (all rows when `None`), newest first.
    pub async fn merge_history(
        &self,
        branch: Option<&str>,
    ) -> Result<Vec<MergeHistory>, CairnError> {
        self.storage.merge_history(branch).await
    }

    async fn compare(
        &self,
        source: &str,
        target: &str,
        category: Option<&str>,
    ) -> Result<Comparison, CairnError> {
        let source_records = self
            .storage
            .list_records(source, &RecordFilter::active().category(category))
            .await?;
        let target_records = self
            .storage
            .list_records(target, &RecordFilter::active())
            .await?;
        let index = TargetIndex::build(&target_records);

        let mut comparison = Comparison {
            new: Vec::new(),
            conflicting: Vec::new(),
            conflicts: Vec::new(),
        };
        for record in source_records {
            match self.classify(&record, &index) {
                Classification::Exact => {}
                Classification::Conflict(conflict) => {
                    comparison.conflicts.push(conflict);
                    comparison.conflicting.push(record);
                }
                Classification::New => comparison.new.push(record),
            }
        }
        Ok(comparison)
    }

    fn classify(&self, record: &VersionedRecord, index: &TargetIndex<'_>) -> Classification {
        match record.kind {
            RecordKind::Fact => {
                if index.fact_texts.contains(record.text.as_str()) {
                    return Classification::Exact;
                }
                let tokens = tokenize(&record.text);
                let best = index
                    .facts
                    .iter()
                    .map(|(candidate, candidate_tokens)| {
                        let similarity = match (&record.embedding, &candidate.embedding) {
                            (Some(a), Some(b)) => cosine(a, b),
                            _ => jaccard_sets(&tokens, candidate_tokens),
                        };
                        (similarity, *candidate)
                    })
                    .max_by(|a, b| a.0.total_cmp(&b.0));
                match best {
                    Some((similarity, candidate)) if similarity > self.match_threshold => {
                        Classification::Conflict(MergeConflict {
                            source_id: record.id.clone(),
                            target_id: candidate.id.clone(),
                            similarity,
                        })
                    }
                    _ => Classification::New,
                }
            }
            RecordKind::Relation => match &record.relation {
                Some(key) if index.relation_keys.contains(key) => Classification::Exact,
                _ => Classification::New,
            },
            RecordKind::Observation | RecordKind::Conversation => {
                if index.lineages.contains(record.lineage_id.as_str()) {
                    Classification::Exact
                } else {
                    Classification::New
                }
            }
        }
    }

    /// Lineage join for the native strategy. Returns inserts, overwrites,
    /// and the number of collisions kept on the target.
    async fn native_join(
        &self,
        source: &str,
        target: &str,
        policy: ConflictPolicy,
        now: DateTime<Utc>,
    ) -> Result<(Vec<VersionedRecord>, Vec<RecordOverwrite>, usize), CairnError> {
        let source_records = self
            .storage
            .list_records(source, &RecordFilter::active())
            .await?;
        let target_records = self
            .storage
            .list_records(target, &RecordFilter::active())
            .await?;
        let by_lineage: HashMap<&str, &VersionedRecord> = target_records
            .iter()
            .map(|r| (r.lineage_id.as_str(), r))
            .collect();

        let mut inserts = Vec::new();
        let mut overwrites = Vec::new();
        let mut skipped = 0;
        for record in &source_records {
            let Some(existing) = by_lineage.get(record.lineage_id.as_str()) else {
                inserts.push(copy_for_target(record, target, now));
                continue;
            };
            if same_content(record, existing) {
                continue;
            }
            match policy {
                ConflictPolicy::Skip => skipped += 1,
                ConflictPolicy::Accept => overwrites.push(RecordOverwrite {
                    target_id: existing.id.clone(),
                    text: record.text.clone(),
                    category: record.category.clone(),
                    confidence: record.confidence,
                    embedding: record.embedding.clone(),
                    updated_at: now,
                }),
            }
        }
        Ok((inserts, overwrites, skipped))
    }
}

fn same_content(a: &VersionedRecord, b: &VersionedRecord) -> bool {
    a.text == b.text && a.category == b.category && a.confidence == b.confidence
}

fn copy_for_target(record: &VersionedRecord, target: &str, now: DateTime<Utc>) -> VersionedRecord {
    let mut copy = record.copy_to(target, now);
    copy.source_type = SourceType::Merge;
    copy
}

fn copy_all(records: &[VersionedRecord], target: &str, now: DateTime<Utc>) -> Vec<VersionedRecord> {
    records
        .iter()
        .map(|r| copy_for_target(r, target, now))
        .collect()
}

fn status_transition(
    source: &Branch,
    strategy: MergeStrategyKind,
    now: DateTime<Utc>,
) -> StatusTransition {
    StatusTransition {
        branch_id: source.id.clone(),
        branch_name: source.name.clone(),
        expected: source.status,
        next: BranchStatus::Merged,
        strategy,
        at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::types::ObservationType;
    use cairn_test_utils::{RecordBuilder, TempStore};

    struct Fixture {
        store: TempStore,
        branches: BranchManager,
        engine: MergeEngine,
    }

    async fn fixture() -> Fixture {
        let store = TempStore::new().await.unwrap();
        let branches = BranchManager::new(store.storage());
        let engine = MergeEngine::new(store.storage(), branches.clone(), 0.85);
        Fixture {
            store,
            branches,
            engine,
        }
    }

    impl Fixture {
        async fn put(&self, record: VersionedRecord) -> VersionedRecord {
            self.store.storage().insert_record(&record).await.unwrap();
            record
        }

        async fn facts(&self, branch: &str) -> Vec<VersionedRecord> {
            self.store
                .storage()
                .list_records(branch, &RecordFilter::active_facts())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn diff_classifies_new_exact_and_conflicting() {
        let f = fixture().await;
        f.put(RecordBuilder::fact("main", "shared fact").build()).await;
        let target_version = f
            .put(RecordBuilder::fact("main", "the cache ttl is 300 seconds").build())
            .await;
        f.branches.create_branch("task/x", "main", None).await.unwrap();
        let conflicting = f
            .put(RecordBuilder::fact("task/x", "The cache TTL is 300 seconds!").build())
            .await;
        let fresh = f
            .put(RecordBuilder::fact("task/x", "completely unrelated finding").build())
            .await;

        let diff = f.engine.diff("task/x", "main", None).await.unwrap();
        let new_ids: Vec<&str> = diff.new_records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(new_ids, vec![fresh.id.as_str()]);
        assert_eq!(diff.conflicts.len(), 1);
        assert_eq!(diff.conflicts[0].source_id, conflicting.id);
        assert_eq!(diff.conflicts[0].target_id, target_version.id);
        assert!(diff.conflicts[0].similarity > 0.85);
    }

    #[tokio::test]
    async fn diff_prefers_cosine_when_both_sides_are_embedded() {
        let f = fixture().await;
        f.branches.create_branch("task/x", "main", None).await.unwrap();
        f.put(
            RecordBuilder::fact("main", "alpha beta")
                .embedding(vec![1.0, 0.0])
                .build(),
        )
        .await;
        // Lexically unrelated but identical vectors: a semantic conflict.
        f.put(
            RecordBuilder::fact("task/x", "gamma delta")
                .embedding(vec![1.0, 0.0])
                .build(),
        )
        .await;

        let diff = f.engine.diff("task/x", "main", None).await.unwrap();
        assert_eq!(diff.conflicts.len(), 1);
        assert!(diff.new_records.is_empty());
    }

    #[tokio::test]
    async fn diff_filters_source_by_category_and_requires_branches() {
        let f = fixture().await;
        f.branches.create_branch("task/x", "main", None).await.unwrap();
        f.put(RecordBuilder::fact("task/x", "auth tokens rotate").category("security").build())
            .await;
        f.put(RecordBuilder::fact("task/x", "queries are slow").category("performance").build())
            .await;

        let diff = f.engine.diff("task/x", "main", Some("security")).await.unwrap();
        assert_eq!(diff.new_records.len(), 1);
        assert_eq!(diff.new_records[0].text, "auth tokens rotate");

        let err = f.engine.diff("task/none", "main", None).await.unwrap_err();
        assert!(matches!(err, CairnError::BranchNotFound { .. }));
    }

    #[tokio::test]
    async fn relations_and_observations_match_by_key_and_lineage() {
        let f = fixture().await;
        f.put(RecordBuilder::relation("main", "api", "calls", "db").build()).await;
        f.put(RecordBuilder::observation("main", ObservationType::Note, "seen on main").build())
            .await;
        f.branches.create_branch("task/x", "main", None).await.unwrap();
        f.put(RecordBuilder::relation("task/x", "api", "calls", "db").build()).await;
        f.put(RecordBuilder::relation("task/x", "api", "calls", "cache").build()).await;

        let diff = f.engine.diff("task/x", "main", None).await.unwrap();
        assert_eq!(diff.new_records.len(), 1);
        assert_eq!(diff.new_records[0].text, "api calls cache");
        assert!(diff.conflicts.is_empty());
    }

    #[tokio::test]
    async fn auto_merge_keeps_target_version_on_conflict() {
        let f = fixture().await;
        let target_version = f
            .put(RecordBuilder::fact("main", "the cache ttl is 300 seconds").build())
            .await;
        f.branches.create_branch("task/x", "main", None).await.unwrap();
        f.put(RecordBuilder::fact("task/x", "The cache TTL is 300 seconds!").build())
            .await;
        f.put(RecordBuilder::fact("task/x", "new knowledge").build()).await;

        let result = f
            .engine
            .merge("task/x", "main", MergeStrategy::Auto)
            .await
            .unwrap();
        assert_eq!(result.merged_count, 1);
        assert_eq!(result.rejected_count, 1);
        assert_eq!(result.conflicts.len(), 1);

        let kept = f
            .store
            .storage()
            .get_record(&target_version.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.text, "the cache ttl is 300 seconds");
        let source = f.branches.get_branch("task/x").await.unwrap();
        assert_eq!(source.status, BranchStatus::Merged);
        assert_eq!(source.merge_strategy, Some(MergeStrategyKind::Auto));
    }

    #[tokio::test]
    async fn repeat_auto_merge_is_idempotent_and_audited() {
        let f = fixture().await;
        f.branches.create_branch("task/x", "main", None).await.unwrap();
        f.put(RecordBuilder::fact("task/x", "only once").build()).await;

        let first = f.engine.merge("task/x", "main", MergeStrategy::Auto).await.unwrap();
        let second = f.engine.merge("task/x", "main", MergeStrategy::Auto).await.unwrap();
        let third = f.engine.merge("task/x", "main", MergeStrategy::Auto).await.unwrap();
        assert_eq!(first.merged_count, 1);
        assert_eq!(second.merged_count, 0);
        assert_eq!(third.merged_count, 0);
        assert_eq!(f.facts("main").await.len(), 1);
        assert_eq!(f.engine.merge_history(Some("task/x")).await.unwrap().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_remerges_insert_once() {
        let f = fixture().await;
        f.branches.create_branch("task/r", "main", None).await.unwrap();
        f.put(RecordBuilder::fact("task/r", "first finding").build()).await;
        f.engine.merge("task/r", "main", MergeStrategy::Auto).await.unwrap();
        f.put(RecordBuilder::fact("task/r", "late finding after merge").build())
            .await;

        let (first, second) = (f.engine.clone(), f.engine.clone());
        let (a, b) = tokio::join!(
            tokio::spawn(async move { first.merge("task/r", "main", MergeStrategy::Auto).await }),
            tokio::spawn(async move { second.merge("task/r", "main", MergeStrategy::Auto).await }),
        );
        let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());
        assert_eq!(a.merged_count + b.merged_count, 1);

        let late: Vec<_> = f
            .facts("main")
            .await
            .into_iter()
            .filter(|r| r.text == "late finding after merge")
            .collect();
        assert_eq!(late.len(), 1);

        let audit = f.engine.merge_history(Some("task/r")).await.unwrap();
        assert_eq!(audit.len(), 3);
        assert_eq!(audit.iter().map(|h| h.items_merged).sum::<u64>(), 2);
    }

    #[tokio::test]
    async fn cherry_pick_counts_unmatched_ids_and_keeps_status() {
        let f = fixture().await;
        f.branches.create_branch("task/x", "main", None).await.unwrap();
        let wanted = f.put(RecordBuilder::fact("task/x", "pick me").build()).await;
        f.put(RecordBuilder::fact("task/x", "leave me").build()).await;

        let result = f
            .engine
            .merge(
                "task/x",
                "main",
                MergeStrategy::CherryPick {
                    items: vec![wanted.id.clone(), "missing-id".into(), wanted.id.clone()],
                },
            )
            .await
            .unwrap();
        assert_eq!(result.merged_count, 1);
        assert_eq!(result.rejected_count, 1);

        let main_facts = f.facts("main").await;
        assert_eq!(main_facts.len(), 1);
        assert_eq!(main_facts[0].lineage_id, wanted.id);
        assert_eq!(main_facts[0].source_type, SourceType::Merge);
        assert_eq!(
            f.branches.get_branch("task/x").await.unwrap().status,
            BranchStatus::Active
        );
    }

    #[tokio::test]
    async fn squash_includes_conflicting_records() {
        let f = fixture().await;
        f.put(RecordBuilder::fact("main", "the cache ttl is 300 seconds").build())
            .await;
        f.branches.create_branch("task/x", "main", None).await.unwrap();
        f.put(RecordBuilder::fact("task/x", "The cache TTL is 300 seconds!").build())
            .await;

        let result = f.engine.merge("task/x", "main", MergeStrategy::Squash).await.unwrap();
        assert_eq!(result.merged_count, 1);
        assert_eq!(result.rejected_count, 0);
        assert_eq!(f.facts("main").await.len(), 2);
    }

    #[tokio::test]
    async fn squash_never_copies_verbatim_matches() {
        let f = fixture().await;
        f.put(RecordBuilder::fact("main", "shared fact").build()).await;
        f.branches.create_branch("task/x", "main", None).await.unwrap();
        f.put(RecordBuilder::fact("task/x", "shared fact").build()).await;
        f.put(RecordBuilder::fact("task/x", "something else entirely").build())
            .await;

        let result = f.engine.merge("task/x", "main", MergeStrategy::Squash).await.unwrap();
        assert_eq!(result.merged_count, 1);
        let texts: Vec<String> = f.facts("main").await.into_iter().map(|r| r.text).collect();
        assert_eq!(texts.iter().filter(|t| *t == "shared fact").count(), 1);
        assert!(texts.contains(&"something else entirely".to_string()));
    }

    #[tokio::test]
    async fn native_skip_and_accept_policies() {
        let f = fixture().await;
        let original = f.put(RecordBuilder::fact("main", "version one").build()).await;
        f.branches.create_branch("task/x", "main", None).await.unwrap();
        f.branches.create_branch("task/y", "main", None).await.unwrap();

        // Diverge the forked copy on task/x.
        let copy = f.facts("task/x").await[0].clone();
        assert_eq!(copy.lineage_id, original.id);
        f.store
            .storage()
            .apply_merge(&MergePlan {
                source: "task/y".into(),
                target: "task/x".into(),
                inserts: vec![],
                overwrites: vec![RecordOverwrite {
                    target_id: copy.id.clone(),
                    text: "version two".into(),
                    category: None,
                    confidence: copy.confidence,
                    embedding: None,
                    updated_at: Utc::now(),
                }],
                source_transition: None,
                history: MergeHistory {
                    id: None,
                    source_branch: "task/y".into(),
                    target_branch: "task/x".into(),
                    strategy: MergeStrategyKind::CherryPick,
                    items_merged: 1,
                    items_rejected: 0,
                    conflict_resolution: "cherry_pick".into(),
                    created_at: Utc::now(),
                },
            })
            .await
            .unwrap();
        f.put(RecordBuilder::fact("task/x", "brand new").build()).await;

        let skip = f
            .engine
            .merge(
                "task/x",
                "main",
                MergeStrategy::Native {
                    conflict_policy: ConflictPolicy::Skip,
                },
            )
            .await
            .unwrap();
        assert_eq!(skip.merged_count, 1);
        assert_eq!(skip.rejected_count, 1);
        assert!(f.facts("main").await.iter().any(|r| r.text == "version one"));

        let accept = f
            .engine
            .merge(
                "task/x",
                "main",
                MergeStrategy::Native {
                    conflict_policy: ConflictPolicy::Accept,
                },
            )
            .await
            .unwrap();
        // "brand new" already arrived with its lineage, so only the overwrite counts.
        assert_eq!(accept.merged_count, 1);
        assert_eq!(accept.rejected_count, 0);
        let main_texts: Vec<String> = f.facts("main").await.into_iter().map(|r| r.text).collect();
        assert!(main_texts.contains(&"version two".to_string()));
        assert!(!main_texts.contains(&"version one".to_string()));
        assert!(main_texts.contains(&"brand new".to_string()));
    }

    #[tokio::test]
    async fn merge_guards() {
        let f = fixture().await;
        let err = f.engine.merge("main", "main", MergeStrategy::Auto).await.unwrap_err();
        assert!(matches!(err, CairnError::PolicyViolation(_)));

        f.branches.create_branch("task/x", "main", None).await.unwrap();
        f.branches.archive_branch("task/x").await.unwrap();
        let err = f.engine.merge("task/x", "main", MergeStrategy::Auto).await.unwrap_err();
        assert!(matches!(err, CairnError::PolicyViolation(_)));

        let err = f.engine.merge("task/none", "main", MergeStrategy::Auto).await.unwrap_err();
        assert!(matches!(err, CairnError::BranchNotFound { .. }));
    }

    #[tokio::test]
    async fn merging_main_into_a_child_leaves_main_active() {
        let f = fixture().await;
        f.branches.create_branch("task/x", "main", None).await.unwrap();
        f.put(RecordBuilder::fact("main", "late addition").build()).await;

        let result = f.engine.merge("main", "task/x", MergeStrategy::Auto).await.unwrap();
        assert_eq!(result.merged_count, 1);
        assert_eq!(
            f.branches.get_branch("main").await.unwrap().status,
            BranchStatus::Active
        );
    }
}
