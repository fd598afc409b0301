// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across adapter traits and the versioning engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Name of the root branch. It always exists, is its own parent, and is never archived.
pub const ROOT_BRANCH: &str = "main";

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter plugged into the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Storage,
    Embedding,
}

// --- Branch registry ---

/// Lifecycle status of a branch. Transitions are soft; rows are never deleted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Active,
    Merged,
    Archived,
}

impl BranchStatus {
    /// Active and merged branches hold their name; archived rows do not.
    pub fn is_live(&self) -> bool {
        !matches!(self, BranchStatus::Archived)
    }
}

/// A named, forkable namespace over the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Row identity. Re-creating an archived name yields a new id.
    pub id: String,
    pub name: String,
    /// Parent branch name; `main` is its own parent.
    pub parent_name: String,
    pub status: BranchStatus,
    pub forked_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub merge_strategy: Option<MergeStrategyKind>,
    pub metadata: BranchMetadata,
}

impl Branch {
    /// Build a fresh active branch row forked from `parent_name` at `now`.
    pub fn new(name: &str, parent_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            parent_name: parent_name.to_string(),
            status: BranchStatus::Active,
            forked_at: now,
            merged_at: None,
            merge_strategy: None,
            metadata: BranchMetadata::default(),
        }
    }

    /// The root branch row as bootstrapped by storage initialization.
    pub fn root(now: DateTime<Utc>) -> Self {
        Self {
            id: ROOT_BRANCH.to_string(),
            ..Self::new(ROOT_BRANCH, ROOT_BRANCH, now)
        }
    }

    pub fn is_root(&self) -> bool {
        self.name == ROOT_BRANCH
    }
}

/// Typed branch metadata with a residual map for unknown keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Days after `forked_at` at which the branch is considered expired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_at: Option<DateTime<Utc>>,
    /// Keys written by newer or foreign writers, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BranchMetadata {
    /// Merge the non-empty fields of `patch` into this map and stamp `enriched_at`.
    ///
    /// Keys absent from the patch are left untouched.
    pub fn apply(&mut self, patch: MetadataPatch, now: DateTime<Utc>) {
        if let Some(purpose) = patch.purpose {
            self.purpose = Some(purpose);
        }
        if let Some(owner) = patch.owner {
            self.owner = Some(owner);
        }
        if let Some(ttl_days) = patch.ttl_days {
            self.ttl_days = Some(ttl_days);
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        self.enriched_at = Some(now);
    }
}

/// Partial metadata update supplied to branch enrichment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub purpose: Option<String>,
    pub owner: Option<String>,
    pub ttl_days: Option<u32>,
    pub tags: Option<Vec<String>>,
}

// --- Records ---

/// What a versioned record represents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Fact,
    Relation,
    Observation,
    Conversation,
}

/// Lifecycle status of a record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Visible to listings, diffs, and consolidation.
    Active,
    /// Absorbed into the record named by `parent_id`.
    Superseded,
    /// Withdrawn without a replacement.
    Invalidated,
}

/// Kind of raw observation captured during a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    Insight,
    Decision,
    Discovery,
    Error,
    Action,
    Note,
}

impl ObservationType {
    /// Observation types that session consolidation promotes into facts.
    pub fn is_promotable(&self) -> bool {
        matches!(
            self,
            ObservationType::Insight | ObservationType::Decision | ObservationType::Discovery
        )
    }
}

/// How a record came to exist.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Written directly by a caller.
    Explicit,
    /// Extracted from a conversation by an external collaborator.
    Extracted,
    /// Created by a consolidation pass.
    Consolidation,
    /// Created on a target branch by a merge.
    Merge,
}

/// Exact identity of a relation record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationKey {
    pub source_entity: String,
    pub target_entity: String,
    pub relation_type: String,
}

/// A record owned by exactly one branch: a fact, relation, observation, or
/// conversation marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub id: String,
    /// Owning branch.
    pub branch_name: String,
    pub kind: RecordKind,
    /// The unit compared by diff and deduplication.
    pub text: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub category: Option<String>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub status: RecordStatus,
    /// For superseded records, the surviving record.
    pub parent_id: Option<String>,
    /// Id of the record this one was copied from by a fork or merge.
    /// Equal to `id` for originals.
    pub lineage_id: String,
    pub source_type: SourceType,
    pub observation_type: Option<ObservationType>,
    pub relation: Option<RelationKey>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VersionedRecord {
    /// A new active original record with default confidence.
    pub fn new(branch_name: &str, kind: RecordKind, text: &str, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            lineage_id: id.clone(),
            id,
            branch_name: branch_name.to_string(),
            kind,
            text: text.to_string(),
            embedding: None,
            category: None,
            confidence: 1.0,
            status: RecordStatus::Active,
            parent_id: None,
            source_type: SourceType::Explicit,
            observation_type: None,
            relation: None,
            session_id: None,
            agent_id: None,
            task_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy this record onto `branch_name` under a fresh id, preserving lineage.
    pub fn copy_to(&self, branch_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            branch_name: branch_name.to_string(),
            status: RecordStatus::Active,
            parent_id: None,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Copy this record onto a freshly forked branch. Unlike [`copy_to`],
    /// the fork copy keeps the original timestamps so recency ordering on
    /// the child matches the parent.
    ///
    /// [`copy_to`]: Self::copy_to
    pub fn fork_to(&self, branch_name: &str) -> Self {
        Self {
            created_at: self.created_at,
            updated_at: self.updated_at,
            ..self.copy_to(branch_name, self.created_at)
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

/// Filter applied when listing records on a branch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub kind: Option<RecordKind>,
    pub status: Option<RecordStatus>,
    pub category: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    /// Empty means any observation type.
    pub observation_types: Vec<ObservationType>,
}

impl RecordFilter {
    /// Active records of every kind.
    pub fn active() -> Self {
        Self {
            status: Some(RecordStatus::Active),
            ..Self::default()
        }
    }

    /// Active facts.
    pub fn active_facts() -> Self {
        Self::active().kind(RecordKind::Fact)
    }

    pub fn kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn category(mut self, category: Option<&str>) -> Self {
        self.category = category.map(str::to_string);
        self
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }

    pub fn observation_types(mut self, types: &[ObservationType]) -> Self {
        self.observation_types = types.to_vec();
        self
    }
}

/// Aggregate activity of a single branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchActivity {
    pub fact_count: u64,
    pub relation_count: u64,
    pub conversation_count: u64,
    pub observation_count: u64,
    /// Distinct non-null agent identifiers across the branch's records.
    pub agent_count: u64,
    /// Latest `created_at` across record kinds, if the branch has any content.
    pub last_activity: Option<DateTime<Utc>>,
}

// --- Merge ---

/// Tag of a merge strategy, as persisted on branches and audit rows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategyKind {
    Auto,
    CherryPick,
    Squash,
    Native,
}

/// Resolution applied by the storage-native merge on key collision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep the target row.
    #[default]
    Skip,
    /// Overwrite the target row with the source row.
    Accept,
}

/// A soft conflict: same referent on both branches, divergent literal content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub source_id: String,
    pub target_id: String,
    pub similarity: f64,
}

/// One row per merge invocation, whatever its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeHistory {
    /// Assigned by storage.
    pub id: Option<i64>,
    pub source_branch: String,
    pub target_branch: String,
    pub strategy: MergeStrategyKind,
    pub items_merged: u64,
    pub items_rejected: u64,
    pub conflict_resolution: String,
    pub created_at: DateTime<Utc>,
}

/// Compare-and-swap on a branch's status, applied with a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub branch_id: String,
    pub branch_name: String,
    pub expected: BranchStatus,
    pub next: BranchStatus,
    pub strategy: MergeStrategyKind,
    pub at: DateTime<Utc>,
}

/// In-place replacement of a target record's content.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOverwrite {
    pub target_id: String,
    pub text: String,
    pub category: Option<String>,
    pub confidence: f64,
    pub embedding: Option<Vec<f32>>,
    pub updated_at: DateTime<Utc>,
}

/// Everything a merge writes, applied atomically by storage.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    pub source: String,
    pub target: String,
    pub inserts: Vec<VersionedRecord>,
    pub overwrites: Vec<RecordOverwrite>,
    pub source_transition: Option<StatusTransition>,
    pub history: MergeHistory,
}

// --- Consolidation ---

/// Granularity of a consolidation pass.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationLevel {
    Session,
    Agent,
    Task,
}

/// Audit row written by each mutating consolidation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationHistory {
    /// Assigned by storage.
    pub id: Option<i64>,
    pub level: ConsolidationLevel,
    pub branch_name: String,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub facts_created: u64,
    pub facts_updated: u64,
    pub facts_deduplicated: u64,
    pub observations_processed: u64,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Marks `id` superseded by `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supersession {
    pub id: String,
    pub parent_id: String,
}

/// Everything a consolidation pass writes, applied atomically by storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationPlan {
    pub branch: String,
    pub inserts: Vec<VersionedRecord>,
    /// `(record id, new confidence)`.
    pub confidence_updates: Vec<(String, f64)>,
    pub supersessions: Vec<Supersession>,
    pub history: ConsolidationHistory,
}

// --- Embedding ---

/// Input for an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    pub texts: Vec<String>,
}

/// Output from an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    pub embeddings: Vec<Vec<f32>>,
    pub dimensions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn statuses_use_snake_case_strings() {
        assert_eq!(BranchStatus::Archived.to_string(), "archived");
        assert_eq!(MergeStrategyKind::CherryPick.to_string(), "cherry_pick");
        assert_eq!(
            MergeStrategyKind::from_str("cherry_pick").unwrap(),
            MergeStrategyKind::CherryPick
        );
        assert_eq!(RecordStatus::from_str("superseded").unwrap(), RecordStatus::Superseded);
        assert!(RecordKind::from_str("document").is_err());
    }

    #[test]
    fn root_branch_is_its_own_parent() {
        let root = Branch::root(now());
        assert!(root.is_root());
        assert_eq!(root.id, ROOT_BRANCH);
        assert_eq!(root.parent_name, ROOT_BRANCH);
        assert_eq!(root.status, BranchStatus::Active);
    }

    #[test]
    fn new_branches_get_distinct_identities() {
        let a = Branch::new("task/x", "main", now());
        let b = Branch::new("task/x", "main", now());
        assert_ne!(a.id, b.id);
        assert!(!a.is_root());
    }

    #[test]
    fn metadata_patch_keeps_untouched_keys() {
        let mut meta = BranchMetadata {
            purpose: Some("explore".into()),
            owner: Some("alice".into()),
            ..BranchMetadata::default()
        };
        meta.extra.insert("color".into(), serde_json::json!("blue"));

        let stamp = now();
        meta.apply(
            MetadataPatch {
                ttl_days: Some(7),
                ..MetadataPatch::default()
            },
            stamp,
        );

        assert_eq!(meta.purpose.as_deref(), Some("explore"));
        assert_eq!(meta.owner.as_deref(), Some("alice"));
        assert_eq!(meta.ttl_days, Some(7));
        assert_eq!(meta.enriched_at, Some(stamp));
        assert_eq!(meta.extra["color"], "blue");
    }

    #[test]
    fn metadata_preserves_unknown_keys_through_json() {
        let json = r#"{"purpose":"p","ttl_days":3,"legacy_flag":true}"#;
        let meta: BranchMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.ttl_days, Some(3));
        assert_eq!(meta.extra["legacy_flag"], true);

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["legacy_flag"], true);
        assert!(back.get("owner").is_none());
    }

    #[test]
    fn copy_preserves_lineage_and_resets_identity() {
        let mut original = VersionedRecord::new("main", RecordKind::Fact, "Rust is fast", now());
        original.status = RecordStatus::Superseded;
        original.parent_id = Some("other".into());

        let copy = original.copy_to("task/x", now());
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.lineage_id, original.id);
        assert_eq!(copy.branch_name, "task/x");
        assert_eq!(copy.status, RecordStatus::Active);
        assert!(copy.parent_id.is_none());
        assert_eq!(copy.text, original.text);
    }

    #[test]
    fn fork_copy_keeps_timestamps() {
        let created = now() - chrono::Duration::hours(3);
        let mut original = VersionedRecord::new("main", RecordKind::Fact, "Rust is fast", created);
        original.updated_at = created + chrono::Duration::minutes(5);

        let copy = original.fork_to("task/x");
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.lineage_id, original.id);
        assert_eq!(copy.branch_name, "task/x");
        assert_eq!(copy.created_at, original.created_at);
        assert_eq!(copy.updated_at, original.updated_at);
    }

    #[test]
    fn promotable_observation_types() {
        assert!(ObservationType::Insight.is_promotable());
        assert!(ObservationType::Decision.is_promotable());
        assert!(ObservationType::Discovery.is_promotable());
        assert!(!ObservationType::Error.is_promotable());
        assert!(!ObservationType::Note.is_promotable());
    }

    #[test]
    fn record_filter_builders() {
        let filter = RecordFilter::active_facts().category(Some("security"));
        assert_eq!(filter.kind, Some(RecordKind::Fact));
        assert_eq!(filter.status, Some(RecordStatus::Active));
        assert_eq!(filter.category.as_deref(), Some("security"));
    }
}
