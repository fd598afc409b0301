// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Branch hierarchy, per-branch statistics, and lifecycle policy.
//!
//! Lifecycle policies (auto-archive, TTL expiry) are evaluated on demand; a
//! scheduler outside this crate decides when to run them. Every archive goes
//! through [`BranchManager`]'s status compare-and-swap, so overlapping policy
//! runs archive each branch once.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use cairn_core::types::{Branch, BranchActivity, BranchMetadata, BranchStatus, MetadataPatch};
use cairn_core::{CairnError, StorageAdapter};

use crate::branch::BranchManager;

/// Naming conventions, checked in order. The first match names the convention.
static NAME_CONVENTIONS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("main", r"^main$"),
        ("task", r"^task/[a-z0-9][a-z0-9-]*$"),
        ("task_agent", r"^task/[a-z0-9][a-z0-9-]*/[a-z0-9][a-z0-9_-]*$"),
        ("template", r"^template/[a-z0-9][a-z0-9-]*/v[0-9]+$"),
        ("team", r"^team/[a-z0-9][a-z0-9-]*/[a-z0-9][a-z0-9-]*$"),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (name, re)))
    .collect()
});

/// One branch in the hierarchy with its (depth-limited) children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchNode {
    pub name: String,
    pub status: BranchStatus,
    pub forked_at: DateTime<Utc>,
    pub metadata: BranchMetadata,
    pub children: Vec<BranchNode>,
}

/// Aggregate statistics for one branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchStats {
    pub name: String,
    pub status: BranchStatus,
    #[serde(flatten)]
    pub activity: BranchActivity,
}

/// Parameters of an auto-archive run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutoArchivePolicy {
    pub inactive_days: u32,
    pub archive_merged: bool,
    pub dry_run: bool,
}

impl Default for AutoArchivePolicy {
    fn default() -> Self {
        Self {
            inactive_days: 30,
            archive_merged: true,
            dry_run: false,
        }
    }
}

/// Why a branch was selected for archival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    Merged,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveCandidate {
    pub name: String,
    pub status: BranchStatus,
    pub reason: ArchiveReason,
}

/// Result of an auto-archive run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoArchiveReport {
    pub candidates: Vec<ArchiveCandidate>,
    /// Branches this call archived. Candidates archived by a concurrent run
    /// are not counted.
    pub archived_count: u64,
}

/// A branch past its time-to-live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiredBranch {
    pub name: String,
    pub status: BranchStatus,
    pub ttl_days: u32,
    pub forked_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Outcome of a branch-name convention check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameValidation {
    pub valid: bool,
    pub convention: Option<String>,
    pub suggestion: Option<String>,
}

/// Check `name` against the branch naming conventions.
///
/// Names matching no convention get a `task/<slug>` suggestion when the name
/// contains anything sluggable.
pub fn validate_branch_name(name: &str) -> NameValidation {
    if let Some((convention, _)) = NAME_CONVENTIONS.iter().find(|(_, re)| re.is_match(name)) {
        return NameValidation {
            valid: true,
            convention: Some((*convention).to_string()),
            suggestion: None,
        };
    }
    let slug = slugify(name);
    NameValidation {
        valid: false,
        convention: None,
        suggestion: (!slug.is_empty()).then(|| format!("task/{slug}")),
    }
}

/// Lowercase `text`, collapsing every run of non-alphanumerics into one `-`.
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Read-mostly view over the branch registry plus lifecycle policies.
#[derive(Clone)]
pub struct BranchTopologyEngine {
    storage: Arc<dyn StorageAdapter>,
    branches: BranchManager,
}

impl BranchTopologyEngine {
    pub fn new(storage: Arc<dyn StorageAdapter>, branches: BranchManager) -> Self {
        Self { storage, branches }
    }

    /// Build the hierarchy rooted at `root`.
    ///
    /// `root` sits at depth 0; nodes at `max_depth` are returned without
    /// children. Archived branches are omitted unless `include_archived`, but
    /// an explicitly requested root is always returned.
    pub async fn get_topology(
        &self,
        root: &str,
        max_depth: usize,
        include_archived: bool,
    ) -> Result<BranchNode, CairnError> {
        // One row per name: the live row if any, else the newest archived one.
        let mut current: HashMap<String, Branch> = HashMap::new();
        for branch in self.storage.list_branches(None).await? {
            match current.get(&branch.name) {
                Some(seen) if seen.status.is_live() || !branch.status.is_live() => {}
                _ => {
                    current.insert(branch.name.clone(), branch);
                }
            }
        }

        let root = current
            .remove(root)
            .ok_or_else(|| CairnError::branch_not_found(root))?;

        let mut children: HashMap<String, Vec<Branch>> = HashMap::new();
        for branch in current.into_values() {
            if branch.name == branch.parent_name {
                continue;
            }
            if include_archived || branch.status.is_live() {
                children.entry(branch.parent_name.clone()).or_default().push(branch);
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| a.forked_at.cmp(&b.forked_at).then(a.name.cmp(&b.name)));
        }

        let mut ancestors = HashSet::new();
        Ok(build_node(root, &mut children, &mut ancestors, 0, max_depth))
    }

    /// Record counts, distinct agents, and last activity for `name`.
    pub async fn get_branch_stats(&self, name: &str) -> Result<BranchStats, CairnError> {
        let branch = self.branches.get_branch(name).await?;
        let activity = self.storage.branch_activity(name).await?;
        Ok(BranchStats {
            name: branch.name,
            status: branch.status,
            activity,
        })
    }

    /// Merge the supplied fields into the branch metadata and stamp `enriched_at`.
    pub async fn enrich_branch_metadata(
        &self,
        name: &str,
        patch: MetadataPatch,
    ) -> Result<Branch, CairnError> {
        let mut branch = self.branches.get_branch(name).await?;
        if branch.status == BranchStatus::Archived {
            return Err(CairnError::PolicyViolation(format!(
                "branch {name} is archived; its metadata is frozen"
            )));
        }
        branch.metadata.apply(patch, Utc::now());
        self.storage
            .update_branch_metadata(name, &branch.metadata)
            .await?;
        debug!(branch = %name, "metadata enriched");
        Ok(branch)
    }

    /// Select merged and inactive branches and, unless `dry_run`, archive them.
    ///
    /// A branch another caller archives first is skipped silently; any other
    /// failure is logged and the run moves on to the next candidate.
    pub async fn apply_auto_archive(
        &self,
        policy: AutoArchivePolicy,
    ) -> Result<AutoArchiveReport, CairnError> {
        let now = Utc::now();
        let cutoff = now - Duration::days(i64::from(policy.inactive_days));

        let mut selected = Vec::new();
        for branch in self.storage.list_branches(None).await? {
            if branch.is_root() {
                continue;
            }
            let reason = match branch.status {
                BranchStatus::Merged if policy.archive_merged => ArchiveReason::Merged,
                BranchStatus::Active => {
                    let activity = self.storage.branch_activity(&branch.name).await?;
                    // Fork copies keep the parent's timestamps, so the fork
                    // itself counts as activity.
                    let last = activity
                        .last_activity
                        .map_or(branch.forked_at, |at| at.max(branch.forked_at));
                    if last >= cutoff {
                        continue;
                    }
                    ArchiveReason::Inactive
                }
                _ => continue,
            };
            selected.push((branch, reason));
        }

        let mut report = AutoArchiveReport::default();
        for (branch, reason) in selected {
            if !policy.dry_run {
                match self.branches.archive_row(&branch).await {
                    Ok(true) => report.archived_count += 1,
                    Ok(false) => debug!(branch = %branch.name, "archived by a concurrent run"),
                    Err(e) => warn!(branch = %branch.name, error = %e, "auto-archive failed"),
                }
            }
            report.candidates.push(ArchiveCandidate {
                name: branch.name,
                status: branch.status,
                reason,
            });
        }

        info!(
            candidates = report.candidates.len(),
            archived = report.archived_count,
            dry_run = policy.dry_run,
            "auto-archive finished"
        );
        Ok(report)
    }

    /// Live branches whose `ttl_days` has elapsed since they were forked.
    pub async fn check_ttl_expiry(&self) -> Result<Vec<ExpiredBranch>, CairnError> {
        let now = Utc::now();
        let expired = self
            .storage
            .list_branches(None)
            .await?
            .into_iter()
            .filter(|b| b.status.is_live())
            .filter_map(|b| {
                let ttl_days = b.metadata.ttl_days?;
                let expired_at = b.forked_at + Duration::days(i64::from(ttl_days));
                (expired_at < now).then(|| ExpiredBranch {
                    name: b.name,
                    status: b.status,
                    ttl_days,
                    forked_at: b.forked_at,
                    expired_at,
                })
            })
            .collect();
        Ok(expired)
    }
}

fn build_node(
    branch: Branch,
    children: &mut HashMap<String, Vec<Branch>>,
    ancestors: &mut HashSet<String>,
    depth: usize,
    max_depth: usize,
) -> BranchNode {
    let mut node = BranchNode {
        name: branch.name,
        status: branch.status,
        forked_at: branch.forked_at,
        metadata: branch.metadata,
        children: Vec::new(),
    };
    if depth >= max_depth || !ancestors.insert(node.name.clone()) {
        return node;
    }
    if let Some(kids) = children.remove(&node.name) {
        node.children = kids
            .into_iter()
            .map(|kid| build_node(kid, children, ancestors, depth + 1, max_depth))
            .collect();
    }
    ancestors.remove(&node.name);
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::types::ROOT_BRANCH;
    use cairn_test_utils::{RecordBuilder, TempStore};

    async fn engine() -> (BranchTopologyEngine, BranchManager, TempStore) {
        let store = TempStore::new().await.unwrap();
        let branches = BranchManager::new(store.storage());
        let engine = BranchTopologyEngine::new(store.storage(), branches.clone());
        (engine, branches, store)
    }

    async fn fork_at(
        store: &TempStore,
        name: &str,
        parent: &str,
        forked_at: DateTime<Utc>,
    ) -> Branch {
        store
            .storage()
            .fork_branch(&Branch::new(name, parent, forked_at))
            .await
            .unwrap()
    }

    #[test]
    fn names_matching_a_convention_are_valid() {
        for (name, convention) in [
            ("main", "main"),
            ("task/fix-login", "task"),
            ("task/fix-login/agent_7", "task_agent"),
            ("template/onboarding/v2", "template"),
            ("team/acme/search", "team"),
        ] {
            let result = validate_branch_name(name);
            assert!(result.valid, "{name}");
            assert_eq!(result.convention.as_deref(), Some(convention));
            assert!(result.suggestion.is_none());
        }
    }

    #[test]
    fn unconventional_names_get_a_task_suggestion() {
        let result = validate_branch_name("Fix Login Bug!!");
        assert!(!result.valid);
        assert!(result.convention.is_none());
        assert_eq!(result.suggestion.as_deref(), Some("task/fix-login-bug"));

        assert_eq!(
            validate_branch_name("template/x/2").suggestion.as_deref(),
            Some("task/template-x-2")
        );
        assert!(validate_branch_name("///").suggestion.is_none());
    }

    #[tokio::test]
    async fn topology_nests_children_in_fork_order() {
        let (engine, branches, _store) = engine().await;
        branches.create_branch("task/a", "main", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        branches.create_branch("task/b", "main", None).await.unwrap();
        branches.create_branch("task/a/agent", "task/a", None).await.unwrap();

        let tree = engine.get_topology(ROOT_BRANCH, 10, false).await.unwrap();
        assert_eq!(tree.name, "main");
        let names: Vec<_> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["task/a", "task/b"]);
        assert_eq!(tree.children[0].children[0].name, "task/a/agent");
    }

    #[tokio::test]
    async fn topology_respects_depth_and_archived_filter() {
        let (engine, branches, _store) = engine().await;
        branches.create_branch("task/a", "main", None).await.unwrap();
        branches.create_branch("task/a/agent", "task/a", None).await.unwrap();
        branches.create_branch("task/old", "main", None).await.unwrap();
        branches.archive_branch("task/old").await.unwrap();

        let shallow = engine.get_topology(ROOT_BRANCH, 1, false).await.unwrap();
        assert_eq!(shallow.children.len(), 1);
        assert!(shallow.children[0].children.is_empty());

        let all = engine.get_topology(ROOT_BRANCH, 5, true).await.unwrap();
        assert!(all.children.iter().any(|c| c.name == "task/old"));

        let subtree = engine.get_topology("task/a", 5, false).await.unwrap();
        assert_eq!(subtree.children[0].name, "task/a/agent");
    }

    #[tokio::test]
    async fn topology_of_unknown_root_fails() {
        let (engine, _branches, _store) = engine().await;
        let err = engine.get_topology("task/none", 3, false).await.unwrap_err();
        assert!(matches!(err, CairnError::BranchNotFound { .. }));
    }

    #[tokio::test]
    async fn stats_count_records_and_agents() {
        let (engine, branches, store) = engine().await;
        branches.create_branch("task/s", "main", None).await.unwrap();
        let storage = store.storage();
        for record in [
            RecordBuilder::fact("task/s", "one").agent("a1").build(),
            RecordBuilder::fact("task/s", "two").agent("a2").build(),
            RecordBuilder::relation("task/s", "x", "uses", "y").agent("a1").build(),
            RecordBuilder::conversation("task/s", "s1").build(),
        ] {
            storage.insert_record(&record).await.unwrap();
        }

        let stats = engine.get_branch_stats("task/s").await.unwrap();
        assert_eq!(stats.activity.fact_count, 2);
        assert_eq!(stats.activity.relation_count, 1);
        assert_eq!(stats.activity.conversation_count, 1);
        assert_eq!(stats.activity.observation_count, 0);
        assert_eq!(stats.activity.agent_count, 2);
        assert!(stats.activity.last_activity.is_some());

        let empty = engine.get_branch_stats("main").await.unwrap();
        assert_eq!(empty.activity.fact_count, 0);
        assert!(empty.activity.last_activity.is_none());
    }

    #[tokio::test]
    async fn enrichment_merges_without_clobbering() {
        let (engine, branches, _store) = engine().await;
        branches
            .create_branch("task/e", "main", Some("first pass"))
            .await
            .unwrap();
        engine
            .enrich_branch_metadata(
                "task/e",
                MetadataPatch {
                    owner: Some("ops".into()),
                    ..MetadataPatch::default()
                },
            )
            .await
            .unwrap();
        engine
            .enrich_branch_metadata(
                "task/e",
                MetadataPatch {
                    ttl_days: Some(7),
                    tags: Some(vec!["infra".into()]),
                    ..MetadataPatch::default()
                },
            )
            .await
            .unwrap();

        let branch = branches.get_branch("task/e").await.unwrap();
        assert_eq!(branch.metadata.description.as_deref(), Some("first pass"));
        assert_eq!(branch.metadata.owner.as_deref(), Some("ops"));
        assert_eq!(branch.metadata.ttl_days, Some(7));
        assert_eq!(branch.metadata.tags, vec!["infra"]);
        assert!(branch.metadata.enriched_at.is_some());
    }

    #[tokio::test]
    async fn enriching_an_archived_branch_is_refused() {
        let (engine, branches, _store) = engine().await;
        branches.create_branch("task/z", "main", None).await.unwrap();
        branches.archive_branch("task/z").await.unwrap();
        let err = engine
            .enrich_branch_metadata("task/z", MetadataPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CairnError::PolicyViolation(_)));
    }

    #[tokio::test]
    async fn auto_archive_selects_merged_and_inactive_branches() {
        let (engine, branches, store) = engine().await;
        let old = Utc::now() - Duration::days(40);
        fork_at(&store, "task/stale", "main", old).await;
        fork_at(&store, "task/busy", "main", old).await;
        store
            .storage()
            .insert_record(&RecordBuilder::fact("task/busy", "fresh work").build())
            .await
            .unwrap();
        branches.create_branch("task/new", "main", None).await.unwrap();

        let dry = engine
            .apply_auto_archive(AutoArchivePolicy {
                dry_run: true,
                ..AutoArchivePolicy::default()
            })
            .await
            .unwrap();
        assert_eq!(dry.archived_count, 0);
        let names: Vec<_> = dry.candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["task/stale"]);
        assert_eq!(dry.candidates[0].reason, ArchiveReason::Inactive);
        assert_eq!(
            branches.get_branch("task/stale").await.unwrap().status,
            BranchStatus::Active
        );

        let run = engine
            .apply_auto_archive(AutoArchivePolicy::default())
            .await
            .unwrap();
        assert_eq!(run.archived_count, 1);
        assert_eq!(
            branches.get_branch("task/stale").await.unwrap().status,
            BranchStatus::Archived
        );
    }

    #[tokio::test]
    async fn fresh_fork_of_old_content_is_not_inactive() {
        let (engine, branches, store) = engine().await;
        store
            .storage()
            .insert_record(
                &RecordBuilder::fact("main", "long standing fact")
                    .created_at(Utc::now() - Duration::days(90))
                    .build(),
            )
            .await
            .unwrap();
        branches.create_branch("task/today", "main", None).await.unwrap();

        let report = engine
            .apply_auto_archive(AutoArchivePolicy {
                dry_run: true,
                ..AutoArchivePolicy::default()
            })
            .await
            .unwrap();
        assert!(report.candidates.is_empty());
    }

    #[tokio::test]
    async fn main_is_never_a_candidate() {
        let (engine, _branches, _store) = engine().await;
        let report = engine
            .apply_auto_archive(AutoArchivePolicy {
                inactive_days: 1,
                ..AutoArchivePolicy::default()
            })
            .await
            .unwrap();
        assert!(report.candidates.is_empty());
    }

    #[tokio::test]
    async fn ttl_expiry_compares_against_fork_time() {
        let (engine, _branches, store) = engine().await;
        let five_days_ago = Utc::now() - Duration::days(5);
        for (name, ttl) in [("task/short", 1), ("task/long", 30)] {
            let mut branch = Branch::new(name, "main", five_days_ago);
            branch.metadata.ttl_days = Some(ttl);
            store.storage().fork_branch(&branch).await.unwrap();
        }
        fork_at(&store, "task/forever", "main", five_days_ago).await;

        let expired = engine.check_ttl_expiry().await.unwrap();
        let names: Vec<_> = expired.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["task/short"]);
        assert_eq!(expired[0].ttl_days, 1);
    }
}
