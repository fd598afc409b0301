// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Consolidation: promoting observations into facts and deduplicating facts.
//!
//! Three independently invocable passes:
//!
//! - **session**: promotes a session's insight/decision/discovery
//!   observations into facts, boosting near-duplicate existing facts instead
//!   of creating new ones.
//! - **agent**: clusters near-duplicate active facts with union-find and
//!   supersedes every member but the strongest.
//! - **task**: read-only split of active facts into durable and ephemeral.
//!
//! Similarity is Jaccard over token sets. The session and agent passes write
//! all of their changes together with one audit row.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use cairn_config::model::ConsolidationConfig;
use cairn_core::types::{
    Branch, BranchStatus, ConsolidationHistory, ConsolidationLevel, ConsolidationPlan,
    ObservationType, RecordFilter, RecordKind, SourceType, Supersession, VersionedRecord,
};
use cairn_core::{CairnError, StorageAdapter};

use crate::similarity::{jaccard_sets, tokenize};
use crate::writer::SoftEmbedder;

/// Observation types promoted by the session pass.
const PROMOTABLE: [ObservationType; 3] = [
    ObservationType::Insight,
    ObservationType::Decision,
    ObservationType::Discovery,
];

/// Keyword rules for category inference, checked in order.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("bug_fix", &["bug", "fix", "crash"]),
    ("security", &["security", "auth", "vulnerab"]),
    ("performance", &["performance", "latency", "slow", "optimi"]),
    ("architecture", &["architecture", "design", "module"]),
    ("pattern", &["pattern", "convention", "idiom"]),
];

/// What a consolidation pass operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationScope {
    pub branch: String,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
}

impl ConsolidationScope {
    pub fn branch(branch: &str) -> Self {
        Self {
            branch: branch.to_string(),
            ..Self::default()
        }
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }
}

/// Outcome of a session-level pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionConsolidation {
    pub facts_created: u64,
    pub facts_updated: u64,
    pub facts_deduplicated: u64,
    pub observations_processed: u64,
    pub created_ids: Vec<String>,
}

/// Outcome of an agent-level pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentConsolidation {
    /// Number of facts marked superseded.
    pub facts_deduplicated: u64,
    /// Clusters with more than one member.
    pub clusters: u64,
    pub survivor_ids: Vec<String>,
    pub summary: String,
}

/// Outcome of a task-level pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskConsolidation {
    pub durable_ids: Vec<String>,
    pub ephemeral_count: u64,
}

/// Disjoint-set forest over `0..n` as a flat parent array.
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Pairs `(i, j)` with `i < j` whose token sets intersect. Pairs sharing no
/// token have Jaccard 0 and can never cross a positive threshold.
fn candidate_pairs(tokens: &[HashSet<String>]) -> Vec<(usize, usize)> {
    let mut postings: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, set) in tokens.iter().enumerate() {
        for token in set {
            postings.entry(token.as_str()).or_default().push(i);
        }
    }
    let mut pairs = HashSet::new();
    for ids in postings.values() {
        for (n, &i) in ids.iter().enumerate() {
            for &j in &ids[n + 1..] {
                pairs.insert((i.min(j), i.max(j)));
            }
        }
    }
    let mut pairs: Vec<_> = pairs.into_iter().collect();
    pairs.sort_unstable();
    pairs
}

/// Category for a fact promoted from an observation.
pub fn infer_category(observation_type: Option<ObservationType>, text: &str) -> String {
    if observation_type == Some(ObservationType::Decision) {
        return "decision".into();
    }
    let lower = text.to_lowercase();
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return (*category).to_string();
        }
    }
    match observation_type {
        Some(ObservationType::Insight) => "insight".into(),
        _ => "general".into(),
    }
}

/// A fact participating in a session pass.
struct WorkingFact {
    record: VersionedRecord,
    tokens: HashSet<String>,
    created: bool,
    original_confidence: f64,
}

/// Runs consolidation passes against one storage backend.
#[derive(Clone)]
pub struct ConsolidationEngine {
    storage: Arc<dyn StorageAdapter>,
    embedder: SoftEmbedder,
    config: ConsolidationConfig,
}

impl ConsolidationEngine {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        embedder: SoftEmbedder,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            storage,
            embedder,
            config,
        }
    }

    async fn live_branch(&self, scope: &ConsolidationScope) -> Result<Branch, CairnError> {
        let branch = self
            .storage
            .get_branch(&scope.branch)
            .await?
            .ok_or_else(|| {
                CairnError::Consolidation(format!("branch {} is not registered", scope.branch))
            })?;
        if branch.status == BranchStatus::Archived {
            return Err(CairnError::Consolidation(format!(
                "branch {} is archived",
                scope.branch
            )));
        }
        Ok(branch)
    }

    fn history(&self, level: ConsolidationLevel, scope: &ConsolidationScope) -> ConsolidationHistory {
        ConsolidationHistory {
            id: None,
            level,
            branch_name: scope.branch.clone(),
            session_id: scope.session_id.clone(),
            agent_id: scope.agent_id.clone(),
            task_id: scope.task_id.clone(),
            facts_created: 0,
            facts_updated: 0,
            facts_deduplicated: 0,
            observations_processed: 0,
            summary: None,
            created_at: Utc::now(),
        }
    }

    /// Promote the session's insight, decision, and discovery observations.
    pub async fn consolidate_session(
        &self,
        scope: &ConsolidationScope,
    ) -> Result<SessionConsolidation, CairnError> {
        let Some(session_id) = scope.session_id.as_deref() else {
            return Err(CairnError::Consolidation(
                "session consolidation requires a session id".into(),
            ));
        };
        self.live_branch(scope).await?;

        let observations = self
            .storage
            .list_records(
                &scope.branch,
                &RecordFilter::active()
                    .kind(RecordKind::Observation)
                    .session(session_id)
                    .observation_types(&PROMOTABLE),
            )
            .await?;
        let mut facts: Vec<WorkingFact> = self
            .storage
            .list_records(&scope.branch, &RecordFilter::active_facts())
            .await?
            .into_iter()
            .map(|record| WorkingFact {
                tokens: tokenize(&record.text),
                original_confidence: record.confidence,
                created: false,
                record,
            })
            .collect();

        let now = Utc::now();
        let mut outcome = SessionConsolidation {
            observations_processed: observations.len() as u64,
            ..SessionConsolidation::default()
        };

        for observation in &observations {
            let tokens = tokenize(&observation.text);
            let best = facts
                .iter_mut()
                .map(|fact| (jaccard_sets(&tokens, &fact.tokens), fact))
                .max_by(|a, b| a.0.total_cmp(&b.0));

            match best {
                Some((similarity, fact)) if similarity > self.config.similarity_threshold => {
                    let boosted = (fact.record.confidence + self.config.confidence_boost).min(1.0);
                    if boosted > fact.record.confidence {
                        fact.record.confidence = boosted;
                        outcome.facts_updated += 1;
                    } else {
                        outcome.facts_deduplicated += 1;
                    }
                }
                _ => {
                    let mut record =
                        VersionedRecord::new(&scope.branch, RecordKind::Fact, &observation.text, now);
                    record.confidence = self.config.default_confidence;
                    record.source_type = SourceType::Consolidation;
                    record.category = Some(infer_category(
                        observation.observation_type,
                        &observation.text,
                    ));
                    record.session_id = Some(session_id.to_string());
                    record.agent_id = observation.agent_id.clone();
                    record.task_id = observation.task_id.clone();
                    record.embedding = self.embedder.embed(&record.text).await;
                    outcome.facts_created += 1;
                    outcome.created_ids.push(record.id.clone());
                    facts.push(WorkingFact {
                        original_confidence: record.confidence,
                        created: true,
                        tokens,
                        record,
                    });
                }
            }
        }

        let mut history = self.history(ConsolidationLevel::Session, scope);
        history.facts_created = outcome.facts_created;
        history.facts_updated = outcome.facts_updated;
        history.facts_deduplicated = outcome.facts_deduplicated;
        history.observations_processed = outcome.observations_processed;
        history.summary = Some(format!(
            "session {session_id}: {} observations, {} facts created, {} updated, {} unchanged",
            outcome.observations_processed,
            outcome.facts_created,
            outcome.facts_updated,
            outcome.facts_deduplicated
        ));

        let mut inserts = Vec::new();
        let mut confidence_updates = Vec::new();
        for fact in facts {
            if fact.created {
                inserts.push(fact.record);
            } else if fact.record.confidence != fact.original_confidence {
                confidence_updates.push((fact.record.id, fact.record.confidence));
            }
        }
        let plan = ConsolidationPlan {
            branch: scope.branch.clone(),
            inserts,
            confidence_updates,
            supersessions: Vec::new(),
            history,
        };
        self.storage.apply_consolidation(&plan).await?;

        info!(
            branch = %scope.branch,
            session = %session_id,
            created = outcome.facts_created,
            updated = outcome.facts_updated,
            deduplicated = outcome.facts_deduplicated,
            "session consolidated"
        );
        Ok(outcome)
    }

    /// Deduplicate the active facts on the scope's branch.
    ///
    /// Facts with Jaccard similarity above the threshold are unioned into
    /// clusters. Each multi-member cluster keeps the member with the greatest
    /// `(confidence, created_at)`; the rest become superseded by it.
    pub async fn consolidate_agent(
        &self,
        scope: &ConsolidationScope,
    ) -> Result<AgentConsolidation, CairnError> {
        self.live_branch(scope).await?;
        let facts = self
            .storage
            .list_records(&scope.branch, &RecordFilter::active_facts())
            .await?;
        let tokens: Vec<HashSet<String>> = facts.iter().map(|f| tokenize(&f.text)).collect();

        let mut clusters = DisjointSet::new(facts.len());
        let pairs = candidate_pairs(&tokens);
        let compared = pairs.len();
        for (i, j) in pairs {
            if jaccard_sets(&tokens[i], &tokens[j]) > self.config.similarity_threshold {
                clusters.union(i, j);
            }
        }

        let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..facts.len() {
            let root = clusters.find(i);
            members.entry(root).or_default().push(i);
        }

        let mut supersessions = Vec::new();
        let mut cluster_count = 0_u64;
        let mut superseded = HashSet::new();
        for group in members.values().filter(|g| g.len() > 1) {
            cluster_count += 1;
            let Some(&survivor) = group.iter().max_by(|&&a, &&b| {
                let (fa, fb) = (&facts[a], &facts[b]);
                fa.confidence
                    .total_cmp(&fb.confidence)
                    .then(fa.created_at.cmp(&fb.created_at))
                    .then(fa.id.cmp(&fb.id))
            }) else {
                continue;
            };
            for &member in group.iter().filter(|&&m| m != survivor) {
                superseded.insert(member);
                supersessions.push(Supersession {
                    id: facts[member].id.clone(),
                    parent_id: facts[survivor].id.clone(),
                });
            }
        }

        let mut survivors: Vec<&VersionedRecord> = facts
            .iter()
            .enumerate()
            .filter(|(i, _)| !superseded.contains(i))
            .map(|(_, f)| f)
            .collect();
        survivors.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(b.created_at.cmp(&a.created_at))
        });
        let summary = self.summarize(&scope.branch, facts.len(), &supersessions, cluster_count, &survivors);

        let mut history = self.history(ConsolidationLevel::Agent, scope);
        history.facts_deduplicated = supersessions.len() as u64;
        history.summary = Some(summary.clone());
        let outcome = AgentConsolidation {
            facts_deduplicated: supersessions.len() as u64,
            clusters: cluster_count,
            survivor_ids: survivors.iter().map(|f| f.id.clone()).collect(),
            summary,
        };
        let plan = ConsolidationPlan {
            branch: scope.branch.clone(),
            inserts: Vec::new(),
            confidence_updates: Vec::new(),
            supersessions,
            history,
        };
        self.storage.apply_consolidation(&plan).await?;

        debug!(branch = %scope.branch, facts = facts.len(), compared, "dedup candidates compared");
        info!(
            branch = %scope.branch,
            superseded = outcome.facts_deduplicated,
            clusters = outcome.clusters,
            "agent consolidated"
        );
        Ok(outcome)
    }

    fn summarize(
        &self,
        branch: &str,
        total: usize,
        supersessions: &[Supersession],
        clusters: u64,
        survivors: &[&VersionedRecord],
    ) -> String {
        let mut summary = format!(
            "{branch}: {total} active facts reviewed, {} superseded across {clusters} clusters",
            supersessions.len()
        );
        let quoted: Vec<&str> = survivors
            .iter()
            .take(self.config.summary_fact_limit)
            .map(|f| f.text.as_str())
            .collect();
        if !quoted.is_empty() {
            summary.push_str("\nKey facts:");
            for text in quoted {
                summary.push_str("\n- ");
                summary.push_str(text);
            }
        }
        summary
    }

    /// Split the active facts on the scope's branch into durable and ephemeral.
    ///
    /// Read-only: writes neither records nor history.
    pub async fn consolidate_task(
        &self,
        scope: &ConsolidationScope,
    ) -> Result<TaskConsolidation, CairnError> {
        self.live_branch(scope).await?;
        let facts = self
            .storage
            .list_records(&scope.branch, &RecordFilter::active_facts())
            .await?;

        let mut outcome = TaskConsolidation::default();
        for fact in &facts {
            let durable_category = fact
                .category
                .as_ref()
                .is_some_and(|c| self.config.durable_categories.contains(c));
            if fact.confidence >= self.config.durable_confidence && durable_category {
                outcome.durable_ids.push(fact.id.clone());
            } else {
                outcome.ephemeral_count += 1;
            }
        }
        debug!(
            branch = %scope.branch,
            durable = outcome.durable_ids.len(),
            ephemeral = outcome.ephemeral_count,
            "task facts classified"
        );
        Ok(outcome)
    }

    /// Consolidation audit rows for `branch` (all rows when `None`), newest first.
    pub async fn consolidation_history(
        &self,
        branch: Option<&str>,
    ) -> Result<Vec<ConsolidationHistory>, CairnError> {
        self.storage.consolidation_history(branch).await
    }
}
