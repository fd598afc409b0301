// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Atomic application of merge and consolidation plans.
//!
//! Each plan is written in a single immediate transaction: either every
//! record change, status transition, and audit row lands, or none does.

use cairn_core::CairnError;
use cairn_core::types::{ConsolidationPlan, MergeHistory, MergePlan};
use rusqlite::{TransactionBehavior, params};
use tracing::debug;

use crate::database::{Database, map_tr_err};
use crate::queries::branches::is_live;
use crate::queries::history::{insert_consolidation_history_on, insert_merge_history_on};
use crate::queries::records::insert_record_on;
use crate::queries::vec_to_blob;

/// Result of applying a merge plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Ids of the target rows inserted or overwritten.
    Applied(Vec<String>),
    /// The target branch has no live row.
    TargetMissing,
    /// The source status compare-and-swap lost a race.
    Aborted,
}

/// Whether `branch` already holds an active copy of `lineage_id`.
fn holds_lineage(
    conn: &rusqlite::Connection,
    branch: &str,
    lineage_id: &str,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM records
             WHERE branch_name = ?1 AND lineage_id = ?2 AND status = 'active')",
        params![branch, lineage_id],
        |row| row.get(0),
    )
}

/// Apply `plan`. Nothing is written unless the outcome is `Applied`.
///
/// Inserts whose lineage is already active on the target are skipped, so a
/// plan computed before a concurrent merge landed cannot duplicate it. The
/// audit row records what was actually written.
pub async fn apply_merge(db: &Database, plan: &MergePlan) -> Result<MergeOutcome, CairnError> {
    let plan = plan.clone();
    db.connection()
        .call(move |conn| -> Result<MergeOutcome, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if !is_live(&tx, &plan.target)? {
                return Ok(MergeOutcome::TargetMissing);
            }

            if let Some(transition) = &plan.source_transition {
                let changed = tx.execute(
                    "UPDATE branches SET status = ?1, merged_at = ?2, merge_strategy = ?3
                     WHERE id = ?4 AND status = ?5",
                    params![
                        transition.next.to_string(),
                        transition.at,
                        transition.strategy.to_string(),
                        transition.branch_id,
                        transition.expected.to_string(),
                    ],
                )?;
                if changed == 0 {
                    return Ok(MergeOutcome::Aborted);
                }
            }

            let mut written = Vec::with_capacity(plan.inserts.len() + plan.overwrites.len());
            for record in &plan.inserts {
                if holds_lineage(&tx, &plan.target, &record.lineage_id)? {
                    continue;
                }
                insert_record_on(&tx, record)?;
                written.push(record.id.clone());
            }
            for overwrite in &plan.overwrites {
                let changed = tx.execute(
                    "UPDATE records SET text = ?1, category = ?2, confidence = ?3,
                         embedding = ?4, updated_at = ?5
                     WHERE id = ?6 AND branch_name = ?7",
                    params![
                        overwrite.text,
                        overwrite.category,
                        overwrite.confidence,
                        overwrite.embedding.as_deref().map(vec_to_blob),
                        overwrite.updated_at,
                        overwrite.target_id,
                        plan.target,
                    ],
                )?;
                if changed > 0 {
                    written.push(overwrite.target_id.clone());
                }
            }

            let history = MergeHistory {
                items_merged: written.len() as u64,
                ..plan.history.clone()
            };
            insert_merge_history_on(&tx, &history)?;
            tx.commit()?;
            debug!(
                source = %plan.source,
                target = %plan.target,
                written = written.len(),
                "merge plan applied"
            );
            Ok(MergeOutcome::Applied(written))
        })
        .await
        .map_err(map_tr_err)
}

/// Apply `plan`: inserts, confidence updates, supersessions, and the audit row.
///
/// Updates only touch rows that are still active.
pub async fn apply_consolidation(
    db: &Database,
    plan: &ConsolidationPlan,
) -> Result<(), CairnError> {
    let plan = plan.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let stamp = plan.history.created_at;

            for record in &plan.inserts {
                insert_record_on(&tx, record)?;
            }
            for (id, confidence) in &plan.confidence_updates {
                tx.execute(
                    "UPDATE records SET confidence = ?1, updated_at = ?2
                     WHERE id = ?3 AND branch_name = ?4 AND status = 'active'",
                    params![confidence, stamp, id, plan.branch],
                )?;
            }
            for supersession in &plan.supersessions {
                tx.execute(
                    "UPDATE records SET status = 'superseded', parent_id = ?1, updated_at = ?2
                     WHERE id = ?3 AND branch_name = ?4 AND status = 'active'",
                    params![supersession.parent_id, stamp, supersession.id, plan.branch],
                )?;
            }

            insert_consolidation_history_on(&tx, &plan.history)?;
            tx.commit()?;
            debug!(
                branch = %plan.branch,
                inserted = plan.inserts.len(),
                superseded = plan.supersessions.len(),
                "consolidation plan applied"
            );
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::types::{
        Branch, BranchStatus, ConsolidationHistory, ConsolidationLevel, MergeHistory,
        MergeStrategyKind, RecordFilter, RecordKind, RecordOverwrite, RecordStatus,
        StatusTransition, Supersession, VersionedRecord,
    };
    use chrono::Utc;
    use tempfile::tempdir;

    use crate::queries::{branches, history, records};

    async fn open_with_child() -> (Database, Branch, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("plans.db").to_str().unwrap(), true)
            .await
            .unwrap();
        branches::ensure_root(&db, &Branch::root(Utc::now())).await.unwrap();
        let child = Branch::new("task/a", "main", Utc::now());
        branches::fork_branch(&db, &child).await.unwrap();
        (db, child, dir)
    }

    fn merge_plan(child: &Branch, expected: BranchStatus) -> MergePlan {
        let now = Utc::now();
        let insert = VersionedRecord::new("main", RecordKind::Fact, "merged fact", now);
        MergePlan {
            source: child.name.clone(),
            target: "main".into(),
            inserts: vec![insert],
            overwrites: vec![],
            source_transition: Some(StatusTransition {
                branch_id: child.id.clone(),
                branch_name: child.name.clone(),
                expected,
                next: BranchStatus::Merged,
                strategy: MergeStrategyKind::Auto,
                at: now,
            }),
            history: MergeHistory {
                id: None,
                source_branch: child.name.clone(),
                target_branch: "main".into(),
                strategy: MergeStrategyKind::Auto,
                items_merged: 1,
                items_rejected: 0,
                conflict_resolution: "target_wins".into(),
                created_at: now,
            },
        }
    }

    #[tokio::test]
    async fn merge_plan_applies_atomically() {
        let (db, child, _dir) = open_with_child().await;
        let plan = merge_plan(&child, BranchStatus::Active);
        let outcome = apply_merge(&db, &plan).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Applied(vec![plan.inserts[0].id.clone()]));

        let row = branches::get_branch(&db, "task/a").await.unwrap().unwrap();
        assert_eq!(row.status, BranchStatus::Merged);
        assert_eq!(row.merge_strategy, Some(MergeStrategyKind::Auto));
        assert!(row.merged_at.is_some());
        assert_eq!(history::list_merge_history(&db, Some("main")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replaying_a_plan_skips_lineage_already_on_target() {
        let (db, child, _dir) = open_with_child().await;
        let plan = merge_plan(&child, BranchStatus::Active);
        apply_merge(&db, &plan).await.unwrap();

        let mut replay = merge_plan(&child, BranchStatus::Merged);
        replay.inserts = vec![plan.inserts[0].copy_to("main", Utc::now())];
        assert_eq!(apply_merge(&db, &replay).await.unwrap(), MergeOutcome::Applied(vec![]));

        let facts = records::list_records(&db, "main", &RecordFilter::active_facts())
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        let audit = history::list_merge_history(&db, Some("main")).await.unwrap();
        let mut merged: Vec<u64> = audit.iter().map(|h| h.items_merged).collect();
        merged.sort_unstable();
        assert_eq!(merged, [0, 1]);
    }

    #[tokio::test]
    async fn lost_status_race_writes_nothing() {
        let (db, child, _dir) = open_with_child().await;
        let plan = merge_plan(&child, BranchStatus::Merged);
        assert_eq!(apply_merge(&db, &plan).await.unwrap(), MergeOutcome::Aborted);

        let facts = records::list_records(&db, "main", &RecordFilter::active_facts())
            .await
            .unwrap();
        assert!(facts.is_empty());
        assert!(history::list_merge_history(&db, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overwrites_only_touch_target_rows() {
        let (db, child, _dir) = open_with_child().await;
        let existing = VersionedRecord::new("main", RecordKind::Fact, "old", Utc::now());
        records::insert_record(&db, &existing).await.unwrap();

        let mut plan = merge_plan(&child, BranchStatus::Active);
        plan.inserts.clear();
        plan.overwrites.push(RecordOverwrite {
            target_id: existing.id.clone(),
            text: "new".into(),
            category: Some("pattern".into()),
            confidence: 0.9,
            embedding: None,
            updated_at: Utc::now(),
        });
        apply_merge(&db, &plan).await.unwrap();

        let updated = records::get_record(&db, &existing.id).await.unwrap().unwrap();
        assert_eq!(updated.text, "new");
        assert_eq!(updated.confidence, 0.9);
        assert_eq!(updated.lineage_id, existing.lineage_id);
    }

    #[tokio::test]
    async fn consolidation_plan_supersedes_and_audits() {
        let (db, _child, _dir) = open_with_child().await;
        let now = Utc::now();
        let survivor = VersionedRecord::new("main", RecordKind::Fact, "keep", now);
        let duplicate = VersionedRecord::new("main", RecordKind::Fact, "keep!", now);
        records::insert_record(&db, &survivor).await.unwrap();
        records::insert_record(&db, &duplicate).await.unwrap();

        let plan = ConsolidationPlan {
            branch: "main".into(),
            inserts: vec![],
            confidence_updates: vec![(survivor.id.clone(), 1.0)],
            supersessions: vec![Supersession {
                id: duplicate.id.clone(),
                parent_id: survivor.id.clone(),
            }],
            history: ConsolidationHistory {
                id: None,
                level: ConsolidationLevel::Agent,
                branch_name: "main".into(),
                session_id: None,
                agent_id: Some("agent-1".into()),
                task_id: None,
                facts_created: 0,
                facts_updated: 1,
                facts_deduplicated: 1,
                observations_processed: 0,
                summary: None,
                created_at: now,
            },
        };
        apply_consolidation(&db, &plan).await.unwrap();

        let dup = records::get_record(&db, &duplicate.id).await.unwrap().unwrap();
        assert_eq!(dup.status, RecordStatus::Superseded);
        assert_eq!(dup.parent_id.as_deref(), Some(survivor.id.as_str()));

        let rows = history::list_consolidation_history(&db, Some("main")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].facts_deduplicated, 1);
        assert!(rows[0].id.is_some());
    }
}
