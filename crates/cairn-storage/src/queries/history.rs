// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only merge and consolidation audit tables.

use cairn_core::CairnError;
use cairn_core::types::{ConsolidationHistory, MergeHistory};
use rusqlite::params;

use crate::database::{Database, map_tr_err};
use crate::queries::{count_from_sql, count_to_sql, parse_enum};

pub(crate) fn insert_merge_history_on(
    conn: &rusqlite::Connection,
    entry: &MergeHistory,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO merge_history (source_branch, target_branch, strategy, items_merged,
             items_rejected, conflict_resolution, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.source_branch,
            entry.target_branch,
            entry.strategy.to_string(),
            count_to_sql(entry.items_merged),
            count_to_sql(entry.items_rejected),
            entry.conflict_resolution,
            entry.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn insert_consolidation_history_on(
    conn: &rusqlite::Connection,
    entry: &ConsolidationHistory,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO consolidation_history (level, branch_name, session_id, agent_id, task_id,
             facts_created, facts_updated, facts_deduplicated, observations_processed,
             summary, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            entry.level.to_string(),
            entry.branch_name,
            entry.session_id,
            entry.agent_id,
            entry.task_id,
            count_to_sql(entry.facts_created),
            count_to_sql(entry.facts_updated),
            count_to_sql(entry.facts_deduplicated),
            count_to_sql(entry.observations_processed),
            entry.summary,
            entry.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Merge rows where `branch` is source or target (all rows when `None`),
/// newest first.
pub async fn list_merge_history(
    db: &Database,
    branch: Option<&str>,
) -> Result<Vec<MergeHistory>, CairnError> {
    let branch = branch.map(str::to_string);
    db.connection()
        .call(move |conn| -> Result<Vec<MergeHistory>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT id, source_branch, target_branch, strategy, items_merged,
                        items_rejected, conflict_resolution, created_at
                 FROM merge_history
                 WHERE ?1 IS NULL OR source_branch = ?1 OR target_branch = ?1
                 ORDER BY id DESC",
            )?;
            let rows = stmt.query_map(params![branch], |row| {
                let strategy: String = row.get(3)?;
                Ok(MergeHistory {
                    id: Some(row.get(0)?),
                    source_branch: row.get(1)?,
                    target_branch: row.get(2)?,
                    strategy: parse_enum(3, &strategy)?,
                    items_merged: count_from_sql(row.get(4)?),
                    items_rejected: count_from_sql(row.get(5)?),
                    conflict_resolution: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Consolidation rows for `branch` (all rows when `None`), newest first.
pub async fn list_consolidation_history(
    db: &Database,
    branch: Option<&str>,
) -> Result<Vec<ConsolidationHistory>, CairnError> {
    let branch = branch.map(str::to_string);
    db.connection()
        .call(move |conn| -> Result<Vec<ConsolidationHistory>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT id, level, branch_name, session_id, agent_id, task_id, facts_created,
                        facts_updated, facts_deduplicated, observations_processed, summary,
                        created_at
                 FROM consolidation_history
                 WHERE ?1 IS NULL OR branch_name = ?1
                 ORDER BY id DESC",
            )?;
            let rows = stmt.query_map(params![branch], |row| {
                let level: String = row.get(1)?;
                Ok(ConsolidationHistory {
                    id: Some(row.get(0)?),
                    level: parse_enum(1, &level)?,
                    branch_name: row.get(2)?,
                    session_id: row.get(3)?,
                    agent_id: row.get(4)?,
                    task_id: row.get(5)?,
                    facts_created: count_from_sql(row.get(6)?),
                    facts_updated: count_from_sql(row.get(7)?),
                    facts_deduplicated: count_from_sql(row.get(8)?),
                    observations_processed: count_from_sql(row.get(9)?),
                    summary: row.get(10)?,
                    created_at: row.get(11)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
