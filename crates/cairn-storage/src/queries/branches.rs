// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Branch registry queries.
//!
//! A name is held by at most one live (active or merged) row, enforced by a
//! partial unique index. Archived rows stay behind as history.

use cairn_core::CairnError;
use cairn_core::types::{Branch, BranchMetadata, BranchStatus, RecordFilter};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use tracing::debug;

use crate::database::{Database, map_tr_err};
use crate::queries::records;
use crate::queries::{parse_enum, parse_opt_enum};

const BRANCH_COLUMNS: &str =
    "id, name, parent_name, status, forked_at, merged_at, merge_strategy, metadata";

/// Live rows sort ahead of archived ones, then newest fork first.
const CURRENT_ROW_ORDER: &str =
    "ORDER BY CASE status WHEN 'archived' THEN 1 ELSE 0 END, forked_at DESC";

/// Why a fork did not register a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    Created { copied: usize },
    NameTaken,
    ParentMissing,
}

fn row_to_branch(row: &rusqlite::Row<'_>) -> rusqlite::Result<Branch> {
    let status: String = row.get(3)?;
    let strategy: Option<String> = row.get(6)?;
    let metadata: String = row.get(7)?;
    let metadata: BranchMetadata = serde_json::from_str(&metadata)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(Branch {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_name: row.get(2)?,
        status: parse_enum(3, &status)?,
        forked_at: row.get(4)?,
        merged_at: row.get(5)?,
        merge_strategy: parse_opt_enum(6, strategy)?,
        metadata,
    })
}

fn metadata_to_sql(metadata: &BranchMetadata) -> rusqlite::Result<String> {
    serde_json::to_string(metadata).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// The current row for `name` on an open connection or transaction.
pub(crate) fn current_branch(
    conn: &rusqlite::Connection,
    name: &str,
) -> rusqlite::Result<Option<Branch>> {
    conn.query_row(
        &format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE name = ?1 {CURRENT_ROW_ORDER} LIMIT 1"),
        params![name],
        row_to_branch,
    )
    .optional()
}

/// Whether `name` is held by a live row.
pub(crate) fn is_live(conn: &rusqlite::Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM branches WHERE name = ?1 AND status != 'archived')",
        params![name],
        |row| row.get(0),
    )
}

/// Insert a branch row without touching records.
fn insert_branch(conn: &rusqlite::Connection, branch: &Branch) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO branches ({BRANCH_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
            branch.id,
            branch.name,
            branch.parent_name,
            branch.status.to_string(),
            branch.forked_at,
            branch.merged_at,
            branch.merge_strategy.map(|s| s.to_string()),
            metadata_to_sql(&branch.metadata)?,
        ],
    )
}

/// Register the root branch if it is not present yet.
pub async fn ensure_root(db: &Database, root: &Branch) -> Result<bool, CairnError> {
    let root = root.clone();
    let inserted = db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> { insert_branch(conn, &root) })
        .await
        .map_err(map_tr_err)?;
    Ok(inserted > 0)
}

/// Look up the current row for `name`.
pub async fn get_branch(db: &Database, name: &str) -> Result<Option<Branch>, CairnError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| current_branch(conn, &name))
        .await
        .map_err(map_tr_err)
}

/// List branch rows, optionally restricted to one status, newest fork first.
pub async fn list_branches(
    db: &Database,
    status: Option<BranchStatus>,
) -> Result<Vec<Branch>, CairnError> {
    let status = status.map(|s| s.to_string());
    db.connection()
        .call(move |conn| -> Result<Vec<Branch>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BRANCH_COLUMNS} FROM branches
                 WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY forked_at DESC, name ASC"
            ))?;
            let rows = stmt.query_map(params![status], row_to_branch)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Register `branch` and copy its parent's active records onto it, atomically.
///
/// The name and parent checks run inside the same immediate transaction as
/// the insert, so two concurrent forks of one name cannot both succeed.
pub async fn fork_branch(db: &Database, branch: &Branch) -> Result<ForkOutcome, CairnError> {
    let branch = branch.clone();
    db.connection()
        .call(move |conn| -> Result<ForkOutcome, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if is_live(&tx, &branch.name)? {
                return Ok(ForkOutcome::NameTaken);
            }
            if !is_live(&tx, &branch.parent_name)? {
                return Ok(ForkOutcome::ParentMissing);
            }

            insert_branch(&tx, &branch)?;

            let parent_records =
                records::list_records_on(&tx, &branch.parent_name, &RecordFilter::active())?;
            for record in &parent_records {
                records::insert_record_on(&tx, &record.fork_to(&branch.name))?;
            }

            tx.commit()?;
            Ok(ForkOutcome::Created {
                copied: parent_records.len(),
            })
        })
        .await
        .map_err(map_tr_err)
}

/// Compare-and-swap row `branch_id` from `expected` to archived and drop its
/// branch-local records. Returns `false` (writing nothing) if the row's status
/// is no longer `expected`.
pub async fn archive_branch(
    db: &Database,
    branch_id: &str,
    expected: BranchStatus,
) -> Result<bool, CairnError> {
    let branch_id = branch_id.to_string();
    let archived = db
        .connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let changed = tx.execute(
                "UPDATE branches SET status = 'archived' WHERE id = ?1 AND status = ?2",
                params![branch_id, expected.to_string()],
            )?;
            if changed == 0 {
                return Ok(false);
            }

            let name: String = tx.query_row(
                "SELECT name FROM branches WHERE id = ?1",
                params![branch_id],
                |row| row.get(0),
            )?;
            let dropped = tx.execute("DELETE FROM records WHERE branch_name = ?1", params![name])?;
            tx.commit()?;
            debug!(branch = %name, dropped, "branch archived");
            Ok(true)
        })
        .await
        .map_err(map_tr_err)?;
    Ok(archived)
}

/// Replace the metadata of the live row for `name`.
pub async fn update_metadata(
    db: &Database,
    name: &str,
    metadata: &BranchMetadata,
) -> Result<(), CairnError> {
    let owned_name = name.to_string();
    let metadata = metadata.clone();
    let changed = db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "UPDATE branches SET metadata = ?1 WHERE name = ?2 AND status != 'archived'",
                params![metadata_to_sql(&metadata)?, owned_name],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(CairnError::branch_not_found(name));
    }
    Ok(())
}
