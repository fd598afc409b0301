// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Versioned record queries.

use cairn_core::CairnError;
use cairn_core::types::{BranchActivity, RecordFilter, RelationKey, VersionedRecord};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, TransactionBehavior, params, params_from_iter};

use crate::database::{Database, map_tr_err};
use crate::queries::branches::current_branch;
use crate::queries::{blob_to_vec, count_from_sql, parse_enum, parse_opt_enum, vec_to_blob};

const RECORD_COLUMNS: &str = "id, branch_name, kind, text, embedding, category, confidence, \
     status, parent_id, lineage_id, source_type, observation_type, source_entity, \
     target_entity, relation_type, session_id, agent_id, task_id, created_at, updated_at";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionedRecord> {
    let kind: String = row.get(2)?;
    let embedding: Option<Vec<u8>> = row.get(4)?;
    let status: String = row.get(7)?;
    let source_type: String = row.get(10)?;
    let observation_type: Option<String> = row.get(11)?;
    let source_entity: Option<String> = row.get(12)?;
    let target_entity: Option<String> = row.get(13)?;
    let relation_type: Option<String> = row.get(14)?;

    let relation = match (source_entity, target_entity, relation_type) {
        (Some(source_entity), Some(target_entity), Some(relation_type)) => Some(RelationKey {
            source_entity,
            target_entity,
            relation_type,
        }),
        _ => None,
    };

    Ok(VersionedRecord {
        id: row.get(0)?,
        branch_name: row.get(1)?,
        kind: parse_enum(2, &kind)?,
        text: row.get(3)?,
        embedding: embedding.as_deref().map(blob_to_vec),
        category: row.get(5)?,
        confidence: row.get(6)?,
        status: parse_enum(7, &status)?,
        parent_id: row.get(8)?,
        lineage_id: row.get(9)?,
        source_type: parse_enum(10, &source_type)?,
        observation_type: parse_opt_enum(11, observation_type)?,
        relation,
        session_id: row.get(15)?,
        agent_id: row.get(16)?,
        task_id: row.get(17)?,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

/// Insert `record` on an open connection or transaction.
pub(crate) fn insert_record_on(
    conn: &rusqlite::Connection,
    record: &VersionedRecord,
) -> rusqlite::Result<()> {
    let relation = record.relation.as_ref();
    conn.execute(
        &format!(
            "INSERT INTO records ({RECORD_COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
        ),
        params![
            record.id,
            record.branch_name,
            record.kind.to_string(),
            record.text,
            record.embedding.as_deref().map(vec_to_blob),
            record.category,
            record.confidence,
            record.status.to_string(),
            record.parent_id,
            record.lineage_id,
            record.source_type.to_string(),
            record.observation_type.map(|t| t.to_string()),
            relation.map(|r| r.source_entity.as_str()),
            relation.map(|r| r.target_entity.as_str()),
            relation.map(|r| r.relation_type.as_str()),
            record.session_id,
            record.agent_id,
            record.task_id,
            record.created_at,
            record.updated_at,
        ],
    )?;
    Ok(())
}

/// Records on `branch` matching `filter`, oldest first, on an open connection
/// or transaction.
pub(crate) fn list_records_on(
    conn: &rusqlite::Connection,
    branch: &str,
    filter: &RecordFilter,
) -> rusqlite::Result<Vec<VersionedRecord>> {
    let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE branch_name = ?1");
    let mut values = vec![Value::Text(branch.to_string())];

    let mut push_eq = |column: &str, value: Option<String>| {
        if let Some(value) = value {
            values.push(Value::Text(value));
            sql.push_str(&format!(" AND {column} = ?{}", values.len()));
        }
    };
    push_eq("kind", filter.kind.map(|k| k.to_string()));
    push_eq("status", filter.status.map(|s| s.to_string()));
    push_eq("category", filter.category.clone());
    push_eq("session_id", filter.session_id.clone());
    push_eq("agent_id", filter.agent_id.clone());
    push_eq("task_id", filter.task_id.clone());

    if !filter.observation_types.is_empty() {
        let mut placeholders = Vec::with_capacity(filter.observation_types.len());
        for observation_type in &filter.observation_types {
            values.push(Value::Text(observation_type.to_string()));
            placeholders.push(format!("?{}", values.len()));
        }
        sql.push_str(&format!(
            " AND observation_type IN ({})",
            placeholders.join(", ")
        ));
    }
    sql.push_str(" ORDER BY created_at ASC, rowid ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), row_to_record)?;
    rows.collect()
}

/// Insert a single record.
pub async fn insert_record(db: &Database, record: &VersionedRecord) -> Result<(), CairnError> {
    let record = record.clone();
    db.connection()
        .call(move |conn| insert_record_on(conn, &record))
        .await
        .map_err(map_tr_err)
}

/// Why a guarded insert wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    BranchMissing,
    BranchArchived,
}

/// Insert `record` only while its branch has a live row.
///
/// The branch lookup and the insert share one immediate transaction, so an
/// archive committed in between cannot leave an orphaned record behind.
pub async fn insert_live_record(
    db: &Database,
    record: &VersionedRecord,
) -> Result<InsertOutcome, CairnError> {
    let record = record.clone();
    db.connection()
        .call(move |conn| -> Result<InsertOutcome, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            match current_branch(&tx, &record.branch_name)? {
                None => return Ok(InsertOutcome::BranchMissing),
                Some(branch) if !branch.status.is_live() => {
                    return Ok(InsertOutcome::BranchArchived);
                }
                Some(_) => {}
            }
            insert_record_on(&tx, &record)?;
            tx.commit()?;
            Ok(InsertOutcome::Inserted)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch a record by id, whatever its status.
pub async fn get_record(db: &Database, id: &str) -> Result<Option<VersionedRecord>, CairnError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// List records on `branch` matching `filter`, oldest first.
pub async fn list_records(
    db: &Database,
    branch: &str,
    filter: &RecordFilter,
) -> Result<Vec<VersionedRecord>, CairnError> {
    let branch = branch.to_string();
    let filter = filter.clone();
    db.connection()
        .call(move |conn| list_records_on(conn, &branch, &filter))
        .await
        .map_err(map_tr_err)
}

/// Active-record counts per kind, distinct agents, and the latest record
/// creation time on `branch`.
pub async fn branch_activity(db: &Database, branch: &str) -> Result<BranchActivity, CairnError> {
    let branch = branch.to_string();
    db.connection()
        .call(move |conn| -> Result<BranchActivity, rusqlite::Error> {
            conn.query_row(
                "SELECT
                    COALESCE(SUM(status = 'active' AND kind = 'fact'), 0),
                    COALESCE(SUM(status = 'active' AND kind = 'relation'), 0),
                    COALESCE(SUM(status = 'active' AND kind = 'conversation'), 0),
                    COALESCE(SUM(status = 'active' AND kind = 'observation'), 0),
                    COUNT(DISTINCT agent_id),
                    MAX(created_at)
                 FROM records WHERE branch_name = ?1",
                params![branch],
                |row| {
                    Ok(BranchActivity {
                        fact_count: count_from_sql(row.get(0)?),
                        relation_count: count_from_sql(row.get(1)?),
                        conversation_count: count_from_sql(row.get(2)?),
                        observation_count: count_from_sql(row.get(3)?),
                        agent_count: count_from_sql(row.get(4)?),
                        last_activity: row.get(5)?,
                    })
                },
            )
        })
        .await
        .map_err(map_tr_err)
}
