// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Maintenance subcommands. Each prints its result as JSON on stdout.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use cairn_config::CairnConfig;
use cairn_core::{BranchStatus, CairnError, StorageAdapter};
use cairn_storage::SqliteStorage;
use cairn_vcs::{validate_branch_name, AutoArchivePolicy, KnowledgeBase};

/// Open and initialize the configured database.
pub async fn open_storage(config: &CairnConfig) -> Result<Arc<dyn StorageAdapter>, CairnError> {
    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    Ok(Arc::new(storage))
}

async fn open_knowledge_base(config: &CairnConfig) -> Result<KnowledgeBase, CairnError> {
    let storage = open_storage(config).await?;
    KnowledgeBase::new(storage, None, config)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CairnError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| CairnError::Internal(format!("failed to render output: {e}")))?;
    println!("{rendered}");
    Ok(())
}

pub async fn run_migrate(config: &CairnConfig) -> Result<(), CairnError> {
    let storage = open_storage(config).await?;
    storage.close().await?;
    info!(path = %config.storage.database_path, "database schema is current");
    Ok(())
}

pub async fn run_auto_archive(
    config: &CairnConfig,
    inactive_days: Option<u32>,
    keep_merged: bool,
    dry_run: bool,
) -> Result<(), CairnError> {
    let kb = open_knowledge_base(config).await?;
    let configured = kb.lifecycle_policy();
    let policy = AutoArchivePolicy {
        inactive_days: inactive_days.unwrap_or(configured.inactive_days),
        archive_merged: configured.archive_merged && !keep_merged,
        dry_run,
    };
    let report = kb.topology().apply_auto_archive(policy).await?;
    kb.storage().close().await?;
    print_json(&report)
}

pub async fn run_ttl(config: &CairnConfig) -> Result<(), CairnError> {
    let kb = open_knowledge_base(config).await?;
    let expired = kb.topology().check_ttl_expiry().await?;
    print_json(&expired)
}

pub async fn run_topology(
    config: &CairnConfig,
    root: &str,
    depth: usize,
    include_archived: bool,
) -> Result<(), CairnError> {
    let kb = open_knowledge_base(config).await?;
    let tree = kb.topology().get_topology(root, depth, include_archived).await?;
    print_json(&tree)
}

pub async fn run_stats(config: &CairnConfig, branch: Option<&str>) -> Result<(), CairnError> {
    let kb = open_knowledge_base(config).await?;
    let names: Vec<String> = match branch {
        Some(name) => vec![name.to_string()],
        None => kb
            .branches()
            .list_branches(None)
            .await?
            .into_iter()
            .filter(|b| b.status != BranchStatus::Archived)
            .map(|b| b.name)
            .collect(),
    };
    let mut stats = Vec::with_capacity(names.len());
    for name in &names {
        stats.push(kb.topology().get_branch_stats(name).await?);
    }
    print_json(&stats)
}

pub fn run_validate_name(name: &str) -> Result<(), CairnError> {
    print_json(&validate_branch_name(name))
}
