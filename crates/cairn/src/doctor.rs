// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `cairn doctor` command implementation.

use std::time::{Duration, Instant};

use cairn_config::CairnConfig;
use cairn_core::{CairnError, HealthStatus, ROOT_BRANCH};

use crate::maintenance::open_storage;

/// Status of a diagnostic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Result of a single diagnostic check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub duration: Duration,
}

/// Run the diagnostic checks and print one line per check.
///
/// Fails if any check failed.
pub async fn run_doctor(config: &CairnConfig) -> Result<(), CairnError> {
    let results = vec![check_config(config), check_storage(config).await];

    println!();
    println!("  cairn doctor");
    println!("  {}", "-".repeat(50));
    let mut fail_count = 0;
    for result in &results {
        let tag = match result.status {
            CheckStatus::Pass => "[OK]  ",
            CheckStatus::Warn => "[WARN]",
            CheckStatus::Fail => {
                fail_count += 1;
                "[FAIL]"
            }
        };
        println!(
            "    {tag} {:<20} {} ({}ms)",
            result.name,
            result.message,
            result.duration.as_millis()
        );
    }
    println!();

    if fail_count > 0 {
        return Err(CairnError::Internal(format!("{fail_count} check(s) failed")));
    }
    Ok(())
}

fn check_config(config: &CairnConfig) -> CheckResult {
    let start = Instant::now();
    let (status, message) = match cairn_config::ensure_valid(config) {
        Ok(()) => (CheckStatus::Pass, "configuration is valid".to_string()),
        Err(e) => (CheckStatus::Fail, e.to_string()),
    };
    CheckResult {
        name: "Config".into(),
        status,
        message,
        duration: start.elapsed(),
    }
}

async fn check_storage(config: &CairnConfig) -> CheckResult {
    let start = Instant::now();
    let (status, message) = match storage_status(config).await {
        Ok((HealthStatus::Healthy, branches)) => (
            CheckStatus::Pass,
            format!("{} ({branches} branch rows)", config.storage.database_path),
        ),
        Ok((HealthStatus::Degraded(reason), _)) => (CheckStatus::Warn, reason),
        Ok((HealthStatus::Unhealthy(reason), _)) => (CheckStatus::Fail, reason),
        Err(e) => (CheckStatus::Fail, e.to_string()),
    };
    CheckResult {
        name: "Storage".into(),
        status,
        message,
        duration: start.elapsed(),
    }
}

async fn storage_status(config: &CairnConfig) -> Result<(HealthStatus, usize), CairnError> {
    let storage = open_storage(config).await?;
    let health = storage.health_check().await?;
    if storage.get_branch(ROOT_BRANCH).await?.is_none() {
        return Ok((
            HealthStatus::Unhealthy(format!("root branch {ROOT_BRANCH} is missing")),
            0,
        ));
    }
    let branches = storage.list_branches(None).await?.len();
    storage.close().await?;
    Ok((health, branches))
}
