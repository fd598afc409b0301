// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Cairn knowledge store.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Cairn configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with environment
/// variable overrides. All sections are optional and default to the
/// engine's reference values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CairnConfig {
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Call-boundary branch defaults.
    #[serde(default)]
    pub branches: BranchConfig,

    /// Diff and merge settings.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Consolidation thresholds.
    #[serde(default)]
    pub consolidation: ConsolidationConfig,

    /// TTL and auto-archive policy defaults.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("cairn").join("cairn.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("cairn.db"))
        .display()
        .to_string()
}

fn default_wal_mode() -> bool {
    true
}

/// Branch defaults resolved once at the call boundary.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BranchConfig {
    /// Branch used when a command is not given one explicitly.
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

/// Diff and merge configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Minimum similarity (0.0-1.0) for two records on different branches to
    /// be treated as the same referent.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
        }
    }
}

fn default_match_threshold() -> f64 {
    0.85
}

/// Consolidation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConsolidationConfig {
    /// Jaccard similarity above which two texts are near-duplicates.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Confidence added to a fact re-observed during a session pass.
    #[serde(default = "default_confidence_boost")]
    pub confidence_boost: f64,

    /// Confidence of facts promoted from observations.
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,

    /// Minimum confidence for a task fact to be durable.
    #[serde(default = "default_durable_confidence")]
    pub durable_confidence: f64,

    /// Categories eligible for durable classification.
    #[serde(default = "default_durable_categories")]
    pub durable_categories: Vec<String>,

    /// Number of surviving facts quoted in an agent-pass summary.
    #[serde(default = "default_summary_fact_limit")]
    pub summary_fact_limit: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            confidence_boost: default_confidence_boost(),
            default_confidence: default_confidence(),
            durable_confidence: default_durable_confidence(),
            durable_categories: default_durable_categories(),
            summary_fact_limit: default_summary_fact_limit(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.85
}

fn default_confidence_boost() -> f64 {
    0.1
}

fn default_confidence() -> f64 {
    0.7
}

fn default_durable_confidence() -> f64 {
    0.8
}

fn default_durable_categories() -> Vec<String> {
    [
        "bug_fix",
        "architecture",
        "pattern",
        "decision",
        "security",
        "performance",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_summary_fact_limit() -> usize {
    5
}

/// Branch lifecycle policy defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    /// Days without activity after which an active branch may be archived.
    #[serde(default = "default_inactive_days")]
    pub inactive_days: u32,

    /// Whether merged branches are auto-archive candidates.
    #[serde(default = "default_archive_merged")]
    pub archive_merged: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            inactive_days: default_inactive_days(),
            archive_merged: default_archive_merged(),
        }
    }
}

fn default_inactive_days() -> u32 {
    30
}

fn default_archive_merged() -> bool {
    true
}
