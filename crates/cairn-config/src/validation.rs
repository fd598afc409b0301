// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks the semantic constraints serde cannot express: thresholds and
//! confidences must lie in [0, 1], paths must be non-empty, and so on.

use crate::diagnostic::ConfigError;
use crate::model::CairnConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &CairnConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "logging.level `{}` must be one of: {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            ),
        });
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.branches.default_branch.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "branches.default_branch must not be empty".to_string(),
        });
    }

    let unit_values = [
        ("merge.match_threshold", config.merge.match_threshold),
        (
            "consolidation.similarity_threshold",
            config.consolidation.similarity_threshold,
        ),
        (
            "consolidation.confidence_boost",
            config.consolidation.confidence_boost,
        ),
        (
            "consolidation.default_confidence",
            config.consolidation.default_confidence,
        ),
        (
            "consolidation.durable_confidence",
            config.consolidation.durable_confidence,
        ),
    ];
    for (key, value) in unit_values {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ConfigError::Validation {
                message: format!("{key} must be between 0.0 and 1.0, got {value}"),
            });
        }
    }

    if config.consolidation.summary_fact_limit == 0 {
        errors.push(ConfigError::Validation {
            message: "consolidation.summary_fact_limit must be at least 1".to_string(),
        });
    }

    for (i, category) in config.consolidation.durable_categories.iter().enumerate() {
        if category.trim().is_empty() {
            errors.push(ConfigError::Validation {
                message: format!("consolidation.durable_categories[{i}] must not be empty"),
            });
        }
    }

    if config.lifecycle.inactive_days == 0 {
        errors.push(ConfigError::Validation {
            message: "lifecycle.inactive_days must be at least 1".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
