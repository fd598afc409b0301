// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./cairn.toml` > `~/.config/cairn/cairn.toml` > `/etc/cairn/cairn.toml`
//! with environment variable overrides via `CAIRN_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::CairnConfig;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/cairn/cairn.toml";

/// Working-directory configuration file.
pub const LOCAL_CONFIG_PATH: &str = "cairn.toml";

/// Sections recognised by the env provider, longest first so that
/// `CAIRN_CONSOLIDATION_*` is never split as a shorter prefix.
const ENV_SECTIONS: &[&str] = &[
    "consolidation",
    "lifecycle",
    "branches",
    "logging",
    "storage",
    "merge",
];

/// The user-level configuration file under the XDG config directory.
pub fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("cairn/cairn.toml"))
        .unwrap_or_default()
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/cairn/cairn.toml` (system-wide)
/// 3. `~/.config/cairn/cairn.toml` (user XDG config)
/// 4. `./cairn.toml` (local directory)
/// 5. `CAIRN_*` environment variables
pub fn load_config() -> Result<CairnConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string over the compiled defaults.
///
/// No files or environment variables are consulted.
pub fn load_config_from_str(toml_content: &str) -> Result<CairnConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CairnConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<CairnConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CairnConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used for config loading, before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(CairnConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path()))
        .merge(Toml::file(LOCAL_CONFIG_PATH))
        .merge(env_provider())
}

/// Environment provider mapping `CAIRN_<SECTION>_<KEY>` to `<section>.<key>`.
///
/// Uses `Env::map()` rather than `Env::split("_")` because keys themselves
/// contain underscores: `CAIRN_STORAGE_DATABASE_PATH` must map to
/// `storage.database_path`, not `storage.database.path`.
fn env_provider() -> Env {
    Env::prefixed("CAIRN_").map(|key| map_env_key(key.as_str()).into())
}

fn map_env_key(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for section in ENV_SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key
}
