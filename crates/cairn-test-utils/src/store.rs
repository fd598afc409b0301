// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Throwaway SQLite storage rooted in a temp directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cairn_config::CairnConfig;
use cairn_config::model::StorageConfig;
use cairn_core::{CairnError, StorageAdapter};
use cairn_storage::SqliteStorage;
use tempfile::TempDir;

/// An initialized [`SqliteStorage`] whose database lives as long as this value.
pub struct TempStore {
    storage: Arc<SqliteStorage>,
    path: PathBuf,
    _temp_dir: TempDir,
}

impl TempStore {
    /// Create a temp directory, open a database in it, and bootstrap `main`.
    pub async fn new() -> Result<Self, CairnError> {
        let temp_dir = TempDir::new().map_err(|e| CairnError::Storage { source: e.into() })?;
        let path = temp_dir.path().join("cairn-test.db");
        let storage = SqliteStorage::new(StorageConfig {
            database_path: path.to_string_lossy().to_string(),
            wal_mode: true,
        });
        storage.initialize().await?;
        Ok(Self {
            storage: Arc::new(storage),
            path,
            _temp_dir: temp_dir,
        })
    }

    /// The storage adapter as a trait object, ready to hand to the engines.
    pub fn storage(&self) -> Arc<dyn StorageAdapter> {
        self.storage.clone()
    }

    /// The concrete adapter, for tests that reach below the trait.
    pub fn sqlite(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default configuration pointed at this store's database file.
    pub fn config(&self) -> CairnConfig {
        let mut config = CairnConfig::default();
        config.storage.database_path = self.path.to_string_lossy().to_string();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn temp_store_is_initialized() {
        let store = TempStore::new().await.unwrap();
        assert!(store.path().exists());
        let main = store.storage().get_branch("main").await.unwrap();
        assert!(main.is_some());
        assert_eq!(
            store.config().storage.database_path,
            store.path().to_string_lossy()
        );
    }
}
