// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the StorageAdapter trait.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use cairn_config::model::StorageConfig;
use cairn_core::types::{
    Branch, BranchActivity, BranchMetadata, BranchStatus, ConsolidationHistory, ConsolidationPlan,
    MergeHistory, MergePlan, RecordFilter, VersionedRecord,
};
use cairn_core::{AdapterType, CairnError, HealthStatus, PluginAdapter, StorageAdapter};

use crate::database::Database;
use crate::queries;
use crate::queries::branches::ForkOutcome;
use crate::queries::plans::MergeOutcome;
use crate::queries::records::InsertOutcome;

/// SQLite-backed storage adapter.
///
/// Wraps a [`Database`] handle and delegates all query operations to the
/// typed query modules. The database is lazily opened on the first call to
/// [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage with the given configuration.
    ///
    /// The database connection is not opened until [`initialize`] is called.
    ///
    /// [`initialize`]: StorageAdapter::initialize
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Returns a reference to the underlying Database, or an error if not initialized.
    pub fn database(&self) -> Result<&Database, CairnError> {
        self.db.get().ok_or_else(|| CairnError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }

    async fn checkpoint(&self) -> Result<(), CairnError> {
        if let Some(db) = self.db.get() {
            db.connection()
                .call(|conn| -> Result<(), rusqlite::Error> {
                    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                    Ok(())
                })
                .await
                .map_err(crate::database::map_tr_err)?;
            debug!("WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, CairnError> {
        let Some(db) = self.db.get() else {
            return Ok(HealthStatus::Unhealthy("storage not initialized".into()));
        };
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CairnError> {
        self.checkpoint().await
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), CairnError> {
        let db = Database::open(&self.config.database_path, self.config.wal_mode).await?;
        if queries::branches::ensure_root(&db, &Branch::root(Utc::now())).await? {
            info!("bootstrapped root branch");
        }
        self.db.set(db).map_err(|_| CairnError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), CairnError> {
        self.database()?;
        self.checkpoint().await
    }

    // --- Branch registry ---

    async fn get_branch(&self, name: &str) -> Result<Option<Branch>, CairnError> {
        queries::branches::get_branch(self.database()?, name).await
    }

    async fn list_branches(&self, status: Option<BranchStatus>) -> Result<Vec<Branch>, CairnError> {
        queries::branches::list_branches(self.database()?, status).await
    }

    async fn fork_branch(&self, branch: &Branch) -> Result<Branch, CairnError> {
        match queries::branches::fork_branch(self.database()?, branch).await? {
            ForkOutcome::Created { copied } => {
                debug!(branch = %branch.name, parent = %branch.parent_name, copied, "branch forked");
                Ok(branch.clone())
            }
            ForkOutcome::NameTaken => Err(CairnError::BranchExists {
                name: branch.name.clone(),
            }),
            ForkOutcome::ParentMissing => Err(CairnError::branch_not_found(&branch.parent_name)),
        }
    }

    async fn archive_branch(
        &self,
        branch_id: &str,
        expected: BranchStatus,
    ) -> Result<bool, CairnError> {
        queries::branches::archive_branch(self.database()?, branch_id, expected).await
    }

    async fn update_branch_metadata(
        &self,
        name: &str,
        metadata: &BranchMetadata,
    ) -> Result<(), CairnError> {
        queries::branches::update_metadata(self.database()?, name, metadata).await
    }

    // --- Records ---

    async fn insert_record(&self, record: &VersionedRecord) -> Result<(), CairnError> {
        queries::records::insert_record(self.database()?, record).await
    }

    async fn insert_live_record(&self, record: &VersionedRecord) -> Result<(), CairnError> {
        match queries::records::insert_live_record(self.database()?, record).await? {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::BranchMissing => Err(CairnError::branch_not_found(&record.branch_name)),
            InsertOutcome::BranchArchived => Err(CairnError::PolicyViolation(format!(
                "cannot write to archived branch {}",
                record.branch_name
            ))),
        }
    }

    async fn get_record(&self, id: &str) -> Result<Option<VersionedRecord>, CairnError> {
        queries::records::get_record(self.database()?, id).await
    }

    async fn list_records(
        &self,
        branch: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<VersionedRecord>, CairnError> {
        queries::records::list_records(self.database()?, branch, filter).await
    }

    async fn branch_activity(&self, branch: &str) -> Result<BranchActivity, CairnError> {
        queries::records::branch_activity(self.database()?, branch).await
    }

    // --- Atomic units ---

    async fn apply_merge(&self, plan: &MergePlan) -> Result<Vec<String>, CairnError> {
        match queries::plans::apply_merge(self.database()?, plan).await? {
            MergeOutcome::Applied(ids) => Ok(ids),
            MergeOutcome::TargetMissing => Err(CairnError::branch_not_found(&plan.target)),
            MergeOutcome::Aborted => Err(CairnError::ConcurrencyAborted {
                branch: plan.source.clone(),
            }),
        }
    }

    async fn apply_consolidation(&self, plan: &ConsolidationPlan) -> Result<(), CairnError> {
        queries::plans::apply_consolidation(self.database()?, plan).await
    }

    // --- Audit ---

    async fn merge_history(&self, branch: Option<&str>) -> Result<Vec<MergeHistory>, CairnError> {
        queries::history::list_merge_history(self.database()?, branch).await
    }

    async fn consolidation_history(
        &self,
        branch: Option<&str>,
    ) -> Result<Vec<ConsolidationHistory>, CairnError> {
        queries::history::list_consolidation_history(self.database()?, branch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_config(path: &str) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        }
    }

    #[tokio::test]
    async fn sqlite_storage_implements_plugin_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.adapter_type(), AdapterType::Storage);
        assert!(matches!(
            storage.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
    }

    #[tokio::test]
    async fn initialize_opens_database_and_bootstraps_main() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("init_test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        assert!(db_path.exists(), "database file should be created");
        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);

        let main = storage.get_branch("main").await.unwrap().unwrap();
        assert_eq!(main.status, BranchStatus::Active);
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn double_initialize_fails() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("double.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));
        storage.initialize().await.unwrap();
        assert!(storage.initialize().await.is_err());
    }

    #[tokio::test]
    async fn uninitialized_queries_fail_with_storage_error() {
        let storage = SqliteStorage::new(make_config("/nonexistent/never-opened.db"));
        let err = storage.get_branch("main").await.unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn fork_maps_outcomes_to_errors() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(make_config(dir.path().join("f.db").to_str().unwrap()));
        storage.initialize().await.unwrap();

        let now = Utc::now();
        storage.fork_branch(&Branch::new("task/a", "main", now)).await.unwrap();
        let err = storage
            .fork_branch(&Branch::new("task/a", "main", now))
            .await
            .unwrap_err();
        assert!(matches!(err, CairnError::BranchExists { name } if name == "task/a"));

        let err = storage
            .fork_branch(&Branch::new("task/b", "task/missing", now))
            .await
            .unwrap_err();
        assert!(matches!(err, CairnError::BranchNotFound { name } if name == "task/missing"));
    }
}
