// SPDX-FileCopyrightText: 2026 Cairn Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes.

use std::path::Path;

use cairn_core::CairnError;
use tracing::debug;

use crate::migrations;

/// Handle to the Cairn SQLite database.
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (or create) the database at `path`, apply PRAGMAs, and run
    /// pending migrations.
    ///
    /// The parent directory is created if missing. `:memory:` is accepted.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, CairnError> {
        if path != ":memory:"
            && let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CairnError::Storage {
                source: Box::new(e),
            })?;
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| CairnError::Storage {
                source: Box::new(e),
            })?;

        let pragmas = if wal_mode {
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;"
        } else {
            "PRAGMA journal_mode = DELETE;
             PRAGMA synchronous = FULL;"
        };
        conn.call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch(pragmas)?;
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        // Migration failures are carried out of the closure as a value.
        conn.call(|conn| -> Result<Result<(), CairnError>, rusqlite::Error> {
            Ok(migrations::run_migrations(conn))
        })
        .await
        .map_err(map_tr_err)??;

        debug!(path, wal_mode, "database opened");
        Ok(Self { conn })
    }

    /// The shared single-writer connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(self) -> Result<(), CairnError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        self.conn.close().await.map_err(map_tr_err)
    }
}

/// Map a tokio-rusqlite error into the storage variant of [`CairnError`].
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> CairnError {
    CairnError::Storage {
        source: Box::new(e),
    }
}
