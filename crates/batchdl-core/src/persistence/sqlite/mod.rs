//! SQLite-backed store (sqlx).
//!
//! Connection and migrations live here; reads and writes in `read` / `write`.

mod read;
mod write;


use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;

use super::{DownloadsPersistence, StoredBatch};
use crate::error::PersistenceError;
use crate::model::{BatchId, BatchState, BatchStatus, FileId, FileRecord};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS batches (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        storage_root TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        status TEXT NOT NULL,
        bytes_downloaded INTEGER NOT NULL DEFAULT 0,
        bytes_total INTEGER,
        notification_seen INTEGER NOT NULL DEFAULT 0,
        error_json TEXT,
        remove_files INTEGER NOT NULL DEFAULT 0
    )
    "#,
    // `position` keeps files in submission order.
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id TEXT NOT NULL,
        batch_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        address TEXT NOT NULL,
        path TEXT NOT NULL,
        status TEXT NOT NULL,
        bytes_downloaded INTEGER NOT NULL DEFAULT 0,
        bytes_total INTEGER,
        error_json TEXT,
        PRIMARY KEY (batch_id, id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS files_by_batch ON files (batch_id, position)",
    "CREATE INDEX IF NOT EXISTS batches_by_status ON batches (status)",
];

fn io_error(e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError(e.to_string())
}

/// Handle to the SQLite store.
///
/// The default database lives under the XDG state directory:
/// `~/.local/state/batchdl/batchdl.db`.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the default database and run migrations.
    pub async fn open_default() -> Result<Self, PersistenceError> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("batchdl").map_err(io_error)?;
        let state_dir = xdg_dirs.get_state_home();
        Self::open_at(state_dir.join("batchdl.db")).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        let store = SqliteStore { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(store)
    }

    /// Private in-memory database (single connection, so every query sees the same data).
    pub async fn open_in_memory() -> Result<Self, PersistenceError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), PersistenceError> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod uri_tests {
    use super::*;

    #[test]
    fn uri_escapes_special_chars() {
        assert_eq!(
            path_to_sqlite_uri(Path::new("/tmp/my dir/a#b.db")),
            "sqlite:///tmp/my%20dir/a%23b.db"
        );
    }
}

#[async_trait::async_trait]
impl DownloadsPersistence for SqliteStore {
    async fn persist_batch(
        &self,
        batch: &BatchStatus,
        files: &[FileRecord],
    ) -> Result<(), PersistenceError> {
        self.upsert_batch(batch, files, None).await
    }

    async fn mark_deleting(
        &self,
        batch: &BatchStatus,
        files: &[FileRecord],
        remove_files: bool,
    ) -> Result<(), PersistenceError> {
        self.upsert_batch(batch, files, Some(remove_files)).await
    }

    async fn update_batch(&self, batch: &BatchStatus) -> Result<(), PersistenceError> {
        self.write_batch(batch).await
    }

    async fn update_file(&self, file: &FileRecord) -> Result<(), PersistenceError> {
        self.write_file(file).await
    }

    async fn load_batches(&self) -> Result<Vec<StoredBatch>, PersistenceError> {
        self.all_batches().await
    }

    async fn load_batch(&self, id: &BatchId) -> Result<Option<StoredBatch>, PersistenceError> {
        self.one_batch(id).await
    }

    async fn query_by_status(&self, state: BatchState) -> Result<Vec<BatchStatus>, PersistenceError> {
        self.batches_in_state(state).await
    }

    async fn delete_file(
        &self,
        batch_id: &BatchId,
        file_id: &FileId,
    ) -> Result<(), PersistenceError> {
        self.remove_file(batch_id, file_id).await
    }

    async fn delete_batch(&self, id: &BatchId) -> Result<(), PersistenceError> {
        self.remove_batch(id).await
    }

    async fn set_notification_seen(&self, id: &BatchId, seen: bool) -> Result<(), PersistenceError> {
        self.write_notification_seen(id, seen).await
    }
}
