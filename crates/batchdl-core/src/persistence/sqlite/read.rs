//! Read queries: batches with their files, by id or status.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::PathBuf;

use super::SqliteStore;
use crate::error::{DownloadError, PersistenceError};
use crate::model::{BatchId, BatchState, BatchStatus, FileId, FileRecord, FileSize, FileStatus};
use crate::persistence::StoredBatch;

const BATCH_COLUMNS: &str = "id, title, storage_root, created_at, status, bytes_downloaded, \
                             bytes_total, notification_seen, error_json, remove_files";

fn decode_error(json: Option<String>) -> Result<Option<DownloadError>, PersistenceError> {
    Ok(json
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(serde_json::from_str::<DownloadError>)
        .transpose()?)
}

fn decode_size(v: Option<i64>) -> FileSize {
    v.map(|n| n.max(0) as u64).into()
}

fn batch_from_row(row: &SqliteRow) -> Result<BatchStatus, PersistenceError> {
    let id: String = row.try_get("id")?;
    let title: String = row.try_get("title")?;
    let storage_root: String = row.try_get("storage_root")?;
    let created_at: i64 = row.try_get("created_at")?;
    let status: String = row.try_get("status")?;
    let bytes_downloaded: i64 = row.try_get("bytes_downloaded")?;
    let bytes_total: Option<i64> = row.try_get("bytes_total")?;
    let notification_seen: bool = row.try_get("notification_seen")?;
    let error_json: Option<String> = row.try_get("error_json")?;

    Ok(BatchStatus {
        id: BatchId::from(id),
        title,
        storage_root: PathBuf::from(storage_root),
        created_at,
        state: BatchState::parse(&status),
        bytes_downloaded: bytes_downloaded.max(0) as u64,
        bytes_total: decode_size(bytes_total),
        error: decode_error(error_json)?,
        notification_seen,
        reason: None,
    })
}

fn file_from_row(row: &SqliteRow) -> Result<FileRecord, PersistenceError> {
    let id: String = row.try_get("id")?;
    let batch_id: String = row.try_get("batch_id")?;
    let address: String = row.try_get("address")?;
    let path: String = row.try_get("path")?;
    let status: String = row.try_get("status")?;
    let bytes_downloaded: i64 = row.try_get("bytes_downloaded")?;
    let bytes_total: Option<i64> = row.try_get("bytes_total")?;
    let error_json: Option<String> = row.try_get("error_json")?;

    Ok(FileRecord {
        id: FileId::from(id),
        batch_id: BatchId::from(batch_id),
        address,
        path: PathBuf::from(path),
        status: FileStatus::from_parts(&status, decode_error(error_json)?),
        bytes_downloaded: bytes_downloaded.max(0) as u64,
        size: decode_size(bytes_total),
    })
}

impl SqliteStore {
    pub(crate) async fn files_of(&self, batch_id: &BatchId) -> Result<Vec<FileRecord>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT id, batch_id, address, path, status, bytes_downloaded, bytes_total, error_json
            FROM files
            WHERE batch_id = ?1
            ORDER BY position ASC
            "#,
        )
        .bind(batch_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(file_from_row).collect()
    }

    pub(crate) async fn all_batches(&self) -> Result<Vec<StoredBatch>, PersistenceError> {
        let rows = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let status = batch_from_row(&row)?;
            let remove_files: bool = row.try_get("remove_files")?;
            let files = self.files_of(&status.id).await?;
            out.push(StoredBatch {
                status,
                files,
                remove_files,
            });
        }
        Ok(out)
    }

    pub(crate) async fn one_batch(&self, id: &BatchId) -> Result<Option<StoredBatch>, PersistenceError> {
        let row = sqlx::query(&format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let status = batch_from_row(&row)?;
        let remove_files: bool = row.try_get("remove_files")?;
        let files = self.files_of(&status.id).await?;
        Ok(Some(StoredBatch {
            status,
            files,
            remove_files,
        }))
    }

    pub(crate) async fn batches_in_state(
        &self,
        state: BatchState,
    ) -> Result<Vec<BatchStatus>, PersistenceError> {
        let rows = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE status = ?1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(batch_from_row).collect()
    }
}
