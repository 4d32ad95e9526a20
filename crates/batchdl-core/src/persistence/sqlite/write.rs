//! Write queries: transactional batch upsert, progress updates, deletion.

use super::SqliteStore;
use crate::error::{DownloadError, PersistenceError};
use crate::model::{BatchId, BatchStatus, FileId, FileRecord, FileSize};

fn encode_error(error: Option<&DownloadError>) -> Result<Option<String>, PersistenceError> {
    Ok(error.map(serde_json::to_string).transpose()?)
}

fn encode_size(size: FileSize) -> Option<i64> {
    size.known().map(|n| n as i64)
}

impl SqliteStore {
    /// `delete_intent` is written only when given; a plain upsert keeps the
    /// stored value.
    pub(crate) async fn upsert_batch(
        &self,
        batch: &BatchStatus,
        files: &[FileRecord],
        delete_intent: Option<bool>,
    ) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO batches
                (id, title, storage_root, created_at, status, bytes_downloaded,
                 bytes_total, notification_seen, error_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                storage_root = excluded.storage_root,
                status = excluded.status,
                bytes_downloaded = excluded.bytes_downloaded,
                bytes_total = excluded.bytes_total,
                notification_seen = excluded.notification_seen,
                error_json = excluded.error_json
            "#,
        )
        .bind(batch.id.as_str())
        .bind(batch.title.as_str())
        .bind(batch.storage_root.to_string_lossy().into_owned())
        .bind(batch.created_at)
        .bind(batch.state.as_str())
        .bind(batch.bytes_downloaded as i64)
        .bind(encode_size(batch.bytes_total))
        .bind(batch.notification_seen)
        .bind(encode_error(batch.error.as_ref())?)
        .execute(&mut *tx)
        .await?;

        for (position, file) in files.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO files
                    (id, batch_id, position, address, path, status,
                     bytes_downloaded, bytes_total, error_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(batch_id, id) DO UPDATE SET
                    position = excluded.position,
                    address = excluded.address,
                    path = excluded.path,
                    status = excluded.status,
                    bytes_downloaded = excluded.bytes_downloaded,
                    bytes_total = excluded.bytes_total,
                    error_json = excluded.error_json
                "#,
            )
            .bind(file.id.as_str())
            .bind(batch.id.as_str())
            .bind(position as i64)
            .bind(file.address.as_str())
            .bind(file.path.to_string_lossy().into_owned())
            .bind(file.status.as_str())
            .bind(file.bytes_downloaded as i64)
            .bind(encode_size(file.size))
            .bind(encode_error(file.status.error())?)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(remove_files) = delete_intent {
            sqlx::query("UPDATE batches SET remove_files = ?1 WHERE id = ?2")
                .bind(remove_files)
                .bind(batch.id.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn write_batch(&self, batch: &BatchStatus) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            UPDATE batches
            SET status = ?1, bytes_downloaded = ?2, bytes_total = ?3,
                notification_seen = ?4, error_json = ?5
            WHERE id = ?6
            "#,
        )
        .bind(batch.state.as_str())
        .bind(batch.bytes_downloaded as i64)
        .bind(encode_size(batch.bytes_total))
        .bind(batch.notification_seen)
        .bind(encode_error(batch.error.as_ref())?)
        .bind(batch.id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(crate) async fn write_file(&self, file: &FileRecord) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            UPDATE files
            SET status = ?1, bytes_downloaded = ?2, bytes_total = ?3, error_json = ?4
            WHERE batch_id = ?5 AND id = ?6
            "#,
        )
        .bind(file.status.as_str())
        .bind(file.bytes_downloaded as i64)
        .bind(encode_size(file.size))
        .bind(encode_error(file.status.error())?)
        .bind(file.batch_id.as_str())
        .bind(file.id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(crate) async fn remove_file(
        &self,
        batch_id: &BatchId,
        file_id: &FileId,
    ) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM files WHERE batch_id = ?1 AND id = ?2")
            .bind(batch_id.as_str())
            .bind(file_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(crate) async fn remove_batch(&self, id: &BatchId) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM files WHERE batch_id = ?1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM batches WHERE id = ?1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn write_notification_seen(
        &self,
        id: &BatchId,
        seen: bool,
    ) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE batches SET notification_seen = ?1 WHERE id = ?2")
            .bind(seen)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
