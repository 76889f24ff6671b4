//! FX watch list operations for the repository.

use crate::domain::{CommitRequestId, FxTransferType, TimeMs, TransferId, WatchListEntry};
use sqlx::Row;
use std::str::FromStr;

use super::Repository;

impl Repository {
    /// Register an FX leg against its determining transfer.
    ///
    /// # Errors
    /// Returns an error if the leg is already on the watch list or the insert fails.
    pub async fn add_to_watch_list(
        &self,
        determining_transfer_id: &TransferId,
        commit_request_id: &CommitRequestId,
        fx_transfer_type: FxTransferType,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO fx_watch_list (determining_transfer_id, commit_request_id, fx_transfer_type, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(determining_transfer_id.as_str())
        .bind(commit_request_id.as_str())
        .bind(fx_transfer_type.as_str())
        .bind(TimeMs::now().as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Watch list entries for a determining transfer, in registration order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored type is unknown.
    pub async fn get_watch_list_by_determining_transfer_id(
        &self,
        determining_transfer_id: &TransferId,
    ) -> Result<Vec<WatchListEntry>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT fx_watch_list_id, determining_transfer_id, commit_request_id, fx_transfer_type, created_at
            FROM fx_watch_list
            WHERE determining_transfer_id = ?
            ORDER BY fx_watch_list_id ASC
            "#,
        )
        .bind(determining_transfer_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let fx_transfer_type: String = row.try_get("fx_transfer_type")?;
                let fx_transfer_type = FxTransferType::from_str(&fx_transfer_type).map_err(|e| {
                    sqlx::Error::ColumnDecode {
                        index: "fx_transfer_type".to_string(),
                        source: e.into(),
                    }
                })?;
                Ok(WatchListEntry {
                    id: row.try_get("fx_watch_list_id")?,
                    determining_transfer_id: TransferId::new(
                        row.try_get::<String, _>("determining_transfer_id")?,
                    ),
                    commit_request_id: CommitRequestId::new(
                        row.try_get::<String, _>("commit_request_id")?,
                    ),
                    fx_transfer_type,
                    created_at: TimeMs::new(row.try_get("created_at")?),
                })
            })
            .collect()
    }
}
