//! Plain transfer operations for the repository.

use crate::domain::{
    Currency, LedgerSubject, Money, ParticipantName, StateChange, TimeMs, Transfer, TransferId,
    TransferPrepare, TransferState,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::ledger_tx::{insert_state_change, latest_state};
use super::{datetime_column, decimal_column, format_datetime, state_column, Repository};

impl Repository {
    /// Persist a prepare request with its first state.
    ///
    /// Valid requests start `RECEIVED_PREPARE`, invalid ones are stored
    /// `INVALID` with the joined validation reasons.
    ///
    /// # Errors
    /// Returns an error if the transfer already exists or the insert fails.
    pub async fn insert_transfer(
        &self,
        prepare: &TransferPrepare,
        payer_proxy: Option<&ParticipantName>,
        payee_proxy: Option<&ParticipantName>,
        state: TransferState,
        reason: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let now = TimeMs::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO transfer (
                transfer_id, payer_fsp, payee_fsp, amount, currency_id, ilp_packet,
                ilp_condition, expiration_date, payer_proxy, payee_proxy, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(prepare.transfer_id.as_str())
        .bind(prepare.payer_fsp.as_str())
        .bind(prepare.payee_fsp.as_str())
        .bind(prepare.amount.amount.to_canonical_string())
        .bind(prepare.amount.currency.as_str())
        .bind(prepare.ilp_packet.as_deref())
        .bind(prepare.condition.as_deref())
        .bind(prepare.expiration.as_ref().map(format_datetime))
        .bind(payer_proxy.map(|p| p.as_str()))
        .bind(payee_proxy.map(|p| p.as_str()))
        .bind(now.as_i64())
        .execute(&mut *tx)
        .await?;

        let mut change = StateChange::new(
            LedgerSubject::Transfer(prepare.transfer_id.clone()),
            state,
        );
        change.reason = reason.map(str::to_string);
        insert_state_change(&mut tx, &change, now).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Transfer with its latest state and fulfilment.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored column is corrupt.
    pub async fn get_transfer(&self, transfer_id: &TransferId) -> Result<Option<Transfer>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT t.transfer_id, t.payer_fsp, t.payee_fsp, t.amount, t.currency_id,
                   t.ilp_condition, t.expiration_date, t.payer_proxy, t.payee_proxy,
                   (SELECT tsc.transfer_state FROM transfer_state_change tsc
                    WHERE tsc.transfer_id = t.transfer_id
                    ORDER BY tsc.transfer_state_change_id DESC LIMIT 1) AS transfer_state,
                   tf.ilp_fulfilment, tf.completed_date
            FROM transfer t
            LEFT JOIN transfer_fulfilment tf ON tf.transfer_id = t.transfer_id
            WHERE t.transfer_id = ?
            "#,
        )
        .bind(transfer_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transfer_from_row).transpose()
    }

    /// Append a state change outside of any ledger movement.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn record_state_change(&self, change: &StateChange) -> Result<i64, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        insert_state_change(&mut conn, change, TimeMs::now()).await
    }

    /// Latest state of a transfer or FX leg.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_latest_state(
        &self,
        subject: &LedgerSubject,
    ) -> Result<Option<TransferState>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        latest_state(&mut conn, subject).await
    }

    /// Store the fulfilment of an accepted fulfil callback. State is left to the ledger.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn save_transfer_fulfilment(
        &self,
        transfer_id: &TransferId,
        fulfilment: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO transfer_fulfilment (transfer_id, ilp_fulfilment, completed_date, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(transfer_id) DO UPDATE SET
                ilp_fulfilment = excluded.ilp_fulfilment,
                completed_date = excluded.completed_date
            "#,
        )
        .bind(transfer_id.as_str())
        .bind(fulfilment)
        .bind(completed_at.as_ref().map(format_datetime))
        .bind(TimeMs::now().as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn log_transfer_error(
        &self,
        transfer_id: &TransferId,
        error_code: &str,
        error_description: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO transfer_error (transfer_id, error_code, error_description, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(transfer_id.as_str())
        .bind(error_code)
        .bind(error_description)
        .bind(TimeMs::now().as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Error log of a transfer, oldest first, as (code, description).
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_transfer_errors(
        &self,
        transfer_id: &TransferId,
    ) -> Result<Vec<(String, String)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT error_code, error_description FROM transfer_error
            WHERE transfer_id = ?
            ORDER BY transfer_error_id ASC
            "#,
        )
        .bind(transfer_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("error_code"), row.get("error_description")))
            .collect())
    }

    /// Full state history of a transfer, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_transfer_states(
        &self,
        transfer_id: &TransferId,
    ) -> Result<Vec<TransferState>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT transfer_state FROM transfer_state_change
            WHERE transfer_id = ?
            ORDER BY transfer_state_change_id ASC
            "#,
        )
        .bind(transfer_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| state_column(row, "transfer_state"))
            .collect()
    }
}

fn transfer_from_row(row: &SqliteRow) -> Result<Transfer, sqlx::Error> {
    Ok(Transfer {
        transfer_id: TransferId::new(row.try_get::<String, _>("transfer_id")?),
        payer_fsp: ParticipantName::new(row.try_get::<String, _>("payer_fsp")?),
        payee_fsp: ParticipantName::new(row.try_get::<String, _>("payee_fsp")?),
        amount: Money::new(
            decimal_column(row, "amount")?,
            Currency::new(row.try_get::<String, _>("currency_id")?),
        ),
        condition: row.try_get("ilp_condition")?,
        expiration: datetime_column(row, "expiration_date")?,
        payer_proxy: row
            .try_get::<Option<String>, _>("payer_proxy")?
            .map(ParticipantName::new),
        payee_proxy: row
            .try_get::<Option<String>, _>("payee_proxy")?
            .map(ParticipantName::new),
        state: state_column(row, "transfer_state")?,
        fulfilment: row.try_get("ilp_fulfilment")?,
        completed_at: datetime_column(row, "completed_date")?,
    })
}
