//! FX transfer operations for the repository.

use crate::domain::{
    CommitRequestId, Currency, FxTransfer, FxTransferPrepare, LedgerSubject, Money,
    ParticipantName, StateChange, TimeMs, TransferId, TransferState,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::ledger_tx::insert_state_change;
use super::{datetime_column, decimal_column, format_datetime, state_column, Repository};

const FX_TRANSFER_COLUMNS: &str = r#"
    SELECT fx.commit_request_id, fx.determining_transfer_id, fx.initiating_fsp,
           fx.counter_party_fsp, fx.source_amount, fx.source_currency, fx.target_amount,
           fx.target_currency, fx.ilp_condition, fx.expiration_date, fx.initiating_proxy,
           fx.counter_party_proxy,
           (SELECT sc.transfer_state FROM fx_transfer_state_change sc
            WHERE sc.commit_request_id = fx.commit_request_id
            ORDER BY sc.fx_transfer_state_change_id DESC LIMIT 1) AS transfer_state,
           ff.ilp_fulfilment, ff.completed_date
    FROM fx_transfer fx
    LEFT JOIN fx_transfer_fulfilment ff ON ff.commit_request_id = fx.commit_request_id
"#;

impl Repository {
    /// Persist an FX prepare request with its first state.
    ///
    /// # Errors
    /// Returns an error if the leg already exists or the insert fails.
    pub async fn insert_fx_transfer(
        &self,
        prepare: &FxTransferPrepare,
        initiating_proxy: Option<&ParticipantName>,
        counter_party_proxy: Option<&ParticipantName>,
        state: TransferState,
        reason: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let now = TimeMs::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO fx_transfer (
                commit_request_id, determining_transfer_id, initiating_fsp, counter_party_fsp,
                source_amount, source_currency, target_amount, target_currency, ilp_condition,
                expiration_date, initiating_proxy, counter_party_proxy, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(prepare.commit_request_id.as_str())
        .bind(prepare.determining_transfer_id.as_str())
        .bind(prepare.initiating_fsp.as_str())
        .bind(prepare.counter_party_fsp.as_str())
        .bind(prepare.source_amount.amount.to_canonical_string())
        .bind(prepare.source_amount.currency.as_str())
        .bind(prepare.target_amount.amount.to_canonical_string())
        .bind(prepare.target_amount.currency.as_str())
        .bind(prepare.condition.as_deref())
        .bind(prepare.expiration.as_ref().map(format_datetime))
        .bind(initiating_proxy.map(|p| p.as_str()))
        .bind(counter_party_proxy.map(|p| p.as_str()))
        .bind(now.as_i64())
        .execute(&mut *tx)
        .await?;

        let mut change = StateChange::new(
            LedgerSubject::FxTransfer(prepare.commit_request_id.clone()),
            state,
        );
        change.reason = reason.map(str::to_string);
        insert_state_change(&mut tx, &change, now).await?;

        tx.commit().await?;
        Ok(())
    }

    /// FX leg with its latest state and fulfilment.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored column is corrupt.
    pub async fn get_fx_transfer(
        &self,
        commit_request_id: &CommitRequestId,
    ) -> Result<Option<FxTransfer>, sqlx::Error> {
        let sql = format!("{} WHERE fx.commit_request_id = ?", FX_TRANSFER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(commit_request_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(fx_transfer_from_row).transpose()
    }

    /// Every FX leg prepared against a determining transfer, in arrival order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_fx_transfers_by_determining_transfer_id(
        &self,
        determining_transfer_id: &TransferId,
    ) -> Result<Vec<FxTransfer>, sqlx::Error> {
        let sql = format!(
            "{} WHERE fx.determining_transfer_id = ? ORDER BY fx.created_at ASC, fx.commit_request_id ASC",
            FX_TRANSFER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(determining_transfer_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(fx_transfer_from_row).collect()
    }

    /// Record an accepted FX fulfil callback.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn record_fx_transfer_fulfilment(
        &self,
        commit_request_id: &CommitRequestId,
        state: TransferState,
        fulfilment: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        let now = TimeMs::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO fx_transfer_fulfilment (commit_request_id, ilp_fulfilment, completed_date, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(commit_request_id) DO UPDATE SET
                ilp_fulfilment = excluded.ilp_fulfilment,
                completed_date = excluded.completed_date
            "#,
        )
        .bind(commit_request_id.as_str())
        .bind(fulfilment)
        .bind(completed_at.as_ref().map(format_datetime))
        .bind(now.as_i64())
        .execute(&mut *tx)
        .await?;

        let change = StateChange::new(LedgerSubject::FxTransfer(commit_request_id.clone()), state);
        insert_state_change(&mut tx, &change, now).await?;

        tx.commit().await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn log_fx_transfer_error(
        &self,
        commit_request_id: &CommitRequestId,
        error_code: &str,
        error_description: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO fx_transfer_error (commit_request_id, error_code, error_description, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(commit_request_id.as_str())
        .bind(error_code)
        .bind(error_description)
        .bind(TimeMs::now().as_i64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Full state history of an FX leg, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_fx_transfer_states(
        &self,
        commit_request_id: &CommitRequestId,
    ) -> Result<Vec<TransferState>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT transfer_state FROM fx_transfer_state_change
            WHERE commit_request_id = ?
            ORDER BY fx_transfer_state_change_id ASC
            "#,
        )
        .bind(commit_request_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| state_column(row, "transfer_state"))
            .collect()
    }
}

fn fx_transfer_from_row(row: &SqliteRow) -> Result<FxTransfer, sqlx::Error> {
    Ok(FxTransfer {
        commit_request_id: CommitRequestId::new(row.try_get::<String, _>("commit_request_id")?),
        determining_transfer_id: TransferId::new(
            row.try_get::<String, _>("determining_transfer_id")?,
        ),
        initiating_fsp: ParticipantName::new(row.try_get::<String, _>("initiating_fsp")?),
        counter_party_fsp: ParticipantName::new(row.try_get::<String, _>("counter_party_fsp")?),
        source_amount: Money::new(
            decimal_column(row, "source_amount")?,
            Currency::new(row.try_get::<String, _>("source_currency")?),
        ),
        target_amount: Money::new(
            decimal_column(row, "target_amount")?,
            Currency::new(row.try_get::<String, _>("target_currency")?),
        ),
        condition: row.try_get("ilp_condition")?,
        expiration: datetime_column(row, "expiration_date")?,
        initiating_proxy: row
            .try_get::<Option<String>, _>("initiating_proxy")?
            .map(ParticipantName::new),
        counter_party_proxy: row
            .try_get::<Option<String>, _>("counter_party_proxy")?
            .map(ParticipantName::new),
        state: state_column(row, "transfer_state")?,
        fulfilment: row.try_get("ilp_fulfilment")?,
        completed_at: datetime_column(row, "completed_date")?,
    })
}
