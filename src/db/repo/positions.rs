//! Position and position change queries for the repository.

use crate::domain::{AccountId, LedgerSubject, Position, PositionChange, TimeMs};
use sqlx::Row;

use super::ledger_tx::position_change_from_row;
use super::{decimal_column, Repository};

impl Repository {
    /// Current position of an account.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored amount is corrupt.
    pub async fn get_position(&self, account_id: AccountId) -> Result<Option<Position>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT value, reserved_value, changed_at
            FROM participant_position
            WHERE participant_currency_id = ?
            "#,
        )
        .bind(account_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Position {
                account_id,
                value: decimal_column(&row, "value")?,
                reserved_value: decimal_column(&row, "reserved_value")?,
                changed_at: TimeMs::new(row.get("changed_at")),
            })
        })
        .transpose()
    }

    /// Change log of one account, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_position_changes(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<PositionChange>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT participant_position_change_id, participant_currency_id, transfer_id,
                   commit_request_id, state_change_id, transfer_state, value, reserved_value,
                   change, created_at
            FROM participant_position_change
            WHERE participant_currency_id = ?
            ORDER BY participant_position_change_id ASC
            "#,
        )
        .bind(account_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(position_change_from_row).collect()
    }

    /// Reservations of a transfer or FX leg that have not been settled yet.
    ///
    /// A reservation stays open until the subject records a COMMITTED or
    /// ABORTED position change of its own.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_reserved_position_changes(
        &self,
        subject: &LedgerSubject,
    ) -> Result<Vec<PositionChange>, sqlx::Error> {
        let sql = match subject {
            LedgerSubject::Transfer(_) => {
                r#"
                SELECT ppc.participant_position_change_id, ppc.participant_currency_id,
                       ppc.transfer_id, ppc.commit_request_id, ppc.state_change_id,
                       ppc.transfer_state, ppc.value, ppc.reserved_value, ppc.change, ppc.created_at
                FROM participant_position_change ppc
                WHERE ppc.transfer_id = ? AND ppc.transfer_state = 'RESERVED'
                  AND NOT EXISTS (
                      SELECT 1 FROM participant_position_change settled
                      WHERE settled.transfer_id = ppc.transfer_id
                        AND settled.transfer_state IN ('COMMITTED', 'ABORTED_ERROR', 'ABORTED_REJECTED')
                  )
                ORDER BY ppc.participant_position_change_id ASC
                "#
            }
            LedgerSubject::FxTransfer(_) => {
                r#"
                SELECT ppc.participant_position_change_id, ppc.participant_currency_id,
                       ppc.transfer_id, ppc.commit_request_id, ppc.state_change_id,
                       ppc.transfer_state, ppc.value, ppc.reserved_value, ppc.change, ppc.created_at
                FROM participant_position_change ppc
                WHERE ppc.commit_request_id = ? AND ppc.transfer_state = 'RESERVED'
                  AND NOT EXISTS (
                      SELECT 1 FROM participant_position_change settled
                      WHERE settled.commit_request_id = ppc.commit_request_id
                        AND settled.transfer_state IN ('COMMITTED', 'ABORTED_ERROR', 'ABORTED_REJECTED')
                  )
                ORDER BY ppc.participant_position_change_id ASC
                "#
            }
        };

        let rows = sqlx::query(sql)
            .bind(subject.id())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(position_change_from_row).collect()
    }
}
