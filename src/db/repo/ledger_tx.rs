//! Statements executed inside a ledger transaction.
//!
//! Every ledger transaction starts with [`lock_position`]: the `UPDATE ...
//! RETURNING` takes SQLite's write lock before any position value is read,
//! so no two transactions compute against the same stale balance.

use crate::domain::{
    AccountId, CommitRequestId, Decimal, LedgerSubject, PositionChange, PositionDelta,
    StateChange, TimeMs, TransferId, TransferState,
};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::{decimal_column, state_column};

/// Position row held under the transaction's write lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LockedPosition {
    pub position_id: i64,
    pub account_id: AccountId,
    pub value: Decimal,
    pub reserved_value: Decimal,
}

/// Touch the position row and read it back. `None` if the account has no position.
pub(crate) async fn lock_position(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    now: TimeMs,
) -> Result<Option<LockedPosition>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE participant_position
        SET changed_at = ?
        WHERE participant_currency_id = ?
        RETURNING participant_position_id, value, reserved_value
        "#,
    )
    .bind(now.as_i64())
    .bind(account_id.as_i64())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| {
        Ok(LockedPosition {
            position_id: row.try_get("participant_position_id")?,
            account_id,
            value: decimal_column(&row, "value")?,
            reserved_value: decimal_column(&row, "reserved_value")?,
        })
    })
    .transpose()
}

pub(crate) async fn net_debit_cap(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> Result<Option<Decimal>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT value FROM participant_limit
        WHERE participant_currency_id = ? AND limit_type = 'NET_DEBIT_CAP' AND is_active = 1
        "#,
    )
    .bind(account_id.as_i64())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| decimal_column(&row, "value")).transpose()
}

pub(crate) async fn write_position(
    conn: &mut SqliteConnection,
    position: &LockedPosition,
    now: TimeMs,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE participant_position
        SET value = ?, reserved_value = ?, changed_at = ?
        WHERE participant_position_id = ?
        "#,
    )
    .bind(position.value.to_canonical_string())
    .bind(position.reserved_value.to_canonical_string())
    .bind(now.as_i64())
    .bind(position.position_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Append a state change for the subject; returns its id.
pub(crate) async fn insert_state_change(
    conn: &mut SqliteConnection,
    change: &StateChange,
    now: TimeMs,
) -> Result<i64, sqlx::Error> {
    let sql = match change.subject {
        LedgerSubject::Transfer(_) => {
            r#"
            INSERT INTO transfer_state_change (transfer_id, transfer_state, reason, created_at)
            VALUES (?, ?, ?, ?)
            "#
        }
        LedgerSubject::FxTransfer(_) => {
            r#"
            INSERT INTO fx_transfer_state_change (commit_request_id, transfer_state, reason, created_at)
            VALUES (?, ?, ?, ?)
            "#
        }
    };

    let result = sqlx::query(sql)
        .bind(change.subject.id())
        .bind(change.state.as_str())
        .bind(change.reason.as_deref())
        .bind(now.as_i64())
        .execute(&mut *conn)
        .await?;

    Ok(result.last_insert_rowid())
}

/// Append a state change only while the subject's latest state is one of `accepted`.
///
/// Being a write, this statement takes the write lock before the latest
/// state is read. Returns the new row id, or `None` when the subject had
/// already moved on.
pub(crate) async fn insert_state_change_if(
    conn: &mut SqliteConnection,
    change: &StateChange,
    accepted: &[TransferState],
    now: TimeMs,
) -> Result<Option<i64>, sqlx::Error> {
    let placeholders = vec!["?"; accepted.len()].join(", ");
    let sql = match change.subject {
        LedgerSubject::Transfer(_) => format!(
            r#"
            INSERT INTO transfer_state_change (transfer_id, transfer_state, reason, created_at)
            SELECT ?, ?, ?, ?
            WHERE (
                SELECT transfer_state FROM transfer_state_change
                WHERE transfer_id = ?
                ORDER BY transfer_state_change_id DESC LIMIT 1
            ) IN ({})
            "#,
            placeholders
        ),
        LedgerSubject::FxTransfer(_) => format!(
            r#"
            INSERT INTO fx_transfer_state_change (commit_request_id, transfer_state, reason, created_at)
            SELECT ?, ?, ?, ?
            WHERE (
                SELECT transfer_state FROM fx_transfer_state_change
                WHERE commit_request_id = ?
                ORDER BY fx_transfer_state_change_id DESC LIMIT 1
            ) IN ({})
            "#,
            placeholders
        ),
    };

    let mut query = sqlx::query(&sql)
        .bind(change.subject.id())
        .bind(change.state.as_str())
        .bind(change.reason.as_deref())
        .bind(now.as_i64())
        .bind(change.subject.id());
    for state in accepted {
        query = query.bind(state.as_str());
    }
    let result = query.execute(&mut *conn).await?;

    if result.rows_affected() == 0 {
        Ok(None)
    } else {
        Ok(Some(result.last_insert_rowid()))
    }
}

/// Latest recorded state of a subject.
pub(crate) async fn latest_state(
    conn: &mut SqliteConnection,
    subject: &LedgerSubject,
) -> Result<Option<TransferState>, sqlx::Error> {
    let sql = match subject {
        LedgerSubject::Transfer(_) => {
            r#"
            SELECT transfer_state FROM transfer_state_change
            WHERE transfer_id = ?
            ORDER BY transfer_state_change_id DESC LIMIT 1
            "#
        }
        LedgerSubject::FxTransfer(_) => {
            r#"
            SELECT transfer_state FROM fx_transfer_state_change
            WHERE commit_request_id = ?
            ORDER BY fx_transfer_state_change_id DESC LIMIT 1
            "#
        }
    };

    let row = sqlx::query(sql)
        .bind(subject.id())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|row| state_column(&row, "transfer_state")).transpose()
}

/// Append a position change reflecting `position` after `delta` was applied.
pub(crate) async fn insert_position_change(
    conn: &mut SqliteConnection,
    position: &LockedPosition,
    state_change: &StateChange,
    state_change_id: i64,
    delta: PositionDelta,
    now: TimeMs,
) -> Result<PositionChange, sqlx::Error> {
    let (transfer_id, commit_request_id) = match &state_change.subject {
        LedgerSubject::Transfer(id) => (Some(id.as_str()), None),
        LedgerSubject::FxTransfer(id) => (None, Some(id.as_str())),
    };

    let id = sqlx::query(
        r#"
        INSERT INTO participant_position_change (
            participant_position_id, participant_currency_id, transfer_id, commit_request_id,
            state_change_id, transfer_state, value, reserved_value, change, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(position.position_id)
    .bind(position.account_id.as_i64())
    .bind(transfer_id)
    .bind(commit_request_id)
    .bind(state_change_id)
    .bind(state_change.state.as_str())
    .bind(position.value.to_canonical_string())
    .bind(position.reserved_value.to_canonical_string())
    .bind(delta.value().to_canonical_string())
    .bind(now.as_i64())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(PositionChange {
        id,
        account_id: position.account_id,
        subject: state_change.subject.clone(),
        state_change_id,
        state: state_change.state,
        value: position.value,
        reserved_value: position.reserved_value,
        change: delta,
        created_at: now,
    })
}

pub(crate) fn position_change_from_row(row: &SqliteRow) -> Result<PositionChange, sqlx::Error> {
    let transfer_id: Option<String> = row.try_get("transfer_id")?;
    let commit_request_id: Option<String> = row.try_get("commit_request_id")?;
    let subject = match (transfer_id, commit_request_id) {
        (Some(id), _) => LedgerSubject::Transfer(TransferId::new(id)),
        (None, Some(id)) => LedgerSubject::FxTransfer(CommitRequestId::new(id)),
        (None, None) => {
            return Err(sqlx::Error::ColumnDecode {
                index: "transfer_id".to_string(),
                source: "position change has neither transfer_id nor commit_request_id".into(),
            })
        }
    };

    Ok(PositionChange {
        id: row.try_get("participant_position_change_id")?,
        account_id: AccountId(row.try_get("participant_currency_id")?),
        subject,
        state_change_id: row.try_get("state_change_id")?,
        state: state_column(row, "transfer_state")?,
        value: decimal_column(row, "value")?,
        reserved_value: decimal_column(row, "reserved_value")?,
        change: PositionDelta::from_signed(decimal_column(row, "change")?),
        created_at: TimeMs::new(row.try_get("created_at")?),
    })
}
