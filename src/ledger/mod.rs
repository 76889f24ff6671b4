//! Position ledger: reservations and releases against participant positions.
//!
//! Each operation runs in one SQLite transaction whose first statement
//! locks the position row (see `db::repo::ledger_tx`). A limit breach is a
//! normal outcome ([`ReserveOutcome::Declined`]), not an error.

use crate::db::repo::ledger_tx::{
    insert_position_change, insert_state_change, insert_state_change_if, latest_state,
    lock_position, net_debit_cap, write_position, LockedPosition,
};
use crate::domain::{
    AccountId, Decimal, LedgerSubject, PositionChange, PositionDelta, StateChange, TimeMs,
    TransferState,
};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

pub const NET_DEBIT_CAP_EXCEEDED: &str = "Net Debit Cap exceeded";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("no position for account {0}")]
    PositionNotFound(AccountId),
    #[error("no active net debit cap for account {0}")]
    LimitNotFound(AccountId),
    #[error("reservation amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
}

/// One reservation to attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub subject: LedgerSubject,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved(PositionChange),
    /// Recorded as ABORTED_REJECTED; the position is untouched.
    Declined {
        subject: LedgerSubject,
        state_change_id: i64,
        available: Decimal,
    },
}

impl ReserveOutcome {
    pub fn is_reserved(&self) -> bool {
        matches!(self, ReserveOutcome::Reserved(_))
    }
}

/// Result of a settlement guarded on the subject's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Applied(Vec<PositionChange>),
    /// The subject left the accepted states first; nothing was written.
    Stale {
        subject: LedgerSubject,
        state: Option<TransferState>,
    },
}

/// A signed movement to apply together with the state change that causes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionInstruction {
    pub account_id: AccountId,
    pub delta: PositionDelta,
    pub state_change: StateChange,
}

pub struct PositionLedger {
    pool: SqlitePool,
}

impl PositionLedger {
    pub fn new(pool: SqlitePool) -> Self {
        PositionLedger { pool }
    }

    /// Reserve `amount` against the account if the net debit cap allows it.
    ///
    /// # Errors
    /// Returns an error on storage failure or when the account has no position or limit.
    pub async fn reserve(
        &self,
        account_id: AccountId,
        request: ReserveRequest,
    ) -> Result<ReserveOutcome, LedgerError> {
        let mut outcomes = self.reserve_batch(account_id, vec![request]).await?;
        Ok(outcomes.remove(0))
    }

    /// Reserve an ordered batch against one account.
    ///
    /// Items are decided in list order. Once one is declined every later
    /// item is declined too, even if it would fit.
    ///
    /// # Errors
    /// Returns an error on storage failure or when the account has no position or limit.
    pub async fn reserve_batch(
        &self,
        account_id: AccountId,
        requests: Vec<ReserveRequest>,
    ) -> Result<Vec<ReserveOutcome>, LedgerError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(bad) = requests.iter().find(|r| !r.amount.is_positive()) {
            return Err(LedgerError::NonPositiveAmount(bad.amount));
        }

        let now = TimeMs::now();
        let mut tx = self.pool.begin().await?;

        let mut position = lock_position(&mut tx, account_id, now)
            .await?
            .ok_or(LedgerError::PositionNotFound(account_id))?;
        let cap = net_debit_cap(&mut tx, account_id)
            .await?
            .ok_or(LedgerError::LimitNotFound(account_id))?;

        let mut outcomes = Vec::with_capacity(requests.len());
        let mut exhausted = false;

        for request in requests {
            let available = cap - position.value - position.reserved_value;

            if !exhausted && available >= request.amount {
                let state_change = StateChange::new(request.subject.clone(), TransferState::Reserved);
                let state_change_id = insert_state_change(&mut tx, &state_change, now).await?;
                let delta = PositionDelta::debit(request.amount);
                position.value += delta.value();
                let change = insert_position_change(
                    &mut tx,
                    &position,
                    &state_change,
                    state_change_id,
                    delta,
                    now,
                )
                .await?;
                debug!(
                    account_id = %account_id,
                    subject = %request.subject,
                    amount = %request.amount,
                    value = %position.value,
                    "position reserved"
                );
                outcomes.push(ReserveOutcome::Reserved(change));
            } else {
                exhausted = true;
                let state_change =
                    StateChange::new(request.subject.clone(), TransferState::AbortedRejected)
                        .with_reason(NET_DEBIT_CAP_EXCEEDED);
                let state_change_id = insert_state_change(&mut tx, &state_change, now).await?;
                info!(
                    account_id = %account_id,
                    subject = %request.subject,
                    amount = %request.amount,
                    available = %available,
                    "reservation declined: net debit cap exceeded"
                );
                outcomes.push(ReserveOutcome::Declined {
                    subject: request.subject,
                    state_change_id,
                    available,
                });
            }
        }

        write_position(&mut tx, &position, now).await?;
        tx.commit().await?;
        Ok(outcomes)
    }

    /// Apply one signed movement unconditionally.
    ///
    /// # Errors
    /// Returns an error on storage failure or when the account has no position.
    pub async fn release(
        &self,
        instruction: PositionInstruction,
    ) -> Result<PositionChange, LedgerError> {
        let mut changes = self.release_all(vec![instruction], Vec::new()).await?;
        Ok(changes.remove(0))
    }

    /// Apply a list of movements atomically, plus state changes that move no balance.
    ///
    /// Accounts are locked in the order they first appear. A subject's state
    /// change is written once even when several movements share it, and
    /// `extra_state_changes` for subjects already covered are skipped.
    ///
    /// # Errors
    /// Returns an error on storage failure or when an account has no position;
    /// nothing is written in that case.
    pub async fn release_all(
        &self,
        instructions: Vec<PositionInstruction>,
        extra_state_changes: Vec<StateChange>,
    ) -> Result<Vec<PositionChange>, LedgerError> {
        let now = TimeMs::now();
        let mut tx = self.pool.begin().await?;
        let changes = apply_releases(
            &mut tx,
            instructions,
            extra_state_changes,
            HashMap::new(),
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(changes)
    }

    /// [`release_all`](Self::release_all), but only while `guard.subject` is
    /// still in one of the `accepted` states.
    ///
    /// The guard's state change is the transaction's first write, so of two
    /// settlements racing on one subject the second sees the first's state
    /// and comes back [`Settlement::Stale`].
    ///
    /// # Errors
    /// Returns an error on storage failure or when an account has no position;
    /// nothing is written in that case.
    pub async fn settle(
        &self,
        guard: StateChange,
        accepted: &[TransferState],
        instructions: Vec<PositionInstruction>,
        extra_state_changes: Vec<StateChange>,
    ) -> Result<Settlement, LedgerError> {
        let now = TimeMs::now();
        let mut tx = self.pool.begin().await?;

        let Some(guard_id) = insert_state_change_if(&mut tx, &guard, accepted, now).await? else {
            let state = latest_state(&mut tx, &guard.subject).await?;
            tx.rollback().await?;
            info!(
                subject = %guard.subject,
                state = ?state,
                wanted = %guard.state,
                "settlement skipped: subject already moved on"
            );
            return Ok(Settlement::Stale {
                subject: guard.subject,
                state,
            });
        };

        let mut state_change_ids = HashMap::new();
        state_change_ids.insert((guard.subject.clone(), guard.state), guard_id);
        let changes = apply_releases(
            &mut tx,
            instructions,
            extra_state_changes,
            state_change_ids,
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(Settlement::Applied(changes))
    }
}

async fn apply_releases(
    conn: &mut SqliteConnection,
    instructions: Vec<PositionInstruction>,
    extra_state_changes: Vec<StateChange>,
    mut state_change_ids: HashMap<(LedgerSubject, TransferState), i64>,
    now: TimeMs,
) -> Result<Vec<PositionChange>, LedgerError> {
    let mut positions: Vec<LockedPosition> = Vec::new();
    let mut changes = Vec::with_capacity(instructions.len());

    for instruction in instructions {
        let index = match positions
            .iter()
            .position(|p| p.account_id == instruction.account_id)
        {
            Some(index) => index,
            None => {
                let locked = lock_position(&mut *conn, instruction.account_id, now)
                    .await?
                    .ok_or(LedgerError::PositionNotFound(instruction.account_id))?;
                positions.push(locked);
                positions.len() - 1
            }
        };

        let key = (
            instruction.state_change.subject.clone(),
            instruction.state_change.state,
        );
        let state_change_id = match state_change_ids.get(&key) {
            Some(id) => *id,
            None => {
                let id = insert_state_change(&mut *conn, &instruction.state_change, now).await?;
                state_change_ids.insert(key, id);
                id
            }
        };

        let position = &mut positions[index];
        position.value += instruction.delta.value();
        let change = insert_position_change(
            &mut *conn,
            position,
            &instruction.state_change,
            state_change_id,
            instruction.delta,
            now,
        )
        .await?;
        debug!(
            account_id = %instruction.account_id,
            subject = %instruction.state_change.subject,
            change = %instruction.delta.value(),
            value = %position.value,
            "position released"
        );
        changes.push(change);
    }

    for position in &positions {
        write_position(&mut *conn, position, now).await?;
    }

    for state_change in extra_state_changes {
        let covered = state_change_ids
            .keys()
            .any(|(subject, _)| *subject == state_change.subject);
        if covered {
            continue;
        }
        let id = insert_state_change(&mut *conn, &state_change, now).await?;
        state_change_ids.insert((state_change.subject.clone(), state_change.state), id);
    }

    Ok(changes)
}
