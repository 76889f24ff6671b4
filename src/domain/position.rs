//! Participant positions and the append-only change log.

use super::{AccountId, CommitRequestId, Decimal, TimeMs, TransferId, TransferState};
use serde::{Deserialize, Serialize};

/// Signed movement applied to a position.
///
/// Debits (reservations against the payer) are positive, credits are
/// negative. Reversing a change negates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionDelta(Decimal);

impl PositionDelta {
    pub fn debit(amount: Decimal) -> Self {
        PositionDelta(amount.abs())
    }

    pub fn credit(amount: Decimal) -> Self {
        PositionDelta(-amount.abs())
    }

    /// Wrap a signed value read back from the change log.
    pub fn from_signed(value: Decimal) -> Self {
        PositionDelta(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn reverse(&self) -> Self {
        PositionDelta(-self.0)
    }

    pub fn is_debit(&self) -> bool {
        self.0.is_positive()
    }
}

/// Current state of one position account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub account_id: AccountId,
    pub value: Decimal,
    pub reserved_value: Decimal,
    pub changed_at: TimeMs,
}

/// The transfer or FX leg whose lifecycle a ledger entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum LedgerSubject {
    Transfer(TransferId),
    FxTransfer(CommitRequestId),
}

impl LedgerSubject {
    pub fn id(&self) -> &str {
        match self {
            LedgerSubject::Transfer(id) => id.as_str(),
            LedgerSubject::FxTransfer(id) => id.as_str(),
        }
    }

    pub fn is_fx(&self) -> bool {
        matches!(self, LedgerSubject::FxTransfer(_))
    }
}

impl std::fmt::Display for LedgerSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerSubject::Transfer(id) => write!(f, "transfer {}", id),
            LedgerSubject::FxTransfer(id) => write!(f, "fxTransfer {}", id),
        }
    }
}

/// A state transition to append for a transfer or FX leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub subject: LedgerSubject,
    pub state: TransferState,
    pub reason: Option<String>,
}

impl StateChange {
    pub fn new(subject: LedgerSubject, state: TransferState) -> Self {
        StateChange {
            subject,
            state,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Append-only record of one position movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionChange {
    pub id: i64,
    pub account_id: AccountId,
    pub subject: LedgerSubject,
    pub state_change_id: i64,
    pub state: TransferState,
    /// Position value after this change
    pub value: Decimal,
    pub reserved_value: Decimal,
    pub change: PositionDelta,
    pub created_at: TimeMs,
}
