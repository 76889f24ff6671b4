//! Transfer lifecycle states.
//!
//! Plain transfers and FX legs share one state vocabulary. States are stored
//! as their upper-case names in the `*_state_change` tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    /// Prepare received and persisted, funds not yet reserved
    ReceivedPrepare,
    /// Payer (or its FXP counterpart) position reserved
    Reserved,
    /// Reserved and handed to a proxy for delivery
    ReservedForwarded,
    /// Fulfilment accepted, obligations being applied
    ReceivedFulfil,
    /// FX leg fulfilled, waiting on the determining transfer
    ReceivedFulfilDependent,
    ReceivedReject,
    ReceivedError,
    /// Terminal: funds moved
    Committed,
    /// Terminal: payee rejected or limit check declined
    AbortedRejected,
    /// Terminal: error callback, validation abort or timeout
    AbortedError,
    /// Terminal: prepare failed validation
    Invalid,
}

/// Coarse grouping used by duplicate replay and the abort cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateEnumeration {
    Received,
    Reserved,
    /// Intermediate states that only exist while a handler is mid-flight
    InFlight,
    Committed,
    Aborted,
}

impl TransferState {
    /// States a plain transfer accepts callbacks in.
    pub const CALLBACK_STATES: &'static [TransferState] =
        &[TransferState::Reserved, TransferState::ReservedForwarded];

    /// Every non-terminal state.
    pub const OPEN_STATES: &'static [TransferState] = &[
        TransferState::ReceivedPrepare,
        TransferState::Reserved,
        TransferState::ReservedForwarded,
        TransferState::ReceivedFulfil,
        TransferState::ReceivedFulfilDependent,
        TransferState::ReceivedReject,
        TransferState::ReceivedError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::ReceivedPrepare => "RECEIVED_PREPARE",
            TransferState::Reserved => "RESERVED",
            TransferState::ReservedForwarded => "RESERVED_FORWARDED",
            TransferState::ReceivedFulfil => "RECEIVED_FULFIL",
            TransferState::ReceivedFulfilDependent => "RECEIVED_FULFIL_DEPENDENT",
            TransferState::ReceivedReject => "RECEIVED_REJECT",
            TransferState::ReceivedError => "RECEIVED_ERROR",
            TransferState::Committed => "COMMITTED",
            TransferState::AbortedRejected => "ABORTED_REJECTED",
            TransferState::AbortedError => "ABORTED_ERROR",
            TransferState::Invalid => "INVALID",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Committed
                | TransferState::AbortedRejected
                | TransferState::AbortedError
                | TransferState::Invalid
        )
    }

    pub fn enumeration(&self) -> StateEnumeration {
        match self {
            TransferState::ReceivedPrepare => StateEnumeration::Received,
            TransferState::Reserved
            | TransferState::ReservedForwarded
            | TransferState::ReceivedFulfilDependent => StateEnumeration::Reserved,
            TransferState::ReceivedFulfil
            | TransferState::ReceivedReject
            | TransferState::ReceivedError => StateEnumeration::InFlight,
            TransferState::Committed => StateEnumeration::Committed,
            TransferState::AbortedRejected | TransferState::AbortedError | TransferState::Invalid => {
                StateEnumeration::Aborted
            }
        }
    }

    /// States a plain transfer must be in to accept a fulfil, reject or error callback.
    pub fn accepts_transfer_callback(&self) -> bool {
        matches!(self, TransferState::Reserved | TransferState::ReservedForwarded)
    }

    /// FX legs additionally accept callbacks while waiting on their determining transfer.
    pub fn accepts_fx_callback(&self) -> bool {
        self.accepts_transfer_callback() || *self == TransferState::ReceivedFulfilDependent
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transfer state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for TransferState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "RECEIVED_PREPARE" => TransferState::ReceivedPrepare,
            "RESERVED" => TransferState::Reserved,
            "RESERVED_FORWARDED" => TransferState::ReservedForwarded,
            "RECEIVED_FULFIL" => TransferState::ReceivedFulfil,
            "RECEIVED_FULFIL_DEPENDENT" => TransferState::ReceivedFulfilDependent,
            "RECEIVED_REJECT" => TransferState::ReceivedReject,
            "RECEIVED_ERROR" => TransferState::ReceivedError,
            "COMMITTED" => TransferState::Committed,
            "ABORTED_REJECTED" => TransferState::AbortedRejected,
            "ABORTED_ERROR" => TransferState::AbortedError,
            "INVALID" => TransferState::Invalid,
            other => return Err(UnknownState(other.to_string())),
        })
    }
}
