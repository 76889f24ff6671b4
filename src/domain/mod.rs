//! Domain types for the hub ledger.
//!
//! This module provides:
//! - Lossless amounts via the Decimal wrapper
//! - Identifier and participant primitives
//! - Transfer and FX transfer records with their lifecycle states
//! - Position deltas, changes and the FX watch list
//! - Bus message shapes

pub mod decimal;
pub mod message;
pub mod participant;
pub mod position;
pub mod primitives;
pub mod state;
pub mod transfer;
pub mod watch_list;

pub use decimal::Decimal;
pub use message::{
    Action, ErrorInformation, ErrorPayload, Functionality, Headers, InboundMessage,
    OutboundMessage,
};
pub use participant::{Participant, ParticipantAccount};
pub use position::{LedgerSubject, Position, PositionChange, PositionDelta, StateChange};
pub use primitives::{AccountId, CommitRequestId, Currency, ParticipantName, TimeMs, TransferId};
pub use state::{StateEnumeration, TransferState};
pub use transfer::{
    FulfilPayload, FulfilState, FxFulfilPayload, FxTransfer, FxTransferPrepare, Money, Transfer,
    TransferPrepare,
};
pub use watch_list::{FxTransferType, WatchListEntry};
