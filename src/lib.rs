pub mod api;
pub mod bus;
pub mod config;
pub mod crypto;
pub mod cyril;
pub mod db;
pub mod directory;
pub mod domain;
pub mod duplicate;
pub mod error;
pub mod handler;
pub mod ledger;

pub use bus::{InMemoryPublisher, MessagePublisher, NdjsonPublisher, PublishError};
pub use config::{Config, HandlerConfig};
pub use cyril::{Cyril, CyrilError};
pub use db::{init_db, Repository};
pub use domain::{
    AccountId, CommitRequestId, Currency, Decimal, InboundMessage, LedgerSubject,
    OutboundMessage, ParticipantName, PositionDelta, TimeMs, TransferId, TransferState,
};
pub use error::{ErrorCode, SwitchError};
pub use handler::{HandlerOutcome, TransferHandler};
pub use ledger::{PositionLedger, ReserveOutcome};
