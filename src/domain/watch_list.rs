//! FX watch list: which conversion legs hang off a determining transfer.

use super::{CommitRequestId, TimeMs, TransferId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which side of the transfer the conversion sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FxTransferType {
    /// Payer converts before the transfer; registered when the leg precedes it
    PayerConversion,
    /// Payee side converts; registered when the transfer already exists
    PayeeConversion,
}

impl FxTransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FxTransferType::PayerConversion => "PAYER_CONVERSION",
            FxTransferType::PayeeConversion => "PAYEE_CONVERSION",
        }
    }
}

impl std::fmt::Display for FxTransferType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FxTransferType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PAYER_CONVERSION" => Ok(FxTransferType::PayerConversion),
            "PAYEE_CONVERSION" => Ok(FxTransferType::PayeeConversion),
            other => Err(format!("unknown fx transfer type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchListEntry {
    pub id: i64,
    pub determining_transfer_id: TransferId,
    pub commit_request_id: CommitRequestId,
    pub fx_transfer_type: FxTransferType,
    pub created_at: TimeMs,
}
