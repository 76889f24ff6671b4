//! Transfer and FX transfer records plus the request payloads that create them.

use super::{
    CommitRequestId, Currency, Decimal, ParticipantName, TransferId, TransferState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Amount in a single currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Money { amount, currency }
    }
}

/// Prepare request for a plain transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPrepare {
    pub transfer_id: TransferId,
    pub payer_fsp: ParticipantName,
    pub payee_fsp: ParticipantName,
    pub amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ilp_packet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

/// Prepare request for an FX conversion leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FxTransferPrepare {
    pub commit_request_id: CommitRequestId,
    pub determining_transfer_id: TransferId,
    pub initiating_fsp: ParticipantName,
    pub counter_party_fsp: ParticipantName,
    pub source_amount: Money,
    pub target_amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

/// State reported by the payee (or FXP) in its fulfil callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfilState {
    Committed,
    Reserved,
    Aborted,
}

/// Body of a transfer fulfil callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfilPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfilment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_timestamp: Option<DateTime<Utc>>,
    pub transfer_state: FulfilState,
}

/// Body of an FX fulfil callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FxFulfilPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfilment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_timestamp: Option<DateTime<Utc>>,
    pub conversion_state: FulfilState,
}

/// Persisted plain transfer with its latest state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub transfer_id: TransferId,
    pub payer_fsp: ParticipantName,
    pub payee_fsp: ParticipantName,
    pub amount: Money,
    pub condition: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
    /// Proxy the payer is reached through, when it is outside the scheme
    pub payer_proxy: Option<ParticipantName>,
    pub payee_proxy: Option<ParticipantName>,
    pub state: TransferState,
    pub fulfilment: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.map(|exp| exp <= now).unwrap_or(false)
    }
}

/// Persisted FX leg with its latest state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FxTransfer {
    pub commit_request_id: CommitRequestId,
    pub determining_transfer_id: TransferId,
    pub initiating_fsp: ParticipantName,
    pub counter_party_fsp: ParticipantName,
    pub source_amount: Money,
    pub target_amount: Money,
    pub condition: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
    pub initiating_proxy: Option<ParticipantName>,
    pub counter_party_proxy: Option<ParticipantName>,
    pub state: TransferState,
    pub fulfilment: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FxTransfer {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.map(|exp| exp <= now).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_prepare_wire_format() {
        let json = serde_json::json!({
            "transferId": "b51ec534-ee48-4575-b6a9-ead2955b8069",
            "payerFsp": "dfsp1",
            "payeeFsp": "dfsp2",
            "amount": {"amount": "100.50", "currency": "USD"},
            "condition": "GRzLaTP7DJ9t4P-a_BA0WA9wzzlsugf00-Tn6kESAfM",
            "expiration": "2030-01-01T00:00:00.000Z"
        });
        let prepare: TransferPrepare = serde_json::from_value(json).unwrap();
        assert_eq!(prepare.payer_fsp.as_str(), "dfsp1");
        assert_eq!(prepare.amount.amount.to_canonical_string(), "100.5");
        assert!(prepare.ilp_packet.is_none());
        assert!(prepare.expiration.is_some());
    }

    #[test]
    fn test_fulfil_payload_state_names() {
        let json = serde_json::json!({"transferState": "COMMITTED", "fulfilment": "abc"});
        let payload: FulfilPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.transfer_state, FulfilState::Committed);

        let json = serde_json::json!({"conversionState": "ABORTED"});
        let payload: FxFulfilPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.conversion_state, FulfilState::Aborted);
        assert!(payload.fulfilment.is_none());
    }
}
