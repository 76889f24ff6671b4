//! Participants and their position accounts.

use super::{AccountId, Currency, ParticipantName};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: i64,
    pub name: ParticipantName,
    pub is_active: bool,
    /// Represents participants of another scheme
    pub is_proxy: bool,
}

/// A participant's POSITION account in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAccount {
    pub account_id: AccountId,
    pub participant_name: ParticipantName,
    pub currency: Currency,
    pub is_active: bool,
}
