//! Domain primitives: TimeMs, identifiers, participant names, currencies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

/// Identifier of a plain transfer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub String);

impl TransferId {
    pub fn new(id: impl Into<String>) -> Self {
        TransferId(id.into())
    }

    /// Fresh random (v4) identifier.
    pub fn random() -> Self {
        TransferId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an FX conversion leg.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitRequestId(pub String);

impl CommitRequestId {
    pub fn new(id: impl Into<String>) -> Self {
        CommitRequestId(id.into())
    }

    pub fn random() -> Self {
        CommitRequestId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a scheme participant (DFSP, FXP or proxy).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantName(pub String);

impl ParticipantName {
    pub fn new(name: impl Into<String>) -> Self {
        ParticipantName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Participant names compare case-insensitively on the wire.
    pub fn matches(&self, other: &ParticipantName) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl std::fmt::Display for ParticipantName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(pub String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Self {
        Currency(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position account: one per (participant, currency).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl AccountId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_name_matches_ignores_case() {
        let a = ParticipantName::new("payerfsp");
        let b = ParticipantName::new("PayerFSP");
        assert!(a.matches(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = TransferId::new("b51ec534-ee48-4575-b6a9-ead2955b8069");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"b51ec534-ee48-4575-b6a9-ead2955b8069\"");

        let account: AccountId = serde_json::from_str("42").unwrap();
        assert_eq!(account, AccountId(42));
    }

    #[test]
    fn test_random_ids_are_uuids() {
        let id = CommitRequestId::random();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
        assert_ne!(TransferId::random(), TransferId::random());
    }

    #[test]
    fn test_timems_ordering() {
        assert!(TimeMs::new(1000) < TimeMs::new(2000));
    }
}
