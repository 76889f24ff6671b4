//! Inbound commands and outbound notifications exchanged with the message bus.

use super::{
    AccountId, CommitRequestId, FulfilPayload, FxFulfilPayload, FxTransferPrepare, LedgerSubject,
    ParticipantName, PositionChange, TransferId, TransferPrepare,
};
use serde::{Deserialize, Serialize};

/// Routing headers copied from the originating API request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    #[serde(rename = "fspiop-source")]
    pub source: ParticipantName,
    #[serde(
        rename = "fspiop-destination",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub destination: Option<ParticipantName>,
}

impl Headers {
    pub fn new(source: ParticipantName, destination: Option<ParticipantName>) -> Self {
        Headers {
            source,
            destination,
        }
    }
}

/// FSPIOP error object carried by error callbacks and error notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInformation {
    pub error_code: String,
    pub error_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error_information: ErrorInformation,
}

/// Every command the transfer state machine consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    Prepare {
        headers: Headers,
        payload: TransferPrepare,
    },
    FxPrepare {
        headers: Headers,
        payload: FxTransferPrepare,
    },
    Fulfil {
        id: TransferId,
        headers: Headers,
        payload: FulfilPayload,
    },
    FxFulfil {
        id: CommitRequestId,
        headers: Headers,
        payload: FxFulfilPayload,
    },
    Abort {
        id: TransferId,
        headers: Headers,
        payload: ErrorPayload,
    },
    FxAbort {
        id: CommitRequestId,
        headers: Headers,
        payload: ErrorPayload,
    },
    /// A proxy accepted delivery of a reserved transfer
    Forwarded { subject: LedgerSubject },
    /// Raised by the external expiry sweeper
    Timeout { subject: LedgerSubject },
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Prepare { .. } => "prepare",
            InboundMessage::FxPrepare { .. } => "fx-prepare",
            InboundMessage::Fulfil { .. } => "fulfil",
            InboundMessage::FxFulfil { .. } => "fx-fulfil",
            InboundMessage::Abort { .. } => "abort",
            InboundMessage::FxAbort { .. } => "fx-abort",
            InboundMessage::Forwarded { .. } => "forwarded",
            InboundMessage::Timeout { .. } => "timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Functionality {
    /// Callback to a participant
    Notification,
    /// Position movement, keyed by the affected account
    Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Prepare,
    PrepareDuplicate,
    Reserve,
    Commit,
    Reject,
    Abort,
    AbortValidation,
    AbortDuplicate,
    FulfilDuplicate,
    Forwarded,
    Timeout,
    FxPrepare,
    FxPrepareDuplicate,
    FxReserve,
    FxCommit,
    /// PATCH to an FXP once its conversion settles
    FxNotify,
    FxReject,
    FxAbort,
    FxAbortValidation,
    FxFulfilDuplicate,
    FxAbortDuplicate,
    FxForwarded,
}

/// Message published to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Transfer id or commit request id the message is about
    pub id: String,
    pub from: ParticipantName,
    pub to: ParticipantName,
    pub functionality: Functionality,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_key: Option<AccountId>,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInformation>,
    /// False when the message concerns a transfer other than the one that triggered it
    pub is_original_id: bool,
}

impl OutboundMessage {
    pub fn notification(
        id: impl Into<String>,
        from: ParticipantName,
        to: ParticipantName,
        action: Action,
        payload: serde_json::Value,
    ) -> Self {
        OutboundMessage {
            id: id.into(),
            from,
            to,
            functionality: Functionality::Notification,
            action,
            message_key: None,
            payload,
            error: None,
            is_original_id: true,
        }
    }

    /// Position event for one applied change, keyed by its account.
    pub fn position(
        change: &PositionChange,
        from: ParticipantName,
        to: ParticipantName,
        action: Action,
    ) -> Self {
        OutboundMessage {
            id: change.subject.id().to_string(),
            from,
            to,
            functionality: Functionality::Position,
            action,
            message_key: Some(change.account_id),
            payload: serde_json::json!({
                "changeId": change.id,
                "change": change.change.value(),
                "value": change.value,
                "state": change.state,
            }),
            error: None,
            is_original_id: true,
        }
    }

    pub fn with_error(mut self, error: ErrorInformation) -> Self {
        self.payload = serde_json::json!({ "errorInformation": error });
        self.error = Some(error);
        self
    }

    /// Attach an error but keep the payload, for position messages.
    pub fn with_error_annotation(mut self, error: ErrorInformation) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_key(mut self, account_id: AccountId) -> Self {
        self.message_key = Some(account_id);
        self
    }

    pub fn original(mut self, is_original_id: bool) -> Self {
        self.is_original_id = is_original_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_tagging() {
        let json = serde_json::json!({
            "type": "fx-abort",
            "id": "c1",
            "headers": {"fspiop-source": "fxp1", "fspiop-destination": "dfsp1"},
            "payload": {"errorInformation": {"errorCode": "5100", "errorDescription": "nope"}}
        });
        let message: InboundMessage = serde_json::from_value(json).unwrap();
        assert_eq!(message.kind(), "fx-abort");
        match message {
            InboundMessage::FxAbort { id, headers, .. } => {
                assert_eq!(id.as_str(), "c1");
                assert_eq!(headers.destination, Some(ParticipantName::new("dfsp1")));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_timeout_subject_format() {
        let json = serde_json::json!({
            "type": "timeout",
            "subject": {"kind": "transfer", "id": "t1"}
        });
        let message: InboundMessage = serde_json::from_value(json).unwrap();
        assert_eq!(
            message,
            InboundMessage::Timeout {
                subject: LedgerSubject::Transfer(TransferId::new("t1"))
            }
        );
    }

    #[test]
    fn test_with_error_replaces_payload() {
        let error = ErrorInformation {
            error_code: "3100".to_string(),
            error_description: "Generic validation error".to_string(),
        };
        let message = OutboundMessage::notification(
            "t1",
            ParticipantName::new("Hub"),
            ParticipantName::new("dfsp1"),
            Action::AbortValidation,
            serde_json::json!({"transferState": "ABORTED"}),
        )
        .with_error(error.clone());
        assert_eq!(message.payload["errorInformation"]["errorCode"], "3100");
        assert_eq!(message.error, Some(error));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["action"], "abort-validation");
        assert_eq!(json["functionality"], "NOTIFICATION");
    }
}
