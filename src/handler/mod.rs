//! Transfer state machine.
//!
//! [`TransferHandler::handle`] takes one inbound bus message, applies it to
//! the store and the position ledger, and publishes the resulting
//! notifications. Business outcomes come back as [`HandlerOutcome`];
//! `Err` is reserved for storage failures and inconsistent state.

mod abort;
mod fulfil;
mod prepare;
pub mod remittance;
pub mod validator;

pub use remittance::{FxTransferEntity, RemittanceEntity, RemittanceSummary, TransferEntity};
pub use validator::{PrepareValidator, ValidationResult};

use crate::bus::MessagePublisher;
use crate::config::HandlerConfig;
use crate::cyril::{Cyril, ProxyObligation};
use crate::db::Repository;
use crate::directory::{ParticipantDirectory, ProxyAccountResolver, RepositoryDirectory};
use crate::domain::{
    Action, InboundMessage, LedgerSubject, OutboundMessage, ParticipantName, StateEnumeration,
    TransferState,
};
use crate::duplicate::{DuplicateCheck, DuplicateNamespace};
use crate::error::{ErrorCode, SwitchError};
use crate::ledger::PositionLedger;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of handling one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Prepare accepted and funds reserved
    Reserved,
    /// Prepare accepted but the net debit cap did not allow the reservation
    Declined,
    /// Prepare failed validation and was stored invalid or aborted
    Invalid,
    Committed,
    /// FX leg fulfilled; it commits with its determining transfer
    FulfilDependent,
    Aborted,
    Forwarded,
    /// Another message settled the subject first; nothing was written
    Stale,
    /// Callback refused without a state change
    Rejected(ErrorCode),
    /// Same id with a different payload
    Modified,
    /// Replay of a finished request; the final state was re-sent
    ReplayResent,
    /// Replay of a request still in progress; nothing was sent
    ReplayIgnored,
    NotFound,
    /// Nothing to do, e.g. a timeout for a finished transfer
    Ignored,
}

/// Bus actions of one remittance kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSet {
    pub prepare: Action,
    pub prepare_duplicate: Action,
    pub reserve: Action,
    pub commit: Action,
    pub reject: Action,
    pub abort: Action,
    pub abort_validation: Action,
    pub fulfil_duplicate: Action,
    pub abort_duplicate: Action,
    pub forwarded: Action,
    /// Payload key carrying the state in notifications
    pub state_key: &'static str,
}

pub const TRANSFER_ACTIONS: ActionSet = ActionSet {
    prepare: Action::Prepare,
    prepare_duplicate: Action::PrepareDuplicate,
    reserve: Action::Reserve,
    commit: Action::Commit,
    reject: Action::Reject,
    abort: Action::Abort,
    abort_validation: Action::AbortValidation,
    fulfil_duplicate: Action::FulfilDuplicate,
    abort_duplicate: Action::AbortDuplicate,
    forwarded: Action::Forwarded,
    state_key: "transferState",
};

pub const FX_ACTIONS: ActionSet = ActionSet {
    prepare: Action::FxPrepare,
    prepare_duplicate: Action::FxPrepareDuplicate,
    reserve: Action::FxReserve,
    commit: Action::FxCommit,
    reject: Action::FxReject,
    abort: Action::FxAbort,
    abort_validation: Action::FxAbortValidation,
    fulfil_duplicate: Action::FxFulfilDuplicate,
    abort_duplicate: Action::FxAbortDuplicate,
    forwarded: Action::FxForwarded,
    state_key: "conversionState",
};

pub fn actions_for(subject: &LedgerSubject) -> &'static ActionSet {
    if subject.is_fx() {
        &FX_ACTIONS
    } else {
        &TRANSFER_ACTIONS
    }
}

/// State name participants see: the enumeration, not the internal state.
pub fn api_state(state: TransferState) -> &'static str {
    match state.enumeration() {
        StateEnumeration::Received => "RECEIVED",
        StateEnumeration::Reserved | StateEnumeration::InFlight => "RESERVED",
        StateEnumeration::Committed => "COMMITTED",
        StateEnumeration::Aborted => "ABORTED",
    }
}

/// Notification body describing a subject's state.
pub fn state_payload(
    subject: &LedgerSubject,
    state: TransferState,
    fulfilment: Option<&str>,
    completed_at: Option<DateTime<Utc>>,
) -> Value {
    let mut payload = Map::new();
    payload.insert(
        actions_for(subject).state_key.to_string(),
        json!(api_state(state)),
    );
    if let Some(fulfilment) = fulfilment {
        payload.insert("fulfilment".to_string(), json!(fulfilment));
    }
    if let Some(completed_at) = completed_at {
        payload.insert(
            "completedTimestamp".to_string(),
            json!(completed_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    Value::Object(payload)
}

pub struct TransferHandler {
    repo: Arc<Repository>,
    ledger: PositionLedger,
    cyril: Cyril,
    directory: Arc<dyn ParticipantDirectory>,
    resolver: Arc<dyn ProxyAccountResolver>,
    publisher: Arc<dyn MessagePublisher>,
    config: HandlerConfig,
}

impl TransferHandler {
    /// Handler whose directory and proxy resolution read the repository.
    pub fn new(
        repo: Arc<Repository>,
        publisher: Arc<dyn MessagePublisher>,
        config: HandlerConfig,
    ) -> Self {
        let directory = Arc::new(RepositoryDirectory::new(repo.clone()));
        Self::with_collaborators(repo, directory.clone(), directory, publisher, config)
    }

    pub fn with_collaborators(
        repo: Arc<Repository>,
        directory: Arc<dyn ParticipantDirectory>,
        resolver: Arc<dyn ProxyAccountResolver>,
        publisher: Arc<dyn MessagePublisher>,
        config: HandlerConfig,
    ) -> Self {
        let ledger = PositionLedger::new(repo.pool().clone());
        let cyril = Cyril::new(
            repo.clone(),
            resolver.clone(),
            config.payee_participant_currency_validation,
        );
        TransferHandler {
            repo,
            ledger,
            cyril,
            directory,
            resolver,
            publisher,
            config,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Apply one inbound message.
    ///
    /// # Errors
    /// Storage and bus failures come back as retryable `Infrastructure`
    /// errors. Inconsistent stored state is `Internal`.
    pub async fn handle(&self, message: InboundMessage) -> Result<HandlerOutcome, SwitchError> {
        let kind = message.kind();
        let outcome = match message {
            InboundMessage::Prepare { headers, payload } => {
                let entity = TransferEntity::new(&self.repo, &self.cyril);
                self.prepare(&entity, &headers, &payload).await
            }
            InboundMessage::FxPrepare { headers, payload } => {
                let entity = FxTransferEntity::new(&self.repo, &self.cyril);
                self.prepare(&entity, &headers, &payload).await
            }
            InboundMessage::Fulfil {
                id,
                headers,
                payload,
            } => self.fulfil(&id, &headers, &payload).await,
            InboundMessage::FxFulfil {
                id,
                headers,
                payload,
            } => self.fx_fulfil(&id, &headers, &payload).await,
            InboundMessage::Abort {
                id,
                headers,
                payload,
            } => self.abort(&id, &headers, &payload).await,
            InboundMessage::FxAbort {
                id,
                headers,
                payload,
            } => self.fx_abort(&id, &headers, &payload).await,
            InboundMessage::Forwarded { subject } => self.forwarded(&subject).await,
            InboundMessage::Timeout { subject } => self.timeout(&subject).await,
        };

        match &outcome {
            Ok(outcome) => info!(kind, ?outcome, "message handled"),
            Err(e) => warn!(kind, error = %e, retryable = e.is_retryable(), "message failed"),
        }
        outcome
    }

    fn hub(&self) -> ParticipantName {
        ParticipantName::new(self.config.hub_name.clone())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), SwitchError> {
        self.publisher.publish(message).await?;
        Ok(())
    }

    /// Error notification from the hub, with an empty state payload.
    async fn publish_error(
        &self,
        id: &str,
        to: &ParticipantName,
        action: Action,
        code: ErrorCode,
        detail: Option<&str>,
    ) -> Result<(), SwitchError> {
        let message = OutboundMessage::notification(id, self.hub(), to.clone(), action, json!({}))
            .with_error(code.information(detail));
        self.publish(message).await
    }

    async fn proxy_obligation(
        &self,
        debtor: &ParticipantName,
        creditor: &ParticipantName,
    ) -> Result<ProxyObligation, SwitchError> {
        Ok(ProxyObligation {
            initiating_fsp_proxy: self.directory.get_fsp_proxy(debtor).await?,
            counter_party_fsp_proxy: self.directory.get_fsp_proxy(creditor).await?,
        })
    }

    /// Screen a callback against its duplicate record.
    ///
    /// `None` means the request is new and should be processed. A replay of
    /// a finished subject re-sends its state; a replay while the subject is
    /// still received or reserved is absorbed without a message.
    async fn screen_callback_duplicate(
        &self,
        duplication: DuplicateCheck,
        subject: &LedgerSubject,
        summary: &RemittanceSummary,
        reply_to: &ParticipantName,
        duplicate_action: Action,
    ) -> Result<Option<HandlerOutcome>, SwitchError> {
        if duplication.is_new() {
            return Ok(None);
        }
        let id = subject.id();

        if duplication.is_modified() {
            warn!(subject = %subject, "callback modified request");
            self.publish_error(
                id,
                reply_to,
                duplicate_action,
                ErrorCode::ModifiedRequest,
                None,
            )
            .await?;
            return Ok(Some(HandlerOutcome::Modified));
        }

        match summary.state.enumeration() {
            StateEnumeration::Committed | StateEnumeration::Aborted => {
                info!(subject = %subject, state = %summary.state, "callback replay resent");
                let payload = state_payload(
                    subject,
                    summary.state,
                    summary.fulfilment.as_deref(),
                    summary.completed_at,
                );
                self.publish(OutboundMessage::notification(
                    id,
                    self.hub(),
                    reply_to.clone(),
                    duplicate_action,
                    payload,
                ))
                .await?;
                Ok(Some(HandlerOutcome::ReplayResent))
            }
            StateEnumeration::Received | StateEnumeration::Reserved => {
                info!(subject = %subject, state = %summary.state, "callback replay ignored");
                Ok(Some(HandlerOutcome::ReplayIgnored))
            }
            StateEnumeration::InFlight => Err(SwitchError::Internal(format!(
                "{} replayed in unexpected state {}",
                subject, summary.state
            ))),
        }
    }

    /// Drop the hash a failed callback saved, unless the subject already settled.
    ///
    /// A retryable failure before settlement would otherwise leave the
    /// redelivery looking like a replay of an unfinished request.
    async fn forget_hash_on_retry(
        &self,
        namespace: DuplicateNamespace,
        subject: &LedgerSubject,
        result: Result<HandlerOutcome, SwitchError>,
    ) -> Result<HandlerOutcome, SwitchError> {
        if !matches!(&result, Err(e) if e.is_retryable()) {
            return result;
        }

        let cleanup = async {
            let state = self.repo.get_latest_state(subject).await?;
            if state.is_some_and(|s| s.is_terminal()) {
                return Ok(false);
            }
            self.repo
                .delete_duplicate_hash(namespace, subject.id())
                .await?;
            Ok::<bool, sqlx::Error>(true)
        };
        match cleanup.await {
            Ok(true) => debug!(subject = %subject, "duplicate hash dropped for redelivery"),
            Ok(false) => {}
            Err(cleanup_error) => {
                warn!(subject = %subject, error = %cleanup_error, "could not drop duplicate hash")
            }
        }
        result
    }
}
