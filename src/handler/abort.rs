use super::remittance::RemittanceSummary;
use super::{actions_for, state_payload, HandlerOutcome, TransferHandler, FX_ACTIONS, TRANSFER_ACTIONS};
use crate::cyril::AbortObligations;
use crate::domain::{
    Action, CommitRequestId, ErrorInformation, ErrorPayload, FxTransfer, Headers, LedgerSubject,
    OutboundMessage, ParticipantName, StateChange, Transfer, TransferId, TransferState,
};
use crate::duplicate::{check_duplicate, payload_hash, DuplicateNamespace};
use crate::error::{ErrorCode, SwitchError};
use crate::ledger::{PositionInstruction, Settlement};
use serde_json::json;
use tracing::{info, warn};

/// Terminal state, error and bus action of one abort.
#[derive(Debug, Clone)]
pub(super) struct AbortRequest {
    pub state: TransferState,
    pub error: ErrorInformation,
    /// Action of the messages about the subject that triggered the abort
    pub action: Action,
}

impl AbortRequest {
    pub fn new(state: TransferState, error: ErrorInformation, action: Action) -> Self {
        AbortRequest {
            state,
            error,
            action,
        }
    }
}

impl TransferHandler {
    /// Error callback for a plain transfer.
    pub(super) async fn abort(
        &self,
        transfer_id: &TransferId,
        headers: &Headers,
        payload: &ErrorPayload,
    ) -> Result<HandlerOutcome, SwitchError> {
        let actions = &TRANSFER_ACTIONS;
        let subject = LedgerSubject::Transfer(transfer_id.clone());

        let Some(transfer) = self.repo.get_transfer(transfer_id).await? else {
            warn!(transfer_id = %transfer_id, "abort for unknown transfer");
            self.publish_error(
                transfer_id.as_str(),
                &headers.source,
                actions.abort,
                ErrorCode::TransferIdNotFound,
                None,
            )
            .await?;
            return Ok(HandlerOutcome::NotFound);
        };

        let hash = payload_hash(payload).map_err(|e| SwitchError::Internal(e.to_string()))?;
        let store = self.repo.duplicates(DuplicateNamespace::TransferError);
        let duplication = check_duplicate(&store, transfer_id.as_str(), &hash).await?;
        if let Some(outcome) = self
            .screen_callback_duplicate(
                duplication,
                &subject,
                &RemittanceSummary::from(&transfer),
                &headers.source,
                actions.abort_duplicate,
            )
            .await?
        {
            return Ok(outcome);
        }

        let result = self.abort_callback(&transfer, headers, payload).await;
        self.forget_hash_on_retry(DuplicateNamespace::TransferError, &subject, result)
            .await
    }

    async fn abort_callback(
        &self,
        transfer: &Transfer,
        headers: &Headers,
        payload: &ErrorPayload,
    ) -> Result<HandlerOutcome, SwitchError> {
        let actions = &TRANSFER_ACTIONS;
        let transfer_id = &transfer.transfer_id;

        if !transfer.state.accepts_transfer_callback() {
            warn!(transfer_id = %transfer_id, state = %transfer.state, "abort in non-eligible state");
            let detail = format!("transfer state is {}", transfer.state);
            self.publish_error(
                transfer_id.as_str(),
                &headers.source,
                actions.abort,
                ErrorCode::ValidationError,
                Some(&detail),
            )
            .await?;
            return Ok(HandlerOutcome::Rejected(ErrorCode::ValidationError));
        }

        self.abort_transfer(
            transfer,
            AbortRequest::new(
                TransferState::AbortedError,
                payload.error_information.clone(),
                actions.abort,
            ),
        )
        .await
    }

    /// Error callback for an FX leg.
    pub(super) async fn fx_abort(
        &self,
        commit_request_id: &CommitRequestId,
        headers: &Headers,
        payload: &ErrorPayload,
    ) -> Result<HandlerOutcome, SwitchError> {
        let actions = &FX_ACTIONS;
        let subject = LedgerSubject::FxTransfer(commit_request_id.clone());

        let Some(leg) = self.repo.get_fx_transfer(commit_request_id).await? else {
            warn!(commit_request_id = %commit_request_id, "fx abort for unknown leg");
            self.publish_error(
                commit_request_id.as_str(),
                &headers.source,
                actions.abort,
                ErrorCode::TransferIdNotFound,
                None,
            )
            .await?;
            return Ok(HandlerOutcome::NotFound);
        };

        let hash = payload_hash(payload).map_err(|e| SwitchError::Internal(e.to_string()))?;
        let store = self.repo.duplicates(DuplicateNamespace::FxTransferError);
        let duplication = check_duplicate(&store, commit_request_id.as_str(), &hash).await?;
        if let Some(outcome) = self
            .screen_callback_duplicate(
                duplication,
                &subject,
                &RemittanceSummary::from(&leg),
                &headers.source,
                actions.abort_duplicate,
            )
            .await?
        {
            return Ok(outcome);
        }

        let result = self.fx_abort_callback(&leg, headers, payload).await;
        self.forget_hash_on_retry(DuplicateNamespace::FxTransferError, &subject, result)
            .await
    }

    async fn fx_abort_callback(
        &self,
        leg: &FxTransfer,
        headers: &Headers,
        payload: &ErrorPayload,
    ) -> Result<HandlerOutcome, SwitchError> {
        let actions = &FX_ACTIONS;
        let commit_request_id = &leg.commit_request_id;

        if !leg.state.accepts_fx_callback() {
            warn!(commit_request_id = %commit_request_id, state = %leg.state, "fx abort in non-eligible state");
            let detail = format!("fxTransfer state is {}", leg.state);
            self.publish_error(
                commit_request_id.as_str(),
                &headers.source,
                actions.abort,
                ErrorCode::ValidationError,
                Some(&detail),
            )
            .await?;
            return Ok(HandlerOutcome::Rejected(ErrorCode::ValidationError));
        }

        self.abort_fx_transfer(
            leg,
            AbortRequest::new(
                TransferState::AbortedError,
                payload.error_information.clone(),
                actions.abort,
            ),
        )
        .await
    }

    /// A proxy accepted delivery of a reserved transfer or leg.
    pub(super) async fn forwarded(
        &self,
        subject: &LedgerSubject,
    ) -> Result<HandlerOutcome, SwitchError> {
        let found = match subject {
            LedgerSubject::Transfer(id) => self
                .repo
                .get_transfer(id)
                .await?
                .map(|t| (t.state, t.payer_fsp)),
            LedgerSubject::FxTransfer(id) => self
                .repo
                .get_fx_transfer(id)
                .await?
                .map(|leg| (leg.state, leg.initiating_fsp)),
        };
        let Some((state, debtor)) = found else {
            warn!(subject = %subject, "forwarded for unknown subject");
            return Ok(HandlerOutcome::NotFound);
        };

        match state {
            TransferState::Reserved => {
                self.repo
                    .record_state_change(&StateChange::new(
                        subject.clone(),
                        TransferState::ReservedForwarded,
                    ))
                    .await?;
                self.publish(OutboundMessage::notification(
                    subject.id(),
                    self.hub(),
                    debtor,
                    actions_for(subject).forwarded,
                    state_payload(subject, TransferState::ReservedForwarded, None, None),
                ))
                .await?;
                info!(subject = %subject, "forwarded to proxy");
                Ok(HandlerOutcome::Forwarded)
            }
            TransferState::ReservedForwarded => Ok(HandlerOutcome::Ignored),
            other => {
                warn!(subject = %subject, state = %other, "forwarded in non-eligible state");
                Ok(HandlerOutcome::Rejected(ErrorCode::ValidationError))
            }
        }
    }

    /// Forced abort from the expiry sweeper.
    pub(super) async fn timeout(
        &self,
        subject: &LedgerSubject,
    ) -> Result<HandlerOutcome, SwitchError> {
        let request = AbortRequest::new(
            TransferState::AbortedError,
            ErrorCode::TransferExpired.information(None),
            Action::Timeout,
        );
        match subject {
            LedgerSubject::Transfer(id) => match self.repo.get_transfer(id).await? {
                None => Ok(HandlerOutcome::NotFound),
                Some(transfer) if transfer.state.is_terminal() => Ok(HandlerOutcome::Ignored),
                Some(transfer) => self.abort_transfer(&transfer, request).await,
            },
            LedgerSubject::FxTransfer(id) => match self.repo.get_fx_transfer(id).await? {
                None => Ok(HandlerOutcome::NotFound),
                Some(leg) if leg.state.is_terminal() => Ok(HandlerOutcome::Ignored),
                Some(leg) => self.abort_fx_transfer(&leg, request).await,
            },
        }
    }

    pub(super) async fn abort_transfer(
        &self,
        transfer: &Transfer,
        request: AbortRequest,
    ) -> Result<HandlerOutcome, SwitchError> {
        let transfer_id = &transfer.transfer_id;
        let obligations = self.cyril.process_abort_message(transfer_id).await?;
        let outcome = self
            .apply_abort(
                &LedgerSubject::Transfer(transfer_id.clone()),
                &request,
                obligations,
                [&transfer.payer_fsp, &transfer.payee_fsp],
            )
            .await?;
        if outcome == HandlerOutcome::Aborted {
            self.repo
                .log_transfer_error(
                    transfer_id,
                    &request.error.error_code,
                    &request.error.error_description,
                )
                .await?;
        }
        Ok(outcome)
    }

    pub(super) async fn abort_fx_transfer(
        &self,
        leg: &FxTransfer,
        request: AbortRequest,
    ) -> Result<HandlerOutcome, SwitchError> {
        let commit_request_id = &leg.commit_request_id;
        let obligations = self
            .cyril
            .process_fx_abort_message(commit_request_id)
            .await?;
        let outcome = self
            .apply_abort(
                &LedgerSubject::FxTransfer(commit_request_id.clone()),
                &request,
                obligations,
                [&leg.initiating_fsp, &leg.counter_party_fsp],
            )
            .await?;
        if outcome == HandlerOutcome::Aborted {
            self.repo
                .log_fx_transfer_error(
                    commit_request_id,
                    &request.error.error_code,
                    &request.error.error_description,
                )
                .await?;
        }
        Ok(outcome)
    }

    /// Unwind every open reservation of the chain and move each subject to its terminal state.
    async fn apply_abort(
        &self,
        subject: &LedgerSubject,
        request: &AbortRequest,
        obligations: AbortObligations,
        parties: [&ParticipantName; 2],
    ) -> Result<HandlerOutcome, SwitchError> {
        let reason = request.error.error_description.clone();
        let state_for = |s: &LedgerSubject| {
            if s == subject {
                request.state
            } else {
                TransferState::AbortedError
            }
        };

        let instructions: Vec<PositionInstruction> = obligations
            .position_changes
            .iter()
            .map(|o| PositionInstruction {
                account_id: o.account_id,
                delta: o.delta,
                state_change: StateChange::new(o.subject.clone(), state_for(&o.subject))
                    .with_reason(reason.clone()),
            })
            .collect();

        let settled: Vec<StateChange> = obligations
            .transfer_state_changes
            .iter()
            .map(|o| StateChange {
                subject: o.subject.clone(),
                state: o.state,
                reason: o.reason.clone().or_else(|| Some(reason.clone())),
            })
            .collect();

        let guard = StateChange::new(subject.clone(), request.state).with_reason(reason.clone());
        let changes = match self
            .ledger
            .settle(guard, TransferState::OPEN_STATES, instructions, settled)
            .await?
        {
            Settlement::Applied(changes) => changes,
            Settlement::Stale { state, .. } => {
                warn!(subject = %subject, state = ?state, "abort lost to a concurrent settlement");
                return Ok(HandlerOutcome::Stale);
            }
        };

        for (change, obligation) in changes.iter().zip(&obligations.position_changes) {
            let action = if obligation.is_original_id {
                request.action
            } else {
                actions_for(&change.subject).abort
            };
            self.publish(
                OutboundMessage::position(change, self.hub(), obligation.notify_to.clone(), action)
                    .with_error_annotation(request.error.clone())
                    .original(obligation.is_original_id),
            )
            .await?;
        }

        for obligation in obligations
            .transfer_state_changes
            .iter()
            .filter(|o| !o.is_original_id)
        {
            self.publish(
                OutboundMessage::notification(
                    obligation.subject.id(),
                    self.hub(),
                    obligation.notify_to.clone(),
                    actions_for(&obligation.subject).abort,
                    json!({}),
                )
                .with_error(request.error.clone())
                .original(false),
            )
            .await?;
        }

        for party in parties {
            self.publish(
                OutboundMessage::notification(
                    subject.id(),
                    self.hub(),
                    party.clone(),
                    request.action,
                    json!({}),
                )
                .with_error(request.error.clone()),
            )
            .await?;
        }

        info!(
            subject = %subject,
            state = %request.state,
            error_code = %request.error.error_code,
            position_changes = changes.len(),
            "aborted"
        );
        Ok(HandlerOutcome::Aborted)
    }
}
