use super::abort::AbortRequest;
use super::remittance::RemittanceSummary;
use super::{actions_for, state_payload, HandlerOutcome, TransferHandler, FX_ACTIONS, TRANSFER_ACTIONS};
use crate::crypto;
use crate::domain::{
    Action, CommitRequestId, FulfilPayload, FulfilState, FxFulfilPayload, FxTransfer, Headers,
    LedgerSubject, OutboundMessage, ParticipantName, StateChange, Transfer, TransferId,
    TransferState,
};
use crate::duplicate::{check_duplicate, payload_hash, DuplicateNamespace};
use crate::error::{ErrorCode, SwitchError};
use crate::ledger::{PositionInstruction, Settlement};
use chrono::Utc;
use tracing::{info, warn};

/// Whether a fulfilment satisfies the stored condition. Decode failures count as a mismatch.
fn fulfilment_matches(fulfilment: Option<&str>, condition: Option<&str>) -> bool {
    match (fulfilment, condition) {
        (Some(fulfilment), Some(condition)) => {
            crypto::validate_fulfil_condition(fulfilment, condition).unwrap_or(false)
        }
        _ => false,
    }
}

/// Name of the party a header must carry, or `None` when a proxy exempts it.
fn expected_header<'a>(
    party: &'a ParticipantName,
    proxy: &Option<ParticipantName>,
) -> Option<&'a ParticipantName> {
    if proxy.is_some() {
        None
    } else {
        Some(party)
    }
}

fn header_mismatch(
    headers: &Headers,
    source: Option<&ParticipantName>,
    destination: Option<&ParticipantName>,
    source_role: &str,
    destination_role: &str,
) -> Option<String> {
    if let Some(expected) = source {
        if !headers.source.matches(expected) {
            return Some(format!("FSPIOP-Source header should match {}", source_role));
        }
    }
    if let (Some(expected), Some(actual)) = (destination, headers.destination.as_ref()) {
        if !actual.matches(expected) {
            return Some(format!(
                "FSPIOP-Destination header should match {}",
                destination_role
            ));
        }
    }
    None
}

impl TransferHandler {
    /// Fulfil (or payee reject) of a plain transfer.
    pub(super) async fn fulfil(
        &self,
        transfer_id: &TransferId,
        headers: &Headers,
        payload: &FulfilPayload,
    ) -> Result<HandlerOutcome, SwitchError> {
        let actions = &TRANSFER_ACTIONS;
        let subject = LedgerSubject::Transfer(transfer_id.clone());

        let Some(transfer) = self.repo.get_transfer(transfer_id).await? else {
            warn!(transfer_id = %transfer_id, "fulfil for unknown transfer");
            self.publish_error(
                transfer_id.as_str(),
                &headers.source,
                actions.commit,
                ErrorCode::TransferIdNotFound,
                None,
            )
            .await?;
            return Ok(HandlerOutcome::NotFound);
        };

        let hash = payload_hash(payload).map_err(|e| SwitchError::Internal(e.to_string()))?;
        let store = self.repo.duplicates(DuplicateNamespace::TransferFulfil);
        let duplication = check_duplicate(&store, transfer_id.as_str(), &hash).await?;
        let summary = RemittanceSummary::from(&transfer);
        if let Some(outcome) = self
            .screen_callback_duplicate(
                duplication,
                &subject,
                &summary,
                &headers.source,
                actions.fulfil_duplicate,
            )
            .await?
        {
            return Ok(outcome);
        }

        let result = self.fulfil_transfer(&transfer, headers, payload).await;
        self.forget_hash_on_retry(DuplicateNamespace::TransferFulfil, &subject, result)
            .await
    }

    async fn fulfil_transfer(
        &self,
        transfer: &Transfer,
        headers: &Headers,
        payload: &FulfilPayload,
    ) -> Result<HandlerOutcome, SwitchError> {
        let actions = &TRANSFER_ACTIONS;
        let transfer_id = &transfer.transfer_id;
        let subject = LedgerSubject::Transfer(transfer_id.clone());

        if let Some(reason) = header_mismatch(
            headers,
            expected_header(&transfer.payee_fsp, &transfer.payee_proxy),
            expected_header(&transfer.payer_fsp, &transfer.payer_proxy),
            "Payee",
            "Payer",
        ) {
            warn!(transfer_id = %transfer_id, reason = %reason, "fulfil header validation failed");
            return self
                .abort_transfer(
                    transfer,
                    AbortRequest::new(
                        TransferState::AbortedError,
                        ErrorCode::ValidationError.information(Some(&reason)),
                        actions.abort_validation,
                    ),
                )
                .await;
        }

        if !transfer.state.accepts_transfer_callback() {
            warn!(transfer_id = %transfer_id, state = %transfer.state, "fulfil in non-eligible state");
            let detail = format!("transfer state is {}", transfer.state);
            self.publish_error(
                transfer_id.as_str(),
                &headers.source,
                actions.commit,
                ErrorCode::ValidationError,
                Some(&detail),
            )
            .await?;
            return Ok(HandlerOutcome::Rejected(ErrorCode::ValidationError));
        }

        if transfer.is_expired(Utc::now()) {
            warn!(transfer_id = %transfer_id, "fulfil for expired transfer");
            self.publish_error(
                transfer_id.as_str(),
                &headers.source,
                actions.commit,
                ErrorCode::TransferExpired,
                None,
            )
            .await?;
            return Ok(HandlerOutcome::Rejected(ErrorCode::TransferExpired));
        }

        if payload.transfer_state == FulfilState::Aborted {
            info!(transfer_id = %transfer_id, "payee rejected transfer");
            return self
                .abort_transfer(
                    transfer,
                    AbortRequest::new(
                        TransferState::AbortedRejected,
                        ErrorCode::PayeeRejection.information(None),
                        actions.reject,
                    ),
                )
                .await;
        }

        if !fulfilment_matches(payload.fulfilment.as_deref(), transfer.condition.as_deref()) {
            warn!(transfer_id = %transfer_id, "fulfilment does not match condition");
            return self
                .abort_transfer(
                    transfer,
                    AbortRequest::new(
                        TransferState::AbortedError,
                        ErrorCode::ValidationError.information(Some("invalid fulfilment")),
                        actions.abort_validation,
                    ),
                )
                .await;
        }

        let obligations = self
            .cyril
            .process_fulfil_message(transfer_id, payload, transfer)
            .await?;

        let instructions: Vec<PositionInstruction> = obligations
            .position_changes
            .iter()
            .map(|o| PositionInstruction {
                account_id: o.account_id,
                delta: o.delta,
                state_change: StateChange::new(o.subject.clone(), TransferState::Committed),
            })
            .collect();
        let settled: Vec<StateChange> = obligations
            .committed_legs
            .iter()
            .map(|leg| {
                StateChange::new(
                    LedgerSubject::FxTransfer(leg.clone()),
                    TransferState::Committed,
                )
            })
            .collect();

        let guard = StateChange::new(subject.clone(), TransferState::Committed);
        let changes = match self
            .ledger
            .settle(guard, TransferState::CALLBACK_STATES, instructions, settled)
            .await?
        {
            Settlement::Applied(changes) => changes,
            Settlement::Stale { state, .. } => {
                warn!(transfer_id = %transfer_id, state = ?state, "fulfil lost to a concurrent settlement");
                let detail = match state {
                    Some(state) => format!("transfer state is {}", state),
                    None => "transfer state is unknown".to_string(),
                };
                self.publish_error(
                    transfer_id.as_str(),
                    &headers.source,
                    actions.commit,
                    ErrorCode::ValidationError,
                    Some(&detail),
                )
                .await?;
                return Ok(HandlerOutcome::Stale);
            }
        };

        self.repo
            .save_transfer_fulfilment(
                transfer_id,
                payload.fulfilment.as_deref(),
                payload.completed_timestamp,
            )
            .await?;

        for (change, obligation) in changes.iter().zip(&obligations.position_changes) {
            self.publish(
                OutboundMessage::position(
                    change,
                    self.hub(),
                    obligation.notify_to.clone(),
                    actions_for(&change.subject).commit,
                )
                .original(obligation.is_original_id),
            )
            .await?;
        }

        let committed = state_payload(
            &subject,
            TransferState::Committed,
            payload.fulfilment.as_deref(),
            payload.completed_timestamp,
        );
        for party in [&transfer.payer_fsp, &transfer.payee_fsp] {
            self.publish(OutboundMessage::notification(
                transfer_id.as_str(),
                self.hub(),
                party.clone(),
                actions.commit,
                committed.clone(),
            ))
            .await?;
        }

        for patch in &obligations.patch_notifications {
            let leg = LedgerSubject::FxTransfer(patch.commit_request_id.clone());
            self.publish(
                OutboundMessage::notification(
                    patch.commit_request_id.as_str(),
                    self.hub(),
                    patch.fxp_name.clone(),
                    Action::FxNotify,
                    state_payload(
                        &leg,
                        TransferState::Committed,
                        patch.fulfilment.as_deref(),
                        patch.completed_timestamp,
                    ),
                )
                .original(false),
            )
            .await?;
        }

        info!(
            transfer_id = %transfer_id,
            is_fx = obligations.is_fx,
            position_changes = changes.len(),
            "transfer committed"
        );
        Ok(HandlerOutcome::Committed)
    }

    /// Fulfil (or FXP reject) of an FX leg. An accepted fulfil parks the leg
    /// in `RECEIVED_FULFIL_DEPENDENT` until its determining transfer settles.
    pub(super) async fn fx_fulfil(
        &self,
        commit_request_id: &CommitRequestId,
        headers: &Headers,
        payload: &FxFulfilPayload,
    ) -> Result<HandlerOutcome, SwitchError> {
        let actions = &FX_ACTIONS;
        let subject = LedgerSubject::FxTransfer(commit_request_id.clone());

        let Some(leg) = self.repo.get_fx_transfer(commit_request_id).await? else {
            warn!(commit_request_id = %commit_request_id, "fx fulfil for unknown leg");
            self.publish_error(
                commit_request_id.as_str(),
                &headers.source,
                actions.reserve,
                ErrorCode::TransferIdNotFound,
                None,
            )
            .await?;
            return Ok(HandlerOutcome::NotFound);
        };

        let hash = payload_hash(payload).map_err(|e| SwitchError::Internal(e.to_string()))?;
        let store = self.repo.duplicates(DuplicateNamespace::FxTransferFulfil);
        let duplication = check_duplicate(&store, commit_request_id.as_str(), &hash).await?;
        let summary = RemittanceSummary::from(&leg);
        if let Some(outcome) = self
            .screen_callback_duplicate(
                duplication,
                &subject,
                &summary,
                &headers.source,
                actions.fulfil_duplicate,
            )
            .await?
        {
            return Ok(outcome);
        }

        let result = self.fulfil_fx_transfer(&leg, headers, payload).await;
        self.forget_hash_on_retry(DuplicateNamespace::FxTransferFulfil, &subject, result)
            .await
    }

    async fn fulfil_fx_transfer(
        &self,
        leg: &FxTransfer,
        headers: &Headers,
        payload: &FxFulfilPayload,
    ) -> Result<HandlerOutcome, SwitchError> {
        let actions = &FX_ACTIONS;
        let commit_request_id = &leg.commit_request_id;
        let subject = LedgerSubject::FxTransfer(commit_request_id.clone());

        if let Some(reason) = header_mismatch(
            headers,
            expected_header(&leg.counter_party_fsp, &leg.counter_party_proxy),
            expected_header(&leg.initiating_fsp, &leg.initiating_proxy),
            "FXP",
            "Initiating FSP",
        ) {
            warn!(commit_request_id = %commit_request_id, reason = %reason, "fx fulfil header validation failed");
            return self
                .abort_fx_transfer(
                    leg,
                    AbortRequest::new(
                        TransferState::AbortedError,
                        ErrorCode::ValidationError.information(Some(&reason)),
                        actions.abort_validation,
                    ),
                )
                .await;
        }

        if !leg.state.accepts_fx_callback() {
            warn!(commit_request_id = %commit_request_id, state = %leg.state, "fx fulfil in non-eligible state");
            let detail = format!("fxTransfer state is {}", leg.state);
            self.publish_error(
                commit_request_id.as_str(),
                &headers.source,
                actions.reserve,
                ErrorCode::ValidationError,
                Some(&detail),
            )
            .await?;
            return Ok(HandlerOutcome::Rejected(ErrorCode::ValidationError));
        }

        if leg.is_expired(Utc::now()) {
            warn!(commit_request_id = %commit_request_id, "fx fulfil for expired leg");
            self.publish_error(
                commit_request_id.as_str(),
                &headers.source,
                actions.reserve,
                ErrorCode::TransferExpired,
                None,
            )
            .await?;
            return Ok(HandlerOutcome::Rejected(ErrorCode::TransferExpired));
        }

        if payload.conversion_state == FulfilState::Aborted {
            info!(commit_request_id = %commit_request_id, "fxp rejected conversion");
            return self
                .abort_fx_transfer(
                    leg,
                    AbortRequest::new(
                        TransferState::AbortedRejected,
                        ErrorCode::PayeeRejection.information(None),
                        actions.reject,
                    ),
                )
                .await;
        }

        if !fulfilment_matches(payload.fulfilment.as_deref(), leg.condition.as_deref()) {
            warn!(commit_request_id = %commit_request_id, "fx fulfilment does not match condition");
            return self
                .abort_fx_transfer(
                    leg,
                    AbortRequest::new(
                        TransferState::AbortedError,
                        ErrorCode::ValidationError.information(Some("invalid fulfilment")),
                        actions.abort_validation,
                    ),
                )
                .await;
        }

        let routing = self
            .cyril
            .process_fx_fulfil_message(commit_request_id)
            .await?;

        self.repo
            .record_fx_transfer_fulfilment(
                commit_request_id,
                TransferState::ReceivedFulfilDependent,
                payload.fulfilment.as_deref(),
                payload.completed_timestamp,
            )
            .await?;

        self.publish(
            OutboundMessage::notification(
                commit_request_id.as_str(),
                leg.counter_party_fsp.clone(),
                leg.initiating_fsp.clone(),
                actions.reserve,
                state_payload(
                    &subject,
                    TransferState::ReceivedFulfilDependent,
                    payload.fulfilment.as_deref(),
                    payload.completed_timestamp,
                ),
            )
            .with_key(routing.counter_party_account),
        )
        .await?;

        info!(
            commit_request_id = %commit_request_id,
            fx_transfer_type = %routing.fx_transfer_type,
            "fx leg fulfilled, waiting on determining transfer"
        );
        Ok(HandlerOutcome::FulfilDependent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // preimage of 32 zero bytes and its condition
    const FULFILMENT: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    #[test]
    fn test_fulfilment_matches() {
        let condition = crypto::fulfilment_to_condition(FULFILMENT).unwrap();
        assert!(fulfilment_matches(Some(FULFILMENT), Some(&condition)));
        assert!(!fulfilment_matches(None, Some(&condition)));
        assert!(!fulfilment_matches(Some(FULFILMENT), None));
        assert!(!fulfilment_matches(Some("short"), Some(&condition)));
    }

    #[test]
    fn test_header_mismatch() {
        let payer = ParticipantName::new("dfsp1");
        let payee = ParticipantName::new("dfsp2");
        let headers = Headers::new(payee.clone(), Some(payer.clone()));
        assert_eq!(
            header_mismatch(&headers, Some(&payee), Some(&payer), "Payee", "Payer"),
            None
        );

        let headers = Headers::new(payer.clone(), Some(payer.clone()));
        assert_eq!(
            header_mismatch(&headers, Some(&payee), Some(&payer), "Payee", "Payer"),
            Some("FSPIOP-Source header should match Payee".to_string())
        );
        // a proxied payee is exempt
        assert_eq!(header_mismatch(&headers, None, Some(&payer), "Payee", "Payer"), None);

        let headers = Headers::new(payee.clone(), Some(payee.clone()));
        assert_eq!(
            header_mismatch(&headers, Some(&payee), Some(&payer), "Payee", "Payer"),
            Some("FSPIOP-Destination header should match Payer".to_string())
        );
    }
}
