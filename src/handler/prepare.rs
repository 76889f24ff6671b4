use super::remittance::{PrepareFacts, RemittanceEntity, RemittanceSummary};
use super::validator::PrepareValidator;
use super::{state_payload, HandlerOutcome, TransferHandler};
use crate::cyril::CyrilError;
use crate::domain::{Headers, OutboundMessage, StateChange, StateEnumeration, TransferState};
use crate::duplicate::{check_duplicate, payload_hash};
use crate::error::{ErrorCode, SwitchError};
use crate::ledger::{ReserveOutcome, ReserveRequest, NET_DEBIT_CAP_EXCEEDED};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

impl TransferHandler {
    /// PREPARE of a transfer or FX leg.
    ///
    /// The request is stored before the reservation is attempted, so every
    /// outcome after validation leaves an audit trail.
    pub(super) async fn prepare<E: RemittanceEntity>(
        &self,
        entity: &E,
        headers: &Headers,
        payload: &E::Prepare,
    ) -> Result<HandlerOutcome, SwitchError> {
        let facts = entity.facts(payload);
        let actions = entity.actions();
        let id = facts.id().to_string();

        let hash = payload_hash(payload).map_err(|e| SwitchError::Internal(e.to_string()))?;
        let duplication = check_duplicate(entity, &id, &hash).await?;

        if duplication.is_modified() {
            warn!(subject = %facts.subject, "prepare modified request");
            self.publish_error(
                &id,
                &headers.source,
                actions.prepare_duplicate,
                ErrorCode::ModifiedRequest,
                None,
            )
            .await?;
            return Ok(HandlerOutcome::Modified);
        }

        if duplication.is_replay() {
            match entity.get_by_id_light(&id).await? {
                Some(summary) => return self.resend_prepare(&facts, headers, summary, entity).await,
                None => info!(subject = %facts.subject, "prepare replay with nothing stored, processing"),
            }
        }

        let proxy = self.proxy_obligation(facts.debtor, facts.creditor).await?;
        let check = entity
            .check_determining_transfer_exists(payload, &proxy)
            .await?;

        let validation = PrepareValidator::new(self.directory.as_ref(), &self.config)
            .validate(headers, &facts, &proxy, &check, Utc::now())
            .await?;
        let reason = validation.reason();
        entity
            .save_prepared_request(payload, &proxy, validation.passed(), reason.as_deref())
            .await?;

        if let Some(reason) = reason {
            warn!(subject = %facts.subject, reason = %reason, "prepare validation failed");
            return self.fail_prepare(entity, &facts, &reason).await;
        }

        let target = match entity.get_position_participant(payload, &check).await {
            Ok(target) => target,
            Err(e @ CyrilError::UnsupportedTopology(..)) => {
                let reason = e.to_string();
                error!(subject = %facts.subject, reason = %reason, "prepare refused");
                self.repo
                    .record_state_change(
                        &StateChange::new(facts.subject.clone(), TransferState::AbortedError)
                            .with_reason(reason.clone()),
                    )
                    .await?;
                return self.fail_prepare(entity, &facts, &reason).await;
            }
            Err(e) => return Err(e.into()),
        };

        let details = self
            .resolver
            .get_proxy_account_details(&target.participant_name, &target.currency)
            .await?;
        let Some(account_id) = details.account_id else {
            let reason = format!(
                "Participant {} {} account not found",
                target.participant_name, target.currency
            );
            self.repo
                .record_state_change(
                    &StateChange::new(facts.subject.clone(), TransferState::AbortedError)
                        .with_reason(reason.clone()),
                )
                .await?;
            return self.fail_prepare(entity, &facts, &reason).await;
        };

        let request = ReserveRequest {
            subject: facts.subject.clone(),
            amount: target.amount,
        };
        match self.ledger.reserve(account_id, request).await? {
            ReserveOutcome::Reserved(change) => {
                info!(
                    subject = %facts.subject,
                    participant = %target.participant_name,
                    currency = %target.currency,
                    amount = %target.amount,
                    "prepare reserved"
                );
                self.publish(OutboundMessage::position(
                    &change,
                    self.hub(),
                    target.participant_name.clone(),
                    actions.reserve,
                ))
                .await?;

                let to = proxy
                    .counter_party_fsp_proxy
                    .clone()
                    .unwrap_or_else(|| facts.creditor.clone());
                let body =
                    serde_json::to_value(payload).map_err(|e| SwitchError::Internal(e.to_string()))?;
                self.publish(
                    OutboundMessage::notification(
                        &id,
                        facts.debtor.clone(),
                        to,
                        actions.prepare,
                        body,
                    )
                    .with_key(account_id),
                )
                .await?;
                Ok(HandlerOutcome::Reserved)
            }
            ReserveOutcome::Declined { available, .. } => {
                info!(
                    subject = %facts.subject,
                    amount = %target.amount,
                    available = %available,
                    "prepare declined"
                );
                entity
                    .log_error(
                        &id,
                        ErrorCode::PayerInsufficientLiquidity,
                        NET_DEBIT_CAP_EXCEEDED,
                    )
                    .await?;
                let error = ErrorCode::PayerInsufficientLiquidity
                    .information(Some(NET_DEBIT_CAP_EXCEEDED));
                self.publish(
                    OutboundMessage::notification(
                        &id,
                        self.hub(),
                        facts.debtor.clone(),
                        actions.prepare,
                        json!({}),
                    )
                    .with_error(error)
                    .with_key(account_id),
                )
                .await?;
                Ok(HandlerOutcome::Declined)
            }
        }
    }

    async fn fail_prepare<E: RemittanceEntity>(
        &self,
        entity: &E,
        facts: &PrepareFacts<'_>,
        reason: &str,
    ) -> Result<HandlerOutcome, SwitchError> {
        let id = facts.id();
        entity
            .log_error(id, ErrorCode::ValidationError, reason)
            .await?;
        self.publish_error(
            id,
            facts.debtor,
            entity.actions().prepare,
            ErrorCode::ValidationError,
            Some(reason),
        )
        .await?;
        Ok(HandlerOutcome::Invalid)
    }

    /// Answer a replayed PREPARE from the stored state.
    async fn resend_prepare<E: RemittanceEntity>(
        &self,
        facts: &PrepareFacts<'_>,
        headers: &Headers,
        summary: RemittanceSummary,
        entity: &E,
    ) -> Result<HandlerOutcome, SwitchError> {
        match summary.state.enumeration() {
            StateEnumeration::Committed | StateEnumeration::Aborted => {
                info!(subject = %facts.subject, state = %summary.state, "prepare replay resent");
                let payload = state_payload(
                    &facts.subject,
                    summary.state,
                    summary.fulfilment.as_deref(),
                    summary.completed_at,
                );
                self.publish(OutboundMessage::notification(
                    facts.id(),
                    self.hub(),
                    headers.source.clone(),
                    entity.actions().prepare_duplicate,
                    payload,
                ))
                .await?;
                Ok(HandlerOutcome::ReplayResent)
            }
            StateEnumeration::Received | StateEnumeration::Reserved => {
                info!(subject = %facts.subject, state = %summary.state, "prepare replay ignored");
                Ok(HandlerOutcome::ReplayIgnored)
            }
            StateEnumeration::InFlight => Err(SwitchError::Internal(format!(
                "{} replayed in unexpected state {}",
                facts.subject, summary.state
            ))),
        }
    }
}
