//! Fulfil-time netting of a determining transfer and its FX legs.

use super::{Cyril, CyrilError, PositionObligation};
use crate::domain::{
    AccountId, CommitRequestId, Currency, Decimal, FulfilPayload, FxTransfer, FxTransferType,
    LedgerSubject, ParticipantName, PositionDelta, Transfer, TransferId,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Out-of-band notice to an FXP that its leg settled with the transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchNotification {
    pub commit_request_id: CommitRequestId,
    pub fxp_name: ParticipantName,
    pub fulfilment: Option<String>,
    pub completed_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FulfilObligations {
    pub is_fx: bool,
    /// Transfer obligation first, then the sending leg, then the receiving leg
    pub position_changes: Vec<PositionObligation>,
    pub patch_notifications: Vec<PatchNotification>,
    /// FX legs settled by this fulfil, whether or not money moved for them
    pub committed_legs: Vec<CommitRequestId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FxFulfilResult {
    pub fx_transfer_type: FxTransferType,
    /// FXP's account in the leg's source currency
    pub counter_party_account: AccountId,
}

struct Obligation<'a> {
    subject: LedgerSubject,
    creditor: &'a ParticipantName,
    debtor: &'a ParticipantName,
    currency: &'a Currency,
    amount: Decimal,
    notify_to: &'a ParticipantName,
    is_original_id: bool,
}

impl Cyril {
    /// Position changes owed once a transfer's fulfilment is accepted.
    ///
    /// Without FX legs the payee is credited the transfer amount. With legs,
    /// the live legs are netted:
    /// - both sides converted: the receiving FXP is owed by the sending FXP
    /// - only the payer converted: the payee is owed by the sending FXP
    /// - only the payee converted: the receiving FXP is owed by the payer
    ///
    /// Each leg's own creditor is credited after that, with a patch
    /// notification to its FXP.
    pub async fn process_fulfil_message(
        &self,
        transfer_id: &TransferId,
        payload: &FulfilPayload,
        transfer: &Transfer,
    ) -> Result<FulfilObligations, CyrilError> {
        let entries = self
            .repo
            .get_watch_list_by_determining_transfer_id(transfer_id)
            .await?;

        let mut result = FulfilObligations::default();

        if entries.is_empty() {
            self.push_obligation(
                &mut result,
                Obligation {
                    subject: LedgerSubject::Transfer(transfer_id.clone()),
                    creditor: &transfer.payee_fsp,
                    debtor: &transfer.payer_fsp,
                    currency: &transfer.amount.currency,
                    amount: transfer.amount.amount,
                    notify_to: &transfer.payee_fsp,
                    is_original_id: true,
                },
            )
            .await?;
            return Ok(result);
        }

        result.is_fx = true;
        let (sending, receiving) = self.classify_legs(transfer_id, &entries).await?;
        let transfer_subject = LedgerSubject::Transfer(transfer_id.clone());

        let transfer_obligation = match (&sending, &receiving) {
            (None, None) => return Err(CyrilError::NoFxpFound(transfer_id.clone())),
            (Some(sending), Some(receiving)) => Obligation {
                subject: transfer_subject,
                creditor: &receiving.counter_party_fsp,
                debtor: &sending.counter_party_fsp,
                currency: &receiving.source_amount.currency,
                amount: receiving.source_amount.amount,
                notify_to: &transfer.payee_fsp,
                is_original_id: true,
            },
            (Some(sending), None) => Obligation {
                subject: transfer_subject,
                creditor: &transfer.payee_fsp,
                debtor: &sending.counter_party_fsp,
                currency: &sending.target_amount.currency,
                amount: sending.target_amount.amount,
                notify_to: &transfer.payee_fsp,
                is_original_id: true,
            },
            (None, Some(receiving)) => Obligation {
                subject: transfer_subject,
                creditor: &receiving.counter_party_fsp,
                debtor: &transfer.payer_fsp,
                currency: &receiving.source_amount.currency,
                amount: receiving.source_amount.amount,
                notify_to: &transfer.payee_fsp,
                is_original_id: true,
            },
        };
        self.push_obligation(&mut result, transfer_obligation).await?;

        if let Some(leg) = &sending {
            self.push_obligation(
                &mut result,
                Obligation {
                    subject: LedgerSubject::FxTransfer(leg.commit_request_id.clone()),
                    creditor: &leg.counter_party_fsp,
                    debtor: &leg.initiating_fsp,
                    currency: &leg.source_amount.currency,
                    amount: leg.source_amount.amount,
                    notify_to: &leg.counter_party_fsp,
                    is_original_id: false,
                },
            )
            .await?;
            push_patch(&mut result, leg, payload);
        }

        if let Some(leg) = &receiving {
            self.push_obligation(
                &mut result,
                Obligation {
                    subject: LedgerSubject::FxTransfer(leg.commit_request_id.clone()),
                    creditor: &leg.initiating_fsp,
                    debtor: &leg.counter_party_fsp,
                    currency: &leg.target_amount.currency,
                    amount: leg.target_amount.amount,
                    notify_to: &leg.counter_party_fsp,
                    is_original_id: false,
                },
            )
            .await?;
            push_patch(&mut result, leg, payload);
        }

        info!(
            transfer_id = %transfer_id,
            sending_fxp = sending.is_some(),
            receiving_fxp = receiving.is_some(),
            position_changes = result.position_changes.len(),
            "fulfil obligations resolved"
        );
        Ok(result)
    }

    /// Validate an FX leg fulfil against the watch list and locate the FXP's account.
    pub async fn process_fx_fulfil_message(
        &self,
        commit_request_id: &CommitRequestId,
    ) -> Result<FxFulfilResult, CyrilError> {
        let leg = self
            .repo
            .get_fx_transfer(commit_request_id)
            .await?
            .ok_or_else(|| CyrilError::FxTransferNotFound(commit_request_id.clone()))?;

        let entries = self
            .repo
            .get_watch_list_by_determining_transfer_id(&leg.determining_transfer_id)
            .await?;
        let entry = entries
            .iter()
            .find(|e| e.commit_request_id == *commit_request_id)
            .ok_or_else(|| CyrilError::WatchListEntryMissing(commit_request_id.clone()))?;

        let currency = &leg.source_amount.currency;
        let details = self
            .resolver
            .get_proxy_account_details(&leg.counter_party_fsp, currency)
            .await?;
        let counter_party_account =
            details
                .account_id
                .ok_or_else(|| CyrilError::AccountNotFound {
                    participant: leg.counter_party_fsp.clone(),
                    currency: currency.clone(),
                })?;

        Ok(FxFulfilResult {
            fx_transfer_type: entry.fx_transfer_type,
            counter_party_account,
        })
    }

    async fn push_obligation(
        &self,
        result: &mut FulfilObligations,
        obligation: Obligation<'_>,
    ) -> Result<(), CyrilError> {
        if let LedgerSubject::FxTransfer(id) = &obligation.subject {
            result.committed_legs.push(id.clone());
        }

        let account_id = self
            .resolve_creditor_account(obligation.creditor, obligation.debtor, obligation.currency)
            .await?;
        let Some(account_id) = account_id else {
            return Ok(());
        };

        debug!(
            subject = %obligation.subject,
            creditor = %obligation.creditor,
            currency = %obligation.currency,
            amount = %obligation.amount,
            "credit obligation"
        );
        result.position_changes.push(PositionObligation {
            subject: obligation.subject,
            account_id,
            delta: PositionDelta::credit(obligation.amount),
            notify_to: obligation.notify_to.clone(),
            is_original_id: obligation.is_original_id,
        });
        Ok(())
    }
}

fn push_patch(result: &mut FulfilObligations, leg: &FxTransfer, payload: &FulfilPayload) {
    result.patch_notifications.push(PatchNotification {
        commit_request_id: leg.commit_request_id.clone(),
        fxp_name: leg.counter_party_fsp.clone(),
        fulfilment: payload.fulfilment.clone(),
        completed_timestamp: payload.completed_timestamp,
    });
}
