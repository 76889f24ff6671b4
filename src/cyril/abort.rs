//! Abort-time unwinding of open reservations across a transfer chain.

use super::{Cyril, CyrilError, PositionObligation};
use crate::domain::{
    CommitRequestId, FxTransferType, LedgerSubject, ParticipantName, TransferId, TransferState,
};
use tracing::info;

/// A state change owed to a subject that has no balance to move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStateObligation {
    pub subject: LedgerSubject,
    pub state: TransferState,
    pub reason: Option<String>,
    pub notify_to: ParticipantName,
    pub is_original_id: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbortObligations {
    /// Reversals of open reservations: payer-side leg, payee-side leg, then the transfer
    pub position_changes: Vec<PositionObligation>,
    pub transfer_state_changes: Vec<TransferStateObligation>,
}

impl Cyril {
    /// Unwind the chain hanging off an aborted transfer.
    pub async fn process_abort_message(
        &self,
        transfer_id: &TransferId,
    ) -> Result<AbortObligations, CyrilError> {
        let original = LedgerSubject::Transfer(transfer_id.clone());
        self.unwind_chain(transfer_id, &original).await
    }

    /// Unwind the chain an aborted FX leg belongs to.
    pub async fn process_fx_abort_message(
        &self,
        commit_request_id: &CommitRequestId,
    ) -> Result<AbortObligations, CyrilError> {
        let leg = self
            .repo
            .get_fx_transfer(commit_request_id)
            .await?
            .ok_or_else(|| CyrilError::FxTransferNotFound(commit_request_id.clone()))?;
        let original = LedgerSubject::FxTransfer(commit_request_id.clone());
        self.unwind_chain(&leg.determining_transfer_id, &original)
            .await
    }

    async fn unwind_chain(
        &self,
        determining_transfer_id: &TransferId,
        original: &LedgerSubject,
    ) -> Result<AbortObligations, CyrilError> {
        let mut entries = self
            .repo
            .get_watch_list_by_determining_transfer_id(determining_transfer_id)
            .await?;
        // stable: registration order within each side
        entries.sort_by_key(|e| match e.fx_transfer_type {
            FxTransferType::PayerConversion => 0,
            FxTransferType::PayeeConversion => 1,
        });

        let mut result = AbortObligations::default();

        for entry in &entries {
            let leg = self.load_leg(entry).await?;
            let subject = LedgerSubject::FxTransfer(leg.commit_request_id.clone());
            let reserved = self.repo.get_reserved_position_changes(&subject).await?;
            for change in reserved {
                result.position_changes.push(PositionObligation {
                    is_original_id: subject == *original,
                    subject: subject.clone(),
                    account_id: change.account_id,
                    delta: change.change.reverse(),
                    notify_to: leg.initiating_fsp.clone(),
                });
            }
        }

        if let Some(transfer) = self.repo.get_transfer(determining_transfer_id).await? {
            let subject = LedgerSubject::Transfer(determining_transfer_id.clone());
            let reserved = self.repo.get_reserved_position_changes(&subject).await?;
            let is_original_id = subject == *original;

            if reserved.is_empty() && transfer.payee_proxy.is_some() && !transfer.state.is_terminal()
            {
                result.transfer_state_changes.push(TransferStateObligation {
                    subject: subject.clone(),
                    state: TransferState::AbortedError,
                    reason: None,
                    notify_to: transfer.payer_fsp.clone(),
                    is_original_id,
                });
            }

            for change in reserved {
                result.position_changes.push(PositionObligation {
                    subject: subject.clone(),
                    account_id: change.account_id,
                    delta: change.change.reverse(),
                    notify_to: transfer.payer_fsp.clone(),
                    is_original_id,
                });
            }
        }

        info!(
            determining_transfer_id = %determining_transfer_id,
            original = %original,
            position_changes = result.position_changes.len(),
            state_changes = result.transfer_state_changes.len(),
            "abort obligations resolved"
        );
        Ok(result)
    }
}
