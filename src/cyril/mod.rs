//! Obligation resolver for transfers with FX legs.
//!
//! Links determining transfers to their FX legs through the watch list and
//! decides:
//! - which (participant, currency, amount) a PREPARE reserves against
//! - the signed position changes a fulfil settles
//! - the reservations an abort unwinds across the whole chain
//!
//! At most one payer-side and one payee-side conversion may hang off a
//! determining transfer.

mod abort;
mod determining;
mod fulfil;

pub use abort::{AbortObligations, TransferStateObligation};
pub use determining::{DeterminingTransferCheck, ParticipantCurrency, PositionParticipant};
pub use fulfil::{FulfilObligations, FxFulfilResult, PatchNotification};

use crate::db::Repository;
use crate::directory::{DirectoryError, ProxyAccountResolver};
use crate::domain::{
    AccountId, CommitRequestId, Currency, FxTransfer, FxTransferType, LedgerSubject,
    ParticipantName, PositionDelta, StateEnumeration, TransferId, WatchListEntry,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CyrilError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("fxTransfer {0} not found")]
    FxTransferNotFound(CommitRequestId),
    #[error("transfer {0} not found")]
    TransferNotFound(TransferId),
    #[error("watch list of transfer {0} has no live FX leg")]
    NoFxpFound(TransferId),
    #[error("fxTransfer {0} is not on the watch list")]
    WatchListEntryMissing(CommitRequestId),
    #[error("participant {participant} has no {currency} account")]
    AccountNotFound {
        participant: ParticipantName,
        currency: Currency,
    },
    #[error("unsupported FX topology for transfer {0}: more than one {1} leg")]
    UnsupportedTopology(TransferId, FxTransferType),
}

/// Proxies standing in for the two parties of a prepare, when out of scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyObligation {
    pub initiating_fsp_proxy: Option<ParticipantName>,
    pub counter_party_fsp_proxy: Option<ParticipantName>,
}

impl ProxyObligation {
    pub fn is_initiating_fsp_proxy(&self) -> bool {
        self.initiating_fsp_proxy.is_some()
    }

    pub fn is_counter_party_fsp_proxy(&self) -> bool {
        self.counter_party_fsp_proxy.is_some()
    }
}

/// One signed movement the caller must apply through the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionObligation {
    pub subject: LedgerSubject,
    pub account_id: AccountId,
    pub delta: PositionDelta,
    /// Participant to notify about this movement
    pub notify_to: ParticipantName,
    /// Whether `subject` is the transfer or leg whose message triggered the call
    pub is_original_id: bool,
}

pub struct Cyril {
    repo: Arc<Repository>,
    resolver: Arc<dyn ProxyAccountResolver>,
    payee_currency_validation: bool,
}

impl Cyril {
    pub fn new(
        repo: Arc<Repository>,
        resolver: Arc<dyn ProxyAccountResolver>,
        payee_currency_validation: bool,
    ) -> Self {
        Cyril {
            repo,
            resolver,
            payee_currency_validation,
        }
    }

    async fn load_leg(&self, entry: &WatchListEntry) -> Result<FxTransfer, CyrilError> {
        self.repo
            .get_fx_transfer(&entry.commit_request_id)
            .await?
            .ok_or_else(|| CyrilError::FxTransferNotFound(entry.commit_request_id.clone()))
    }

    /// The live payer-side and payee-side legs of a determining transfer.
    ///
    /// Aborted legs are ignored. More than one live leg of a type is rejected.
    async fn classify_legs(
        &self,
        determining_transfer_id: &TransferId,
        entries: &[WatchListEntry],
    ) -> Result<(Option<FxTransfer>, Option<FxTransfer>), CyrilError> {
        let mut sending: Option<FxTransfer> = None;
        let mut receiving: Option<FxTransfer> = None;

        for entry in entries {
            let leg = self.load_leg(entry).await?;
            if leg.state.enumeration() == StateEnumeration::Aborted {
                continue;
            }
            let slot = match entry.fx_transfer_type {
                FxTransferType::PayerConversion => &mut sending,
                FxTransferType::PayeeConversion => &mut receiving,
            };
            if slot.is_some() {
                return Err(CyrilError::UnsupportedTopology(
                    determining_transfer_id.clone(),
                    entry.fx_transfer_type,
                ));
            }
            *slot = Some(leg);
        }

        Ok((sending, receiving))
    }

    /// Account to credit for an obligation from `debtor` to `creditor`.
    ///
    /// `None` when the creditor is out of scheme and its proxy account is the
    /// debtor's account too: moving money within one account is a no-op.
    async fn resolve_creditor_account(
        &self,
        creditor: &ParticipantName,
        debtor: &ParticipantName,
        currency: &Currency,
    ) -> Result<Option<AccountId>, CyrilError> {
        let details = self
            .resolver
            .get_proxy_account_details(creditor, currency)
            .await?;
        let account_id = details.account_id.ok_or_else(|| CyrilError::AccountNotFound {
            participant: creditor.clone(),
            currency: currency.clone(),
        })?;

        if !details.in_scheme {
            let debtor_details = self
                .resolver
                .get_proxy_account_details(debtor, currency)
                .await?;
            if debtor_details.account_id == Some(account_id) {
                tracing::debug!(
                    creditor = %creditor,
                    debtor = %debtor,
                    currency = %currency,
                    account_id = %account_id,
                    "obligation elided: both parties share one proxy account"
                );
                return Ok(None);
            }
        }

        Ok(Some(account_id))
    }
}
