//! One prepare-path interface over plain transfers and FX legs.
//!
//! [`TransferEntity`] and [`FxTransferEntity`] bind the repository tables,
//! the duplicate namespace and the resolver calls of their kind, so the
//! prepare flow is written once.

use super::{ActionSet, FX_ACTIONS, TRANSFER_ACTIONS};
use crate::cyril::{
    Cyril, CyrilError, DeterminingTransferCheck, PositionParticipant, ProxyObligation,
};
use crate::db::Repository;
use crate::domain::{
    CommitRequestId, FxTransfer, FxTransferPrepare, LedgerSubject, Money, ParticipantName,
    Transfer, TransferId, TransferPrepare, TransferState,
};
use crate::duplicate::{DuplicateNamespace, DuplicateStore};
use crate::error::ErrorCode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// The parts of a prepare request validation and routing look at.
#[derive(Debug, Clone)]
pub struct PrepareFacts<'a> {
    pub subject: LedgerSubject,
    /// Payer, or the initiating FSP of an FX leg
    pub debtor: &'a ParticipantName,
    /// Payee, or the FXP of an FX leg
    pub creditor: &'a ParticipantName,
    pub amounts: Vec<&'a Money>,
    pub condition: Option<&'a str>,
    pub expiration: Option<DateTime<Utc>>,
}

impl PrepareFacts<'_> {
    pub fn id(&self) -> &str {
        self.subject.id()
    }
}

/// Latest state of a stored request, enough to answer a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemittanceSummary {
    pub state: TransferState,
    pub fulfilment: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Transfer> for RemittanceSummary {
    fn from(transfer: &Transfer) -> Self {
        RemittanceSummary {
            state: transfer.state,
            fulfilment: transfer.fulfilment.clone(),
            completed_at: transfer.completed_at,
        }
    }
}

impl From<&FxTransfer> for RemittanceSummary {
    fn from(leg: &FxTransfer) -> Self {
        RemittanceSummary {
            state: leg.state,
            fulfilment: leg.fulfilment.clone(),
            completed_at: leg.completed_at,
        }
    }
}

/// Storage and resolution operations of one remittance kind.
///
/// The [`DuplicateStore`] supertrait is bound to the kind's prepare namespace.
#[async_trait]
pub trait RemittanceEntity: DuplicateStore {
    type Prepare: Serialize + Send + Sync;

    fn actions(&self) -> &'static ActionSet;

    fn facts<'p>(&self, payload: &'p Self::Prepare) -> PrepareFacts<'p>;

    /// Persist the request: `RECEIVED_PREPARE` when valid, `INVALID` with the reasons otherwise.
    async fn save_prepared_request(
        &self,
        payload: &Self::Prepare,
        proxy: &ProxyObligation,
        validation_passed: bool,
        reason: Option<&str>,
    ) -> Result<(), sqlx::Error>;

    async fn get_by_id_light(&self, id: &str) -> Result<Option<RemittanceSummary>, sqlx::Error>;

    async fn check_determining_transfer_exists(
        &self,
        payload: &Self::Prepare,
        proxy: &ProxyObligation,
    ) -> Result<DeterminingTransferCheck, CyrilError>;

    async fn get_position_participant(
        &self,
        payload: &Self::Prepare,
        check: &DeterminingTransferCheck,
    ) -> Result<PositionParticipant, CyrilError>;

    async fn log_error(
        &self,
        id: &str,
        code: ErrorCode,
        description: &str,
    ) -> Result<(), sqlx::Error>;
}

pub struct TransferEntity<'a> {
    repo: &'a Repository,
    cyril: &'a Cyril,
}

impl<'a> TransferEntity<'a> {
    pub fn new(repo: &'a Repository, cyril: &'a Cyril) -> Self {
        TransferEntity { repo, cyril }
    }
}

#[async_trait]
impl<'a> DuplicateStore for TransferEntity<'a> {
    async fn get_duplicate(&self, id: &str) -> Result<Option<String>, sqlx::Error> {
        self.repo
            .get_duplicate_hash(DuplicateNamespace::TransferPrepare, id)
            .await
    }

    async fn save_duplicate_hash(&self, id: &str, hash: &str) -> Result<bool, sqlx::Error> {
        self.repo
            .save_duplicate_hash(DuplicateNamespace::TransferPrepare, id, hash)
            .await
    }
}

#[async_trait]
impl<'a> RemittanceEntity for TransferEntity<'a> {
    type Prepare = TransferPrepare;

    fn actions(&self) -> &'static ActionSet {
        &TRANSFER_ACTIONS
    }

    fn facts<'p>(&self, payload: &'p TransferPrepare) -> PrepareFacts<'p> {
        PrepareFacts {
            subject: LedgerSubject::Transfer(payload.transfer_id.clone()),
            debtor: &payload.payer_fsp,
            creditor: &payload.payee_fsp,
            amounts: vec![&payload.amount],
            condition: payload.condition.as_deref(),
            expiration: payload.expiration,
        }
    }

    async fn save_prepared_request(
        &self,
        payload: &TransferPrepare,
        proxy: &ProxyObligation,
        validation_passed: bool,
        reason: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let state = if validation_passed {
            TransferState::ReceivedPrepare
        } else {
            TransferState::Invalid
        };
        self.repo
            .insert_transfer(
                payload,
                proxy.initiating_fsp_proxy.as_ref(),
                proxy.counter_party_fsp_proxy.as_ref(),
                state,
                reason,
            )
            .await
    }

    async fn get_by_id_light(&self, id: &str) -> Result<Option<RemittanceSummary>, sqlx::Error> {
        let transfer = self.repo.get_transfer(&TransferId::new(id)).await?;
        Ok(transfer.as_ref().map(RemittanceSummary::from))
    }

    async fn check_determining_transfer_exists(
        &self,
        payload: &TransferPrepare,
        proxy: &ProxyObligation,
    ) -> Result<DeterminingTransferCheck, CyrilError> {
        self.cyril
            .check_if_determining_transfer_exists_for_transfer(payload, proxy)
            .await
    }

    async fn get_position_participant(
        &self,
        payload: &TransferPrepare,
        check: &DeterminingTransferCheck,
    ) -> Result<PositionParticipant, CyrilError> {
        self.cyril
            .get_participant_and_currency_for_transfer(payload, check)
            .await
    }

    async fn log_error(
        &self,
        id: &str,
        code: ErrorCode,
        description: &str,
    ) -> Result<(), sqlx::Error> {
        self.repo
            .log_transfer_error(&TransferId::new(id), code.code(), description)
            .await
    }
}

pub struct FxTransferEntity<'a> {
    repo: &'a Repository,
    cyril: &'a Cyril,
}

impl<'a> FxTransferEntity<'a> {
    pub fn new(repo: &'a Repository, cyril: &'a Cyril) -> Self {
        FxTransferEntity { repo, cyril }
    }
}

#[async_trait]
impl<'a> DuplicateStore for FxTransferEntity<'a> {
    async fn get_duplicate(&self, id: &str) -> Result<Option<String>, sqlx::Error> {
        self.repo
            .get_duplicate_hash(DuplicateNamespace::FxTransferPrepare, id)
            .await
    }

    async fn save_duplicate_hash(&self, id: &str, hash: &str) -> Result<bool, sqlx::Error> {
        self.repo
            .save_duplicate_hash(DuplicateNamespace::FxTransferPrepare, id, hash)
            .await
    }
}

#[async_trait]
impl<'a> RemittanceEntity for FxTransferEntity<'a> {
    type Prepare = FxTransferPrepare;

    fn actions(&self) -> &'static ActionSet {
        &FX_ACTIONS
    }

    fn facts<'p>(&self, payload: &'p FxTransferPrepare) -> PrepareFacts<'p> {
        PrepareFacts {
            subject: LedgerSubject::FxTransfer(payload.commit_request_id.clone()),
            debtor: &payload.initiating_fsp,
            creditor: &payload.counter_party_fsp,
            amounts: vec![&payload.source_amount, &payload.target_amount],
            condition: payload.condition.as_deref(),
            expiration: payload.expiration,
        }
    }

    async fn save_prepared_request(
        &self,
        payload: &FxTransferPrepare,
        proxy: &ProxyObligation,
        validation_passed: bool,
        reason: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let state = if validation_passed {
            TransferState::ReceivedPrepare
        } else {
            TransferState::Invalid
        };
        self.repo
            .insert_fx_transfer(
                payload,
                proxy.initiating_fsp_proxy.as_ref(),
                proxy.counter_party_fsp_proxy.as_ref(),
                state,
                reason,
            )
            .await
    }

    async fn get_by_id_light(&self, id: &str) -> Result<Option<RemittanceSummary>, sqlx::Error> {
        let leg = self.repo.get_fx_transfer(&CommitRequestId::new(id)).await?;
        Ok(leg.as_ref().map(RemittanceSummary::from))
    }

    async fn check_determining_transfer_exists(
        &self,
        payload: &FxTransferPrepare,
        proxy: &ProxyObligation,
    ) -> Result<DeterminingTransferCheck, CyrilError> {
        self.cyril
            .check_if_determining_transfer_exists_for_fx_transfer(payload, proxy)
            .await
    }

    async fn get_position_participant(
        &self,
        payload: &FxTransferPrepare,
        check: &DeterminingTransferCheck,
    ) -> Result<PositionParticipant, CyrilError> {
        self.cyril
            .get_participant_and_currency_for_fx_transfer(payload, check)
            .await
    }

    async fn log_error(
        &self,
        id: &str,
        code: ErrorCode,
        description: &str,
    ) -> Result<(), sqlx::Error> {
        self.repo
            .log_fx_transfer_error(&CommitRequestId::new(id), code.code(), description)
            .await
    }
}
