#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use hubledger::bus::InMemoryPublisher;
use hubledger::config::HandlerConfig;
use hubledger::crypto;
use hubledger::db::init_db;
use hubledger::domain::{
    ErrorInformation, ErrorPayload, FulfilPayload, FulfilState, FxFulfilPayload,
    FxTransferPrepare, Headers, Money, TransferPrepare,
};
use hubledger::{
    AccountId, CommitRequestId, Currency, Decimal, InboundMessage, ParticipantName, Repository,
    TransferHandler, TransferId, TransferState,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Preimage of 32 zero bytes.
pub const FULFILMENT: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
/// Well-formed, but not the preimage of [`condition`].
pub const WRONG_FULFILMENT: &str = "AQAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

pub fn condition() -> String {
    crypto::fulfilment_to_condition(FULFILMENT).unwrap()
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

pub fn name(s: &str) -> ParticipantName {
    ParticipantName::new(s)
}

pub fn completed_at() -> DateTime<Utc> {
    "2030-01-01T00:00:00.000Z".parse().unwrap()
}

pub struct TestHub {
    _dir: TempDir,
    pub repo: Arc<Repository>,
    pub publisher: Arc<InMemoryPublisher>,
    pub handler: TransferHandler,
}

pub async fn setup() -> TestHub {
    setup_with(HandlerConfig::default()).await
}

pub async fn setup_with(config: HandlerConfig) -> TestHub {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("test.db").to_string_lossy().to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let publisher = Arc::new(InMemoryPublisher::new());
    let handler = TransferHandler::new(repo.clone(), publisher.clone(), config);
    TestHub {
        _dir: dir,
        repo,
        publisher,
        handler,
    }
}

impl TestHub {
    /// Position account for `participant`, registering the participant on first use.
    pub async fn account(&self, participant: &str, currency: &str, net_debit_cap: &str) -> AccountId {
        let participant = name(participant);
        if self
            .repo
            .get_participant_by_name(&participant)
            .await
            .unwrap()
            .is_none()
        {
            self.repo.create_participant(&participant, false).await.unwrap();
        }
        self.repo
            .create_position_account(&participant, &Currency::new(currency), dec(net_debit_cap))
            .await
            .unwrap()
    }

    /// Participant `external` living behind `proxy`, which is registered with the given accounts.
    pub async fn external(&self, external: &str, proxy: &str) {
        let proxy = name(proxy);
        if self.repo.get_participant_by_name(&proxy).await.unwrap().is_none() {
            self.repo.create_participant(&proxy, true).await.unwrap();
        }
        self.repo
            .add_external_participant(&name(external), &proxy)
            .await
            .unwrap();
    }

    pub async fn value(&self, account: AccountId) -> Decimal {
        self.repo.get_position(account).await.unwrap().unwrap().value
    }

    pub async fn transfer_state(&self, id: &str) -> TransferState {
        self.repo
            .get_transfer(&TransferId::new(id))
            .await
            .unwrap()
            .unwrap()
            .state
    }

    pub async fn fx_state(&self, id: &str) -> TransferState {
        self.repo
            .get_fx_transfer(&CommitRequestId::new(id))
            .await
            .unwrap()
            .unwrap()
            .state
    }
}

pub fn transfer_prepare(
    id: &str,
    payer: &str,
    payee: &str,
    amount: &str,
    currency: &str,
) -> TransferPrepare {
    TransferPrepare {
        transfer_id: TransferId::new(id),
        payer_fsp: name(payer),
        payee_fsp: name(payee),
        amount: Money::new(dec(amount), Currency::new(currency)),
        ilp_packet: Some("AYIBgQAAAAAAAASwNGxldmVsb25lLmRmc3AxLm1lci45T2RTOF81MDdqUUZERmZlakgyOVc4bXFmNEpLMHlGTFGCAUBQU0svMS4wCk5vbmNlOiB1SXlweUYzY3pYSXBFdzVVc05TYWh3CkVuY3J5cHRpb246IG5vbmUKUGF5bWVudC1JZDogMTMyMzZhM2ItOGZhOC00MTYzLTg0NDctNGMzZWQzZGE5OGE3".to_string()),
        condition: Some(condition()),
        expiration: Some(Utc::now() + Duration::hours(1)),
    }
}

pub fn fx_prepare(
    commit_request_id: &str,
    determining_transfer_id: &str,
    initiating_fsp: &str,
    fxp: &str,
    source: (&str, &str),
    target: (&str, &str),
) -> FxTransferPrepare {
    FxTransferPrepare {
        commit_request_id: CommitRequestId::new(commit_request_id),
        determining_transfer_id: TransferId::new(determining_transfer_id),
        initiating_fsp: name(initiating_fsp),
        counter_party_fsp: name(fxp),
        source_amount: Money::new(dec(source.0), Currency::new(source.1)),
        target_amount: Money::new(dec(target.0), Currency::new(target.1)),
        condition: Some(condition()),
        expiration: Some(Utc::now() + Duration::hours(1)),
    }
}

pub fn prepare_message(prepare: &TransferPrepare) -> InboundMessage {
    InboundMessage::Prepare {
        headers: Headers::new(prepare.payer_fsp.clone(), Some(prepare.payee_fsp.clone())),
        payload: prepare.clone(),
    }
}

pub fn fx_prepare_message(prepare: &FxTransferPrepare) -> InboundMessage {
    InboundMessage::FxPrepare {
        headers: Headers::new(
            prepare.initiating_fsp.clone(),
            Some(prepare.counter_party_fsp.clone()),
        ),
        payload: prepare.clone(),
    }
}

pub fn fulfil_payload(fulfilment: &str) -> FulfilPayload {
    FulfilPayload {
        fulfilment: Some(fulfilment.to_string()),
        completed_timestamp: Some(completed_at()),
        transfer_state: FulfilState::Committed,
    }
}

pub fn fulfil_message(id: &str, payee: &str, payer: &str, payload: FulfilPayload) -> InboundMessage {
    InboundMessage::Fulfil {
        id: TransferId::new(id),
        headers: Headers::new(name(payee), Some(name(payer))),
        payload,
    }
}

pub fn reject_message(id: &str, payee: &str, payer: &str) -> InboundMessage {
    fulfil_message(
        id,
        payee,
        payer,
        FulfilPayload {
            fulfilment: None,
            completed_timestamp: Some(completed_at()),
            transfer_state: FulfilState::Aborted,
        },
    )
}

pub fn fx_fulfil_message(commit_request_id: &str, fxp: &str, initiating_fsp: &str) -> InboundMessage {
    InboundMessage::FxFulfil {
        id: CommitRequestId::new(commit_request_id),
        headers: Headers::new(name(fxp), Some(name(initiating_fsp))),
        payload: FxFulfilPayload {
            fulfilment: Some(FULFILMENT.to_string()),
            completed_timestamp: Some(completed_at()),
            conversion_state: FulfilState::Reserved,
        },
    }
}

pub fn error_payload(code: &str, description: &str) -> ErrorPayload {
    ErrorPayload {
        error_information: ErrorInformation {
            error_code: code.to_string(),
            error_description: description.to_string(),
        },
    }
}

pub fn abort_message(id: &str, source: &str, destination: &str) -> InboundMessage {
    InboundMessage::Abort {
        id: TransferId::new(id),
        headers: Headers::new(name(source), Some(name(destination))),
        payload: error_payload("5000", "Generic payee error"),
    }
}

pub fn fx_abort_message(commit_request_id: &str, source: &str, destination: &str) -> InboundMessage {
    InboundMessage::FxAbort {
        id: CommitRequestId::new(commit_request_id),
        headers: Headers::new(name(source), Some(name(destination))),
        payload: error_payload("5000", "Generic FXP error"),
    }
}
