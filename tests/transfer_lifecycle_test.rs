mod common;

use chrono::{Duration, Utc};
use common::*;
use hubledger::domain::{Action, Functionality};
use hubledger::{
    ErrorCode, HandlerOutcome, InboundMessage, LedgerSubject, TransferId, TransferState,
};

#[tokio::test]
async fn test_prepare_reserves_payer_position() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    let payee = hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    let outcome = hub.handler.handle(prepare_message(&prepare)).await.unwrap();

    assert_eq!(outcome, HandlerOutcome::Reserved);
    assert_eq!(hub.value(payer).await, dec("100"));
    assert_eq!(hub.value(payee).await, dec("0"));
    assert_eq!(
        hub.repo.list_transfer_states(&TransferId::new("t1")).await.unwrap(),
        vec![TransferState::ReceivedPrepare, TransferState::Reserved]
    );

    let messages = hub.publisher.take();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].functionality, Functionality::Position);
    assert_eq!(messages[0].action, Action::Reserve);
    assert_eq!(messages[0].message_key, Some(payer));
    assert_eq!(messages[1].functionality, Functionality::Notification);
    assert_eq!(messages[1].action, Action::Prepare);
    assert_eq!(messages[1].from.as_str(), "dfsp1");
    assert_eq!(messages[1].to.as_str(), "dfsp2");
    assert_eq!(messages[1].payload["transferId"], "t1");
}

#[tokio::test]
async fn test_fulfil_commits_and_credits_payee() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    let payee = hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    hub.publisher.take();

    let outcome = hub
        .handler
        .handle(fulfil_message("t1", "dfsp2", "dfsp1", fulfil_payload(FULFILMENT)))
        .await
        .unwrap();

    assert_eq!(outcome, HandlerOutcome::Committed);
    assert_eq!(hub.value(payer).await, dec("100"));
    assert_eq!(hub.value(payee).await, dec("-100"));
    assert_eq!(hub.transfer_state("t1").await, TransferState::Committed);

    let transfer = hub
        .repo
        .get_transfer(&TransferId::new("t1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transfer.fulfilment.as_deref(), Some(FULFILMENT));

    let changes = hub.repo.list_position_changes(payee).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].state, TransferState::Committed);
    assert_eq!(changes[0].change.value(), dec("-100"));

    let messages = hub.publisher.take();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].functionality, Functionality::Position);
    assert_eq!(messages[0].action, Action::Commit);
    assert_eq!(messages[0].to.as_str(), "dfsp2");
    assert_eq!(messages[0].message_key, Some(payee));
    assert!(messages[0].is_original_id);
    for message in &messages[1..] {
        assert_eq!(message.action, Action::Commit);
        assert_eq!(message.payload["transferState"], "COMMITTED");
        assert_eq!(message.payload["fulfilment"], FULFILMENT);
    }
    assert_eq!(messages[1].to.as_str(), "dfsp1");
    assert_eq!(messages[2].to.as_str(), "dfsp2");
}

#[tokio::test]
async fn test_prepare_over_net_debit_cap_is_declined() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "50").await;
    hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    let outcome = hub.handler.handle(prepare_message(&prepare)).await.unwrap();

    assert_eq!(outcome, HandlerOutcome::Declined);
    assert_eq!(hub.value(payer).await, dec("0"));
    assert_eq!(hub.transfer_state("t1").await, TransferState::AbortedRejected);
    assert!(hub.repo.list_position_changes(payer).await.unwrap().is_empty());

    let errors = hub
        .repo
        .list_transfer_errors(&TransferId::new("t1"))
        .await
        .unwrap();
    assert_eq!(
        errors,
        vec![("4001".to_string(), "Net Debit Cap exceeded".to_string())]
    );

    let messages = hub.publisher.take();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].to.as_str(), "dfsp1");
    assert_eq!(messages[0].error.as_ref().unwrap().error_code, "4001");
}

#[tokio::test]
async fn test_prepare_collects_validation_reasons() {
    let hub = setup().await;
    hub.account("dfsp1", "USD", "1000").await;

    let mut prepare = transfer_prepare("t1", "dfsp1", "ghost", "1.12345", "USD");
    prepare.condition = None;
    let outcome = hub.handler.handle(prepare_message(&prepare)).await.unwrap();

    assert_eq!(outcome, HandlerOutcome::Invalid);
    assert_eq!(hub.transfer_state("t1").await, TransferState::Invalid);

    let errors = hub
        .repo
        .list_transfer_errors(&TransferId::new("t1"))
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "3100");
    assert_eq!(
        errors[0].1,
        "Participant ghost not found, \
         Amount 1.12345 exceeds allowed scale of 4, \
         Condition is required for a conditional transfer"
    );

    let messages = hub.publisher.take();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].action, Action::Prepare);
    assert_eq!(messages[0].error.as_ref().unwrap().error_code, "3100");
}

#[tokio::test]
async fn test_on_us_transfer_needs_flag() {
    let hub = setup().await;
    hub.account("dfsp1", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp1", "10", "USD");
    let outcome = hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    assert_eq!(outcome, HandlerOutcome::Invalid);
    let errors = hub
        .repo
        .list_transfer_errors(&TransferId::new("t1"))
        .await
        .unwrap();
    assert_eq!(errors[0].1, "Payer and Payee should be different");

    let hub = setup_with(hubledger::HandlerConfig {
        enable_on_us_transfers: true,
        ..Default::default()
    })
    .await;
    hub.account("dfsp1", "USD", "1000").await;
    let outcome = hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    assert_eq!(outcome, HandlerOutcome::Reserved);
}

#[tokio::test]
async fn test_inactive_payer_account_fails_validation() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    hub.account("dfsp2", "USD", "1000").await;
    hub.repo.set_account_active(payer, false).await.unwrap();

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "10", "USD");
    let outcome = hub.handler.handle(prepare_message(&prepare)).await.unwrap();

    assert_eq!(outcome, HandlerOutcome::Invalid);
    let errors = hub
        .repo
        .list_transfer_errors(&TransferId::new("t1"))
        .await
        .unwrap();
    assert_eq!(errors[0].1, "Participant dfsp1 USD account is inactive");
}

#[tokio::test]
async fn test_payee_reject_unwinds_reservation() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    hub.publisher.take();

    let outcome = hub
        .handler
        .handle(reject_message("t1", "dfsp2", "dfsp1"))
        .await
        .unwrap();

    assert_eq!(outcome, HandlerOutcome::Aborted);
    assert_eq!(hub.value(payer).await, dec("0"));
    assert_eq!(hub.transfer_state("t1").await, TransferState::AbortedRejected);

    let changes = hub.repo.list_position_changes(payer).await.unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[1].state, TransferState::AbortedRejected);
    assert_eq!(changes[1].change.value(), dec("-100"));

    let errors = hub
        .repo
        .list_transfer_errors(&TransferId::new("t1"))
        .await
        .unwrap();
    assert_eq!(errors[0].0, "5100");

    let messages = hub.publisher.take();
    let position = &messages[0];
    assert_eq!(position.functionality, Functionality::Position);
    assert_eq!(position.action, Action::Reject);
    assert_eq!(position.to.as_str(), "dfsp1");
    assert_eq!(position.error.as_ref().unwrap().error_code, "5100");
    assert!(messages[1..]
        .iter()
        .all(|m| m.action == Action::Reject && m.functionality == Functionality::Notification));
}

#[tokio::test]
async fn test_invalid_fulfilment_aborts_with_validation_error() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    let payee = hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();

    let outcome = hub
        .handler
        .handle(fulfil_message(
            "t1",
            "dfsp2",
            "dfsp1",
            fulfil_payload(WRONG_FULFILMENT),
        ))
        .await
        .unwrap();

    assert_eq!(outcome, HandlerOutcome::Aborted);
    assert_eq!(hub.transfer_state("t1").await, TransferState::AbortedError);
    assert_eq!(hub.value(payer).await, dec("0"));
    assert_eq!(hub.value(payee).await, dec("0"));

    let errors = hub
        .repo
        .list_transfer_errors(&TransferId::new("t1"))
        .await
        .unwrap();
    assert_eq!(
        errors,
        vec![(
            "3100".to_string(),
            "Generic validation error - invalid fulfilment".to_string()
        )]
    );
}

#[tokio::test]
async fn test_fulfil_from_wrong_source_aborts() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    hub.account("dfsp2", "USD", "1000").await;
    hub.account("dfsp3", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    hub.publisher.take();

    let outcome = hub
        .handler
        .handle(fulfil_message("t1", "dfsp3", "dfsp1", fulfil_payload(FULFILMENT)))
        .await
        .unwrap();

    assert_eq!(outcome, HandlerOutcome::Aborted);
    assert_eq!(hub.transfer_state("t1").await, TransferState::AbortedError);
    assert_eq!(hub.value(payer).await, dec("0"));

    let messages = hub.publisher.take();
    assert!(messages.iter().all(|m| m.action == Action::AbortValidation));
    assert_eq!(
        messages[0].error.as_ref().unwrap().error_description,
        "Generic validation error - FSPIOP-Source header should match Payee"
    );
}

#[tokio::test]
async fn test_fulfil_for_unknown_transfer() {
    let hub = setup().await;

    let outcome = hub
        .handler
        .handle(fulfil_message("missing", "dfsp2", "dfsp1", fulfil_payload(FULFILMENT)))
        .await
        .unwrap();

    assert_eq!(outcome, HandlerOutcome::NotFound);
    let messages = hub.publisher.take();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].to.as_str(), "dfsp2");
    assert_eq!(messages[0].error.as_ref().unwrap().error_code, "3208");
}

#[tokio::test]
async fn test_fulfil_after_expiry_is_refused_without_state_change() {
    let hub = setup().await;
    hub.account("dfsp1", "USD", "1000").await;
    hub.account("dfsp2", "USD", "1000").await;

    // stored directly: a live prepare cannot carry a past expiration
    let mut prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    prepare.expiration = Some(Utc::now() - Duration::minutes(1));
    hub.repo
        .insert_transfer(&prepare, None, None, TransferState::ReceivedPrepare, None)
        .await
        .unwrap();
    hub.repo
        .record_state_change(&hubledger::domain::StateChange::new(
            LedgerSubject::Transfer(TransferId::new("t1")),
            TransferState::Reserved,
        ))
        .await
        .unwrap();

    let outcome = hub
        .handler
        .handle(fulfil_message("t1", "dfsp2", "dfsp1", fulfil_payload(FULFILMENT)))
        .await
        .unwrap();

    assert_eq!(outcome, HandlerOutcome::Rejected(ErrorCode::TransferExpired));
    assert_eq!(hub.transfer_state("t1").await, TransferState::Reserved);
    let messages = hub.publisher.take();
    assert_eq!(messages[0].error.as_ref().unwrap().error_code, "3303");
}

#[tokio::test]
async fn test_error_callback_aborts_transfer() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();

    let outcome = hub
        .handler
        .handle(abort_message("t1", "dfsp2", "dfsp1"))
        .await
        .unwrap();

    assert_eq!(outcome, HandlerOutcome::Aborted);
    assert_eq!(hub.transfer_state("t1").await, TransferState::AbortedError);
    assert_eq!(hub.value(payer).await, dec("0"));

    // a fulfil after the abort is refused
    let outcome = hub
        .handler
        .handle(fulfil_message("t1", "dfsp2", "dfsp1", fulfil_payload(FULFILMENT)))
        .await
        .unwrap();
    assert_eq!(outcome, HandlerOutcome::Rejected(ErrorCode::ValidationError));
    assert_eq!(hub.value(payer).await, dec("0"));
}

#[tokio::test]
async fn test_timeout_aborts_once() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    hub.publisher.take();

    let timeout = InboundMessage::Timeout {
        subject: LedgerSubject::Transfer(TransferId::new("t1")),
    };
    let outcome = hub.handler.handle(timeout.clone()).await.unwrap();
    assert_eq!(outcome, HandlerOutcome::Aborted);
    assert_eq!(hub.transfer_state("t1").await, TransferState::AbortedError);
    assert_eq!(hub.value(payer).await, dec("0"));

    let messages = hub.publisher.take();
    assert!(messages.iter().all(|m| m.action == Action::Timeout));
    assert!(messages
        .iter()
        .all(|m| m.error.as_ref().unwrap().error_code == "3303"));

    let outcome = hub.handler.handle(timeout).await.unwrap();
    assert_eq!(outcome, HandlerOutcome::Ignored);
    assert_eq!(hub.value(payer).await, dec("0"));
    assert!(hub.publisher.take().is_empty());
}

#[tokio::test]
async fn test_forwarded_transfer_still_fulfils() {
    let hub = setup().await;
    hub.account("dfsp1", "USD", "1000").await;
    let payee = hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();

    let forwarded = InboundMessage::Forwarded {
        subject: LedgerSubject::Transfer(TransferId::new("t1")),
    };
    assert_eq!(
        hub.handler.handle(forwarded.clone()).await.unwrap(),
        HandlerOutcome::Forwarded
    );
    assert_eq!(hub.transfer_state("t1").await, TransferState::ReservedForwarded);
    assert_eq!(
        hub.handler.handle(forwarded).await.unwrap(),
        HandlerOutcome::Ignored
    );

    let outcome = hub
        .handler
        .handle(fulfil_message("t1", "dfsp2", "dfsp1", fulfil_payload(FULFILMENT)))
        .await
        .unwrap();
    assert_eq!(outcome, HandlerOutcome::Committed);
    assert_eq!(hub.value(payee).await, dec("-100"));
}

#[tokio::test]
async fn test_proxied_payee_is_credited_through_proxy_account() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    let proxy = hub.account("proxyB", "USD", "1000").await;
    hub.external("remote", "proxyB").await;

    let prepare = transfer_prepare("t1", "dfsp1", "remote", "100", "USD");
    let outcome = hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    assert_eq!(outcome, HandlerOutcome::Reserved);

    let messages = hub.publisher.take();
    assert_eq!(messages[1].to.as_str(), "proxyB");

    // the proxy answers on behalf of the remote payee
    let outcome = hub
        .handler
        .handle(fulfil_message("t1", "proxyB", "dfsp1", fulfil_payload(FULFILMENT)))
        .await
        .unwrap();
    assert_eq!(outcome, HandlerOutcome::Committed);
    assert_eq!(hub.value(payer).await, dec("100"));
    assert_eq!(hub.value(proxy).await, dec("-100"));
}
