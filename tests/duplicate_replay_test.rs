mod common;

use common::*;
use hubledger::domain::Action;
use hubledger::duplicate::{payload_hash, DuplicateNamespace};
use hubledger::{HandlerOutcome, TransferId, TransferState};

#[tokio::test]
async fn test_prepare_replay_in_flight_is_absorbed() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    hub.publisher.take();

    let outcome = hub.handler.handle(prepare_message(&prepare)).await.unwrap();

    assert_eq!(outcome, HandlerOutcome::ReplayIgnored);
    assert_eq!(hub.value(payer).await, dec("100"));
    assert!(hub.publisher.take().is_empty());
}

#[tokio::test]
async fn test_prepare_with_changed_payload_is_modified_request() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    hub.publisher.take();

    let mut changed = prepare.clone();
    changed.amount.amount = dec("200");
    let outcome = hub.handler.handle(prepare_message(&changed)).await.unwrap();

    assert_eq!(outcome, HandlerOutcome::Modified);
    assert_eq!(hub.value(payer).await, dec("100"));
    let messages = hub.publisher.take();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].action, Action::PrepareDuplicate);
    assert_eq!(messages[0].to.as_str(), "dfsp1");
    assert_eq!(messages[0].error.as_ref().unwrap().error_code, "3106");
}

#[tokio::test]
async fn test_prepare_replay_after_commit_resends_state() {
    let hub = setup().await;
    hub.account("dfsp1", "USD", "1000").await;
    hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    hub.handler
        .handle(fulfil_message("t1", "dfsp2", "dfsp1", fulfil_payload(FULFILMENT)))
        .await
        .unwrap();
    hub.publisher.take();

    let outcome = hub.handler.handle(prepare_message(&prepare)).await.unwrap();

    assert_eq!(outcome, HandlerOutcome::ReplayResent);
    let messages = hub.publisher.take();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].action, Action::PrepareDuplicate);
    assert_eq!(messages[0].to.as_str(), "dfsp1");
    assert_eq!(messages[0].payload["transferState"], "COMMITTED");
    assert_eq!(messages[0].payload["fulfilment"], FULFILMENT);
    assert_eq!(
        messages[0].payload["completedTimestamp"],
        "2030-01-01T00:00:00.000Z"
    );
}

#[tokio::test]
async fn test_prepare_replay_without_stored_transfer_is_processed() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    hub.account("dfsp2", "USD", "1000").await;

    // hash recorded by an attempt that failed before storing the transfer
    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    let hash = payload_hash(&prepare).unwrap();
    hub.repo
        .save_duplicate_hash(DuplicateNamespace::TransferPrepare, "t1", &hash)
        .await
        .unwrap();

    let outcome = hub.handler.handle(prepare_message(&prepare)).await.unwrap();

    assert_eq!(outcome, HandlerOutcome::Reserved);
    assert_eq!(hub.value(payer).await, dec("100"));
}

#[tokio::test]
async fn test_fulfil_replay_after_commit_resends_state() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    let payee = hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    let fulfil = fulfil_message("t1", "dfsp2", "dfsp1", fulfil_payload(FULFILMENT));
    hub.handler.handle(fulfil.clone()).await.unwrap();
    hub.publisher.take();

    let outcome = hub.handler.handle(fulfil).await.unwrap();

    assert_eq!(outcome, HandlerOutcome::ReplayResent);
    assert_eq!(hub.value(payer).await, dec("100"));
    assert_eq!(hub.value(payee).await, dec("-100"));
    let messages = hub.publisher.take();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].action, Action::FulfilDuplicate);
    assert_eq!(messages[0].to.as_str(), "dfsp2");
    assert_eq!(messages[0].payload["transferState"], "COMMITTED");
}

#[tokio::test]
async fn test_changed_fulfil_is_modified_request() {
    let hub = setup().await;
    hub.account("dfsp1", "USD", "1000").await;
    let payee = hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    hub.handler
        .handle(fulfil_message("t1", "dfsp2", "dfsp1", fulfil_payload(FULFILMENT)))
        .await
        .unwrap();
    hub.publisher.take();

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

    assert_eq!(outcome, HandlerOutcome::Modified);
    assert_eq!(hub.value(payee).await, dec("-100"));
    let messages = hub.publisher.take();
    assert_eq!(messages[0].action, Action::FulfilDuplicate);
    assert_eq!(messages[0].error.as_ref().unwrap().error_code, "3106");
}

#[tokio::test]
async fn test_fulfil_replay_while_reserved_is_absorbed() {
    let hub = setup().await;
    hub.account("dfsp1", "USD", "1000").await;
    let payee = hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    hub.publisher.take();

    // the same fulfil is already being handled
    let payload = fulfil_payload(FULFILMENT);
    let hash = payload_hash(&payload).unwrap();
    hub.repo
        .save_duplicate_hash(DuplicateNamespace::TransferFulfil, "t1", &hash)
        .await
        .unwrap();

    let outcome = hub
        .handler
        .handle(fulfil_message("t1", "dfsp2", "dfsp1", payload))
        .await
        .unwrap();

    assert_eq!(outcome, HandlerOutcome::ReplayIgnored);
    assert_eq!(hub.value(payee).await, dec("0"));
    assert!(hub.repo.list_position_changes(payee).await.unwrap().is_empty());
    assert_eq!(hub.transfer_state("t1").await, TransferState::Reserved);
    assert!(hub.publisher.take().is_empty());
}

#[tokio::test]
async fn test_abort_replay_resends_aborted_state() {
    let hub = setup().await;
    let payer = hub.account("dfsp1", "USD", "1000").await;
    hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    let abort = abort_message("t1", "dfsp2", "dfsp1");
    assert_eq!(
        hub.handler.handle(abort.clone()).await.unwrap(),
        HandlerOutcome::Aborted
    );
    hub.publisher.take();

    let outcome = hub.handler.handle(abort).await.unwrap();

    assert_eq!(outcome, HandlerOutcome::ReplayResent);
    assert_eq!(hub.value(payer).await, dec("0"));
    let changes = hub.repo.list_position_changes(payer).await.unwrap();
    assert_eq!(changes.len(), 2);
    let messages = hub.publisher.take();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].action, Action::AbortDuplicate);
    assert_eq!(messages[0].payload["transferState"], "ABORTED");
}

#[tokio::test]
async fn test_fulfil_and_abort_namespaces_are_separate() {
    let hub = setup().await;
    hub.account("dfsp1", "USD", "1000").await;
    hub.account("dfsp2", "USD", "1000").await;

    let prepare = transfer_prepare("t1", "dfsp1", "dfsp2", "100", "USD");
    hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    hub.handler
        .handle(fulfil_message("t1", "dfsp2", "dfsp1", fulfil_payload(FULFILMENT)))
        .await
        .unwrap();

    let id = TransferId::new("t1");
    assert!(hub
        .repo
        .get_duplicate_hash(DuplicateNamespace::TransferFulfil, id.as_str())
        .await
        .unwrap()
        .is_some());
    assert!(hub
        .repo
        .get_duplicate_hash(DuplicateNamespace::TransferError, id.as_str())
        .await
        .unwrap()
        .is_none());
}
