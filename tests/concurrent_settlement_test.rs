mod common;

use common::*;
use hubledger::error::ErrorCode;
use hubledger::{
    AccountId, HandlerOutcome, InboundMessage, LedgerSubject, TransferId, TransferState,
};

const ROUNDS: usize = 8;

async fn reserved_transfer(hub: &TestHub, id: &str) {
    let prepare = transfer_prepare(id, "dfsp1", "dfsp2", "10", "USD");
    let outcome = hub.handler.handle(prepare_message(&prepare)).await.unwrap();
    assert_eq!(outcome, HandlerOutcome::Reserved);
}

async fn terminal_states(hub: &TestHub, id: &str) -> Vec<TransferState> {
    hub.repo
        .list_transfer_states(&TransferId::new(id))
        .await
        .unwrap()
        .into_iter()
        .filter(|s| s.is_terminal())
        .collect()
}

async fn accounts(hub: &TestHub) -> (AccountId, AccountId) {
    let payer = hub.account("dfsp1", "USD", "1000").await;
    let payee = hub.account("dfsp2", "USD", "1000").await;
    (payer, payee)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_fulfils_commit_once() {
    let hub = setup().await;
    let (payer, payee) = accounts(&hub).await;

    for round in 0..ROUNDS {
        let id = format!("t{}", round);
        reserved_transfer(&hub, &id).await;

        let (first, second) = tokio::join!(
            hub.handler
                .handle(fulfil_message(&id, "dfsp2", "dfsp1", fulfil_payload(FULFILMENT))),
            hub.handler
                .handle(fulfil_message(&id, "dfsp2", "dfsp1", fulfil_payload(FULFILMENT))),
        );
        let outcomes = [first.unwrap(), second.unwrap()];

        let committed = outcomes
            .iter()
            .filter(|o| **o == HandlerOutcome::Committed)
            .count();
        assert_eq!(committed, 1, "round {}: {:?}", round, outcomes);
        assert!(outcomes.iter().all(|o| matches!(
            o,
            HandlerOutcome::Committed | HandlerOutcome::ReplayIgnored | HandlerOutcome::ReplayResent
        )));
        assert_eq!(terminal_states(&hub, &id).await, vec![TransferState::Committed]);
    }

    let rounds = ROUNDS as i64;
    assert_eq!(hub.value(payer).await, dec(&(10 * rounds).to_string()));
    assert_eq!(hub.value(payee).await, dec(&(-10 * rounds).to_string()));
    assert_eq!(
        hub.repo.list_position_changes(payee).await.unwrap().len(),
        ROUNDS
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fulfil_racing_abort_settles_once() {
    let hub = setup().await;
    let (payer, payee) = accounts(&hub).await;
    let mut expected_payer = 0i64;

    for round in 0..ROUNDS {
        let id = format!("t{}", round);
        reserved_transfer(&hub, &id).await;
        expected_payer += 10;

        let (fulfil, abort) = tokio::join!(
            hub.handler
                .handle(fulfil_message(&id, "dfsp2", "dfsp1", fulfil_payload(FULFILMENT))),
            hub.handler.handle(abort_message(&id, "dfsp2", "dfsp1")),
        );
        let (fulfil, abort) = (fulfil.unwrap(), abort.unwrap());

        let lost = |o: &HandlerOutcome| {
            matches!(
                o,
                HandlerOutcome::Stale | HandlerOutcome::Rejected(ErrorCode::ValidationError)
            )
        };
        match hub.transfer_state(&id).await {
            TransferState::Committed => {
                assert_eq!(fulfil, HandlerOutcome::Committed);
                assert!(lost(&abort), "round {}: abort {:?}", round, abort);
            }
            TransferState::AbortedError => {
                assert_eq!(abort, HandlerOutcome::Aborted);
                assert!(lost(&fulfil), "round {}: fulfil {:?}", round, fulfil);
                expected_payer -= 10;
            }
            other => panic!("round {}: unexpected state {}", round, other),
        }
        assert_eq!(terminal_states(&hub, &id).await.len(), 1);
    }

    let committed = hub
        .repo
        .list_position_changes(payee)
        .await
        .unwrap()
        .len() as i64;
    assert_eq!(hub.value(payer).await, dec(&expected_payer.to_string()));
    assert_eq!(hub.value(payee).await, dec(&(-10 * committed).to_string()));
    assert_eq!(expected_payer, 10 * committed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fulfil_racing_timeout_settles_once() {
    let hub = setup().await;
    let (payer, payee) = accounts(&hub).await;

    for round in 0..ROUNDS {
        let id = format!("t{}", round);
        reserved_transfer(&hub, &id).await;

        let timeout = InboundMessage::Timeout {
            subject: LedgerSubject::Transfer(TransferId::new(id.clone())),
        };
        let (fulfil, expired) = tokio::join!(
            hub.handler
                .handle(fulfil_message(&id, "dfsp2", "dfsp1", fulfil_payload(FULFILMENT))),
            hub.handler.handle(timeout),
        );
        let (fulfil, expired) = (fulfil.unwrap(), expired.unwrap());

        let winners = [&fulfil, &expired]
            .iter()
            .filter(|o| matches!(o, HandlerOutcome::Committed | HandlerOutcome::Aborted))
            .count();
        assert_eq!(winners, 1, "round {}: {:?} {:?}", round, fulfil, expired);
        assert_eq!(terminal_states(&hub, &id).await.len(), 1);
    }

    let committed = hub
        .repo
        .list_position_changes(payee)
        .await
        .unwrap()
        .len() as i64;
    // every round reserved 10; each aborted round gave its 10 back
    assert_eq!(hub.value(payer).await, dec(&(10 * committed).to_string()));
    assert_eq!(hub.value(payee).await, dec(&(-10 * committed).to_string()));
}
