//! Coordinator behavior: synchronous settlement, fallback to the queue
//! pipeline, and the invariants the API layer relies on.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::{approved, declined, NeverGateway, ScriptedGateway, TestHarness};
use ecommerce_payments::entities::order::OrderStatus;
use ecommerce_payments::entities::payment_request::PaymentRequestStatus;
use ecommerce_payments::messaging::{MessageChannel, PaymentRequestMessage, PAYMENT_REQUESTS_QUEUE};
use ecommerce_payments::services::payments::PaymentOutcome;

#[tokio::test]
async fn approved_payment_confirms_order_directly() {
    let harness = TestHarness::new().await;
    let order = harness.seed_order(dec!(5.00), &[(dec!(20.00), 1)]).await;
    let coordinator = harness.coordinator(ScriptedGateway::new(vec![approved("GW-77")]));

    let outcome = coordinator
        .process_payment(order.order.id, "credit_card", "buyer@example.com")
        .await
        .unwrap();

    assert_matches!(
        outcome,
        PaymentOutcome::Success { gateway_reference: Some(ref r), .. } if r == "GW-77"
    );

    let order_now = harness.order_service().get_order(order.order.id).await.unwrap().unwrap();
    assert_eq!(order_now.order.status, OrderStatus::Confirmed);

    // Nothing was queued and no request row was written.
    assert_eq!(
        harness
            .channel
            .queue_len(PAYMENT_REQUESTS_QUEUE)
            .await
            .unwrap(),
        0
    );
    assert!(coordinator.list_pending_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn declined_payment_queues_a_request() {
    let harness = TestHarness::new().await;
    let order = harness.seed_order(dec!(10.00), &[(dec!(45.00), 2)]).await;
    let coordinator = harness.coordinator(ScriptedGateway::new(vec![declined("insufficient funds")]));

    let outcome = coordinator
        .process_payment(order.order.id, "credit_card", "buyer@example.com")
        .await
        .unwrap();
    let request_id = match outcome {
        PaymentOutcome::Pending {
            payment_request_id,
            message,
        } => {
            assert!(!message.is_empty());
            payment_request_id
        }
        other => panic!("expected pending outcome, got {other:?}"),
    };

    let request = coordinator.payment_status(request_id).await.unwrap().unwrap();
    assert_eq!(request.status, PaymentRequestStatus::Pending);
    assert_eq!(request.amount, dec!(100.00));
    assert_eq!(request.retry_count, 0);
    assert_eq!(request.order_id, order.order.id);

    let order_now = harness.order_service().get_order(order.order.id).await.unwrap().unwrap();
    assert_eq!(order_now.order.status, OrderStatus::PaymentPending);

    // The queued envelope snapshots the durable request.
    let messages = harness.channel.drain(PAYMENT_REQUESTS_QUEUE);
    assert_eq!(messages.len(), 1);
    let envelope: PaymentRequestMessage = messages[0].decode().unwrap();
    assert_eq!(envelope.payment_request_id, request_id);
    assert_eq!(envelope.order_id, order.order.id);
    assert_eq!(envelope.amount, dec!(100.00));
    assert_eq!(envelope.retry_count, 0);

    let pending = coordinator.list_pending_requests().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, request_id);
}

#[tokio::test(start_paused = true)]
async fn gateway_timeout_is_a_soft_failure() {
    let harness = TestHarness::new().await;
    let order = harness.seed_order(dec!(0.00), &[(dec!(30.00), 1)]).await;
    let coordinator = harness.coordinator(Arc::new(NeverGateway));

    let outcome = coordinator
        .process_payment(order.order.id, "credit_card", "buyer@example.com")
        .await
        .unwrap();

    assert_matches!(outcome, PaymentOutcome::Pending { .. });
    let order_now = harness.order_service().get_order(order.order.id).await.unwrap().unwrap();
    assert_eq!(order_now.order.status, OrderStatus::PaymentPending);
}

#[tokio::test]
async fn unknown_order_is_a_failure_outcome() {
    let harness = TestHarness::new().await;
    let coordinator = harness.coordinator(ScriptedGateway::new(vec![]));

    let outcome = coordinator
        .process_payment(Uuid::new_v4(), "credit_card", "buyer@example.com")
        .await
        .unwrap();

    assert_matches!(outcome, PaymentOutcome::Failure { ref message } if message.contains("not found"));
}

#[tokio::test]
async fn queued_request_amount_tracks_order_total() {
    let harness = TestHarness::new().await;
    let cases = [
        (dec!(0.00), vec![(dec!(9.99), 1)], dec!(9.99)),
        (dec!(12.34), vec![(dec!(10.00), 3)], dec!(42.34)),
        (
            dec!(25.00),
            vec![(dec!(62.50), 2), (dec!(1.00), 5)],
            dec!(155.00),
        ),
    ];

    for (shipping, items, expected_total) in cases {
        let order = harness.seed_order(shipping, &items).await;
        let coordinator = harness.coordinator(ScriptedGateway::new(vec![declined("card refused")]));

        let outcome = coordinator
            .process_payment(order.order.id, "credit_card", "buyer@example.com")
            .await
            .unwrap();
        let PaymentOutcome::Pending {
            payment_request_id, ..
        } = outcome
        else {
            panic!("expected pending outcome");
        };

        let request = coordinator
            .payment_status(payment_request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.amount, expected_total);
        assert_eq!(request.amount, order.total());
    }
}

#[tokio::test]
async fn publish_failure_after_durable_create_is_swallowed() {
    let harness = TestHarness::new().await;
    let order = harness.seed_order(dec!(5.00), &[(dec!(15.00), 1)]).await;
    harness.channel.set_connected(false);
    harness.channel.set_reconnect_allowed(false);
    let coordinator = harness.coordinator(ScriptedGateway::new(vec![declined("card refused")]));

    let outcome = coordinator
        .process_payment(order.order.id, "credit_card", "buyer@example.com")
        .await
        .unwrap();
    let PaymentOutcome::Pending {
        payment_request_id, ..
    } = outcome
    else {
        panic!("expected pending outcome despite publish failure");
    };

    // The durable record survives; the queue stayed empty.
    let request = coordinator
        .payment_status(payment_request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.status, PaymentRequestStatus::Pending);
    assert_eq!(
        harness
            .channel
            .queue_len(PAYMENT_REQUESTS_QUEUE)
            .await
            .unwrap(),
        0
    );
    let order_now = harness.order_service().get_order(order.order.id).await.unwrap().unwrap();
    assert_eq!(order_now.order.status, OrderStatus::PaymentPending);
}

#[tokio::test]
async fn second_attempt_rejoins_active_request() {
    let harness = TestHarness::new().await;
    let order = harness.seed_order(dec!(0.00), &[(dec!(80.00), 1)]).await;
    let coordinator =
        harness.coordinator(ScriptedGateway::new(vec![declined("card refused"), declined("card refused")]));

    let first = coordinator
        .process_payment(order.order.id, "credit_card", "buyer@example.com")
        .await
        .unwrap();
    let PaymentOutcome::Pending {
        payment_request_id: first_id,
        ..
    } = first
    else {
        panic!("expected pending outcome");
    };

    let second = coordinator
        .process_payment(order.order.id, "credit_card", "buyer@example.com")
        .await
        .unwrap();
    let PaymentOutcome::Pending {
        payment_request_id: second_id,
        ..
    } = second
    else {
        panic!("expected pending outcome");
    };

    assert_eq!(first_id, second_id);
    assert_eq!(coordinator.list_pending_requests().await.unwrap().len(), 1);
    assert_eq!(
        harness
            .channel
            .queue_len(PAYMENT_REQUESTS_QUEUE)
            .await
            .unwrap(),
        1
    );
}
