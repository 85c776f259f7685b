//! Property tests for the payment-request counters and the derived order
//! totals.

use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use ecommerce_payments::entities::order::{self, OrderStatus, OrderWithItems};
use ecommerce_payments::entities::order_item;
use ecommerce_payments::entities::payment_request::{self, PaymentRequestStatus, MAX_RETRIES};

fn fresh_request() -> payment_request::Model {
    payment_request::Model::new(
        Uuid::new_v4(),
        Decimal::new(15_000, 2),
        "USD",
        "credit_card",
        "buyer@example.com",
    )
}

fn aggregate(shipping_cents: i64, items: &[(i64, i32)]) -> OrderWithItems {
    let order_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    OrderWithItems {
        order: order::Model {
            id: order_id,
            customer_id: Uuid::new_v4(),
            customer_email: "buyer@example.com".to_string(),
            currency: "USD".to_string(),
            shipping_cost: Decimal::new(shipping_cents, 2),
            shipping_address: None,
            shipping_service: None,
            shipping_days: None,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: Some(now),
            version: 1,
        },
        items: items
            .iter()
            .map(|(unit_cents, quantity)| order_item::Model {
                id: Uuid::new_v4(),
                order_id,
                product_id: Uuid::new_v4(),
                product_name: "widget".to_string(),
                unit_price: Decimal::new(*unit_cents, 2),
                quantity: *quantity,
            })
            .collect(),
    }
}

proptest! {
    /// N failures bump the counter by exactly N; retry eligibility flips
    /// off exactly when the counter reaches the cap.
    #[test]
    fn retry_count_increments_exactly_once_per_failure(failures in 1usize..10) {
        let mut request = fresh_request();
        for n in 1..=failures {
            request.mark_as_failed("declined");
            prop_assert_eq!(request.retry_count as usize, n);
            prop_assert_eq!(request.status, PaymentRequestStatus::Failed);
            prop_assert_eq!(request.can_retry(), n < MAX_RETRIES as usize);
        }
    }

    /// Leaving the Failed state disables retry regardless of the counter.
    #[test]
    fn can_retry_requires_failed_status(failures in 1usize..3) {
        let mut request = fresh_request();
        for _ in 0..failures {
            request.mark_as_failed("declined");
        }
        prop_assert!(request.can_retry());

        let mut processing = request.clone();
        processing.mark_as_processing();
        prop_assert!(!processing.can_retry());

        let mut cancelled = request.clone();
        cancelled.mark_as_cancelled();
        prop_assert!(!cancelled.can_retry());

        let mut completed = request;
        completed.mark_as_completed(Some("TX1".to_string()));
        prop_assert!(!completed.can_retry());
    }

    /// total == sum(unit price x quantity) + shipping, for any item mix.
    #[test]
    fn order_total_is_conserved(
        items in prop::collection::vec((1i64..100_000, 1i32..5), 1..6),
        shipping_cents in 0i64..50_000,
    ) {
        let aggregate = aggregate(shipping_cents, &items);

        let expected_cents: i64 = items
            .iter()
            .map(|(unit_cents, quantity)| unit_cents * i64::from(*quantity))
            .sum::<i64>()
            + shipping_cents;

        prop_assert_eq!(aggregate.total(), Decimal::new(expected_cents, 2));
        prop_assert_eq!(
            aggregate.subtotal() + aggregate.order.shipping_cost,
            aggregate.total()
        );
    }
}
