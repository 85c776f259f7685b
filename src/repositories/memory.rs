//! In-memory store implementations for tests and local development.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use super::{OrderRepository, PaymentRequestRepository};
use crate::entities::order::OrderWithItems;
use crate::entities::payment_request::{PaymentRequestStatus, MAX_RETRIES};
use crate::entities::{order, order_item, payment_request};
use crate::errors::ServiceError;

#[derive(Default)]
pub struct InMemoryOrderRepository {
    inner: Mutex<HashMap<Uuid, OrderWithItems>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<OrderWithItems>, ServiceError> {
        Ok(self.inner.lock().unwrap().get(&id).cloned())
    }

    async fn insert(
        &self,
        order: order::Model,
        items: Vec<order_item::Model>,
    ) -> Result<OrderWithItems, ServiceError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(&order.id) {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} already exists",
                order.id
            )));
        }
        let aggregate = OrderWithItems { order, items };
        inner.insert(aggregate.order.id, aggregate.clone());
        Ok(aggregate)
    }

    async fn update(&self, order: &order::Model) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock().unwrap();
        let aggregate = inner
            .get_mut(&order.id)
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order.id)))?;
        let mut updated = order.clone();
        updated.updated_at = Some(Utc::now());
        updated.version = order.version + 1;
        aggregate.order = updated;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPaymentRequestRepository {
    inner: Mutex<HashMap<Uuid, payment_request::Model>>,
}

impl InMemoryPaymentRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRequestRepository for InMemoryPaymentRequestRepository {
    async fn create(
        &self,
        request: payment_request::Model,
    ) -> Result<payment_request::Model, ServiceError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(&request.id) {
            return Err(ServiceError::InvalidOperation(format!(
                "payment request {} already exists",
                request.id
            )));
        }
        inner.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<payment_request::Model>, ServiceError> {
        Ok(self.inner.lock().unwrap().get(&id).cloned())
    }

    async fn update(&self, request: &payment_request::Model) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock().unwrap();
        let stored = inner
            .get_mut(&request.id)
            .ok_or_else(|| ServiceError::NotFound(format!("payment request {}", request.id)))?;
        let mut updated = request.clone();
        updated.updated_at = Some(Utc::now());
        updated.version = request.version + 1;
        *stored = updated;
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<payment_request::Model>, ServiceError> {
        let inner = self.inner.lock().unwrap();
        let mut pending: Vec<_> = inner
            .values()
            .filter(|request| request.status == PaymentRequestStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|request| request.created_at);
        Ok(pending)
    }

    async fn list_failed_eligible_for_retry(
        &self,
        cooldown: Duration,
    ) -> Result<Vec<payment_request::Model>, ServiceError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::zero());
        let inner = self.inner.lock().unwrap();
        let mut eligible: Vec<_> = inner
            .values()
            .filter(|request| {
                request.status == PaymentRequestStatus::Failed
                    && request.retry_count < MAX_RETRIES
                    && request.created_at < cutoff
            })
            .cloned()
            .collect();
        eligible.sort_by_key(|request| request.created_at);
        Ok(eligible)
    }

    async fn find_active_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<payment_request::Model>, ServiceError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .values()
            .filter(|request| request.order_id == order_id && request.is_active())
            .max_by_key(|request| request.created_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(order_id: Uuid) -> payment_request::Model {
        payment_request::Model::new(order_id, dec!(10.00), "USD", "credit_card", "a@b.com")
    }

    #[tokio::test]
    async fn pending_listing_is_oldest_first() {
        let repo = InMemoryPaymentRequestRepository::new();
        let order_id = Uuid::new_v4();

        let mut first = request(order_id);
        first.created_at = Utc::now() - chrono::Duration::minutes(10);
        let second = request(order_id);
        repo.create(second.clone()).await.unwrap();
        repo.create(first.clone()).await.unwrap();

        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].id, second.id);
    }

    #[tokio::test]
    async fn retry_listing_honors_cooldown_and_cap() {
        let repo = InMemoryPaymentRequestRepository::new();
        let order_id = Uuid::new_v4();

        let mut eligible = request(order_id);
        eligible.created_at = Utc::now() - chrono::Duration::minutes(10);
        eligible.mark_as_failed("declined");
        repo.create(eligible.clone()).await.unwrap();

        let mut too_fresh = request(order_id);
        too_fresh.mark_as_failed("declined");
        repo.create(too_fresh).await.unwrap();

        let mut exhausted = request(order_id);
        exhausted.created_at = Utc::now() - chrono::Duration::minutes(10);
        for _ in 0..MAX_RETRIES {
            exhausted.mark_as_failed("declined");
        }
        repo.create(exhausted).await.unwrap();

        let listed = repo
            .list_failed_eligible_for_retry(Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, eligible.id);
    }

    #[tokio::test]
    async fn active_lookup_ignores_terminal_requests() {
        let repo = InMemoryPaymentRequestRepository::new();
        let order_id = Uuid::new_v4();

        let mut done = request(order_id);
        done.mark_as_completed(Some("TX1".to_string()));
        repo.create(done).await.unwrap();
        assert!(repo
            .find_active_for_order(order_id)
            .await
            .unwrap()
            .is_none());

        let active = request(order_id);
        repo.create(active.clone()).await.unwrap();
        let found = repo.find_active_for_order(order_id).await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(active.id));
    }
}
