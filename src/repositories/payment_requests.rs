use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use super::PaymentRequestRepository;
use crate::entities::payment_request::{
    self, Entity as PaymentRequestEntity, PaymentRequestStatus, MAX_RETRIES,
};
use crate::errors::ServiceError;

pub struct SqlPaymentRequestRepository {
    db: Arc<DatabaseConnection>,
}

impl SqlPaymentRequestRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PaymentRequestRepository for SqlPaymentRequestRepository {
    #[instrument(skip_all, fields(payment_request_id = %request.id, order_id = %request.order_id))]
    async fn create(
        &self,
        request: payment_request::Model,
    ) -> Result<payment_request::Model, ServiceError> {
        let active = payment_request::ActiveModel {
            id: Set(request.id),
            order_id: Set(request.order_id),
            amount: Set(request.amount),
            currency: Set(request.currency.clone()),
            payment_method: Set(request.payment_method.clone()),
            customer_email: Set(request.customer_email.clone()),
            status: Set(request.status),
            retry_count: Set(request.retry_count),
            error_message: Set(request.error_message.clone()),
            external_payment_id: Set(request.external_payment_id.clone()),
            created_at: Set(request.created_at),
            processed_at: Set(request.processed_at),
            updated_at: Set(request.updated_at),
            version: Set(request.version),
        };
        Ok(active.insert(&*self.db).await?)
    }

    #[instrument(skip(self), fields(payment_request_id = %id))]
    async fn get_by_id(&self, id: Uuid) -> Result<Option<payment_request::Model>, ServiceError> {
        Ok(PaymentRequestEntity::find_by_id(id).one(&*self.db).await?)
    }

    #[instrument(skip_all, fields(payment_request_id = %request.id, status = %request.status))]
    async fn update(&self, request: &payment_request::Model) -> Result<(), ServiceError> {
        let mut active: payment_request::ActiveModel = request.clone().into();
        active.status = Set(request.status);
        active.retry_count = Set(request.retry_count);
        active.error_message = Set(request.error_message.clone());
        active.external_payment_id = Set(request.external_payment_id.clone());
        active.processed_at = Set(request.processed_at);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(request.version + 1);
        active.update(&*self.db).await?;
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<payment_request::Model>, ServiceError> {
        Ok(PaymentRequestEntity::find()
            .filter(payment_request::Column::Status.eq(PaymentRequestStatus::Pending))
            .order_by_asc(payment_request::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    async fn list_failed_eligible_for_retry(
        &self,
        cooldown: Duration,
    ) -> Result<Vec<payment_request::Model>, ServiceError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(PaymentRequestEntity::find()
            .filter(payment_request::Column::Status.eq(PaymentRequestStatus::Failed))
            .filter(payment_request::Column::RetryCount.lt(MAX_RETRIES))
            .filter(payment_request::Column::CreatedAt.lt(cutoff))
            .order_by_asc(payment_request::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    async fn find_active_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<payment_request::Model>, ServiceError> {
        Ok(PaymentRequestEntity::find()
            .filter(payment_request::Column::OrderId.eq(order_id))
            .filter(payment_request::Column::Status.is_in([
                PaymentRequestStatus::Pending,
                PaymentRequestStatus::Processing,
            ]))
            .order_by_desc(payment_request::Column::CreatedAt)
            .one(&*self.db)
            .await?)
    }
}
