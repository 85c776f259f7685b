use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retries stop once a request has failed this many times.
pub const MAX_RETRIES: i32 = 3;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentRequestStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Durable record of one queued attempt to settle an order's payment.
/// Requests are kept forever as an audit trail; terminal failures stay in
/// `Failed` for manual remediation.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub customer_email: String,
    pub status: PaymentRequestStatus,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub external_payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Builds a new pending request. The caller validates that `amount`
    /// equals the order total and is positive before persisting.
    pub fn new(
        order_id: Uuid,
        amount: Decimal,
        currency: &str,
        payment_method: &str,
        customer_email: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            amount,
            currency: currency.to_string(),
            payment_method: payment_method.to_string(),
            customer_email: customer_email.to_string(),
            status: PaymentRequestStatus::Pending,
            retry_count: 0,
            error_message: None,
            external_payment_id: None,
            created_at: now,
            processed_at: None,
            updated_at: Some(now),
            version: 1,
        }
    }

    pub fn mark_as_processing(&mut self) {
        self.status = PaymentRequestStatus::Processing;
    }

    pub fn mark_as_completed(&mut self, external_payment_id: Option<String>) {
        self.status = PaymentRequestStatus::Completed;
        self.external_payment_id = external_payment_id;
        self.processed_at = Some(Utc::now());
    }

    /// Records the failure reason and counts the attempt. Each call
    /// increments `retry_count` exactly once.
    pub fn mark_as_failed(&mut self, error_message: &str) {
        self.status = PaymentRequestStatus::Failed;
        self.error_message = Some(error_message.to_string());
        self.retry_count += 1;
    }

    /// Terminal; a cancelled request is never retried.
    pub fn mark_as_cancelled(&mut self) {
        self.status = PaymentRequestStatus::Cancelled;
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < MAX_RETRIES && self.status == PaymentRequestStatus::Failed
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            PaymentRequestStatus::Pending | PaymentRequestStatus::Processing
        )
    }
}
