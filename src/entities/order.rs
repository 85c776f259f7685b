use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment-related order lifecycle. `Shipped` and `Delivered` belong to the
/// fulfillment flow and are never set by this subsystem.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "payment_pending")]
    PaymentPending,
    #[sea_orm(string_value = "payment_processing")]
    PaymentProcessing,
    #[sea_orm(string_value = "payment_failed")]
    PaymentFailed,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "canceled")]
    Canceled,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_id: Uuid,
    pub customer_email: String,
    pub currency: String,
    pub shipping_cost: Decimal,
    pub shipping_address: Option<String>,
    pub shipping_service: Option<String>,
    pub shipping_days: Option<i32>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Transitions are one-way setters; callers are responsible for invoking
    /// them in a valid order. Re-applying a transition is an overwrite-safe
    /// no-op, which message redelivery relies on.
    pub fn confirm(&mut self) {
        self.status = OrderStatus::Confirmed;
    }

    pub fn cancel(&mut self) {
        self.status = OrderStatus::Canceled;
    }

    pub fn mark_payment_pending(&mut self) {
        self.status = OrderStatus::PaymentPending;
    }

    pub fn mark_payment_processing(&mut self) {
        self.status = OrderStatus::PaymentProcessing;
    }

    pub fn mark_payment_failed(&mut self) {
        self.status = OrderStatus::PaymentFailed;
    }
}

/// Order aggregate as loaded from the store: the order row plus its
/// append-only item rows. Subtotal and total are always derived from the
/// items, never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWithItems {
    pub order: Model,
    pub items: Vec<super::order_item::Model>,
}

impl OrderWithItems {
    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(|item| item.total()).sum()
    }

    pub fn total(&self) -> Decimal {
        self.subtotal() + self.order.shipping_cost
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}
