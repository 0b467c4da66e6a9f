use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Order entity.
///
/// An order is immutable at creation apart from its status machine: every
/// mutation goes through a status-transition operation that appends to
/// `order_status_history`. There is no hard deletion.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub tax_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_total: Decimal,
    #[sea_orm(nullable)]
    pub coupon_code: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub coupon_discount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total: Decimal,
    pub currency: String,
    pub payment_status: PaymentStatus,
    #[sea_orm(nullable)]
    pub payment_method: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub shipping_address: Json,
    #[sea_orm(column_type = "Json")]
    pub billing_address: Json,
    #[sea_orm(nullable)]
    pub tracking_number: Option<String>,
    #[sea_orm(nullable)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub cancellation_reason: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub refund_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    StatusHistory,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order status state machine. String values are wire contract.
///
/// Happy path: pending -> confirmed -> processing -> shipped ->
/// out_for_delivery -> delivered. `cancelled` and `returned` are side exits
/// guarded by [`OrderStatus::can_cancel`] and [`Model::can_return`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "out_for_delivery")]
    OutForDelivery,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "returned")]
    Returned,
}

impl OrderStatus {
    /// Cancellation is only permitted before fulfilment has started.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    /// Terminal states accept no further happy-path transitions
    /// (a delivered order may still be returned within the window).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Returned
        )
    }
}

/// Payment status enumeration. String values are wire contract.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "partially_refunded")]
    PartiallyRefunded,
}

impl Model {
    /// A return may be filed only for a delivered order, within
    /// `return_window_days` of the delivery timestamp.
    pub fn can_return(&self, now: DateTime<Utc>, return_window_days: i64) -> bool {
        if self.status != OrderStatus::Delivered {
            return false;
        }
        match self.delivered_at {
            Some(delivered_at) => now - delivered_at <= Duration::days(return_window_days),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn order_with(status: OrderStatus, delivered_at: Option<DateTime<Utc>>) -> Model {
        Model {
            id: Uuid::new_v4(),
            order_number: "BKC20240300001".to_string(),
            customer_id: Uuid::new_v4(),
            status,
            subtotal: dec!(500),
            shipping_total: dec!(49),
            tax_total: Decimal::ZERO,
            discount_total: Decimal::ZERO,
            coupon_code: None,
            coupon_discount: Decimal::ZERO,
            total: dec!(549),
            currency: "INR".to_string(),
            payment_status: PaymentStatus::Pending,
            payment_method: Some("cod".to_string()),
            shipping_address: serde_json::json!({}),
            billing_address: serde_json::json!({}),
            tracking_number: None,
            delivered_at,
            cancelled_at: None,
            cancellation_reason: None,
            refund_amount: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test_case(OrderStatus::Pending => true)]
    #[test_case(OrderStatus::Confirmed => true)]
    #[test_case(OrderStatus::Processing => false)]
    #[test_case(OrderStatus::Shipped => false)]
    #[test_case(OrderStatus::OutForDelivery => false)]
    #[test_case(OrderStatus::Delivered => false)]
    #[test_case(OrderStatus::Cancelled => false)]
    #[test_case(OrderStatus::Returned => false)]
    fn cancellation_guard(status: OrderStatus) -> bool {
        status.can_cancel()
    }

    #[test]
    fn return_allowed_within_window() {
        let delivered = Utc::now() - Duration::days(3);
        let order = order_with(OrderStatus::Delivered, Some(delivered));
        assert!(order.can_return(Utc::now(), 7));
    }

    #[test]
    fn return_rejected_after_window() {
        let delivered = Utc::now() - Duration::days(8);
        let order = order_with(OrderStatus::Delivered, Some(delivered));
        assert!(!order.can_return(Utc::now(), 7));
    }

    #[test]
    fn return_rejected_when_not_delivered() {
        let order = order_with(OrderStatus::Shipped, None);
        assert!(!order.can_return(Utc::now(), 7));
    }

    #[test]
    fn status_serializes_to_snake_case() {
        let json = serde_json::to_string(&OrderStatus::OutForDelivery).unwrap();
        assert_eq!(json, "\"out_for_delivery\"");
        let payment: PaymentStatus = serde_json::from_str("\"partially_refunded\"").unwrap();
        assert_eq!(payment, PaymentStatus::PartiallyRefunded);
    }
}
