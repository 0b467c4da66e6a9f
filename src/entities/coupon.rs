use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Discount coupon entity.
///
/// `code` is stored uppercase and unique. Eligibility restrictions
/// (`applicable_*`, `excluded_products`, `allowed_customers`) are JSON arrays;
/// an absent or empty array means "no restriction".
///
/// Invariants enforced at the service layer: percentage `discount_value` <= 100,
/// `valid_to` > `valid_from`, `used_count` never exceeds `usage_limit`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub max_discount_amount: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub min_order_amount: Decimal,
    #[sea_orm(nullable)]
    pub usage_limit: Option<i32>,
    #[sea_orm(nullable)]
    pub per_user_limit: Option<i32>,
    pub used_count: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub is_active: bool,
    pub is_public: bool,
    pub first_order_only: bool,
    #[sea_orm(column_type = "Json", nullable)]
    pub applicable_categories: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub applicable_products: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub excluded_products: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub allowed_customers: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_redemption::Entity")]
    Redemptions,
}

impl Related<super::coupon_redemption::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Redemptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Coupon discount type enumeration. String values are wire contract.
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
pub enum DiscountType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed")]
    Fixed,
    #[sea_orm(string_value = "free_shipping")]
    FreeShipping,
    #[sea_orm(string_value = "bogo")]
    Bogo,
}

impl Model {
    /// Decodes a JSON restriction column into a string list.
    /// Missing or malformed columns read as "unrestricted".
    pub fn string_list(value: &Option<Json>) -> Vec<String> {
        value
            .as_ref()
            .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Decodes a JSON restriction column into a Uuid list.
    pub fn uuid_list(value: &Option<Json>) -> Vec<Uuid> {
        value
            .as_ref()
            .and_then(|v| serde_json::from_value::<Vec<Uuid>>(v.clone()).ok())
            .unwrap_or_default()
    }
}
