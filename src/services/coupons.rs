use crate::{
    entities::{
        coupon::{self, DiscountType},
        coupon_redemption,
        order::{self, OrderStatus},
        Coupon, CouponRedemption, Order,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, Statement,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Coupon evaluation and redemption service.
///
/// Validation is side-effect free and returns a [`CouponValidation`] result
/// object; business-rule failures are values, not errors, so callers can
/// render a user-facing message without a catch block. Usage is recorded
/// separately via [`CouponService::record_usage`], only after the order
/// exists, so repeated cart checks never double-count.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// Everything the evaluator needs to know about the requesting cart and user.
#[derive(Debug, Clone)]
pub struct RedemptionContext {
    pub customer_id: Uuid,
    pub cart_total: Decimal,
    pub product_ids: Vec<Uuid>,
    pub categories: Vec<String>,
    /// How many times this customer has already redeemed this coupon.
    pub user_redemptions: u64,
    /// Non-cancelled orders this customer has placed before.
    pub prior_orders: u64,
    pub now: DateTime<Utc>,
}

/// Outcome of coupon validation. Wire contract:
/// `{valid, discount?, free_shipping?, coupon?, error?}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CouponValidation {
    pub valid: bool,
    pub discount: Decimal,
    pub free_shipping: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub coupon: Option<coupon::Model>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CouponValidation {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            discount: Decimal::ZERO,
            free_shipping: false,
            coupon: None,
            error: Some(reason.into()),
        }
    }

    fn accepted(coupon: coupon::Model, discount: Decimal) -> Self {
        let free_shipping = coupon.discount_type == DiscountType::FreeShipping;
        Self {
            valid: true,
            discount,
            free_shipping,
            coupon: Some(coupon),
            error: None,
        }
    }
}

/// Computes the discount for an already-eligible coupon.
///
/// percentage => cart_total * value / 100; fixed => min(value, cart_total);
/// free_shipping => 0 (the waiver is the caller's concern); bogo => half the
/// cart total. The raw amount is rounded to the nearest whole currency unit,
/// then capped at max_discount_amount, and never exceeds the cart total.
pub fn compute_discount(coupon: &coupon::Model, cart_total: Decimal) -> Decimal {
    let raw = match coupon.discount_type {
        DiscountType::Percentage => cart_total * coupon.discount_value / Decimal::from(100),
        DiscountType::Fixed => coupon.discount_value,
        DiscountType::FreeShipping => return Decimal::ZERO,
        DiscountType::Bogo => cart_total / Decimal::from(2),
    };

    let rounded = raw.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

    let capped = match coupon.max_discount_amount {
        Some(max) => rounded.min(max),
        None => rounded,
    };

    capped.clamp(Decimal::ZERO, cart_total)
}

/// Validates a coupon against a redemption context.
///
/// Checks run in order and short-circuit on the first failure. The check
/// order is part of the contract: callers rely on the most specific reason
/// being reported (e.g. "expired" before "minimum order").
pub fn evaluate(coupon: &coupon::Model, ctx: &RedemptionContext) -> CouponValidation {
    if !coupon.is_active {
        return CouponValidation::rejected("This coupon is no longer active");
    }
    if ctx.now < coupon.valid_from {
        return CouponValidation::rejected("This coupon is not valid yet");
    }
    if ctx.now > coupon.valid_to {
        return CouponValidation::rejected("This coupon has expired");
    }
    if let Some(limit) = coupon.usage_limit {
        if coupon.used_count >= limit {
            return CouponValidation::rejected("This coupon has reached its usage limit");
        }
    }
    if let Some(per_user) = coupon.per_user_limit {
        if ctx.user_redemptions >= per_user as u64 {
            return CouponValidation::rejected(
                "You have already used this coupon the maximum number of times",
            );
        }
    }
    if ctx.cart_total < coupon.min_order_amount {
        return CouponValidation::rejected(format!(
            "Minimum order amount of {} required",
            coupon.min_order_amount
        ));
    }
    if coupon.first_order_only && ctx.prior_orders > 0 {
        return CouponValidation::rejected("This coupon is only valid on your first order");
    }

    let allowed_customers = coupon::Model::uuid_list(&coupon.allowed_customers);
    if !allowed_customers.is_empty() && !allowed_customers.contains(&ctx.customer_id) {
        return CouponValidation::rejected("This coupon is not available for your account");
    }

    let applicable_products = coupon::Model::uuid_list(&coupon.applicable_products);
    if !applicable_products.is_empty()
        && !ctx.product_ids.iter().any(|p| applicable_products.contains(p))
    {
        return CouponValidation::rejected("This coupon does not apply to the items in your cart");
    }

    let excluded_products = coupon::Model::uuid_list(&coupon.excluded_products);
    if !excluded_products.is_empty()
        && ctx.product_ids.iter().all(|p| excluded_products.contains(p))
    {
        return CouponValidation::rejected("This coupon does not apply to the items in your cart");
    }

    // ANY-match semantics: one matching cart category is enough.
    let applicable_categories = coupon::Model::string_list(&coupon.applicable_categories);
    if !applicable_categories.is_empty()
        && !ctx
            .categories
            .iter()
            .any(|c| applicable_categories.iter().any(|a| a.eq_ignore_ascii_case(c)))
    {
        return CouponValidation::rejected(
            "This coupon does not apply to the categories in your cart",
        );
    }

    let discount = compute_discount(coupon, ctx.cart_total);
    CouponValidation::accepted(coupon.clone(), discount)
}

/// Guarded `used_count` increment. Affects zero rows when the usage limit
/// is already exhausted, so concurrent redeemers cannot both succeed.
fn increment_usage_statement(
    backend: DatabaseBackend,
    coupon_id: Uuid,
    now: DateTime<Utc>,
) -> Statement {
    let sql = match backend {
        DatabaseBackend::Postgres => {
            "UPDATE coupons SET used_count = used_count + 1, updated_at = $1 \
             WHERE id = $2 AND (usage_limit IS NULL OR used_count < usage_limit)"
        }
        _ => {
            "UPDATE coupons SET used_count = used_count + 1, updated_at = ? \
             WHERE id = ? AND (usage_limit IS NULL OR used_count < usage_limit)"
        }
    };
    Statement::from_sql_and_values(backend, sql, [now.into(), coupon_id.into()])
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Validates a code against a cart context.
    ///
    /// Loads the coupon plus this customer's redemption and order counts, then
    /// delegates to the pure [`evaluate`] function. An unknown code yields
    /// `{valid: false}`, not an error.
    #[instrument(skip(self, product_ids, categories), fields(code = %code, customer_id = %customer_id))]
    pub async fn validate(
        &self,
        code: &str,
        customer_id: Uuid,
        cart_total: Decimal,
        product_ids: Vec<Uuid>,
        categories: Vec<String>,
    ) -> Result<CouponValidation, ServiceError> {
        let normalized = code.trim().to_uppercase();

        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(normalized.clone()))
            .one(&*self.db)
            .await?;

        let Some(coupon) = coupon else {
            return Ok(CouponValidation::rejected("Invalid coupon code"));
        };

        let user_redemptions = CouponRedemption::find()
            .filter(coupon_redemption::Column::CouponId.eq(coupon.id))
            .filter(coupon_redemption::Column::CustomerId.eq(customer_id))
            .count(&*self.db)
            .await?;

        let prior_orders = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::Status.ne(OrderStatus::Cancelled))
            .count(&*self.db)
            .await?;

        let ctx = RedemptionContext {
            customer_id,
            cart_total,
            product_ids,
            categories,
            user_redemptions,
            prior_orders,
            now: Utc::now(),
        };

        Ok(evaluate(&coupon, &ctx))
    }

    /// Records a redemption: bumps `used_count` and appends a usage-history
    /// row. Must be called inside the checkout transaction, after the order
    /// row exists, never at validation time.
    pub async fn record_usage(
        &self,
        conn: &impl ConnectionTrait,
        coupon_id: Uuid,
        customer_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
    ) -> Result<(), ServiceError> {
        let coupon = Coupon::find_by_id(coupon_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))?;

        // Conditional increment in a single statement: used_count must never
        // exceed usage_limit, even when two checkouts validated the same
        // coupon concurrently.
        let result = conn
            .execute(increment_usage_statement(
                conn.get_database_backend(),
                coupon_id,
                Utc::now(),
            ))
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::Conflict(format!(
                "Coupon {} usage limit exhausted",
                coupon.code
            )));
        }

        let redemption = coupon_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon_id),
            customer_id: Set(customer_id),
            order_id: Set(order_id),
            amount: Set(amount),
            redeemed_at: Set(Utc::now()),
        };
        redemption.insert(conn).await?;

        self.event_sender
            .send_or_log(Event::CouponRedeemed {
                coupon_id,
                order_id,
                amount,
            })
            .await;

        Ok(())
    }

    /// Creates a coupon, enforcing the model invariants.
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(
        &self,
        input: CreateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        input.validate()?;

        let code = input.code.trim().to_uppercase();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
            return Err(ServiceError::ValidationError(
                "Coupon code must be uppercase alphanumeric".to_string(),
            ));
        }
        if input.valid_to <= input.valid_from {
            return Err(ServiceError::ValidationError(
                "Coupon validity window must end after it starts".to_string(),
            ));
        }
        if input.discount_type == DiscountType::Percentage
            && input.discount_value > Decimal::from(100)
        {
            return Err(ServiceError::ValidationError(
                "Percentage discount cannot exceed 100".to_string(),
            ));
        }
        if input.discount_value < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Discount value cannot be negative".to_string(),
            ));
        }

        let existing = Coupon::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let coupon_id = Uuid::new_v4();
        let now = Utc::now();
        let model = coupon::ActiveModel {
            id: Set(coupon_id),
            code: Set(code.clone()),
            description: Set(input.description),
            discount_type: Set(input.discount_type),
            discount_value: Set(input.discount_value),
            max_discount_amount: Set(input.max_discount_amount),
            min_order_amount: Set(input.min_order_amount.unwrap_or(Decimal::ZERO)),
            usage_limit: Set(input.usage_limit),
            per_user_limit: Set(input.per_user_limit),
            used_count: Set(0),
            valid_from: Set(input.valid_from),
            valid_to: Set(input.valid_to),
            is_active: Set(true),
            is_public: Set(input.is_public.unwrap_or(true)),
            first_order_only: Set(input.first_order_only.unwrap_or(false)),
            applicable_categories: Set(input
                .applicable_categories
                .map(|v| serde_json::json!(v))),
            applicable_products: Set(input.applicable_products.map(|v| serde_json::json!(v))),
            excluded_products: Set(input.excluded_products.map(|v| serde_json::json!(v))),
            allowed_customers: Set(input.allowed_customers.map(|v| serde_json::json!(v))),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = model.insert(&*self.db).await?;
        self.event_sender
            .send_or_log(Event::CouponCreated(coupon_id))
            .await;

        info!("Created coupon {}", code);
        Ok(created)
    }

    pub async fn get_by_code(&self, code: &str) -> Result<coupon::Model, ServiceError> {
        let normalized = code.trim().to_uppercase();
        Coupon::find()
            .filter(coupon::Column::Code.eq(normalized.clone()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", normalized)))
    }

    /// Lists coupons, newest first, with pagination.
    pub async fn list_coupons(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<coupon::Model>, u64), ServiceError> {
        let paginator = Coupon::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((data, total))
    }

    /// Deactivates a coupon so further validations reject it. Usage history
    /// is retained.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, code: &str) -> Result<coupon::Model, ServiceError> {
        let coupon = self.get_by_code(code).await?;
        let coupon_id = coupon.id;

        let mut active: coupon::ActiveModel = coupon.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CouponDeactivated(coupon_id))
            .await;
        Ok(updated)
    }
}

/// Input for creating a coupon
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCouponInput {
    #[validate(length(min = 3, max = 24))]
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub per_user_limit: Option<i32>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub is_public: Option<bool>,
    pub first_order_only: Option<bool>,
    pub applicable_categories: Option<Vec<String>>,
    pub applicable_products: Option<Vec<Uuid>>,
    pub excluded_products: Option<Vec<Uuid>>,
    pub allowed_customers: Option<Vec<Uuid>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon_with(discount_type: DiscountType, value: Decimal) -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".to_string(),
            description: None,
            discount_type,
            discount_value: value,
            max_discount_amount: None,
            min_order_amount: dec!(300),
            usage_limit: None,
            per_user_limit: None,
            used_count: 0,
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(30),
            is_active: true,
            is_public: true,
            first_order_only: false,
            applicable_categories: None,
            applicable_products: None,
            excluded_products: None,
            allowed_customers: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn ctx_with_total(total: Decimal) -> RedemptionContext {
        RedemptionContext {
            customer_id: Uuid::new_v4(),
            cart_total: total,
            product_ids: vec![Uuid::new_v4()],
            categories: vec!["apparel".to_string()],
            user_redemptions: 0,
            prior_orders: 2,
            now: Utc::now(),
        }
    }

    #[test]
    fn percentage_discount_on_example_cart() {
        // SAVE10: 10% off a 500 cart with min order 300 and no cap => 50.
        let coupon = coupon_with(DiscountType::Percentage, dec!(10));
        let result = evaluate(&coupon, &ctx_with_total(dec!(500)));
        assert!(result.valid);
        assert_eq!(result.discount, dec!(50));
        assert!(!result.free_shipping);
    }

    #[test]
    fn percentage_discount_respects_cap() {
        let mut coupon = coupon_with(DiscountType::Percentage, dec!(50));
        coupon.max_discount_amount = Some(dec!(100));
        let result = evaluate(&coupon, &ctx_with_total(dec!(1000)));
        assert!(result.valid);
        assert_eq!(result.discount, dec!(100));
    }

    #[test]
    fn percentage_discount_rounds_to_whole_unit() {
        let coupon = coupon_with(DiscountType::Percentage, dec!(10));
        // 10% of 305 = 30.5, rounds away from zero to 31.
        assert_eq!(compute_discount(&coupon, dec!(305)), dec!(31));
    }

    #[test]
    fn fixed_discount_never_exceeds_cart_total() {
        let mut coupon = coupon_with(DiscountType::Fixed, dec!(800));
        coupon.min_order_amount = Decimal::ZERO;
        let result = evaluate(&coupon, &ctx_with_total(dec!(400)));
        assert!(result.valid);
        assert_eq!(result.discount, dec!(400));
    }

    #[test]
    fn free_shipping_coupon_sets_flag_with_zero_discount() {
        let coupon = coupon_with(DiscountType::FreeShipping, Decimal::ZERO);
        let result = evaluate(&coupon, &ctx_with_total(dec!(500)));
        assert!(result.valid);
        assert_eq!(result.discount, Decimal::ZERO);
        assert!(result.free_shipping);
    }

    #[test]
    fn inactive_coupon_rejected() {
        let mut coupon = coupon_with(DiscountType::Percentage, dec!(10));
        coupon.is_active = false;
        let result = evaluate(&coupon, &ctx_with_total(dec!(500)));
        assert!(!result.valid);
        assert_eq!(result.error.as_deref(), Some("This coupon is no longer active"));
    }

    #[test]
    fn expired_coupon_always_rejected() {
        let mut coupon = coupon_with(DiscountType::Percentage, dec!(10));
        coupon.valid_to = Utc::now() - Duration::days(1);
        let result = evaluate(&coupon, &ctx_with_total(dec!(5000)));
        assert!(!result.valid);
        assert_eq!(result.error.as_deref(), Some("This coupon has expired"));
    }

    #[test]
    fn not_yet_valid_coupon_rejected() {
        let mut coupon = coupon_with(DiscountType::Percentage, dec!(10));
        coupon.valid_from = Utc::now() + Duration::days(1);
        let result = evaluate(&coupon, &ctx_with_total(dec!(500)));
        assert!(!result.valid);
    }

    #[test]
    fn exhausted_usage_limit_rejected() {
        let mut coupon = coupon_with(DiscountType::Percentage, dec!(10));
        coupon.usage_limit = Some(100);
        coupon.used_count = 100;
        let result = evaluate(&coupon, &ctx_with_total(dec!(500)));
        assert!(!result.valid);
        assert_eq!(
            result.error.as_deref(),
            Some("This coupon has reached its usage limit")
        );
    }

    #[test]
    fn per_user_limit_rejected() {
        let mut coupon = coupon_with(DiscountType::Percentage, dec!(10));
        coupon.per_user_limit = Some(1);
        let mut ctx = ctx_with_total(dec!(500));
        ctx.user_redemptions = 1;
        let result = evaluate(&coupon, &ctx);
        assert!(!result.valid);
    }

    #[test]
    fn below_minimum_order_rejected() {
        let coupon = coupon_with(DiscountType::Percentage, dec!(10));
        let result = evaluate(&coupon, &ctx_with_total(dec!(299)));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("Minimum order amount"));
    }

    #[test]
    fn first_order_only_rejects_repeat_customers() {
        let mut coupon = coupon_with(DiscountType::Percentage, dec!(10));
        coupon.first_order_only = true;
        let result = evaluate(&coupon, &ctx_with_total(dec!(500)));
        assert!(!result.valid);

        let mut ctx = ctx_with_total(dec!(500));
        ctx.prior_orders = 0;
        assert!(evaluate(&coupon, &ctx).valid);
    }

    #[test]
    fn customer_allow_list_enforced() {
        let vip = Uuid::new_v4();
        let mut coupon = coupon_with(DiscountType::Percentage, dec!(10));
        coupon.allowed_customers = Some(serde_json::json!(vec![vip]));

        let mut ctx = ctx_with_total(dec!(500));
        assert!(!evaluate(&coupon, &ctx).valid);

        ctx.customer_id = vip;
        assert!(evaluate(&coupon, &ctx).valid);
    }

    #[test]
    fn category_restriction_matches_any() {
        let mut coupon = coupon_with(DiscountType::Percentage, dec!(10));
        coupon.applicable_categories =
            Some(serde_json::json!(vec!["footwear".to_string(), "apparel".to_string()]));

        // Cart has one apparel item: ANY-match passes.
        let ctx = ctx_with_total(dec!(500));
        assert!(evaluate(&coupon, &ctx).valid);

        let mut ctx = ctx_with_total(dec!(500));
        ctx.categories = vec!["electronics".to_string()];
        assert!(!evaluate(&coupon, &ctx).valid);
    }

    #[test]
    fn product_restriction_matches_any() {
        let eligible = Uuid::new_v4();
        let mut coupon = coupon_with(DiscountType::Percentage, dec!(10));
        coupon.applicable_products = Some(serde_json::json!(vec![eligible]));

        let mut ctx = ctx_with_total(dec!(500));
        assert!(!evaluate(&coupon, &ctx).valid);

        ctx.product_ids.push(eligible);
        assert!(evaluate(&coupon, &ctx).valid);
    }

    #[test]
    fn fully_excluded_cart_rejected() {
        let excluded = Uuid::new_v4();
        let mut coupon = coupon_with(DiscountType::Percentage, dec!(10));
        coupon.excluded_products = Some(serde_json::json!(vec![excluded]));

        let mut ctx = ctx_with_total(dec!(500));
        ctx.product_ids = vec![excluded];
        assert!(!evaluate(&coupon, &ctx).valid);

        ctx.product_ids.push(Uuid::new_v4());
        assert!(evaluate(&coupon, &ctx).valid);
    }

    #[test]
    fn bogo_discounts_half_the_cart() {
        let mut coupon = coupon_with(DiscountType::Bogo, Decimal::ZERO);
        coupon.min_order_amount = Decimal::ZERO;
        assert_eq!(compute_discount(&coupon, dec!(400)), dec!(200));
    }

    #[test]
    fn fractional_cap_binds_after_rounding() {
        // 100% of 199 rounds to 199; the 99.5 cap must still win.
        let mut coupon = coupon_with(DiscountType::Percentage, dec!(100));
        coupon.min_order_amount = Decimal::ZERO;
        coupon.max_discount_amount = Some(dec!(99.5));
        assert_eq!(compute_discount(&coupon, dec!(199)), dec!(99.5));
    }

    #[test]
    fn usage_increment_is_guarded_by_limit() {
        let coupon_id = Uuid::new_v4();
        for backend in [DatabaseBackend::Postgres, DatabaseBackend::Sqlite] {
            let stmt = increment_usage_statement(backend, coupon_id, Utc::now());
            assert!(stmt.sql.contains("used_count = used_count + 1"));
            assert!(stmt.sql.contains("usage_limit IS NULL"));
            assert!(stmt.sql.contains("used_count < usage_limit"));
        }
    }

    #[test]
    fn discount_never_exceeds_cart_total() {
        let mut coupon = coupon_with(DiscountType::Fixed, dec!(10000));
        coupon.min_order_amount = Decimal::ZERO;
        assert_eq!(compute_discount(&coupon, dec!(120)), dec!(120));
    }
}
