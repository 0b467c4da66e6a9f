//! Scenario tests covering the documented pricing and lifecycle behavior.

use assert_matches::assert_matches;
use bazaarkart_api::entities::cart_item;
use bazaarkart_api::entities::coupon::{self, DiscountType};
use bazaarkart_api::entities::order::{self, OrderStatus, PaymentStatus};
use bazaarkart_api::services::carts::{compute_totals, PricingRules};
use bazaarkart_api::services::coupons::{compute_discount, evaluate, RedemptionContext};
use bazaarkart_api::services::order_numbers::format_order_number;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rstest::rstest;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use test_case::test_case;
use uuid::Uuid;

fn save10() -> coupon::Model {
    let now = Utc::now();
    coupon::Model {
        id: Uuid::new_v4(),
        code: "SAVE10".to_string(),
        description: Some("10% off orders over 300".to_string()),
        discount_type: DiscountType::Percentage,
        discount_value: dec!(10),
        max_discount_amount: None,
        min_order_amount: dec!(300),
        usage_limit: Some(1000),
        per_user_limit: Some(3),
        used_count: 12,
        valid_from: now - Duration::days(10),
        valid_to: now + Duration::days(20),
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

fn ctx(cart_total: Decimal) -> RedemptionContext {
    RedemptionContext {
        customer_id: Uuid::new_v4(),
        cart_total,
        product_ids: vec![Uuid::new_v4()],
        categories: vec!["apparel".to_string()],
        user_redemptions: 0,
        prior_orders: 1,
        now: Utc::now(),
    }
}

fn line(unit_price: Decimal, quantity: i32, saved: bool) -> cart_item::Model {
    let now = Utc::now();
    cart_item::Model {
        id: Uuid::new_v4(),
        cart_id: Uuid::new_v4(),
        product_id: Uuid::new_v4(),
        product_name: "Cotton Kurta".to_string(),
        quantity,
        size: Some("M".to_string()),
        color: None,
        unit_price,
        line_total: unit_price * Decimal::from(quantity),
        customization: None,
        saved_for_later: saved,
        created_at: now,
        updated_at: now,
    }
}

fn rules() -> PricingRules {
    PricingRules {
        free_shipping_threshold: dec!(599),
        flat_shipping_fee: dec!(49),
        tax_rate: Decimal::ZERO,
    }
}

fn delivered_order(delivered_at: Option<DateTime<Utc>>, status: OrderStatus) -> order::Model {
    let now = Utc::now();
    order::Model {
        id: Uuid::new_v4(),
        order_number: "BKC20260800001".to_string(),
        customer_id: Uuid::new_v4(),
        status,
        subtotal: dec!(750),
        shipping_total: Decimal::ZERO,
        tax_total: Decimal::ZERO,
        discount_total: Decimal::ZERO,
        coupon_code: None,
        coupon_discount: Decimal::ZERO,
        total: dec!(750),
        currency: "INR".to_string(),
        payment_status: PaymentStatus::Paid,
        payment_method: Some("upi".to_string()),
        shipping_address: serde_json::json!({"city": "Pune"}),
        billing_address: serde_json::json!({"city": "Pune"}),
        tracking_number: None,
        delivered_at,
        cancelled_at: None,
        cancellation_reason: None,
        refund_amount: None,
        created_at: now - Duration::days(12),
        updated_at: now,
    }
}

// The worked pricing example: a 500 cart with SAVE10 gives a 50 discount,
// pays the 49 flat fee, and totals 499.
#[test]
fn save10_on_a_500_cart() {
    let coupon = save10();
    let validation = evaluate(&coupon, &ctx(dec!(500)));
    assert!(validation.valid, "{:?}", validation.error);
    assert_eq!(validation.discount, dec!(50));

    let items = vec![line(dec!(250), 2, false)];
    let totals = compute_totals(&items, validation.discount, validation.free_shipping, &rules());
    assert_eq!(totals.subtotal, dec!(500));
    assert_eq!(totals.shipping_total, dec!(49));
    assert_eq!(totals.discount_total, dec!(50));
    assert_eq!(totals.total, dec!(499));
}

#[test]
fn save10_rejected_below_minimum() {
    let validation = evaluate(&save10(), &ctx(dec!(299)));
    assert!(!validation.valid);
    assert_matches!(validation.error, Some(msg) if msg.contains("Minimum order amount"));
}

#[test]
fn free_shipping_coupon_zeroes_the_shipping_line() {
    let mut coupon = save10();
    coupon.discount_type = DiscountType::FreeShipping;
    coupon.discount_value = Decimal::ZERO;

    let validation = evaluate(&coupon, &ctx(dec!(400)));
    assert!(validation.valid);
    assert!(validation.free_shipping);
    assert_eq!(validation.discount, Decimal::ZERO);

    let items = vec![line(dec!(400), 1, false)];
    let totals = compute_totals(&items, validation.discount, validation.free_shipping, &rules());
    assert_eq!(totals.shipping_total, Decimal::ZERO);
    assert_eq!(totals.total, dec!(400));
}

#[test]
fn saved_for_later_lines_do_not_count() {
    let items = vec![line(dec!(350), 1, false), line(dec!(900), 1, true)];
    let totals = compute_totals(&items, Decimal::ZERO, false, &rules());
    assert_eq!(totals.subtotal, dec!(350));
    assert_eq!(totals.shipping_total, dec!(49));
    assert_eq!(totals.total, dec!(399));
}

// The worked order-number example: seventh order of March 2024.
#[test]
fn seventh_order_of_march_2024() {
    let at = Utc.with_ymd_and_hms(2024, 3, 21, 14, 30, 0).unwrap();
    assert_eq!(format_order_number("BKC", at, 7), "BKC20240300007");
}

#[test_case(OrderStatus::Pending => true ; "pending is cancellable")]
#[test_case(OrderStatus::Confirmed => true ; "confirmed is cancellable")]
#[test_case(OrderStatus::Processing => false ; "processing is not")]
#[test_case(OrderStatus::Shipped => false ; "shipped is not")]
#[test_case(OrderStatus::OutForDelivery => false ; "out for delivery is not")]
#[test_case(OrderStatus::Delivered => false ; "delivered is not")]
#[test_case(OrderStatus::Cancelled => false ; "cancelled is terminal")]
#[test_case(OrderStatus::Returned => false ; "returned is terminal")]
fn cancellation_is_guarded(status: OrderStatus) -> bool {
    status.can_cancel()
}

#[test]
fn return_window_closes_after_seven_days() {
    let delivered_6_days_ago = delivered_order(
        Some(Utc::now() - Duration::days(6)),
        OrderStatus::Delivered,
    );
    assert!(delivered_6_days_ago.can_return(Utc::now(), 7));

    let delivered_8_days_ago = delivered_order(
        Some(Utc::now() - Duration::days(8)),
        OrderStatus::Delivered,
    );
    assert!(!delivered_8_days_ago.can_return(Utc::now(), 7));

    let shipped = delivered_order(None, OrderStatus::Shipped);
    assert!(!shipped.can_return(Utc::now(), 7));
}

#[test]
fn exhausted_coupons_fail_revalidation() {
    // The checkout-time recheck: a coupon that hit its cap between apply and
    // checkout must now evaluate invalid.
    let mut coupon = save10();
    coupon.used_count = 1000;
    let validation = evaluate(&coupon, &ctx(dec!(500)));
    assert!(!validation.valid);
    assert_eq!(
        validation.error.as_deref(),
        Some("This coupon has reached its usage limit")
    );
}

#[test]
fn bogo_coupon_halves_the_cart_total() {
    let mut coupon = save10();
    coupon.discount_type = DiscountType::Bogo;
    coupon.discount_value = Decimal::ZERO;
    coupon.max_discount_amount = Some(dec!(150));

    let validation = evaluate(&coupon, &ctx(dec!(400)));
    assert!(validation.valid);
    // Half of 400 is 200, capped at 150.
    assert_eq!(validation.discount, dec!(150));
}

#[rstest]
#[case(dec!(304), dec!(30))]
#[case(dec!(305), dec!(31))]
#[case(dec!(306), dec!(31))]
fn percentage_discounts_round_to_whole_units(
    #[case] cart_total: Decimal,
    #[case] expected: Decimal,
) {
    // 10% coupon; the half-unit case rounds away from zero.
    assert_eq!(compute_discount(&save10(), cart_total), expected);
}

#[test]
fn status_enum_spellings_are_stable() {
    assert_eq!(
        serde_json::to_string(&OrderStatus::OutForDelivery).unwrap(),
        "\"out_for_delivery\""
    );
    assert_eq!(
        serde_json::to_string(&DiscountType::FreeShipping).unwrap(),
        "\"free_shipping\""
    );
    assert_eq!(
        serde_json::to_string(&PaymentStatus::PartiallyRefunded).unwrap(),
        "\"partially_refunded\""
    );
}
