//! Property tests for the pricing invariants that must hold for any input.

use bazaarkart_api::entities::coupon::{self, DiscountType};
use bazaarkart_api::services::carts::{compute_totals, PricingRules};
use bazaarkart_api::services::coupons::compute_discount;
use bazaarkart_api::services::order_numbers::format_order_number;
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn coupon(discount_type: DiscountType, value: Decimal, cap: Option<Decimal>) -> coupon::Model {
    let now = Utc::now();
    coupon::Model {
        id: Uuid::new_v4(),
        code: "PROPTEST".to_string(),
        description: None,
        discount_type,
        discount_value: value,
        max_discount_amount: cap,
        min_order_amount: Decimal::ZERO,
        usage_limit: None,
        per_user_limit: None,
        used_count: 0,
        valid_from: now - Duration::days(1),
        valid_to: now + Duration::days(1),
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

fn rules() -> PricingRules {
    PricingRules {
        free_shipping_threshold: dec!(599),
        flat_shipping_fee: dec!(49),
        tax_rate: Decimal::ZERO,
    }
}

proptest! {
    #[test]
    fn percentage_discount_within_bounds(
        total_units in 0i64..1_000_000,
        pct in 0i64..=100,
    ) {
        let cart_total = Decimal::from(total_units);
        let c = coupon(DiscountType::Percentage, Decimal::from(pct), None);
        let discount = compute_discount(&c, cart_total);

        prop_assert!(discount >= Decimal::ZERO);
        prop_assert!(discount <= cart_total);
        // Rounding to a whole unit moves the raw value by at most 0.5.
        let raw = cart_total * Decimal::from(pct) / Decimal::from(100);
        prop_assert!((discount - raw).abs() <= dec!(0.5));
    }

    #[test]
    fn capped_discount_never_exceeds_cap(
        total_units in 1i64..1_000_000,
        pct in 1i64..=100,
        cap_halves in 0i64..20_000,
    ) {
        // Fractional caps included: the cap binds after rounding, so the
        // rounded amount must never exceed it.
        let cap = Decimal::from(cap_halves) / Decimal::from(2);
        let c = coupon(DiscountType::Percentage, Decimal::from(pct), Some(cap));
        let discount = compute_discount(&c, Decimal::from(total_units));
        prop_assert!(discount <= cap);
    }

    #[test]
    fn fixed_discount_never_exceeds_cart_total(
        total_units in 0i64..100_000,
        value_units in 0i64..200_000,
    ) {
        let c = coupon(DiscountType::Fixed, Decimal::from(value_units), None);
        let discount = compute_discount(&c, Decimal::from(total_units));
        prop_assert!(discount <= Decimal::from(total_units));
    }

    #[test]
    fn cart_total_never_negative(
        subtotal_units in 0i64..1_000_000,
        discount_units in 0i64..2_000_000,
        free_shipping in any::<bool>(),
    ) {
        let now = Utc::now();
        let item = bazaarkart_api::entities::cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "x".to_string(),
            quantity: 1,
            size: None,
            color: None,
            unit_price: Decimal::from(subtotal_units),
            line_total: Decimal::from(subtotal_units),
            customization: None,
            saved_for_later: false,
            created_at: now,
            updated_at: now,
        };
        let totals = compute_totals(
            &[item],
            Decimal::from(discount_units),
            free_shipping,
            &rules(),
        );
        prop_assert!(totals.total >= Decimal::ZERO);
        prop_assert!(totals.discount_total <= totals.subtotal);
    }

    #[test]
    fn order_numbers_are_fixed_width_and_ordered(
        year in 2020i32..2100,
        month in 1u32..=12,
        seq in 1i64..100_000,
    ) {
        let at = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap();
        let number = format_order_number("BKC", at, seq);

        prop_assert_eq!(number.len(), 3 + 4 + 2 + 5);
        prop_assert!(number.starts_with("BKC"));
        prop_assert!(number[3..].chars().all(|c| c.is_ascii_digit()));

        // Within a month, lexicographic order tracks sequence order.
        if seq + 1 < 100_000 {
            let next = format_order_number("BKC", at, seq + 1);
            prop_assert!(next > number);
        }
    }
}
