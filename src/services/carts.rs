use crate::{
    config::AppConfig,
    entities::{
        cart::{self, CartStatus},
        cart_item,
        product,
        Cart, CartItem, Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::{CouponService, CouponValidation},
};
use chrono::Utc;
use rust_decimal::{prelude::FromPrimitive, Decimal};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Cart service. One active cart per customer; all mutations recompute the
/// cart's derived totals before returning.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    coupons: CouponService,
}

/// Pricing knobs used by [`compute_totals`].
#[derive(Debug, Clone)]
pub struct PricingRules {
    pub free_shipping_threshold: Decimal,
    pub flat_shipping_fee: Decimal,
    pub tax_rate: Decimal,
}

impl PricingRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            free_shipping_threshold: Decimal::from(config.free_shipping_threshold),
            flat_shipping_fee: Decimal::from(config.flat_shipping_fee),
            tax_rate: Decimal::from_f64(config.default_tax_rate).unwrap_or(Decimal::ZERO),
        }
    }
}

/// Derived cart totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub shipping_total: Decimal,
    pub tax_total: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
}

/// Computes cart totals from active lines.
///
/// Saved-for-later lines are excluded. Shipping is zero for an empty cart,
/// at or above the free-shipping threshold, or when the applied coupon waives
/// it; otherwise the flat fee applies. The grand total never goes below zero.
pub fn compute_totals(
    items: &[cart_item::Model],
    coupon_discount: Decimal,
    coupon_free_shipping: bool,
    rules: &PricingRules,
) -> CartTotals {
    let subtotal: Decimal = items
        .iter()
        .filter(|i| !i.saved_for_later)
        .map(|i| i.line_total)
        .sum();

    let shipping_total = if subtotal == Decimal::ZERO
        || subtotal >= rules.free_shipping_threshold
        || coupon_free_shipping
    {
        Decimal::ZERO
    } else {
        rules.flat_shipping_fee
    };

    let tax_total = (subtotal * rules.tax_rate).round_dp(2);
    let discount_total = coupon_discount.min(subtotal);
    let total = (subtotal + shipping_total + tax_total - discount_total).max(Decimal::ZERO);

    CartTotals {
        subtotal,
        shipping_total,
        tax_total,
        discount_total,
        total,
    }
}

/// Input for adding an item to the cart
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddItemInput {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub size: Option<String>,
    pub color: Option<String>,
    /// Per-line customization, e.g. {"engraving": "Happy Birthday"}.
    pub customization: Option<BTreeMap<String, String>>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        coupons: CouponService,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            coupons,
        }
    }

    /// Fetches the customer's cart, creating an empty one on first use.
    ///
    /// `customer_id` is unique, so the same row is reused for the customer's
    /// whole lifetime; an abandoned cart is reactivated on the next touch.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(
        &self,
        customer_id: Uuid,
    ) -> Result<(cart::Model, Vec<cart_item::Model>), ServiceError> {
        let existing = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?;

        let cart = match existing {
            Some(cart) if cart.status != CartStatus::Active => {
                let mut active: cart::ActiveModel = cart.into();
                active.status = Set(CartStatus::Active);
                active.updated_at = Set(Utc::now());
                active.update(&*self.db).await?
            }
            Some(cart) => cart,
            None => {
                let now = Utc::now();
                let cart_id = Uuid::new_v4();
                let model = cart::ActiveModel {
                    id: Set(cart_id),
                    customer_id: Set(customer_id),
                    currency: Set(self.config.currency.clone()),
                    subtotal: Set(Decimal::ZERO),
                    shipping_total: Set(Decimal::ZERO),
                    tax_total: Set(Decimal::ZERO),
                    discount_total: Set(Decimal::ZERO),
                    coupon_code: Set(None),
                    coupon_discount: Set(Decimal::ZERO),
                    coupon_free_shipping: Set(false),
                    total: Set(Decimal::ZERO),
                    status: Set(CartStatus::Active),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                let created = model.insert(&*self.db).await?;
                self.event_sender.send_or_log(Event::CartCreated(cart_id)).await;
                created
            }
        };

        let items = self.items_of(&*self.db, cart.id).await?;
        Ok((cart, items))
    }

    /// Fetches a cart by id.
    pub async fn get_cart(
        &self,
        cart_id: Uuid,
    ) -> Result<(cart::Model, Vec<cart_item::Model>), ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;
        let items = self.items_of(&*self.db, cart.id).await?;
        Ok((cart, items))
    }

    /// Adds a product to the cart.
    ///
    /// A matching non-customized line (same product, size, and color) is
    /// merged and its quantity capped at `max_item_quantity`; a customized
    /// line is always a new row.
    #[instrument(skip(self, input), fields(product_id = %input.product_id))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        input: AddItemInput,
    ) -> Result<(cart::Model, Vec<cart_item::Model>), ServiceError> {
        input.validate()?;

        let product = Product::find_by_id(input.product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;
        if !product.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "Product {} is not available",
                product.name
            )));
        }
        if product.stock < input.quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} left in stock for {}",
                product.stock, product.name
            )));
        }

        let (cart, items) = self.get_or_create_cart(customer_id).await?;
        let max_quantity = self.config.max_item_quantity;
        let customized = input
            .customization
            .as_ref()
            .map(|m| !m.is_empty())
            .unwrap_or(false);

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let merge_target = items.iter().find(|line| {
            line.merges_with(
                product.id,
                input.size.as_deref(),
                input.color.as_deref(),
                customized,
            )
        });

        if let Some(line) = merge_target {
            let new_quantity = (line.quantity + input.quantity).min(max_quantity);
            let mut active: cart_item::ActiveModel = line.clone().into();
            active.quantity = Set(new_quantity);
            active.line_total = Set(line.unit_price * Decimal::from(new_quantity));
            active.updated_at = Set(now);
            active.update(&txn).await?;
        } else {
            let quantity = input.quantity.min(max_quantity);
            let line = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                quantity: Set(quantity),
                size: Set(input.size.clone()),
                color: Set(input.color.clone()),
                unit_price: Set(product.price),
                line_total: Set(product.price * Decimal::from(quantity)),
                customization: Set(input
                    .customization
                    .filter(|m| !m.is_empty())
                    .map(|m| serde_json::json!(m))),
                saved_for_later: Set(false),
                created_at: Set(now),
                updated_at: Set(now),
            };
            line.insert(&txn).await?;
        }

        let updated = self.recalculate(&txn, cart).await?;
        let items = self.items_of(&txn, updated.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: updated.id,
                product_id: product.id,
            })
            .await;

        Ok((updated, items))
    }

    /// Sets the quantity of a cart line. Quantity 0 removes the line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<(cart::Model, Vec<cart_item::Model>), ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::InvalidInput(
                "Quantity cannot be negative".to_string(),
            ));
        }
        if quantity == 0 {
            return self.remove_item(customer_id, item_id).await;
        }

        let (cart, _) = self.get_or_create_cart(customer_id).await?;
        let line = self.line_of(cart.id, item_id).await?;
        let quantity = quantity.min(self.config.max_item_quantity);

        let txn = self.db.begin().await?;
        let unit_price = line.unit_price;
        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(quantity);
        active.line_total = Set(unit_price * Decimal::from(quantity));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let updated = self.recalculate(&txn, cart).await?;
        let items = self.items_of(&txn, updated.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                cart_id: updated.id,
                item_id,
            })
            .await;

        Ok((updated, items))
    }

    /// Removes a line from the cart.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<(cart::Model, Vec<cart_item::Model>), ServiceError> {
        let (cart, _) = self.get_or_create_cart(customer_id).await?;
        let line = self.line_of(cart.id, item_id).await?;

        let txn = self.db.begin().await?;
        line.delete(&txn).await?;
        let updated = self.recalculate(&txn, cart).await?;
        let items = self.items_of(&txn, updated.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: updated.id,
                item_id,
            })
            .await;

        Ok((updated, items))
    }

    /// Moves a line out of the active cart without deleting it.
    #[instrument(skip(self))]
    pub async fn save_for_later(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<(cart::Model, Vec<cart_item::Model>), ServiceError> {
        self.set_saved_flag(customer_id, item_id, true).await
    }

    /// Moves a saved line back into the active cart.
    #[instrument(skip(self))]
    pub async fn move_to_cart(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
    ) -> Result<(cart::Model, Vec<cart_item::Model>), ServiceError> {
        self.set_saved_flag(customer_id, item_id, false).await
    }

    async fn set_saved_flag(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
        saved: bool,
    ) -> Result<(cart::Model, Vec<cart_item::Model>), ServiceError> {
        let (cart, _) = self.get_or_create_cart(customer_id).await?;
        let line = self.line_of(cart.id, item_id).await?;

        let txn = self.db.begin().await?;
        let mut active: cart_item::ActiveModel = line.into();
        active.saved_for_later = Set(saved);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let updated = self.recalculate(&txn, cart).await?;
        let items = self.items_of(&txn, updated.id).await?;
        txn.commit().await?;

        let event = if saved {
            Event::CartItemSavedForLater {
                cart_id: updated.id,
                item_id,
            }
        } else {
            Event::CartItemMovedToCart {
                cart_id: updated.id,
                item_id,
            }
        };
        self.event_sender.send_or_log(event).await;

        Ok((updated, items))
    }

    /// Validates and applies a coupon to the cart.
    ///
    /// On success the code, computed discount, and free-shipping flag are
    /// stored on the cart and totals recomputed. Usage is NOT recorded here;
    /// that happens at checkout. An ineligible coupon is reported in the
    /// returned [`CouponValidation`], leaving the cart untouched.
    #[instrument(skip(self), fields(code = %code))]
    pub async fn apply_coupon(
        &self,
        customer_id: Uuid,
        code: &str,
    ) -> Result<(cart::Model, Vec<cart_item::Model>, CouponValidation), ServiceError> {
        let (cart, items) = self.get_or_create_cart(customer_id).await?;

        let active_items: Vec<&cart_item::Model> =
            items.iter().filter(|i| !i.saved_for_later).collect();
        if active_items.is_empty() {
            return Ok((
                cart,
                items,
                CouponValidation::rejected("Cannot apply a coupon to an empty cart"),
            ));
        }

        let product_ids: Vec<Uuid> = active_items.iter().map(|i| i.product_id).collect();
        let categories = self.categories_of(&product_ids).await?;
        let validation = self
            .coupons
            .validate(code, customer_id, cart.subtotal, product_ids, categories)
            .await?;

        if !validation.valid {
            return Ok((cart, items, validation));
        }

        let applied = validation
            .coupon
            .as_ref()
            .ok_or_else(|| ServiceError::InternalError("Valid coupon missing model".to_string()))?;

        let txn = self.db.begin().await?;
        let cart_id = cart.id;
        let mut active: cart::ActiveModel = cart.into();
        active.coupon_code = Set(Some(applied.code.clone()));
        active.coupon_discount = Set(validation.discount);
        active.coupon_free_shipping = Set(validation.free_shipping);
        let cart = active.update(&txn).await?;

        let updated = self.recalculate(&txn, cart).await?;
        let items = self.items_of(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CouponApplied {
                cart_id,
                code: applied.code.clone(),
            })
            .await;

        Ok((updated, items, validation))
    }

    /// Removes any applied coupon and recomputes totals.
    #[instrument(skip(self))]
    pub async fn remove_coupon(
        &self,
        customer_id: Uuid,
    ) -> Result<(cart::Model, Vec<cart_item::Model>), ServiceError> {
        let (cart, _) = self.get_or_create_cart(customer_id).await?;

        let txn = self.db.begin().await?;
        let cart_id = cart.id;
        let mut active: cart::ActiveModel = cart.into();
        active.coupon_code = Set(None);
        active.coupon_discount = Set(Decimal::ZERO);
        active.coupon_free_shipping = Set(false);
        let cart = active.update(&txn).await?;

        let updated = self.recalculate(&txn, cart).await?;
        let items = self.items_of(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CouponRemoved { cart_id })
            .await;

        Ok((updated, items))
    }

    /// Deletes every line (saved ones included) and resets the cart.
    ///
    /// Checkout passes `mark_converted` so the wiped cart records that it
    /// became an order; the next customer touch reactivates it.
    pub async fn clear_cart(
        &self,
        conn: &impl ConnectionTrait,
        cart: cart::Model,
        mark_converted: bool,
    ) -> Result<cart::Model, ServiceError> {
        let cart_id = cart.id;
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;

        let mut active: cart::ActiveModel = cart.into();
        active.subtotal = Set(Decimal::ZERO);
        active.shipping_total = Set(Decimal::ZERO);
        active.tax_total = Set(Decimal::ZERO);
        active.discount_total = Set(Decimal::ZERO);
        active.coupon_code = Set(None);
        active.coupon_discount = Set(Decimal::ZERO);
        active.coupon_free_shipping = Set(false);
        active.total = Set(Decimal::ZERO);
        if mark_converted {
            active.status = Set(CartStatus::Converted);
        }
        active.updated_at = Set(Utc::now());
        let cleared = active.update(conn).await?;

        self.event_sender.send_or_log(Event::CartCleared(cart_id)).await;
        info!(cart_id = %cart_id, "cart cleared");
        Ok(cleared)
    }

    /// Distinct categories of the given products, for coupon eligibility.
    pub async fn categories_of(&self, product_ids: &[Uuid]) -> Result<Vec<String>, ServiceError> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        let products = Product::find()
            .filter(product::Column::Id.is_in(product_ids.to_vec()))
            .all(&*self.db)
            .await?;
        let mut categories: Vec<String> = products.into_iter().map(|p| p.category).collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    /// Recomputes and persists the cart's derived totals.
    pub(crate) async fn recalculate(
        &self,
        conn: &impl ConnectionTrait,
        cart: cart::Model,
    ) -> Result<cart::Model, ServiceError> {
        let items = self.items_of(conn, cart.id).await?;
        let rules = PricingRules::from_config(&self.config);
        let totals = compute_totals(
            &items,
            cart.coupon_discount,
            cart.coupon_free_shipping,
            &rules,
        );

        let mut active: cart::ActiveModel = cart.into();
        active.subtotal = Set(totals.subtotal);
        active.shipping_total = Set(totals.shipping_total);
        active.tax_total = Set(totals.tax_total);
        active.discount_total = Set(totals.discount_total);
        active.total = Set(totals.total);
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }

    async fn items_of(
        &self,
        conn: &impl ConnectionTrait,
        cart_id: Uuid,
    ) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    async fn line_of(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<cart_item::Model, ServiceError> {
        CartItem::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rules() -> PricingRules {
        PricingRules {
            free_shipping_threshold: dec!(599),
            flat_shipping_fee: dec!(49),
            tax_rate: Decimal::ZERO,
        }
    }

    fn line(line_total: Decimal, saved: bool) -> cart_item::Model {
        let now = Utc::now();
        cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "Canvas Sneakers".to_string(),
            quantity: 1,
            size: None,
            color: None,
            unit_price: line_total,
            line_total,
            customization: None,
            saved_for_later: saved,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn empty_cart_has_zero_shipping() {
        let totals = compute_totals(&[], Decimal::ZERO, false, &rules());
        assert_eq!(totals.subtotal, Decimal::ZERO);
        assert_eq!(totals.shipping_total, Decimal::ZERO);
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[test]
    fn flat_fee_below_threshold() {
        // The worked example: 500 subtotal, 10% coupon (50 off), flat fee 49.
        let items = vec![line(dec!(500), false)];
        let totals = compute_totals(&items, dec!(50), false, &rules());
        assert_eq!(totals.subtotal, dec!(500));
        assert_eq!(totals.shipping_total, dec!(49));
        assert_eq!(totals.discount_total, dec!(50));
        assert_eq!(totals.total, dec!(499));
    }

    #[test]
    fn free_shipping_at_threshold() {
        let items = vec![line(dec!(599), false)];
        let totals = compute_totals(&items, Decimal::ZERO, false, &rules());
        assert_eq!(totals.shipping_total, Decimal::ZERO);
        assert_eq!(totals.total, dec!(599));
    }

    #[test]
    fn coupon_waives_shipping_below_threshold() {
        let items = vec![line(dec!(300), false)];
        let totals = compute_totals(&items, Decimal::ZERO, true, &rules());
        assert_eq!(totals.shipping_total, Decimal::ZERO);
        assert_eq!(totals.total, dec!(300));
    }

    #[test]
    fn saved_for_later_lines_excluded() {
        let items = vec![line(dec!(400), false), line(dec!(700), true)];
        let totals = compute_totals(&items, Decimal::ZERO, false, &rules());
        assert_eq!(totals.subtotal, dec!(400));
        assert_eq!(totals.shipping_total, dec!(49));
    }

    #[test]
    fn total_never_negative() {
        let items = vec![line(dec!(100), false)];
        let totals = compute_totals(&items, dec!(500), false, &rules());
        // Discount is clamped to the subtotal before the final clamp.
        assert_eq!(totals.discount_total, dec!(100));
        assert_eq!(totals.total, dec!(49));
    }

    #[test]
    fn tax_applied_when_rate_nonzero() {
        let mut r = rules();
        r.tax_rate = dec!(0.05);
        let items = vec![line(dec!(1000), false)];
        let totals = compute_totals(&items, Decimal::ZERO, false, &r);
        assert_eq!(totals.tax_total, dec!(50.00));
        assert_eq!(totals.total, dec!(1050.00));
    }
}
