use crate::{
    config::AppConfig,
    entities::{
        cart, cart_item,
        order::{self, OrderStatus, PaymentStatus},
        order_item, product, Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        carts::{compute_totals, CartService, PricingRules},
        coupons::CouponService,
        gateways::PaymentGateway,
        order_numbers, orders,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Converts a cart into an order.
///
/// The conversion is all-or-nothing: the order row, its item snapshots, the
/// initial history entry, stock decrements, coupon usage, and the cart wipe
/// are committed in a single transaction. Payment is captured first and
/// fails fast; a transaction failure after capture triggers a compensating
/// refund.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    carts: CartService,
    coupons: CouponService,
    payment: Arc<dyn PaymentGateway>,
}

/// Checkout request body.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    /// Shipping address snapshot, stored verbatim on the order.
    pub shipping_address: serde_json::Value,
    /// Billing address; defaults to the shipping address.
    pub billing_address: Option<serde_json::Value>,
    /// Payment method, e.g. "card", "upi", "cod".
    #[validate(length(min = 2, max = 32))]
    pub payment_method: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        carts: CartService,
        coupons: CouponService,
        payment: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            carts,
            coupons,
            payment,
        }
    }

    /// Places an order from the customer's active cart.
    #[instrument(skip(self, request), fields(customer_id = %customer_id))]
    pub async fn checkout(
        &self,
        customer_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        request.validate()?;

        let (cart, all_items) = self.carts.get_or_create_cart(customer_id).await?;
        let items: Vec<cart_item::Model> = all_items
            .into_iter()
            .filter(|i| !i.saved_for_later)
            .collect();
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "Cannot check out an empty cart".to_string(),
            ));
        }

        // Re-validate any applied coupon at order time; a coupon that went
        // stale since it was applied fails the checkout with the reason.
        let rules = PricingRules::from_config(&self.config);
        let subtotal: Decimal = items.iter().map(|i| i.line_total).sum();
        let mut coupon_discount = Decimal::ZERO;
        let mut coupon_free_shipping = false;
        let mut applied_coupon = None;

        if let Some(code) = cart.coupon_code.as_deref() {
            let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
            let categories = self.carts.categories_of(&product_ids).await?;
            let validation = self
                .coupons
                .validate(code, customer_id, subtotal, product_ids, categories)
                .await?;
            if !validation.valid {
                let reason = validation
                    .error
                    .unwrap_or_else(|| "Coupon is no longer valid".to_string());
                return Err(ServiceError::InvalidOperation(format!(
                    "Coupon {}: {}",
                    code, reason
                )));
            }
            coupon_discount = validation.discount;
            coupon_free_shipping = validation.free_shipping;
            applied_coupon = validation.coupon;
        }

        let totals = compute_totals(&items, coupon_discount, coupon_free_shipping, &rules);

        // Capture payment before any write. COD is collected on delivery.
        let order_id = Uuid::new_v4();
        let is_cod = request.payment_method.eq_ignore_ascii_case("cod");
        let receipt = if is_cod {
            None
        } else {
            let charge = self
                .payment
                .charge(
                    customer_id,
                    totals.total,
                    &self.config.currency,
                    &request.payment_method,
                )
                .await;
            match charge {
                Ok(receipt) => Some(receipt),
                Err(e) => {
                    self.event_sender
                        .send_or_log(Event::PaymentFailed {
                            order_id,
                            reason: e.to_string(),
                        })
                        .await;
                    return Err(e);
                }
            }
        };

        let result = self
            .persist_order(order_id, customer_id, &cart, &items, &totals, &request, &applied_coupon, coupon_discount, is_cod)
            .await;

        match result {
            Ok((order, order_items)) => {
                if let Some(receipt) = receipt {
                    self.event_sender
                        .send_or_log(Event::PaymentCaptured {
                            order_id,
                            amount: receipt.amount,
                        })
                        .await;
                }
                self.event_sender
                    .send_or_log(Event::OrderCreated(order_id))
                    .await;
                self.event_sender
                    .send_or_log(Event::CheckoutCompleted {
                        cart_id: cart.id,
                        order_id,
                    })
                    .await;
                info!(order_number = %order.order_number, "checkout completed");
                Ok((order, order_items))
            }
            Err(e) => {
                // Compensating refund when the captured charge cannot be
                // backed by an order.
                if let Some(receipt) = receipt {
                    if let Err(refund_err) = self
                        .payment
                        .refund(&receipt.transaction_id, receipt.amount)
                        .await
                    {
                        warn!(
                            order_id = %order_id,
                            error = %refund_err,
                            "compensating refund failed after checkout rollback"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_order(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
        cart: &cart::Model,
        items: &[cart_item::Model],
        totals: &crate::services::carts::CartTotals,
        request: &CheckoutRequest,
        applied_coupon: &Option<crate::entities::coupon::Model>,
        coupon_discount: Decimal,
        is_cod: bool,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let order_number =
            order_numbers::allocate(&txn, &self.config.order_number_prefix, now).await?;

        let billing = request
            .billing_address
            .clone()
            .unwrap_or_else(|| request.shipping_address.clone());

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            customer_id: Set(customer_id),
            status: Set(OrderStatus::Pending),
            subtotal: Set(totals.subtotal),
            shipping_total: Set(totals.shipping_total),
            tax_total: Set(totals.tax_total),
            discount_total: Set(totals.discount_total),
            coupon_code: Set(applied_coupon.as_ref().map(|c| c.code.clone())),
            coupon_discount: Set(coupon_discount),
            total: Set(totals.total),
            currency: Set(self.config.currency.clone()),
            payment_status: Set(if is_cod {
                PaymentStatus::Pending
            } else {
                PaymentStatus::Paid
            }),
            payment_method: Set(Some(request.payment_method.clone())),
            shipping_address: Set(request.shipping_address.clone()),
            billing_address: Set(billing),
            tracking_number: Set(None),
            delivered_at: Set(None),
            cancelled_at: Set(None),
            cancellation_reason: Set(None),
            refund_amount: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let order = order_model.insert(&txn).await?;

        let mut order_items = Vec::with_capacity(items.len());
        for line in items {
            // Stock is checked and decremented inside the transaction so two
            // concurrent checkouts cannot both take the last unit.
            let product = Product::find_by_id(line.product_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", line.product_id))
                })?;
            if product.stock < line.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Only {} left in stock for {}",
                    product.stock, product.name
                )));
            }
            let image_url = product.image_url.clone();
            let stock = product.stock;
            let sold = product.sold_count;
            let mut active: product::ActiveModel = product.into();
            active.stock = Set(stock - line.quantity);
            active.sold_count = Set(sold + line.quantity);
            active.updated_at = Set(now);
            active.update(&txn).await?;

            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                product_name: Set(line.product_name.clone()),
                image_url: Set(image_url),
                quantity: Set(line.quantity),
                size: Set(line.size.clone()),
                color: Set(line.color.clone()),
                unit_price: Set(line.unit_price),
                line_total: Set(line.line_total),
                created_at: Set(now),
            };
            order_items.push(item.insert(&txn).await?);
        }

        orders::append_history(
            &txn,
            order_id,
            OrderStatus::Pending,
            Some("Order placed".to_string()),
            None,
        )
        .await?;

        if let Some(coupon) = applied_coupon {
            self.coupons
                .record_usage(&txn, coupon.id, customer_id, order_id, coupon_discount)
                .await?;
        }

        self.carts.clear_cart(&txn, cart.clone(), true).await?;

        txn.commit().await?;
        Ok((order, order_items))
    }
}
