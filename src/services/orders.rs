use crate::{
    config::AppConfig,
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        order_item, order_status_history, product,
        Order, OrderItem, OrderStatusHistory, Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::gateways::{PaymentGateway, ShippingGateway},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Order lifecycle service.
///
/// Orders are created by checkout only; this service owns everything after
/// creation: reads, the status machine, cancellation, returns, and shipment
/// dispatch. Every status change appends to `order_status_history` in the
/// same transaction that updates the order row.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    payment: Arc<dyn PaymentGateway>,
    shipping: Arc<dyn ShippingGateway>,
}

/// Filter for order listings.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub customer_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        payment: Arc<dyn PaymentGateway>,
        shipping: Arc<dyn ShippingGateway>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            payment,
            shipping,
        }
    }

    pub async fn get_order(
        &self,
        order_id: Uuid,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = self.items_of(&*self.db, order_id).await?;
        Ok((order, items))
    }

    pub async fn get_by_number(
        &self,
        order_number: &str,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let order = Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", order_number))
            })?;
        let items = self.items_of(&*self.db, order.id).await?;
        Ok((order, items))
    }

    /// Lists orders newest first with optional customer and status filters.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        filter: OrderFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = Order::find().order_by_desc(order::Column::CreatedAt);
        if let Some(customer_id) = filter.customer_id {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((data, total))
    }

    /// Appended history rows for an order, oldest first.
    pub async fn status_history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status_history::Model>, ServiceError> {
        // 404 for unknown orders rather than an empty history.
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        Ok(OrderStatusHistory::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Moves an order to a new status (operations/admin path).
    ///
    /// Cancellation and returns have their own guarded operations and are
    /// rejected here; terminal states accept no further updates.
    #[instrument(skip(self), fields(order_id = %order_id, status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        note: Option<String>,
        actor: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        if matches!(new_status, OrderStatus::Cancelled | OrderStatus::Returned) {
            return Err(ServiceError::InvalidOperation(
                "Use the cancel or return operation for this status".to_string(),
            ));
        }

        let order = self.find(order_id).await?;
        let old_status = order.status;
        if old_status == new_status {
            return Ok(order);
        }
        if old_status.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Order in status {} accepts no further updates",
                old_status
            )));
        }

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        if new_status == OrderStatus::Delivered {
            active.delivered_at = Set(Some(now));
        }
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        append_history(&txn, order_id, new_status, note, actor).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;
        if new_status == OrderStatus::Delivered {
            self.event_sender
                .send_or_log(Event::OrderDelivered(order_id))
                .await;
        }

        info!(from = %old_status, to = %new_status, "order status updated");
        Ok(updated)
    }

    /// Cancels an order.
    ///
    /// Only permitted before fulfilment starts (pending or confirmed). Stock
    /// is restored, and a captured payment is refunded in full.
    #[instrument(skip(self, reason))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: String,
        actor: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order = self.find(order_id).await?;
        if !order.status.can_cancel() {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot cancel an order in status {}",
                order.status
            )));
        }

        let old_status = order.status;
        let was_paid = order.payment_status == PaymentStatus::Paid;
        let total = order.total;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        restock_items(&txn, order_id).await?;

        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.cancelled_at = Set(Some(now));
        active.cancellation_reason = Set(Some(reason.clone()));
        if was_paid {
            active.payment_status = Set(PaymentStatus::Refunded);
            active.refund_amount = Set(Some(total));
        }
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        append_history(&txn, order_id, OrderStatus::Cancelled, Some(reason), actor).await?;
        txn.commit().await?;

        // Refund after commit: the cancellation stands even if the gateway
        // call fails, and the failure is surfaced for manual follow-up.
        if was_paid {
            if let Err(e) = self.payment.refund(&updated.order_number, total).await {
                warn!(order_id = %order_id, error = %e, "refund failed after cancellation");
            }
        }

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: OrderStatus::Cancelled,
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;

        Ok(updated)
    }

    /// Files a return for a delivered order.
    ///
    /// Allowed only within the configured window of the delivery timestamp.
    #[instrument(skip(self, reason))]
    pub async fn file_return(
        &self,
        order_id: Uuid,
        reason: String,
        actor: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order = self.find(order_id).await?;
        if !order.can_return(Utc::now(), self.config.return_window_days) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order is not eligible for return (must be delivered within the last {} days)",
                self.config.return_window_days
            )));
        }

        let old_status = order.status;
        let total = order.total;
        let was_paid = order.payment_status == PaymentStatus::Paid;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Returned);
        if was_paid {
            active.payment_status = Set(PaymentStatus::Refunded);
        }
        active.refund_amount = Set(Some(total));
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        append_history(&txn, order_id, OrderStatus::Returned, Some(reason), actor).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: OrderStatus::Returned,
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderReturned(order_id))
            .await;

        Ok(updated)
    }

    /// Books a shipment and moves the order to `shipped`.
    #[instrument(skip(self))]
    pub async fn mark_shipped(
        &self,
        order_id: Uuid,
        actor: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order = self.find(order_id).await?;
        if order.status != OrderStatus::Confirmed && order.status != OrderStatus::Processing {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot ship an order in status {}",
                order.status
            )));
        }

        let booking = self
            .shipping
            .book_shipment(order_id, &order.order_number)
            .await?;

        let old_status = order.status;
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Shipped);
        active.tracking_number = Set(Some(booking.tracking_number.clone()));
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;

        append_history(
            &txn,
            order_id,
            OrderStatus::Shipped,
            Some(format!("Shipped via {}", booking.carrier)),
            actor,
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: OrderStatus::Shipped,
            })
            .await;
        self.event_sender
            .send_or_log(Event::ShipmentDispatched {
                order_id,
                tracking_number: booking.tracking_number,
            })
            .await;

        Ok(updated)
    }

    async fn find(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn items_of(
        &self,
        conn: &impl ConnectionTrait,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(conn)
            .await?)
    }
}

/// Appends an immutable status-history row. Shared with checkout, which
/// records the initial `pending` entry when the order is created.
pub async fn append_history(
    conn: &impl ConnectionTrait,
    order_id: Uuid,
    status: OrderStatus,
    note: Option<String>,
    actor: Option<String>,
) -> Result<(), ServiceError> {
    let row = order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(status),
        note: Set(note),
        actor: Set(actor),
        created_at: Set(Utc::now()),
    };
    row.insert(conn).await?;
    Ok(())
}

/// Returns each line's quantity to stock and rolls back sold counts.
async fn restock_items(
    conn: &impl ConnectionTrait,
    order_id: Uuid,
) -> Result<(), ServiceError> {
    let items = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(conn)
        .await?;

    for item in items {
        let Some(p) = Product::find_by_id(item.product_id).one(conn).await? else {
            continue;
        };
        let stock = p.stock;
        let sold = p.sold_count;
        let mut active: product::ActiveModel = p.into();
        active.stock = Set(stock + item.quantity);
        active.sold_count = Set((sold - item.quantity).max(0));
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;
    }
    Ok(())
}

