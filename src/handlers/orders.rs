use crate::handlers::common::{
    map_service_error, success_response, validate_input, PaginatedResponse, PaginationParams,
};
use crate::{
    entities::{
        order::{self, OrderStatus},
        order_item, order_status_history,
    },
    errors::ApiError,
    services::orders::OrderFilter,
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/by-number/:order_number", get(get_order_by_number))
        .route("/:id/history", get(get_status_history))
        .route("/:id/status", put(update_status))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/ship", post(ship_order))
        .route("/:id/return", post(return_order))
}

/// Order document: the order row plus its line snapshots.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub order: order::Model,
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<order_item::Model>,
}

impl OrderResponse {
    pub fn new(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self { order, items }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersQuery {
    pub customer_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub note: Option<String>,
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CancelOrderRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ReturnOrderRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    pub actor: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct ShipOrderRequest {
    pub actor: Option<String>,
}

/// List orders with optional filters
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    tag = "orders",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Paginated order list"),
    )
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let pagination = PaginationParams {
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(20),
    };
    let page = pagination.page();
    let per_page = pagination.per_page();

    let filter = OrderFilter {
        customer_id: query.customer_id,
        status: query.status,
    };
    let (orders, total) = state
        .services
        .orders
        .list_orders(filter, page, per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        orders, page, per_page, total,
    )))
}

/// Get an order by id
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = OrderResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (order, items) = state
        .services
        .orders
        .get_order(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(OrderResponse::new(order, items)))
}

/// Get an order by its human-readable number
#[utoipa::path(
    get,
    path = "/api/v1/orders/by-number/{order_number}",
    tag = "orders",
    params(("order_number" = String, Path, description = "Order number, e.g. BKC20240300007")),
    responses(
        (status = 200, description = "Order retrieved", body = OrderResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_order_by_number(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (order, items) = state
        .services
        .orders
        .get_by_number(&order_number)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(OrderResponse::new(order, items)))
}

/// Get the append-only status history of an order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/history",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "History rows, oldest first"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_status_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let history: Vec<order_status_history::Model> = state
        .services
        .orders
        .status_history(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(history))
}

/// Move an order along the fulfilment path
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated"),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .update_status(id, payload.status, payload.note, payload.actor)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

/// Cancel an order (pending or confirmed only)
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled"),
        (status = 400, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let order = state
        .services
        .orders
        .cancel_order(id, payload.reason, payload.actor)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

/// Book a shipment and mark the order shipped
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/ship",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = ShipOrderRequest,
    responses(
        (status = 200, description = "Shipment booked, order shipped"),
        (status = 400, description = "Order not ready to ship", body = crate::errors::ErrorResponse),
        (status = 502, description = "Shipping gateway failure", body = crate::errors::ErrorResponse),
    )
)]
pub async fn ship_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ShipOrderRequest>>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let actor = payload.and_then(|Json(p)| p.actor);
    let order = state
        .services
        .orders
        .mark_shipped(id, actor)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

/// File a return for a delivered order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/return",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = ReturnOrderRequest,
    responses(
        (status = 200, description = "Return filed"),
        (status = 400, description = "Outside the return window", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn return_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReturnOrderRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let order = state
        .services
        .orders
        .file_return(id, payload.reason, payload.actor)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}
