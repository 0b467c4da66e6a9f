use crate::handlers::common::{created_response, map_service_error, validate_input};
use crate::{
    errors::ApiError, handlers::orders::OrderResponse, services::checkout::CheckoutRequest,
    AppState,
};
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for checkout
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(checkout))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckoutBody {
    pub customer_id: Uuid,
    pub shipping_address: serde_json::Value,
    pub billing_address: Option<serde_json::Value>,
    #[validate(length(min = 2, max = 32))]
    pub payment_method: String,
}

/// Convert the customer's cart into an order
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    tag = "checkout",
    request_body = CheckoutBody,
    responses(
        (status = 201, description = "Order placed", body = OrderResponse),
        (status = 400, description = "Empty cart or stale coupon", body = crate::errors::ErrorResponse),
        (status = 402, description = "Payment declined", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    )
)]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CheckoutBody>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let request = CheckoutRequest {
        shipping_address: payload.shipping_address,
        billing_address: payload.billing_address,
        payment_method: payload.payment_method,
    };

    let (order, items) = state
        .services
        .checkout
        .checkout(payload.customer_id, request)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(OrderResponse::new(order, items)))
}
