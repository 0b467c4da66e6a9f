use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
};
use crate::{
    entities::{cart, cart_item},
    errors::ApiError,
    services::{carts::AddItemInput, coupons::CouponValidation},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(get_or_create_cart))
        .route("/:id", get(get_cart))
        .route("/:id/items", post(add_item))
        .route("/:id/items/:item_id", put(update_item))
        .route("/:id/items/:item_id", delete(remove_item))
        .route("/:id/items/:item_id/save-for-later", post(save_for_later))
        .route("/:id/items/:item_id/move-to-cart", post(move_to_cart))
        .route("/:id/coupon", post(apply_coupon))
        .route("/:id/coupon", delete(remove_coupon))
        .route("/:id/clear", post(clear_cart))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct GetOrCreateCartRequest {
    pub customer_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10))]
    pub quantity: i32,
    pub size: Option<String>,
    pub color: Option<String>,
    pub customization: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 0, max = 10))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 24))]
    pub code: String,
}

/// Full cart document: the cart row plus its lines, with saved-for-later
/// lines split out of the active list.
#[derive(Debug, Serialize, ToSchema)]
pub struct CartResponse {
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub cart: cart::Model,
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<cart_item::Model>,
    #[schema(value_type = Vec<Object>)]
    pub saved_for_later: Vec<cart_item::Model>,
}

impl CartResponse {
    pub fn new(cart: cart::Model, items: Vec<cart_item::Model>) -> Self {
        let (saved, active): (Vec<_>, Vec<_>) =
            items.into_iter().partition(|i| i.saved_for_later);
        Self {
            cart,
            items: active,
            saved_for_later: saved,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApplyCouponResponse {
    pub validation: CouponValidation,
    pub cart: CartResponse,
}

/// Get or create the customer's cart
#[utoipa::path(
    post,
    path = "/api/v1/carts",
    tag = "carts",
    request_body = GetOrCreateCartRequest,
    responses(
        (status = 201, description = "Cart fetched or created", body = CartResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_or_create_cart(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GetOrCreateCartRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (cart, items) = state
        .services
        .carts
        .get_or_create_cart(payload.customer_id)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(CartResponse::new(cart, items)))
}

/// Get a cart with its items
#[utoipa::path(
    get,
    path = "/api/v1/carts/{id}",
    tag = "carts",
    params(("id" = Uuid, Path, description = "Cart ID")),
    responses(
        (status = 200, description = "Cart retrieved", body = CartResponse),
        (status = 404, description = "Cart not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (cart, items) = state
        .services
        .carts
        .get_cart(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(CartResponse::new(cart, items)))
}

/// Add an item to the cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/{id}/items",
    tag = "carts",
    params(("id" = Uuid, Path, description = "Cart ID")),
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Item added, totals recomputed", body = CartResponse),
        (status = 404, description = "Cart or product not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    )
)]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let (cart, _) = state
        .services
        .carts
        .get_cart(cart_id)
        .await
        .map_err(map_service_error)?;

    let input = AddItemInput {
        product_id: payload.product_id,
        quantity: payload.quantity,
        size: payload.size,
        color: payload.color,
        customization: payload.customization,
    };

    let (cart, items) = state
        .services
        .carts
        .add_item(cart.customer_id, input)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(CartResponse::new(cart, items)))
}

/// Update a cart line's quantity (0 removes the line)
#[utoipa::path(
    put,
    path = "/api/v1/carts/{id}/items/{item_id}",
    tag = "carts",
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("item_id" = Uuid, Path, description = "Cart item ID"),
    ),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Quantity updated", body = CartResponse),
        (status = 404, description = "Cart or item not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    Path((cart_id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let (cart, _) = state
        .services
        .carts
        .get_cart(cart_id)
        .await
        .map_err(map_service_error)?;

    let (cart, items) = state
        .services
        .carts
        .update_item_quantity(cart.customer_id, item_id, payload.quantity)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(CartResponse::new(cart, items)))
}

/// Remove a line from the cart
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    Path((cart_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (cart, _) = state
        .services
        .carts
        .get_cart(cart_id)
        .await
        .map_err(map_service_error)?;

    state
        .services
        .carts
        .remove_item(cart.customer_id, item_id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

/// Park a line in the saved-for-later list
pub async fn save_for_later(
    State(state): State<Arc<AppState>>,
    Path((cart_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (cart, _) = state
        .services
        .carts
        .get_cart(cart_id)
        .await
        .map_err(map_service_error)?;

    let (cart, items) = state
        .services
        .carts
        .save_for_later(cart.customer_id, item_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(CartResponse::new(cart, items)))
}

/// Move a saved line back into the active cart
pub async fn move_to_cart(
    State(state): State<Arc<AppState>>,
    Path((cart_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (cart, _) = state
        .services
        .carts
        .get_cart(cart_id)
        .await
        .map_err(map_service_error)?;

    let (cart, items) = state
        .services
        .carts
        .move_to_cart(cart.customer_id, item_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(CartResponse::new(cart, items)))
}

/// Validate and apply a coupon to the cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/{id}/coupon",
    tag = "carts",
    params(("id" = Uuid, Path, description = "Cart ID")),
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Validation outcome plus the (possibly updated) cart", body = ApplyCouponResponse),
        (status = 404, description = "Cart not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn apply_coupon(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let (cart, _) = state
        .services
        .carts
        .get_cart(cart_id)
        .await
        .map_err(map_service_error)?;

    let (cart, items, validation) = state
        .services
        .carts
        .apply_coupon(cart.customer_id, &payload.code)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ApplyCouponResponse {
        validation,
        cart: CartResponse::new(cart, items),
    }))
}

/// Remove the applied coupon
pub async fn remove_coupon(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (cart, _) = state
        .services
        .carts
        .get_cart(cart_id)
        .await
        .map_err(map_service_error)?;

    let (cart, items) = state
        .services
        .carts
        .remove_coupon(cart.customer_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(CartResponse::new(cart, items)))
}

/// Empty the cart
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (cart, _) = state
        .services
        .carts
        .get_cart(cart_id)
        .await
        .map_err(map_service_error)?;

    let cleared = state
        .services
        .carts
        .clear_cart(&*state.db, cart, false)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(CartResponse::new(cleared, Vec::new())))
}
