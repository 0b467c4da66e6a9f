use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input, PaginatedResponse,
    PaginationParams,
};
use crate::{
    errors::ApiError,
    services::coupons::{CouponValidation, CreateCouponInput},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Creates the router for coupon endpoints
pub fn coupons_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_coupon).get(list_coupons))
        .route("/validate", post(validate_coupon))
        .route("/:code", get(get_coupon))
        .route("/:code/deactivate", post(deactivate_coupon))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListCouponsQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 24))]
    pub code: String,
    pub customer_id: Uuid,
    pub cart_total: Decimal,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Create a coupon
#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    tag = "coupons",
    request_body = CreateCouponInput,
    responses(
        (status = 201, description = "Coupon created"),
        (status = 400, description = "Invariant violation", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse),
    )
)]
pub async fn create_coupon(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCouponInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let coupon = state
        .services
        .coupons
        .create_coupon(payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(coupon))
}

/// List coupons, newest first
#[utoipa::path(
    get,
    path = "/api/v1/coupons",
    tag = "coupons",
    params(ListCouponsQuery),
    responses((status = 200, description = "Paginated coupon list"))
)]
pub async fn list_coupons(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListCouponsQuery>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let pagination = PaginationParams {
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(20),
    };
    let page = pagination.page();
    let per_page = pagination.per_page();

    let (coupons, total) = state
        .services
        .coupons
        .list_coupons(page, per_page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::new(
        coupons, page, per_page, total,
    )))
}

/// Validate a coupon against a cart context without applying it
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    tag = "coupons",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Validation outcome (invalid coupons are not errors)", body = CouponValidation),
    )
)]
pub async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;
    let validation = state
        .services
        .coupons
        .validate(
            &payload.code,
            payload.customer_id,
            payload.cart_total,
            payload.product_ids,
            payload.categories,
        )
        .await
        .map_err(map_service_error)?;
    Ok(success_response(validation))
}

/// Get a coupon by code
#[utoipa::path(
    get,
    path = "/api/v1/coupons/{code}",
    tag = "coupons",
    params(("code" = String, Path, description = "Coupon code")),
    responses(
        (status = 200, description = "Coupon retrieved"),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_coupon(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let coupon = state
        .services
        .coupons
        .get_by_code(&code)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(coupon))
}

/// Deactivate a coupon so further validations reject it
#[utoipa::path(
    post,
    path = "/api/v1/coupons/{code}/deactivate",
    tag = "coupons",
    params(("code" = String, Path, description = "Coupon code")),
    responses(
        (status = 200, description = "Coupon deactivated"),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn deactivate_coupon(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let coupon = state
        .services
        .coupons
        .deactivate(&code)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(coupon))
}
