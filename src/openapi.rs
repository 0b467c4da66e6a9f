use utoipa::OpenApi;

use crate::entities::coupon::DiscountType;
use crate::entities::order::{OrderStatus, PaymentStatus};
use crate::errors::ErrorResponse;
use crate::handlers;
use crate::services::coupons::{CouponValidation, CreateCouponInput};

/// OpenAPI document for the storefront API, served at
/// `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "BazaarKart API",
        version = "0.1.0",
        description = "Storefront commerce backend: carts, coupons, orders, and checkout.",
    ),
    paths(
        handlers::carts::get_or_create_cart,
        handlers::carts::get_cart,
        handlers::carts::add_item,
        handlers::carts::update_item,
        handlers::carts::apply_coupon,
        handlers::coupons::create_coupon,
        handlers::coupons::list_coupons,
        handlers::coupons::validate_coupon,
        handlers::coupons::get_coupon,
        handlers::coupons::deactivate_coupon,
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::orders::get_order_by_number,
        handlers::orders::get_status_history,
        handlers::orders::update_status,
        handlers::orders::cancel_order,
        handlers::orders::ship_order,
        handlers::orders::return_order,
        handlers::checkout::checkout,
    ),
    components(schemas(
        ErrorResponse,
        CouponValidation,
        CreateCouponInput,
        DiscountType,
        OrderStatus,
        PaymentStatus,
        handlers::carts::GetOrCreateCartRequest,
        handlers::carts::AddItemRequest,
        handlers::carts::UpdateQuantityRequest,
        handlers::carts::ApplyCouponRequest,
        handlers::carts::CartResponse,
        handlers::carts::ApplyCouponResponse,
        handlers::orders::OrderResponse,
        handlers::orders::UpdateStatusRequest,
        handlers::orders::CancelOrderRequest,
        handlers::orders::ReturnOrderRequest,
        handlers::orders::ShipOrderRequest,
        handlers::checkout::CheckoutBody,
    )),
    tags(
        (name = "carts", description = "Cart management"),
        (name = "coupons", description = "Coupon administration and validation"),
        (name = "orders", description = "Order lifecycle"),
        (name = "checkout", description = "Cart to order conversion"),
    )
)]
pub struct ApiDoc;

/// Returns the generated OpenAPI document.
pub fn openapi_document() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_includes_core_paths() {
        let doc = openapi_document();
        let paths = doc.paths.paths;
        assert!(paths.contains_key("/api/v1/checkout"));
        assert!(paths.contains_key("/api/v1/carts/{id}/coupon"));
        assert!(paths.contains_key("/api/v1/orders/{id}/cancel"));
    }
}
