//! BazaarKart API Library
//!
//! Storefront commerce backend: carts, coupons, orders, and checkout.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use serde_json::{json, Value};
use std::sync::Arc;

use services::{CartService, CheckoutService, CouponService, OrderService};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
    pub services: AppServices,
}

/// The service layer, constructed once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub carts: CartService,
    pub coupons: CouponService,
    pub orders: OrderService,
    pub checkout: CheckoutService,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<config::AppConfig>,
        event_sender: Arc<events::EventSender>,
        payment: Arc<dyn services::gateways::PaymentGateway>,
        shipping: Arc<dyn services::gateways::ShippingGateway>,
    ) -> Self {
        let coupons = CouponService::new(db.clone(), event_sender.clone());
        let carts = CartService::new(
            db.clone(),
            event_sender.clone(),
            config.clone(),
            coupons.clone(),
        );
        let orders = OrderService::new(
            db.clone(),
            event_sender.clone(),
            config.clone(),
            payment.clone(),
            shipping,
        );
        let checkout = CheckoutService::new(
            db,
            event_sender,
            config,
            carts.clone(),
            coupons.clone(),
            payment,
        );
        Self {
            carts,
            coupons,
            orders,
            checkout,
        }
    }
}

/// Builds the `/api/v1` router plus health and status endpoints.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    let api = Router::new()
        .nest("/carts", handlers::carts::carts_routes())
        .nest("/coupons", handlers::coupons::coupons_routes())
        .nest("/orders", handlers::orders::orders_routes())
        .nest("/checkout", handlers::checkout::checkout_routes());

    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(api_status))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(openapi::openapi_document()) }),
        )
        .nest("/api/v1", api)
}

/// Liveness/readiness probe; reports database reachability.
async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let db_status = match state
        .db
        .execute(Statement::from_string(
            state.db.get_database_backend(),
            "SELECT 1".to_string(),
        ))
        .await
    {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    Json(json!({
        "status": if db_status == "healthy" { "ok" } else { "degraded" },
        "database": db_status,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Static service metadata.
async fn api_status() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "api_version": "v1",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
