//! Storefront API library
//!
//! Order fulfillment and payment reconciliation for a single-merchant
//! storefront: cart validation, coupons, shipping zones, the order ledger,
//! hosted payment gateway callbacks and affiliate commissions.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::middleware_helpers::{request_id_middleware, require_admin_key};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success(data)
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes mounted under `/api/v1`
pub fn api_v1_routes(state: AppState) -> Router<AppState> {
    use handlers::{affiliates, cart, coupons, orders, payments, products, shipping};

    let storefront = Router::new()
        .route("/products/:id/stock", get(products::get_stock))
        .route("/cart/validate", post(cart::validate_cart))
        .route("/coupons/validate", post(coupons::validate_coupon))
        .route("/coupons/record-usage", post(coupons::record_usage))
        .route("/shipping-charges", get(shipping::list_charges))
        .route("/orders/checkout", post(orders::checkout))
        .route("/orders/:order_id", get(orders::get_order))
        .route("/affiliate/apply", post(affiliates::apply))
        .route("/affiliate/track-visit", post(affiliates::track_visit))
        .route("/affiliate/purchase", post(affiliates::purchase));

    // Gateway-facing; authenticated by signature or by re-validation, never by admin key
    let gateway = Router::new()
        .route("/payment/initiate", post(payments::initiate_payment))
        .route("/payment/ipn", post(payments::ipn))
        .route(
            "/payment/success",
            post(payments::payment_success).get(payments::payment_success),
        )
        .route(
            "/payment/fail",
            post(payments::payment_fail).get(payments::payment_fail),
        )
        .route(
            "/payment/cancel",
            post(payments::payment_cancel).get(payments::payment_cancel),
        );

    let admin = Router::new()
        .route("/products", post(products::create_product))
        .route("/products/:id/stock", put(products::set_stock))
        .route("/coupons", post(coupons::create_coupon))
        .route("/shipping-charges", post(shipping::update_charges))
        .route("/orders", get(orders::list_orders))
        .route("/orders/validate-products", post(orders::validate_products))
        .route("/orders/action", post(orders::order_action))
        .route("/affiliates/:id/approve", post(affiliates::approve))
        .route("/affiliates/:id/reject", post(affiliates::reject))
        .route("/affiliate/stats/:code", get(affiliates::stats))
        .route_layer(middleware::from_fn_with_state(state, require_admin_key));

    Router::new().merge(storefront).merge(gateway).merge(admin)
}

/// Full application router with health, docs and the request-scoped layers
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes(state.clone()))
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
