use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::{cookie_value, PaginatedResponse};
use crate::{
    entities::{
        order::{self, OrderStatus, PaymentDetails, PaymentMethod},
        order_item,
    },
    errors::ServiceError,
    services::{
        cart_validator::CartLine,
        orders::OrderRecord,
        reconciliation::{CheckoutRequest, CheckoutResult, OrderAction, OrderProductsCheck},
    },
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub title: String,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
}

impl From<&order_item::Model> for OrderItemResponse {
    fn from(item: &order_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            title: item.title.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total: item.line_total(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: String,
    pub user_id: Option<Uuid>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub address: String,
    pub city: String,
    pub postcode: String,
    pub country: String,
    pub shipping_zone: String,
    pub currency: String,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub discount: Decimal,
    #[schema(value_type = String)]
    pub shipping_charge: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub coupon_code: Option<String>,
    pub affiliate_code: Option<String>,
    pub payment_details: Option<PaymentDetails>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderResponse {
    /// Header fields only, as used by listings
    pub fn summary(order: order::Model) -> Self {
        Self::with_items(order, Vec::new())
    }

    fn with_items(order: order::Model, items: Vec<OrderItemResponse>) -> Self {
        Self {
            payment_details: order.payment_details(),
            order_id: order.id,
            user_id: order.user_id,
            status: order.status,
            payment_method: order.payment_method,
            customer_name: order.customer_name,
            customer_email: order.customer_email,
            customer_phone: order.customer_phone,
            address: order.address,
            city: order.city,
            postcode: order.postcode,
            country: order.country,
            shipping_zone: order.shipping_zone,
            currency: order.currency,
            subtotal: order.subtotal,
            discount: order.discount,
            shipping_charge: order.shipping_charge,
            total: order.total,
            coupon_code: order.coupon_code,
            affiliate_code: order.affiliate_code,
            items,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

impl From<OrderRecord> for OrderResponse {
    fn from(record: OrderRecord) -> Self {
        let items = record.items.iter().map(OrderItemResponse::from).collect();
        Self::with_items(record.order, items)
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersParams {
    /// Only orders in this status
    pub status: Option<OrderStatus>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOrderProductsRequest {
    pub order_id: String,
    /// Replacement lines; the order's own lines when absent
    #[serde(default)]
    pub products: Option<Vec<CartLine>>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderActionRequest {
    pub order_id: String,
    pub action: OrderAction,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderActionResponse {
    pub order_id: String,
    pub status: OrderStatus,
    /// False when the order already had the requested status
    pub changed: bool,
}

/// Validate, price and record an order
#[utoipa::path(
    post,
    path = "/api/v1/orders/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order recorded", body = ApiResponse<CheckoutResult>),
        (status = 400, description = "Invalid request, coupon or total", body = crate::errors::ErrorResponse),
        (status = 409, description = "Cart failed validation", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway refused the session", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResult>>), ServiceError> {
    if payload.affiliate_code.is_none() {
        payload.affiliate_code = cookie_value(&headers, &state.config.affiliate_cookie_name);
    }

    let result = state.services.checkout.checkout(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(result))))
}

/// Fetch one order with its lines
#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_id}",
    params(("order_id" = String, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> ApiResult<OrderResponse> {
    let record = state.services.orders.get(&order_id).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(record))))
}

/// Page through orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(ListOrdersParams),
    responses(
        (status = 200, description = "Orders", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 401, description = "Admin key required", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<ListOrdersParams>,
) -> ApiResult<PaginatedResponse<OrderResponse>> {
    let page = params.page.max(1);
    let per_page = params.per_page.clamp(1, 100);
    let (orders, total) = state
        .services
        .orders
        .list(params.status, page, per_page)
        .await?;

    let data = orders.into_iter().map(OrderResponse::summary).collect();
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        data, page, per_page, total,
    ))))
}

/// Re-check an order's lines against current stock before accepting it
#[utoipa::path(
    post,
    path = "/api/v1/orders/validate-products",
    request_body = ValidateOrderProductsRequest,
    responses(
        (status = 200, description = "Line report", body = ApiResponse<OrderProductsCheck>),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn validate_products(
    State(state): State<AppState>,
    Json(payload): Json<ValidateOrderProductsRequest>,
) -> ApiResult<OrderProductsCheck> {
    let check = state
        .services
        .checkout
        .validate_order_products(&payload.order_id, payload.products)
        .await?;
    Ok(Json(ApiResponse::success(check)))
}

/// Accept or reject an order
#[utoipa::path(
    post,
    path = "/api/v1/orders/action",
    request_body = OrderActionRequest,
    responses(
        (status = 200, description = "Order moved", body = ApiResponse<OrderActionResponse>),
        (status = 400, description = "Coupon already used by this customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Illegal transition or insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn order_action(
    State(state): State<AppState>,
    Json(payload): Json<OrderActionRequest>,
) -> ApiResult<OrderActionResponse> {
    let outcome = state
        .services
        .checkout
        .act(&payload.order_id, payload.action)
        .await?;

    let order = outcome.order();
    Ok(Json(ApiResponse::success(OrderActionResponse {
        order_id: order.id.clone(),
        status: order.status,
        changed: outcome.was_applied(),
    })))
}
