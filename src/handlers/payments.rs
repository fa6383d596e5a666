use axum::{
    body::Bytes,
    extract::{Form, State},
    http::{header, HeaderMap, StatusCode},
    response::Redirect,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::common::{cookie_value, validate_input};
use crate::{
    entities::order::{OrderStatus, PaymentMethod},
    errors::ServiceError,
    services::{
        cart_validator::CartLine,
        orders::CustomerInfo,
        payment_gateway::{
            verify_ipn_signature, CallbackSource, GatewayCallback, IPN_SIGNATURE_HEADER,
        },
        reconciliation::{CallbackResolution, CheckoutRequest},
        shipping::ShippingZone,
    },
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderData {
    #[validate(length(min = 1, max = 50))]
    pub cart_items: Vec<CartLine>,
    pub shipping_zone: ShippingZone,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    /// Total shown to the customer; must equal the computed order total
    #[schema(value_type = String, example = "1060.00")]
    pub amount: Decimal,
    #[validate]
    pub customer_info: CustomerInfo,
    #[validate]
    pub order_data: OrderData,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub order_id: String,
    pub redirect_url: String,
    #[schema(value_type = String)]
    pub total: Decimal,
}

/// Create a pay-first order and open a hosted checkout session for it
#[utoipa::path(
    post,
    path = "/api/v1/payment/initiate",
    request_body = InitiatePaymentRequest,
    responses(
        (status = 200, description = "Session opened", body = ApiResponse<InitiatePaymentResponse>),
        (status = 400, description = "Invalid request or total mismatch", body = crate::errors::ErrorResponse),
        (status = 409, description = "Cart failed validation", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway refused the session", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<Json<ApiResponse<InitiatePaymentResponse>>, ServiceError> {
    validate_input(&payload)?;

    let request = CheckoutRequest {
        customer_info: payload.customer_info,
        cart_items: payload.order_data.cart_items,
        payment_method: PaymentMethod::PayFirst,
        shipping_zone: payload.order_data.shipping_zone,
        coupon_code: payload.order_data.coupon_code,
        user_id: payload.order_data.user_id,
        affiliate_code: cookie_value(&headers, &state.config.affiliate_cookie_name),
        expected_total: Some(payload.amount),
    };

    let result = state.services.checkout.checkout(request).await?;
    let redirect_url = result.redirect_url.ok_or_else(|| {
        ServiceError::InternalError("pay-first checkout returned no redirect".to_string())
    })?;

    Ok(Json(ApiResponse::success(InitiatePaymentResponse {
        order_id: result.order_id,
        redirect_url,
        total: result.total,
    })))
}

fn parse_callback(headers: &HeaderMap, body: &[u8]) -> Result<GatewayCallback, ServiceError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let malformed = |e: serde_json::Error| {
        ServiceError::ValidationError(format!("malformed gateway callback: {}", e))
    };
    if is_json {
        return serde_json::from_slice(body).map_err(malformed);
    }

    let fields: serde_json::Map<String, serde_json::Value> = url::form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), serde_json::Value::String(v.into_owned())))
        .collect();
    serde_json::from_value(serde_json::Value::Object(fields)).map_err(malformed)
}

/// Server-to-server payment notification.
///
/// Answers 200 for everything the gateway should not resend, including
/// duplicates and callbacks that no longer apply; only transient failures
/// surface as 5xx so the gateway retries.
#[utoipa::path(
    post,
    path = "/api/v1/payment/ipn",
    request_body(content = GatewayCallback, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Notification processed or acknowledged", body = ApiResponse<CallbackResolution>),
        (status = 401, description = "Signature missing or wrong", body = crate::errors::ErrorResponse),
        (status = 503, description = "Transient failure; retry later", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn ipn(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<CallbackResolution>>), ServiceError> {
    if let Some(secret) = state
        .config
        .payment_gateway
        .ipn_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        let signature = headers
            .get(IPN_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !verify_ipn_signature(secret, &body, signature) {
            warn!("Rejected IPN with bad signature");
            return Err(ServiceError::Unauthorized(
                "invalid notification signature".to_string(),
            ));
        }
    }

    let callback = parse_callback(&headers, &body)?;
    match state
        .services
        .checkout
        .handle_callback(CallbackSource::Ipn, callback)
        .await
    {
        Ok(resolution) => Ok((StatusCode::OK, Json(ApiResponse::success(resolution)))),
        Err(e) if e.is_retryable() => Err(e),
        Err(e) => {
            info!(code = e.code(), "Acknowledging IPN that cannot be applied");
            Ok((StatusCode::OK, Json(ApiResponse::error(e.response_message()))))
        }
    }
}

async fn browser_return(
    state: &AppState,
    source: CallbackSource,
    callback: GatewayCallback,
) -> Redirect {
    let order_id = callback.tran_id.trim().to_string();
    let result = state.services.checkout.handle_callback(source, callback).await;

    let page = match (source, &result) {
        (CallbackSource::Cancel, _) => "payment/cancelled",
        (CallbackSource::Success, Ok(resolution))
            if matches!(resolution.status, OrderStatus::Paid | OrderStatus::Accepted) =>
        {
            "payment/success"
        }
        _ => "payment/failed",
    };
    if let Err(e) = &result {
        warn!(order_id = %order_id, error = %e, "Browser payment return not applied");
    }

    let encoded: String = url::form_urlencoded::byte_serialize(order_id.as_bytes()).collect();
    Redirect::to(&format!(
        "{}?orderId={}",
        state.config.storefront_page(page),
        encoded
    ))
}

/// Gateway redirect after a successful payment
#[utoipa::path(
    post,
    path = "/api/v1/payment/success",
    request_body(content = GatewayCallback, content_type = "application/x-www-form-urlencoded"),
    responses((status = 303, description = "Redirect to the storefront result page")),
    tag = "Payments"
)]
pub async fn payment_success(
    State(state): State<AppState>,
    Form(callback): Form<GatewayCallback>,
) -> Redirect {
    browser_return(&state, CallbackSource::Success, callback).await
}

/// Gateway redirect after a failed payment
#[utoipa::path(
    post,
    path = "/api/v1/payment/fail",
    request_body(content = GatewayCallback, content_type = "application/x-www-form-urlencoded"),
    responses((status = 303, description = "Redirect to the storefront result page")),
    tag = "Payments"
)]
pub async fn payment_fail(
    State(state): State<AppState>,
    Form(callback): Form<GatewayCallback>,
) -> Redirect {
    browser_return(&state, CallbackSource::Fail, callback).await
}

/// Gateway redirect after the customer abandoned the payment
#[utoipa::path(
    post,
    path = "/api/v1/payment/cancel",
    request_body(content = GatewayCallback, content_type = "application/x-www-form-urlencoded"),
    responses((status = 303, description = "Redirect to the storefront result page")),
    tag = "Payments"
)]
pub async fn payment_cancel(
    State(state): State<AppState>,
    Form(callback): Form<GatewayCallback>,
) -> Redirect {
    browser_return(&state, CallbackSource::Cancel, callback).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_form_encoded_callback() {
        let headers = HeaderMap::new();
        let body = b"tran_id=ORDABC&status=VALID&val_id=v1&amount=1060.00&extra=ignored";
        let cb = parse_callback(&headers, body).unwrap();
        assert_eq!(cb.tran_id, "ORDABC");
        assert_eq!(cb.status.as_deref(), Some("VALID"));
        assert_eq!(cb.amount.as_deref(), Some("1060.00"));
    }

    #[test]
    fn parses_json_callback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let body = br#"{"tran_id":"ORDABC","status":"FAILED"}"#;
        let cb = parse_callback(&headers, body).unwrap();
        assert_eq!(cb.status.as_deref(), Some("FAILED"));
        assert_eq!(cb.val_id, None);
    }
}
