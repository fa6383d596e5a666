use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::common::validate_input;
use crate::{
    entities::coupon::{self, CouponScope, CouponUseType},
    errors::ServiceError,
    services::coupons::{self, CouponCheck, CreateCouponInput, CustomerIdentity, UsageRecord},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponResponse {
    pub id: Uuid,
    pub code: String,
    pub scope: CouponScope,
    pub product_id: Option<Uuid>,
    #[schema(value_type = String)]
    pub discount_percentage: Decimal,
    #[schema(value_type = Option<String>)]
    pub min_cart_total: Option<Decimal>,
    pub use_type: CouponUseType,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<coupon::Model> for CouponResponse {
    fn from(model: coupon::Model) -> Self {
        Self {
            id: model.id,
            code: model.code,
            scope: model.scope,
            product_id: model.product_id,
            discount_percentage: model.discount_percentage,
            min_cart_total: model.min_cart_total,
            use_type: model.use_type,
            expires_at: model.expires_at,
            is_active: model.is_active,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    #[serde(default)]
    pub product_ids: Vec<Uuid>,
    #[schema(value_type = Option<String>, example = "1200.00")]
    pub cart_total: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordUsageRequest {
    #[validate(length(min = 1, max = 32))]
    pub coupon_code: String,
    #[serde(deserialize_with = "coupons::trimmed")]
    #[validate(email)]
    pub email: String,
    #[serde(deserialize_with = "coupons::trimmed")]
    #[validate(length(min = 6, max = 20))]
    pub phone: String,
    pub user_id: Option<Uuid>,
    pub order_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub coupon_code: String,
    /// False for multiple-use coupons, which keep no usage ledger
    pub tracked: bool,
}

/// Create a coupon
#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    request_body = CreateCouponInput,
    responses(
        (status = 201, description = "Coupon created", body = ApiResponse<CouponResponse>),
        (status = 400, description = "Invalid coupon", body = crate::errors::ErrorResponse),
        (status = 401, description = "Admin key required", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    Json(payload): Json<CreateCouponInput>,
) -> Result<(StatusCode, Json<ApiResponse<CouponResponse>>), ServiceError> {
    let created = state.services.coupons.create(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(CouponResponse::from(created))),
    ))
}

/// Check whether a coupon applies to a cart, without consuming it
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Applicability report", body = ApiResponse<CouponCheck>),
        (status = 404, description = "Unknown coupon", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    Json(payload): Json<ValidateCouponRequest>,
) -> ApiResult<CouponCheck> {
    validate_input(&payload)?;
    let check = state
        .services
        .coupons
        .validate(&payload.code, &payload.product_ids, payload.cart_total)
        .await?;
    Ok(Json(ApiResponse::success(check)))
}

/// Record that a customer consumed a one-time coupon
#[utoipa::path(
    post,
    path = "/api/v1/coupons/record-usage",
    request_body = RecordUsageRequest,
    responses(
        (status = 200, description = "Usage recorded", body = ApiResponse<UsageResponse>),
        (status = 400, description = "Coupon already used by this customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown coupon", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn record_usage(
    State(state): State<AppState>,
    Json(payload): Json<RecordUsageRequest>,
) -> ApiResult<UsageResponse> {
    validate_input(&payload)?;

    let identity = CustomerIdentity::new(&payload.email, &payload.phone, payload.user_id);
    let record = state
        .services
        .coupons
        .record_usage(&payload.coupon_code, &identity, payload.order_id.as_deref())
        .await?;

    Ok(Json(ApiResponse::success(UsageResponse {
        coupon_code: payload.coupon_code.trim().to_uppercase(),
        tracked: record == UsageRecord::Recorded,
    })))
}
