use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::{client_ip, cookie_value};
use crate::{
    entities::{
        affiliate::{self, AffiliateStatus},
        affiliate_transaction,
    },
    errors::ServiceError,
    services::affiliates::AffiliateStats,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AffiliateResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: AffiliateStatus,
    pub affiliate_code: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<affiliate::Model> for AffiliateResponse {
    fn from(model: affiliate::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            status: model.status,
            affiliate_code: model.affiliate_code,
            approved_at: model.approved_at,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackVisitRequest {
    /// Falls back to the affiliate cookie
    #[serde(default)]
    pub affiliate_code: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub order_id: String,
    /// Falls back to the affiliate cookie, then to the code captured at checkout
    #[serde(default)]
    pub affiliate_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommissionResponse {
    pub order_id: String,
    pub affiliate_id: Uuid,
    #[schema(value_type = String)]
    pub amount: Decimal,
    #[schema(value_type = String)]
    pub commission: Decimal,
}

impl From<affiliate_transaction::Model> for CommissionResponse {
    fn from(model: affiliate_transaction::Model) -> Self {
        Self {
            order_id: model.order_id,
            affiliate_id: model.affiliate_id,
            amount: model.amount,
            commission: model.commission,
        }
    }
}

/// Apply to become an affiliate
#[utoipa::path(
    post,
    path = "/api/v1/affiliate/apply",
    request_body = ApplyRequest,
    responses(
        (status = 201, description = "Application received", body = ApiResponse<AffiliateResponse>),
        (status = 409, description = "User already applied", body = crate::errors::ErrorResponse)
    ),
    tag = "Affiliates"
)]
pub async fn apply(
    State(state): State<AppState>,
    Json(payload): Json<ApplyRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AffiliateResponse>>), ServiceError> {
    let created = state.services.affiliates.apply(payload.user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(AffiliateResponse::from(created))),
    ))
}

/// Approve an application and issue its code
#[utoipa::path(
    post,
    path = "/api/v1/affiliates/{id}/approve",
    params(("id" = Uuid, Path, description = "Affiliate id")),
    responses(
        (status = 200, description = "Affiliate approved", body = ApiResponse<AffiliateResponse>),
        (status = 404, description = "Unknown affiliate", body = crate::errors::ErrorResponse)
    ),
    tag = "Affiliates"
)]
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<AffiliateResponse> {
    let approved = state.services.affiliates.approve(id).await?;
    Ok(Json(ApiResponse::success(AffiliateResponse::from(approved))))
}

#[utoipa::path(
    post,
    path = "/api/v1/affiliates/{id}/reject",
    params(("id" = Uuid, Path, description = "Affiliate id")),
    responses(
        (status = 200, description = "Affiliate rejected", body = ApiResponse<AffiliateResponse>),
        (status = 404, description = "Unknown affiliate", body = crate::errors::ErrorResponse)
    ),
    tag = "Affiliates"
)]
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<AffiliateResponse> {
    let rejected = state.services.affiliates.reject(id).await?;
    Ok(Json(ApiResponse::success(AffiliateResponse::from(rejected))))
}

#[utoipa::path(
    get,
    path = "/api/v1/affiliate/stats/{code}",
    params(("code" = String, Path, description = "Affiliate code")),
    responses(
        (status = 200, description = "Visit and commission totals", body = ApiResponse<AffiliateStats>),
        (status = 404, description = "Unknown code", body = crate::errors::ErrorResponse)
    ),
    tag = "Affiliates"
)]
pub async fn stats(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<AffiliateStats> {
    let stats = state.services.affiliates.stats(&code).await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// Record a referral click. Always 204 so codes cannot be probed.
#[utoipa::path(
    post,
    path = "/api/v1/affiliate/track-visit",
    request_body = TrackVisitRequest,
    responses((status = 204, description = "Visit accepted")),
    tag = "Affiliates"
)]
pub async fn track_visit(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<TrackVisitRequest>>,
) -> Result<StatusCode, ServiceError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let code = payload
        .affiliate_code
        .filter(|c| !c.trim().is_empty())
        .or_else(|| cookie_value(&headers, &state.config.affiliate_cookie_name));

    if let Some(code) = code {
        let page = payload.page.unwrap_or_else(|| "/".to_string());
        state
            .services
            .affiliates
            .track_visit(&code, &page, &client_ip(&headers))
            .await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Credit a commission for a paid or accepted order
#[utoipa::path(
    post,
    path = "/api/v1/affiliate/purchase",
    request_body = PurchaseRequest,
    responses(
        (status = 200, description = "Commission recorded, or null when nothing applies", body = ApiResponse<Option<CommissionResponse>>),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order not paid yet", body = crate::errors::ErrorResponse)
    ),
    tag = "Affiliates"
)]
pub async fn purchase(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PurchaseRequest>,
) -> ApiResult<Option<CommissionResponse>> {
    let code = payload
        .affiliate_code
        .or_else(|| cookie_value(&headers, &state.config.affiliate_cookie_name));
    let recorded = state
        .services
        .checkout
        .attribute_purchase(&payload.order_id, code)
        .await?;
    Ok(Json(ApiResponse::success(
        recorded.map(CommissionResponse::from),
    )))
}
