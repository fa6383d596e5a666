use axum::{extract::State, Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{services::shipping::ZoneCharge, ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateShippingChargesRequest {
    pub charges: Vec<ZoneCharge>,
}

/// Zone fee table
#[utoipa::path(
    get,
    path = "/api/v1/shipping-charges",
    responses(
        (status = 200, description = "Current charges", body = ApiResponse<Vec<ZoneCharge>>)
    ),
    tag = "Shipping"
)]
pub async fn list_charges(State(state): State<AppState>) -> ApiResult<Vec<ZoneCharge>> {
    let charges = state.services.shipping.list().await?;
    Ok(Json(ApiResponse::success(charges)))
}

/// Replace one or both zone fees
#[utoipa::path(
    post,
    path = "/api/v1/shipping-charges",
    request_body = UpdateShippingChargesRequest,
    responses(
        (status = 200, description = "Updated charges", body = ApiResponse<Vec<ZoneCharge>>),
        (status = 400, description = "Negative fee or empty update", body = crate::errors::ErrorResponse),
        (status = 401, description = "Admin key required", body = crate::errors::ErrorResponse)
    ),
    tag = "Shipping"
)]
pub async fn update_charges(
    State(state): State<AppState>,
    Json(payload): Json<UpdateShippingChargesRequest>,
) -> ApiResult<Vec<ZoneCharge>> {
    let charges = state.services.shipping.update(payload.charges).await?;
    Ok(Json(ApiResponse::with_message(
        charges,
        "Shipping charges updated",
    )))
}
