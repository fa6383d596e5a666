use axum::{extract::State, Json};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use super::common::validate_input;
use crate::{
    services::cart_validator::{CartLine, CartValidation},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCartRequest {
    #[validate(length(min = 1, max = 50))]
    pub cart_items: Vec<CartLine>,
}

/// Check whether a cart could be ordered as-is. Never reserves stock.
#[utoipa::path(
    post,
    path = "/api/v1/cart/validate",
    request_body = ValidateCartRequest,
    responses(
        (status = 200, description = "Per-line report; invalid lines carry an issue code", body = ApiResponse<CartValidation>),
        (status = 400, description = "Empty cart or duplicate products", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn validate_cart(
    State(state): State<AppState>,
    Json(payload): Json<ValidateCartRequest>,
) -> ApiResult<CartValidation> {
    validate_input(&payload)?;
    let report = state.services.cart.validate(&payload.cart_items).await?;
    Ok(Json(ApiResponse::success(report)))
}
