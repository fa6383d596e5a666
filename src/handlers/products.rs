use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::common::validate_input;
use crate::{
    entities::product::{self, ProductPrice, ProductType},
    errors::ServiceError,
    services::stock::CreateProductInput,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub product_type: ProductType,
    #[validate(range(min = 0))]
    pub quantity: i32,
    #[validate(length(min = 1))]
    pub prices: Vec<ProductPrice>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SetStockRequest {
    #[validate(range(min = 0))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub id: Uuid,
    pub title: String,
    pub product_type: ProductType,
    pub quantity: i32,
    pub prices: Vec<ProductPrice>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<product::Model> for ProductResponse {
    fn from(model: product::Model) -> Self {
        Self {
            prices: model.price_list(),
            id: model.id,
            title: model.title,
            product_type: model.product_type,
            quantity: model.quantity,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub product_id: Uuid,
    pub quantity: i32,
    pub purchasable: bool,
}

impl From<product::Model> for StockLevel {
    fn from(model: product::Model) -> Self {
        Self {
            product_id: model.id,
            quantity: model.quantity,
            purchasable: model.product_type == ProductType::Own,
        }
    }
}

/// Register a product with stock and prices
#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = ApiResponse<ProductResponse>),
        (status = 400, description = "Invalid product", body = crate::errors::ErrorResponse),
        (status = 401, description = "Admin key required", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProductResponse>>), ServiceError> {
    validate_input(&payload)?;

    let created = state
        .services
        .stock
        .create_product(CreateProductInput {
            title: payload.title,
            product_type: payload.product_type,
            quantity: payload.quantity,
            prices: payload.prices,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ProductResponse::from(created))),
    ))
}

/// Current stock of a product
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/stock",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Stock level", body = ApiResponse<StockLevel>),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn get_stock(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StockLevel> {
    let product = state.services.stock.get(id).await?;
    Ok(Json(ApiResponse::success(StockLevel::from(product))))
}

/// Set the absolute stock level of a product
#[utoipa::path(
    put,
    path = "/api/v1/products/{id}/stock",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = SetStockRequest,
    responses(
        (status = 200, description = "Stock updated", body = ApiResponse<StockLevel>),
        (status = 400, description = "Negative quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn set_stock(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetStockRequest>,
) -> ApiResult<StockLevel> {
    validate_input(&payload)?;
    let product = state.services.stock.set_quantity(id, payload.quantity).await?;
    Ok(Json(ApiResponse::success(StockLevel::from(product))))
}
