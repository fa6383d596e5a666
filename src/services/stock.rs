use std::{collections::BTreeMap, collections::HashMap, sync::Arc};

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::product::{self, Entity as ProductEntity, ProductPrice, ProductType},
    errors::{ServiceError, StockShortfall},
};

/// Input for registering a product with the order pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub product_type: ProductType,
    #[validate(range(min = 0))]
    pub quantity: i32,
    pub prices: Vec<ProductPrice>,
}

/// Owns per-product available quantity
#[derive(Clone)]
pub struct StockService {
    db: Arc<DatabaseConnection>,
}

impl StockService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(title = %input.title))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        if input.prices.iter().any(|p| p.amount < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "prices must not be negative".to_string(),
            ));
        }

        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(input.title),
            product_type: Set(input.product_type),
            quantity: Set(input.quantity),
            prices: Set(serde_json::to_value(&input.prices)?),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create product");
            ServiceError::DatabaseError(e)
        })?;

        info!(product_id = %model.id, quantity = model.quantity, "Product created");
        Ok(model)
    }

    pub async fn get(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Loads the given products keyed by id; unknown ids are simply absent
    pub async fn find_many(
        &self,
        product_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, product::Model>, ServiceError> {
        if product_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let products = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids.iter().copied()))
            .all(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load products");
                ServiceError::DatabaseError(e)
            })?;

        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }

    /// Administrative restock: sets an absolute quantity
    #[instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<product::Model, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "quantity must not be negative".to_string(),
            ));
        }

        let existing = self.get(product_id).await?;
        let previous = existing.quantity;

        let mut active: product::ActiveModel = existing.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(product_id = %product_id, previous, quantity, "Stock level set");
        Ok(updated)
    }
}

/// Decrements one product by `quantity` only if enough stock remains.
/// Returns whether the row was updated.
pub async fn decrement<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, DbErr> {
    let result = ProductEntity::update_many()
        .col_expr(
            product::Column::Quantity,
            Expr::col(product::Column::Quantity).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Quantity.gte(quantity))
        .exec(conn)
        .await?;

    Ok(result.rows_affected == 1)
}

/// Attempts every decrement and reports each line that could not be covered.
///
/// Must run inside a transaction: when the returned list is non-empty the
/// caller rolls back so no partial decrement survives.
pub async fn commit_lines<C: ConnectionTrait>(
    conn: &C,
    lines: &[(Uuid, i32)],
) -> Result<Vec<StockShortfall>, DbErr> {
    let mut requested: BTreeMap<Uuid, i32> = BTreeMap::new();
    for (product_id, quantity) in lines {
        *requested.entry(*product_id).or_default() += quantity;
    }

    let mut shortfalls = Vec::new();
    for (product_id, quantity) in requested {
        if decrement(conn, product_id, quantity).await? {
            continue;
        }

        let available = ProductEntity::find_by_id(product_id)
            .one(conn)
            .await?
            .map(|p| p.quantity)
            .unwrap_or(0);
        warn!(product_id = %product_id, requested = quantity, available, "Stock short at commit");
        shortfalls.push(StockShortfall {
            product_id,
            requested: quantity,
            available,
        });
    }

    Ok(shortfalls)
}
