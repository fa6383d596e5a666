use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Catalog product; only the fields the order pipeline needs
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub title: String,
    pub product_type: ProductType,
    /// Units available for sale, never negative
    pub quantity: i32,
    /// Listed prices as `[{currency, amount}]`, first entry is the fallback
    #[sea_orm(column_type = "Json")]
    pub prices: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    /// Sold and shipped by the store
    #[sea_orm(string_value = "own")]
    Own,
    /// Listed for referral only; never purchasable through the cart
    #[sea_orm(string_value = "affiliate")]
    Affiliate,
}

/// One listed price of a product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProductPrice {
    #[schema(example = "BDT")]
    pub currency: String,
    #[schema(value_type = String, example = "500.00")]
    pub amount: Decimal,
}

impl Model {
    /// Parsed price list; malformed JSON reads as no prices
    pub fn price_list(&self) -> Vec<ProductPrice> {
        serde_json::from_value(self.prices.clone()).unwrap_or_default()
    }

    /// Price in `currency`, falling back to the first listed price
    pub fn resolve_price(&self, currency: &str) -> Option<Decimal> {
        let prices = self.price_list();
        prices
            .iter()
            .find(|p| p.currency.eq_ignore_ascii_case(currency))
            .or_else(|| prices.first())
            .map(|p| p.amount)
    }
}
