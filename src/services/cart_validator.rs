use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::product::{self, ProductType},
    errors::ServiceError,
    services::stock::StockService,
};

/// One proposed line of a cart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Why a line cannot be purchased
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineIssue {
    NotFound,
    NotPurchasable,
    QuantityExceedsLimit,
    PriceUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LineResult {
    pub product_id: Uuid,
    pub requested_quantity: i32,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<LineIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Most units this line may carry, `min(stock, per-item cap)`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_quantity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub unit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub line_total: Option<Decimal>,
}

impl LineResult {
    fn rejected(line: &CartLine, issue: LineIssue, message: String) -> Self {
        Self {
            product_id: line.product_id,
            requested_quantity: line.quantity,
            is_valid: false,
            issue: Some(issue),
            message: Some(message),
            available_quantity: None,
            title: None,
            unit_price: None,
            line_total: None,
        }
    }
}

/// Pass/fail report for a proposed cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartValidation {
    pub is_valid: bool,
    pub results: Vec<LineResult>,
    /// Sum of the lines that passed
    #[schema(value_type = String, example = "1000")]
    pub total_cart_value: Decimal,
}

/// A line that passed validation, priced for the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub title: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl CartValidation {
    pub fn priced_lines(&self) -> Vec<PricedLine> {
        self.results
            .iter()
            .filter(|r| r.is_valid)
            .filter_map(|r| {
                Some(PricedLine {
                    product_id: r.product_id,
                    title: r.title.clone()?,
                    quantity: r.requested_quantity,
                    unit_price: r.unit_price?,
                })
            })
            .collect()
    }
}

/// Read-only cart checks; never touches stock
#[derive(Clone)]
pub struct CartValidator {
    stock: StockService,
    settlement_currency: String,
    max_quantity_per_item: i32,
}

impl CartValidator {
    pub fn new(
        stock: StockService,
        settlement_currency: String,
        max_quantity_per_item: i32,
    ) -> Self {
        Self {
            stock,
            settlement_currency,
            max_quantity_per_item,
        }
    }

    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn validate(&self, lines: &[CartLine]) -> Result<CartValidation, ServiceError> {
        check_shape(lines)?;

        let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let products = self.stock.find_many(&ids).await?;
        let report = evaluate(
            lines,
            &products,
            &self.settlement_currency,
            self.max_quantity_per_item,
        );

        debug!(
            is_valid = report.is_valid,
            total = %report.total_cart_value,
            "Cart validated"
        );
        Ok(report)
    }
}

fn check_shape(lines: &[CartLine]) -> Result<(), ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "cart must contain at least one item".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(lines.len());
    if let Some(dup) = lines.iter().find(|l| !seen.insert(l.product_id)) {
        return Err(ServiceError::ValidationError(format!(
            "product {} appears more than once in the cart",
            dup.product_id
        )));
    }
    Ok(())
}

/// Applies the per-line purchase rules to already-loaded products
pub fn evaluate(
    lines: &[CartLine],
    products: &HashMap<Uuid, product::Model>,
    settlement_currency: &str,
    max_quantity_per_item: i32,
) -> CartValidation {
    let results: Vec<LineResult> = lines
        .iter()
        .map(|line| {
            evaluate_line(
                line,
                products.get(&line.product_id),
                settlement_currency,
                max_quantity_per_item,
            )
        })
        .collect();

    let total_cart_value = results
        .iter()
        .filter_map(|r| r.line_total)
        .sum::<Decimal>();

    CartValidation {
        is_valid: results.iter().all(|r| r.is_valid),
        results,
        total_cart_value,
    }
}

fn evaluate_line(
    line: &CartLine,
    product: Option<&product::Model>,
    settlement_currency: &str,
    cap: i32,
) -> LineResult {
    let Some(product) = product else {
        return LineResult::rejected(line, LineIssue::NotFound, "Product not found".to_string());
    };

    if product.product_type == ProductType::Affiliate {
        return LineResult::rejected(
            line,
            LineIssue::NotPurchasable,
            format!("{} is sold through a partner and cannot be ordered here", product.title),
        );
    }

    let allowed = product.quantity.max(0).min(cap);
    if line.quantity <= 0 || line.quantity > allowed {
        let mut result = LineResult::rejected(
            line,
            LineIssue::QuantityExceedsLimit,
            format!("At most {} unit(s) of {} can be ordered", allowed, product.title),
        );
        result.available_quantity = Some(allowed);
        result.title = Some(product.title.clone());
        return result;
    }

    let Some(unit_price) = product.resolve_price(settlement_currency) else {
        return LineResult::rejected(
            line,
            LineIssue::PriceUnavailable,
            format!("{} has no listed price", product.title),
        );
    };

    LineResult {
        product_id: line.product_id,
        requested_quantity: line.quantity,
        is_valid: true,
        issue: None,
        message: None,
        available_quantity: Some(allowed),
        title: Some(product.title.clone()),
        unit_price: Some(unit_price),
        line_total: Some(unit_price * Decimal::from(line.quantity)),
    }
}
