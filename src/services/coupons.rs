use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        coupon::{self, CouponScope, CouponUseType, Entity as CouponEntity},
        used_coupon::{self, Entity as UsedCouponEntity},
    },
    errors::ServiceError,
};

/// Contact details a one-time coupon is bound to.
///
/// Construct through [`CustomerIdentity::new`] so every lookup and insert
/// sees the same normalized key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerIdentity {
    email: String,
    phone: String,
    user_id: Option<Uuid>,
}

impl CustomerIdentity {
    pub fn new(email: &str, phone: &str, user_id: Option<Uuid>) -> Self {
        Self {
            email: email.trim().to_lowercase(),
            phone: normalize_phone(phone),
            user_id,
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn phone(&self) -> &str {
        &self.phone
    }
}

/// Serde helper that strips surrounding whitespace from contact fields
/// before they are validated.
pub fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.trim().to_string())
}

fn normalize_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if trimmed.starts_with('+') {
        format!("+{}", digits)
    } else {
        digits
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCouponInput {
    #[validate(length(min = 3, max = 32))]
    pub code: String,
    pub scope: CouponScope,
    pub product_id: Option<Uuid>,
    #[schema(value_type = String, example = "10")]
    pub discount_percentage: Decimal,
    #[schema(value_type = Option<String>, example = "1000")]
    pub min_cart_total: Option<Decimal>,
    pub use_type: CouponUseType,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Reason a known coupon does not apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponRejection {
    Inactive,
    Expired,
    BelowMinimum,
    NotApplicable,
}

impl CouponRejection {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Inactive => "Coupon is not active",
            Self::Expired => "Coupon has expired",
            Self::BelowMinimum => "Cart total is below the coupon minimum",
            Self::NotApplicable => "Coupon does not apply to any product in the cart",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouponCheck {
    pub valid: bool,
    pub code: String,
    pub scope: CouponScope,
    #[schema(value_type = String)]
    pub discount_percentage: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub min_cart_total: Option<Decimal>,
    pub use_type: CouponUseType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CouponRejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CouponCheck {
    fn from_outcome(coupon: &coupon::Model, outcome: Result<(), CouponRejection>) -> Self {
        Self {
            valid: outcome.is_ok(),
            code: coupon.code.clone(),
            scope: coupon.scope,
            discount_percentage: coupon.discount_percentage,
            product_id: coupon.product_id,
            min_cart_total: coupon.min_cart_total,
            use_type: coupon.use_type,
            reason: outcome.err(),
            message: outcome.err().map(|r| r.message().to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageRecord {
    Recorded,
    /// Multiple-use coupons keep no per-customer ledger
    NotTracked,
}

/// Checks a coupon against a cart. `subtotal` is only consulted for global
/// coupons with a minimum; without it the minimum is not enforced.
pub fn evaluate(
    coupon: &coupon::Model,
    product_ids: &[Uuid],
    subtotal: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::Inactive);
    }
    if coupon.is_expired_at(now) {
        return Err(CouponRejection::Expired);
    }

    match coupon.scope {
        CouponScope::Global => match (coupon.min_cart_total, subtotal) {
            (Some(min), Some(subtotal)) if subtotal < min => Err(CouponRejection::BelowMinimum),
            _ => Ok(()),
        },
        CouponScope::Product => {
            let applies = coupon
                .product_id
                .map_or(false, |target| product_ids.contains(&target));
            if applies {
                Ok(())
            } else {
                Err(CouponRejection::NotApplicable)
            }
        }
    }
}

/// Discount granted by an applicable coupon.
///
/// Global coupons discount the whole subtotal; product coupons only the
/// matching lines. `lines` are `(product_id, line_total)` pairs.
pub fn discount_for(
    coupon: &coupon::Model,
    lines: &[(Uuid, Decimal)],
    subtotal: Decimal,
) -> Decimal {
    let base = match coupon.scope {
        CouponScope::Global => subtotal,
        CouponScope::Product => lines
            .iter()
            .filter(|(product_id, _)| Some(*product_id) == coupon.product_id)
            .map(|(_, total)| *total)
            .sum(),
    };

    let discount = (base * coupon.discount_percentage / Decimal::ONE_HUNDRED).round_dp(2);
    discount.min(base).max(Decimal::ZERO)
}

/// Records consumption of `code` by `identity` on any connection, including
/// an open transaction.
///
/// One-time coupons are guarded by a single conditional insert against the
/// `(coupon_code, email, phone)` unique key, so concurrent duplicates cannot
/// both succeed.
pub async fn record_usage_in<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    identity: &CustomerIdentity,
    order_id: Option<&str>,
) -> Result<UsageRecord, ServiceError> {
    let code = normalize_code(code);
    let coupon = CouponEntity::find()
        .filter(coupon::Column::Code.eq(code.as_str()))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", code)))?;

    if coupon.use_type == CouponUseType::Multiple {
        return Ok(UsageRecord::NotTracked);
    }

    let row = used_coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        coupon_code: Set(coupon.code.clone()),
        email: Set(identity.email.clone()),
        phone: Set(identity.phone.clone()),
        user_id: Set(identity.user_id),
        order_id: Set(order_id.map(str::to_string)),
        used_at: Set(Utc::now()),
    };

    let inserted = match UsedCouponEntity::insert(row)
        .on_conflict(
            OnConflict::columns([
                used_coupon::Column::CouponCode,
                used_coupon::Column::Email,
                used_coupon::Column::Phone,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await
    {
        Ok(rows) => rows,
        Err(DbErr::RecordNotInserted) => 0,
        Err(e) => return Err(e.into()),
    };

    if inserted == 0 {
        metrics::counter!("storefront_coupons.usage_conflicts", 1);
        warn!(code = %coupon.code, "One-time coupon already consumed by this identity");
        return Err(ServiceError::CouponAlreadyUsed(coupon.code));
    }

    Ok(UsageRecord::Recorded)
}

/// Validates and records consumption of discount codes
#[derive(Clone)]
pub struct CouponEngine {
    db: Arc<DatabaseConnection>,
}

impl CouponEngine {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a coupon. An active global coupon replaces any other active
    /// global coupon.
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: CreateCouponInput) -> Result<coupon::Model, ServiceError> {
        input.validate()?;
        if input.discount_percentage <= Decimal::ZERO
            || input.discount_percentage > Decimal::ONE_HUNDRED
        {
            return Err(ServiceError::ValidationError(
                "discountPercentage must be within (0, 100]".to_string(),
            ));
        }
        if input.min_cart_total.map_or(false, |m| m < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "minCartTotal must not be negative".to_string(),
            ));
        }
        let product_id = match (input.scope, input.product_id) {
            (CouponScope::Product, None) => {
                return Err(ServiceError::ValidationError(
                    "product coupons require a productId".to_string(),
                ))
            }
            (CouponScope::Product, Some(id)) => Some(id),
            (CouponScope::Global, _) => None,
        };

        let code = normalize_code(&input.code);
        let txn = self.db.begin().await?;

        let exists = CouponEntity::find()
            .filter(coupon::Column::Code.eq(code.as_str()))
            .one(&txn)
            .await?
            .is_some();
        if exists {
            txn.rollback().await?;
            return Err(ServiceError::Conflict(format!("Coupon {} already exists", code)));
        }

        if input.scope == CouponScope::Global && input.is_active {
            let replaced = CouponEntity::update_many()
                .col_expr(coupon::Column::IsActive, Expr::value(false))
                .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(coupon::Column::Scope.eq(CouponScope::Global))
                .filter(coupon::Column::IsActive.eq(true))
                .exec(&txn)
                .await?;
            if replaced.rows_affected > 0 {
                info!(replaced = replaced.rows_affected, "Deactivated previous global coupon");
            }
        }

        let now = Utc::now();
        let created = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            scope: Set(input.scope),
            product_id: Set(product_id),
            discount_percentage: Set(input.discount_percentage),
            min_cart_total: Set(match input.scope {
                CouponScope::Global => input.min_cart_total,
                CouponScope::Product => None,
            }),
            use_type: Set(input.use_type),
            expires_at: Set(input.expires_at),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        info!(coupon_id = %created.id, scope = ?created.scope, "Coupon created");
        Ok(created)
    }

    pub async fn find_by_code(&self, code: &str) -> Result<coupon::Model, ServiceError> {
        let code = normalize_code(code);
        CouponEntity::find()
            .filter(coupon::Column::Code.eq(code.as_str()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", code)))
    }

    /// Side-effect free applicability check
    #[instrument(skip(self, product_ids))]
    pub async fn validate(
        &self,
        code: &str,
        product_ids: &[Uuid],
        subtotal: Option<Decimal>,
    ) -> Result<CouponCheck, ServiceError> {
        let coupon = self.find_by_code(code).await?;
        let outcome = evaluate(&coupon, product_ids, subtotal, Utc::now());
        Ok(CouponCheck::from_outcome(&coupon, outcome))
    }

    pub async fn has_been_used(
        &self,
        code: &str,
        identity: &CustomerIdentity,
    ) -> Result<bool, ServiceError> {
        let used = UsedCouponEntity::find()
            .filter(used_coupon::Column::CouponCode.eq(normalize_code(code)))
            .filter(used_coupon::Column::Email.eq(identity.email.as_str()))
            .filter(used_coupon::Column::Phone.eq(identity.phone.as_str()))
            .one(&*self.db)
            .await?;
        Ok(used.is_some())
    }

    #[instrument(skip(self, identity))]
    pub async fn record_usage(
        &self,
        code: &str,
        identity: &CustomerIdentity,
        order_id: Option<&str>,
    ) -> Result<UsageRecord, ServiceError> {
        let record = record_usage_in(&*self.db, code, identity, order_id).await?;
        if record == UsageRecord::Recorded {
            info!(code = %normalize_code(code), "Coupon usage recorded");
        }
        Ok(record)
    }
}
