use std::{fmt, str::FromStr, sync::Arc};

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, DatabaseConnection, EntityTrait, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use utoipa::ToSchema;

use crate::{
    entities::shipping_charge::{self, Entity as ShippingChargeEntity},
    errors::ServiceError,
};

/// Delivery cost bucket. Which city falls in which zone is decided by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ShippingZone {
    #[serde(rename = "Dhaka-Chattogram")]
    DhakaChattogram,
    #[serde(rename = "Others")]
    Others,
}

impl ShippingZone {
    pub const ALL: [ShippingZone; 2] = [ShippingZone::DhakaChattogram, ShippingZone::Others];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingZone::DhakaChattogram => "Dhaka-Chattogram",
            ShippingZone::Others => "Others",
        }
    }
}

impl fmt::Display for ShippingZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShippingZone {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShippingZone::ALL
            .into_iter()
            .find(|zone| zone.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ServiceError::ValidationError(format!("Unknown shipping zone: {}", s)))
    }
}

/// One row of the fee table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZoneCharge {
    pub zone: ShippingZone,
    #[schema(value_type = String, example = "60")]
    pub amount: Decimal,
}

/// Maps a delivery zone to its flat charge
#[derive(Clone)]
pub struct ShippingCalculator {
    db: Arc<DatabaseConnection>,
}

impl ShippingCalculator {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn charge(&self, zone: ShippingZone) -> Result<Decimal, ServiceError> {
        ShippingChargeEntity::find_by_id(zone.as_str().to_string())
            .one(&*self.db)
            .await?
            .map(|row| row.amount)
            .ok_or_else(|| {
                error!(zone = %zone, "Shipping charge row missing");
                ServiceError::InternalError(format!(
                    "shipping charge for {} is not configured",
                    zone
                ))
            })
    }

    pub async fn list(&self) -> Result<Vec<ZoneCharge>, ServiceError> {
        let rows = ShippingChargeEntity::find()
            .order_by_asc(shipping_charge::Column::Zone)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                row.zone.parse::<ShippingZone>().ok().map(|zone| ZoneCharge {
                    zone,
                    amount: row.amount,
                })
            })
            .collect())
    }

    /// Replaces the fee of every listed zone in one transaction
    #[instrument(skip(self, charges), fields(zones = charges.len()))]
    pub async fn update(&self, charges: Vec<ZoneCharge>) -> Result<Vec<ZoneCharge>, ServiceError> {
        if charges.is_empty() {
            return Err(ServiceError::ValidationError(
                "at least one zone charge is required".to_string(),
            ));
        }
        if let Some(bad) = charges.iter().find(|c| c.amount < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(format!(
                "shipping charge for {} must not be negative",
                bad.zone
            )));
        }

        let txn = self.db.begin().await?;
        let now = Utc::now();
        for charge in &charges {
            let row = shipping_charge::ActiveModel {
                zone: sea_orm::Set(charge.zone.as_str().to_string()),
                amount: sea_orm::Set(charge.amount),
                updated_at: sea_orm::Set(now),
            };
            ShippingChargeEntity::insert(row)
                .on_conflict(
                    OnConflict::column(shipping_charge::Column::Zone)
                        .update_columns([
                            shipping_charge::Column::Amount,
                            shipping_charge::Column::UpdatedAt,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
        }
        txn.commit().await?;

        info!("Shipping charges updated");
        self.list().await
    }
}
