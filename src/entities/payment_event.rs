use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit record of one inbound gateway callback
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: String,
    /// `ipn`, `success`, `fail` or `cancel`
    pub source: String,
    pub gateway_status: String,
    #[sea_orm(nullable)]
    pub validation_id: Option<String>,
    /// How the ledger treated the callback
    pub outcome: String,
    #[sea_orm(column_type = "Json")]
    pub payload: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
