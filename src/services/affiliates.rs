use std::{net::IpAddr, sync::Arc};

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DbErr, EntityTrait, PaginatorTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        affiliate::{self, AffiliateStatus, Entity as AffiliateEntity},
        affiliate_transaction::{self, Entity as AffiliateTransactionEntity},
        affiliate_visit::{self, Entity as AffiliateVisitEntity},
        order,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

const CODE_LENGTH: usize = 8;
const CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AffiliateStats {
    pub affiliate_code: String,
    pub status: AffiliateStatus,
    pub visits: u64,
    pub transactions: u64,
    #[schema(value_type = String)]
    pub total_commission: Decimal,
}

/// Hides the host part of a visitor address before it is stored
pub fn mask_ip(raw: &str) -> String {
    match raw.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, c, _] = v4.octets();
            format!("{}.{}.{}.0", a, b, c)
        }
        Ok(IpAddr::V6(v6)) => {
            let s = v6.segments();
            format!("{:x}:{:x}:{:x}::", s[0], s[1], s[2])
        }
        Err(_) => "unknown".to_string(),
    }
}

pub fn commission_for(amount: Decimal, rate: Decimal) -> Decimal {
    (amount.max(Decimal::ZERO) * rate).round_dp(2)
}

fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}

async fn approved_by_code<C: ConnectionTrait>(
    conn: &C,
    code: &str,
) -> Result<Option<affiliate::Model>, DbErr> {
    AffiliateEntity::find()
        .filter(affiliate::Column::AffiliateCode.eq(code.trim().to_uppercase()))
        .filter(affiliate::Column::Status.eq(AffiliateStatus::Approved))
        .one(conn)
        .await
}

/// Credits commission for `order` to the affiliate behind `code`.
///
/// Returns `None` when there is nothing to credit: unknown or unapproved
/// code, a self-referral, or an order that was already attributed.
/// The unique `order_id` key makes repeated calls harmless.
pub async fn attribute_in<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    order: &order::Model,
    rate: Decimal,
) -> Result<Option<affiliate_transaction::Model>, ServiceError> {
    let Some(affiliate) = approved_by_code(conn, code).await? else {
        debug!(order_id = %order.id, "No approved affiliate for code");
        return Ok(None);
    };

    if order.user_id == Some(affiliate.user_id) {
        info!(order_id = %order.id, affiliate_id = %affiliate.id, "Skipping self-referral");
        return Ok(None);
    }

    let amount = order.subtotal - order.discount;
    let record = affiliate_transaction::Model {
        id: Uuid::new_v4(),
        affiliate_id: affiliate.id,
        user_id: order.user_id,
        order_id: order.id.clone(),
        product_id: None,
        amount,
        commission: commission_for(amount, rate),
        created_at: Utc::now(),
    };

    let row = affiliate_transaction::ActiveModel {
        id: Set(record.id),
        affiliate_id: Set(record.affiliate_id),
        user_id: Set(record.user_id),
        order_id: Set(record.order_id.clone()),
        product_id: Set(record.product_id),
        amount: Set(record.amount),
        commission: Set(record.commission),
        created_at: Set(record.created_at),
    };

    let inserted = match AffiliateTransactionEntity::insert(row)
        .on_conflict(
            OnConflict::column(affiliate_transaction::Column::OrderId)
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
        debug!(order_id = %order.id, "Order already attributed");
        return Ok(None);
    }

    metrics::counter!("storefront_affiliates.commissions", 1);
    Ok(Some(record))
}

/// Affiliate lifecycle, click tracking and purchase attribution
#[derive(Clone)]
pub struct AffiliateAttributor {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    commission_rate: Decimal,
}

impl AffiliateAttributor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        commission_rate: Decimal,
    ) -> Self {
        Self {
            db,
            event_sender,
            commission_rate,
        }
    }

    pub fn commission_rate(&self) -> Decimal {
        self.commission_rate
    }

    /// Records a pending application. The unique key on `user_id` decides
    /// concurrent applications from the same user.
    #[instrument(skip(self))]
    pub async fn apply(&self, user_id: Uuid) -> Result<affiliate::Model, ServiceError> {
        let now = Utc::now();
        let application = affiliate::Model {
            id: Uuid::new_v4(),
            user_id,
            status: AffiliateStatus::Pending,
            affiliate_code: None,
            created_at: now,
            updated_at: now,
            approved_at: None,
        };
        let row: affiliate::ActiveModel = application.clone().into();

        let inserted = match AffiliateEntity::insert(row)
            .on_conflict(
                OnConflict::column(affiliate::Column::UserId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await
        {
            Ok(rows) => rows,
            Err(DbErr::RecordNotInserted) => 0,
            Err(e) => return Err(e.into()),
        };
        if inserted == 0 {
            return Err(ServiceError::Conflict(format!(
                "User {} has already applied",
                user_id
            )));
        }

        info!(affiliate_id = %application.id, "Affiliate application received");
        Ok(application)
    }

    pub async fn get(&self, affiliate_id: Uuid) -> Result<affiliate::Model, ServiceError> {
        AffiliateEntity::find_by_id(affiliate_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Affiliate {} not found", affiliate_id)))
    }

    /// Approves an affiliate and assigns a fresh unique code.
    /// Approving an approved affiliate returns it unchanged.
    #[instrument(skip(self))]
    pub async fn approve(&self, affiliate_id: Uuid) -> Result<affiliate::Model, ServiceError> {
        let existing = self.get(affiliate_id).await?;
        if existing.status == AffiliateStatus::Approved {
            return Ok(existing);
        }

        let mut code = None;
        for _ in 0..CODE_ATTEMPTS {
            let candidate = generate_code();
            let taken = AffiliateEntity::find()
                .filter(affiliate::Column::AffiliateCode.eq(candidate.as_str()))
                .one(&*self.db)
                .await?
                .is_some();
            if !taken {
                code = Some(candidate);
                break;
            }
            warn!("Affiliate code collision, regenerating");
        }
        let code = code.ok_or_else(|| {
            ServiceError::InternalError("could not allocate a unique affiliate code".to_string())
        })?;

        let now = Utc::now();
        let mut active: affiliate::ActiveModel = existing.into();
        active.status = Set(AffiliateStatus::Approved);
        active.affiliate_code = Set(Some(code.clone()));
        active.approved_at = Set(Some(now));
        active.updated_at = Set(now);
        let approved = active.update(&*self.db).await?;

        info!(affiliate_id = %approved.id, "Affiliate approved");
        self.event_sender
            .send_or_log(Event::AffiliateApproved {
                affiliate_id: approved.id,
                code,
            })
            .await;
        Ok(approved)
    }

    /// Rejects an application; a rejected affiliate's code stops resolving
    #[instrument(skip(self))]
    pub async fn reject(&self, affiliate_id: Uuid) -> Result<affiliate::Model, ServiceError> {
        let existing = self.get(affiliate_id).await?;
        if existing.status == AffiliateStatus::Rejected {
            return Ok(existing);
        }

        let mut active: affiliate::ActiveModel = existing.into();
        active.status = Set(AffiliateStatus::Rejected);
        active.updated_at = Set(Utc::now());
        let rejected = active.update(&*self.db).await?;

        info!(affiliate_id = %rejected.id, "Affiliate rejected");
        Ok(rejected)
    }

    /// Logs a click. Unknown or unapproved codes are dropped without error;
    /// the return value is for internal callers only.
    #[instrument(skip(self, visitor_ip))]
    pub async fn track_visit(
        &self,
        code: &str,
        page: &str,
        visitor_ip: &str,
    ) -> Result<bool, ServiceError> {
        let Some(affiliate) = approved_by_code(&*self.db, code).await? else {
            debug!("Ignoring visit for unresolved affiliate code");
            return Ok(false);
        };
        let Some(code) = affiliate.affiliate_code else {
            return Ok(false);
        };

        affiliate_visit::ActiveModel {
            id: Set(Uuid::new_v4()),
            affiliate_code: Set(code),
            visited_page: Set(page.chars().take(512).collect()),
            visitor_ip: Set(mask_ip(visitor_ip)),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        metrics::counter!("storefront_affiliates.visits", 1);
        Ok(true)
    }

    /// Attribution outside the acceptance transaction
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn attribute_purchase(
        &self,
        code: &str,
        order: &order::Model,
    ) -> Result<Option<affiliate_transaction::Model>, ServiceError> {
        let record = attribute_in(&*self.db, code, order, self.commission_rate).await?;
        if let Some(record) = &record {
            self.event_sender
                .send_or_log(Event::CommissionRecorded {
                    order_id: record.order_id.clone(),
                    affiliate_id: record.affiliate_id,
                    commission: record.commission,
                })
                .await;
        }
        Ok(record)
    }

    pub async fn stats(&self, code: &str) -> Result<AffiliateStats, ServiceError> {
        let code = code.trim().to_uppercase();
        let affiliate = AffiliateEntity::find()
            .filter(affiliate::Column::AffiliateCode.eq(code.as_str()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Affiliate code {} not found", code)))?;

        let visits = AffiliateVisitEntity::find()
            .filter(affiliate_visit::Column::AffiliateCode.eq(code.as_str()))
            .count(&*self.db)
            .await?;
        let transactions = AffiliateTransactionEntity::find()
            .filter(affiliate_transaction::Column::AffiliateId.eq(affiliate.id))
            .all(&*self.db)
            .await?;

        Ok(AffiliateStats {
            affiliate_code: code,
            status: affiliate.status,
            visits,
            transactions: transactions.len() as u64,
            total_commission: transactions.iter().map(|t| t.commission).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case("203.0.113.77", "203.0.113.0")]
    #[case(" 10.1.2.3 ", "10.1.2.0")]
    #[case("2001:db8:85a3::8a2e:370:7334", "2001:db8:85a3::")]
    #[case("not-an-ip", "unknown")]
    fn masks_host_part(#[case] raw: &str, #[case] masked: &str) {
        assert_eq!(mask_ip(raw), masked);
    }

    #[test]
    fn commission_uses_rate_and_rounds() {
        assert_eq!(commission_for(dec!(1000), dec!(0.08)), dec!(80));
        assert_eq!(commission_for(dec!(333.33), dec!(0.08)), dec!(26.67));
        assert_eq!(commission_for(dec!(-5), dec!(0.08)), dec!(0));
    }

    #[test]
    fn generated_codes_are_uppercase_alphanumeric() {
        let code = generate_code();
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
