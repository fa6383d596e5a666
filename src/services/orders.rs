//! Authoritative order store.
//!
//! Every status change funnels through [`OrderLedger::apply_transition`], a
//! compare-and-set on `(status, version)`. Acceptance commits stock, coupon
//! and commission inside the same database transaction as the status write,
//! so duplicate callbacks or admin clicks can never apply them twice.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        affiliate_transaction,
        order::{self, Entity as OrderEntity, OrderStatus, PaymentDetails, PaymentMethod},
        order_item::{self, Entity as OrderItemEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        affiliates,
        coupons::{self, CustomerIdentity, UsageRecord},
        order_status,
        shipping::ShippingZone,
        stock,
    },
};

const MAX_CAS_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[serde(deserialize_with = "coupons::trimmed")]
    #[validate(email)]
    pub email: String,
    #[serde(deserialize_with = "coupons::trimmed")]
    #[validate(length(min = 6, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 500))]
    pub address: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(max = 20))]
    #[serde(default)]
    pub postcode: String,
    #[validate(length(min = 2, max = 60))]
    pub country: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderLine {
    pub product_id: Uuid,
    pub title: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Everything the ledger needs to persist a priced checkout
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Option<Uuid>,
    pub customer: CustomerInfo,
    pub payment_method: PaymentMethod,
    pub shipping_zone: ShippingZone,
    pub currency: String,
    pub lines: Vec<NewOrderLine>,
    pub discount: Decimal,
    pub shipping_charge: Decimal,
    pub coupon_code: Option<String>,
    pub affiliate_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping_charge: Decimal,
    pub total: Decimal,
}

/// `total = Σ(unit_price × quantity) − discount + shipping_charge`, refusing
/// anything that would go negative.
pub fn compute_totals(
    lines: &[(Decimal, i32)],
    discount: Decimal,
    shipping_charge: Decimal,
) -> Result<OrderTotals, ServiceError> {
    if lines.iter().any(|(price, qty)| *price < Decimal::ZERO || *qty <= 0) {
        return Err(ServiceError::ValidationError(
            "order lines need a non-negative price and a positive quantity".to_string(),
        ));
    }
    if discount < Decimal::ZERO || shipping_charge < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "discount and shipping charge must not be negative".to_string(),
        ));
    }

    let subtotal: Decimal = lines
        .iter()
        .map(|(price, qty)| *price * Decimal::from(*qty))
        .sum();
    if discount > subtotal {
        return Err(ServiceError::ValidationError(
            "discount exceeds order subtotal".to_string(),
        ));
    }

    Ok(OrderTotals {
        subtotal,
        discount,
        shipping_charge,
        total: subtotal - discount + shipping_charge,
    })
}

/// An order with its lines in order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied {
        order: order::Model,
        from: OrderStatus,
    },
    /// The order already had the target status; nothing was written
    AlreadyInState(order::Model),
}

impl TransitionOutcome {
    pub fn order(&self) -> &order::Model {
        match self {
            Self::Applied { order, .. } | Self::AlreadyInState(order) => order,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[derive(Default)]
struct CommittedEffects {
    stock_lines: usize,
    coupon: Option<String>,
    commission: Option<affiliate_transaction::Model>,
}

enum Attempt {
    Done(TransitionOutcome, CommittedEffects),
    Retry,
}

pub fn generate_order_id() -> String {
    format!("ORD{}", Uuid::new_v4().simple().to_string().to_uppercase())
}

#[derive(Clone)]
pub struct OrderLedger {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    commission_rate: Decimal,
}

impl OrderLedger {
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

    /// Persists a new order in `pending` together with its lines
    #[instrument(skip(self, new_order), fields(lines = new_order.lines.len()))]
    pub async fn create(&self, new_order: NewOrder) -> Result<OrderRecord, ServiceError> {
        new_order.customer.validate()?;
        if new_order.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "order must contain at least one line".to_string(),
            ));
        }

        let priced: Vec<(Decimal, i32)> = new_order
            .lines
            .iter()
            .map(|l| (l.unit_price, l.quantity))
            .collect();
        let totals = compute_totals(&priced, new_order.discount, new_order.shipping_charge)?;

        let order_id = generate_order_id();
        let now = Utc::now();
        let customer = new_order.customer;

        let txn = self.db.begin().await?;
        let order = order::ActiveModel {
            id: Set(order_id.clone()),
            user_id: Set(new_order.user_id),
            customer_name: Set(customer.name),
            customer_email: Set(customer.email),
            customer_phone: Set(customer.phone),
            address: Set(customer.address),
            city: Set(customer.city),
            postcode: Set(customer.postcode),
            country: Set(customer.country),
            payment_method: Set(new_order.payment_method),
            status: Set(OrderStatus::Pending),
            shipping_zone: Set(new_order.shipping_zone.as_str().to_string()),
            currency: Set(new_order.currency),
            subtotal: Set(totals.subtotal),
            discount: Set(totals.discount),
            shipping_charge: Set(totals.shipping_charge),
            total: Set(totals.total),
            coupon_code: Set(new_order.coupon_code),
            affiliate_code: Set(new_order.affiliate_code),
            payment_details: Set(None),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert order");
            ServiceError::DatabaseError(e)
        })?;

        let mut items = Vec::with_capacity(new_order.lines.len());
        for (idx, line) in new_order.lines.into_iter().enumerate() {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id.clone()),
                product_id: Set(line.product_id),
                title: Set(line.title),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_no: Set(idx as i32 + 1),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }
        txn.commit().await?;

        info!(order_id = %order.id, total = %order.total, "Order created");
        metrics::counter!("storefront_orders.created", 1);
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id.clone(),
                total: order.total,
            })
            .await;

        Ok(OrderRecord { order, items })
    }

    pub async fn get(&self, order_id: &str) -> Result<OrderRecord, ServiceError> {
        let order = OrderEntity::find_by_id(order_id.to_string())
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::LineNo)
            .all(&*self.db)
            .await?;
        Ok(OrderRecord { order, items })
    }

    /// Newest first; `page` is 1-based
    pub async fn list(
        &self,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query.paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Moves `order_id` to `target` exactly once.
    ///
    /// Re-applying the current status is a no-op. `payment_details` is stored
    /// only on the move into `paid`. When the order changed underneath us the
    /// attempt is re-evaluated against the fresh status.
    #[instrument(skip(self, payment_details), fields(order_id = %order_id, to = %target))]
    pub async fn apply_transition(
        &self,
        order_id: &str,
        target: OrderStatus,
        payment_details: Option<PaymentDetails>,
    ) -> Result<TransitionOutcome, ServiceError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let txn = self.db.begin().await?;
            match self
                .try_transition(&txn, order_id, target, payment_details.as_ref())
                .await
            {
                Ok(Attempt::Done(outcome, effects)) => {
                    txn.commit().await?;
                    self.announce(&outcome, effects).await;
                    return Ok(outcome);
                }
                Ok(Attempt::Retry) => {
                    txn.rollback().await?;
                    debug!(attempt, "Order changed concurrently, retrying");
                }
                Err(e) => {
                    if let Err(rollback) = txn.rollback().await {
                        error!(error = %rollback, "Rollback after failed transition failed");
                    }
                    return Err(e);
                }
            }
        }

        warn!("Giving up after repeated concurrent updates");
        Err(ServiceError::Conflict(format!(
            "Order {} is being updated concurrently",
            order_id
        )))
    }

    async fn try_transition(
        &self,
        txn: &DatabaseTransaction,
        order_id: &str,
        target: OrderStatus,
        payment_details: Option<&PaymentDetails>,
    ) -> Result<Attempt, ServiceError> {
        let current = OrderEntity::find_by_id(order_id.to_string())
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if current.status == target {
            return Ok(Attempt::Done(
                TransitionOutcome::AlreadyInState(current),
                CommittedEffects::default(),
            ));
        }
        if !order_status::can_transition(current.status, target) {
            return Err(ServiceError::InvalidTransition {
                order_id: order_id.to_string(),
                from: current.status.to_string(),
                to: target.to_string(),
            });
        }

        let now = Utc::now();
        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(target))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .col_expr(order::Column::UpdatedAt, Expr::value(now));
        if target == OrderStatus::Paid {
            if let Some(details) = payment_details {
                update = update.col_expr(
                    order::Column::PaymentDetails,
                    Expr::value(serde_json::to_value(details)?),
                );
            }
        }
        let swapped = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(current.status))
            .filter(order::Column::Version.eq(current.version))
            .exec(txn)
            .await?;
        if swapped.rows_affected == 0 {
            return Ok(Attempt::Retry);
        }

        let effects = if order_status::commits_side_effects(target) {
            self.commit_acceptance(txn, &current).await?
        } else {
            CommittedEffects::default()
        };

        let order = OrderEntity::find_by_id(order_id.to_string())
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        Ok(Attempt::Done(
            TransitionOutcome::Applied {
                order,
                from: current.status,
            },
            effects,
        ))
    }

    async fn commit_acceptance(
        &self,
        txn: &DatabaseTransaction,
        order: &order::Model,
    ) -> Result<CommittedEffects, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id.as_str()))
            .all(txn)
            .await?;
        let lines: Vec<(Uuid, i32)> = items.iter().map(|i| (i.product_id, i.quantity)).collect();

        let shortfalls = stock::commit_lines(txn, &lines).await?;
        if !shortfalls.is_empty() {
            metrics::counter!("storefront_orders.stock_conflicts", 1);
            return Err(ServiceError::InsufficientStock {
                order_id: order.id.clone(),
                lines: shortfalls,
            });
        }

        let mut effects = CommittedEffects {
            stock_lines: lines.len(),
            ..Default::default()
        };

        if let Some(code) = order.coupon_code.as_deref() {
            let identity =
                CustomerIdentity::new(&order.customer_email, &order.customer_phone, order.user_id);
            match coupons::record_usage_in(txn, code, &identity, Some(&order.id)).await {
                Ok(UsageRecord::Recorded) => effects.coupon = Some(code.to_string()),
                Ok(UsageRecord::NotTracked) => {}
                Err(ServiceError::NotFound(_)) => {
                    warn!(order_id = %order.id, code, "Coupon on order no longer exists");
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(code) = order.affiliate_code.as_deref() {
            effects.commission =
                affiliates::attribute_in(txn, code, order, self.commission_rate).await?;
        }

        Ok(effects)
    }

    async fn announce(&self, outcome: &TransitionOutcome, effects: CommittedEffects) {
        let TransitionOutcome::Applied { order, from } = outcome else {
            debug!("Transition already applied");
            return;
        };

        info!(order_id = %order.id, from = %from, to = %order.status, "Order transitioned");
        metrics::counter!("storefront_orders.transitions", 1, "to" => order.status.to_string());

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.id.clone(),
                old_status: *from,
                new_status: order.status,
            })
            .await;
        if effects.stock_lines > 0 {
            self.event_sender
                .send_or_log(Event::StockCommitted {
                    order_id: order.id.clone(),
                    lines: effects.stock_lines,
                })
                .await;
        }
        if let Some(code) = effects.coupon {
            self.event_sender
                .send_or_log(Event::CouponConsumed {
                    code,
                    order_id: Some(order.id.clone()),
                })
                .await;
        }
        if let Some(tx) = effects.commission {
            self.event_sender
                .send_or_log(Event::CommissionRecorded {
                    order_id: tx.order_id,
                    affiliate_id: tx.affiliate_id,
                    commission: tx.commission,
                })
                .await;
        }
    }
}
