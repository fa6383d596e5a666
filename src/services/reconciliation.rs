use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        affiliate_transaction,
        coupon::CouponUseType,
        order::{OrderStatus, PaymentMethod},
        payment_event,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        affiliates::AffiliateAttributor,
        cart_validator::{CartLine, CartValidator, LineResult, PricedLine},
        coupons::{self, CouponEngine, CustomerIdentity},
        orders::{
            compute_totals, CustomerInfo, NewOrder, NewOrderLine, OrderLedger, OrderRecord,
            TransitionOutcome,
        },
        payment_gateway::{
            CallbackSource, GatewayCallback, PaymentGatewayAdapter, PaymentOutcome,
        },
        shipping::{ShippingCalculator, ShippingZone},
    },
};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[validate]
    pub customer_info: CustomerInfo,
    #[validate(length(min = 1, max = 50))]
    pub cart_items: Vec<CartLine>,
    pub payment_method: PaymentMethod,
    pub shipping_zone: ShippingZone,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// Falls back to the affiliate cookie when absent
    #[serde(default)]
    pub affiliate_code: Option<String>,
    /// Total the client displayed; refused when it differs from the computed one
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub expected_total: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResult {
    pub order_id: String,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub discount: Decimal,
    #[schema(value_type = String)]
    pub shipping_charge: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    Accept,
    Reject,
}

impl OrderAction {
    pub fn target(&self) -> OrderStatus {
        match self {
            Self::Accept => OrderStatus::Accepted,
            Self::Reject => OrderStatus::Rejected,
        }
    }
}

/// How the ledger treated one gateway callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Applied,
    Duplicate,
    /// The order had already moved somewhere the callback cannot take it
    Ignored,
}

impl CallbackOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResolution {
    pub order_id: String,
    pub outcome: CallbackOutcome,
    pub payment: PaymentOutcome,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderProductsCheck {
    pub order_id: String,
    pub is_valid: bool,
    pub issues: Vec<LineResult>,
}

/// Drives one checkout across the collaborators and replays gateway
/// callbacks into the ledger
#[derive(Clone)]
pub struct ReconciliationCoordinator {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    cart: CartValidator,
    coupons: CouponEngine,
    shipping: ShippingCalculator,
    ledger: OrderLedger,
    gateway: PaymentGatewayAdapter,
    affiliates: AffiliateAttributor,
    currency: String,
}

impl ReconciliationCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        cart: CartValidator,
        coupons: CouponEngine,
        shipping: ShippingCalculator,
        ledger: OrderLedger,
        gateway: PaymentGatewayAdapter,
        affiliates: AffiliateAttributor,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            cart,
            coupons,
            shipping,
            ledger,
            gateway,
            affiliates,
            currency,
        }
    }

    /// Validates, prices and records a checkout. Pay-first orders also get a
    /// gateway session and move to `pending_payment`.
    #[instrument(
        skip(self, request),
        fields(lines = request.cart_items.len(), method = ?request.payment_method)
    )]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutResult, ServiceError> {
        request.validate()?;

        let validation = self.cart.validate(&request.cart_items).await?;
        if !validation.is_valid {
            metrics::counter!("storefront_checkout.outcomes", 1, "outcome" => "cart_invalid");
            return Err(ServiceError::CartInvalid(serde_json::to_value(&validation.results)?));
        }
        let lines = validation.priced_lines();
        let subtotal = validation.total_cart_value;

        let coupon_code = request
            .coupon_code
            .as_deref()
            .map(coupons::normalize_code)
            .filter(|code| !code.is_empty());
        let discount = match coupon_code.as_deref() {
            Some(code) => {
                let identity = CustomerIdentity::new(
                    &request.customer_info.email,
                    &request.customer_info.phone,
                    request.user_id,
                );
                self.discount_for(code, &identity, &lines_with_totals(&lines), subtotal)
                    .await?
            }
            None => Decimal::ZERO,
        };

        let shipping_charge = self.shipping.charge(request.shipping_zone).await?;
        let priced: Vec<(Decimal, i32)> =
            lines.iter().map(|l| (l.unit_price, l.quantity)).collect();
        let totals = compute_totals(&priced, discount, shipping_charge)?;

        if let Some(expected) = request.expected_total {
            if expected.round_dp(2) != totals.total.round_dp(2) {
                return Err(ServiceError::ValidationError(format!(
                    "amount {} does not match order total {}",
                    expected, totals.total
                )));
            }
        }

        let titles: Vec<String> = lines.iter().map(|l| l.title.clone()).collect();
        let record = self
            .ledger
            .create(NewOrder {
                user_id: request.user_id,
                customer: request.customer_info,
                payment_method: request.payment_method,
                shipping_zone: request.shipping_zone,
                currency: self.currency.clone(),
                lines: lines
                    .into_iter()
                    .map(|l| NewOrderLine {
                        product_id: l.product_id,
                        title: l.title,
                        quantity: l.quantity,
                        unit_price: l.unit_price,
                    })
                    .collect(),
                discount: totals.discount,
                shipping_charge: totals.shipping_charge,
                coupon_code,
                affiliate_code: request
                    .affiliate_code
                    .map(|c| c.trim().to_uppercase())
                    .filter(|c| !c.is_empty()),
            })
            .await?;

        let order = record.order;
        let mut result = CheckoutResult {
            order_id: order.id.clone(),
            status: order.status,
            payment_method: order.payment_method,
            subtotal: order.subtotal,
            discount: order.discount,
            shipping_charge: order.shipping_charge,
            total: order.total,
            redirect_url: None,
        };

        if order.payment_method == PaymentMethod::PayFirst {
            let session = match self.gateway.initiate(&order, &titles).await {
                Ok(session) => session,
                Err(e) => {
                    error!(
                        order_id = %order.id,
                        error = %e,
                        "Payment initiation failed, order left pending"
                    );
                    metrics::counter!(
                        "storefront_checkout.outcomes",
                        1,
                        "outcome" => "gateway_error"
                    );
                    return Err(e);
                }
            };
            let moved = self
                .ledger
                .apply_transition(&order.id, OrderStatus::PendingPayment, None)
                .await?;
            result.status = moved.order().status;
            result.redirect_url = Some(session.redirect_url);
        }

        metrics::counter!("storefront_checkout.outcomes", 1, "outcome" => "created");
        info!(order_id = %result.order_id, total = %result.total, "Checkout completed");
        Ok(result)
    }

    async fn discount_for(
        &self,
        code: &str,
        identity: &CustomerIdentity,
        lines: &[(Uuid, Decimal)],
        subtotal: Decimal,
    ) -> Result<Decimal, ServiceError> {
        let coupon = self.coupons.find_by_code(code).await?;
        let product_ids: Vec<Uuid> = lines.iter().map(|(id, _)| *id).collect();

        if let Err(reason) = coupons::evaluate(&coupon, &product_ids, Some(subtotal), Utc::now()) {
            return Err(ServiceError::ValidationError(format!(
                "Coupon {}: {}",
                coupon.code,
                reason.message()
            )));
        }
        if coupon.use_type == CouponUseType::OneTime
            && self.coupons.has_been_used(&coupon.code, identity).await?
        {
            return Err(ServiceError::CouponAlreadyUsed(coupon.code));
        }

        Ok(coupons::discount_for(&coupon, lines, subtotal))
    }

    /// Feeds one gateway callback into the ledger and audits it.
    ///
    /// Safe to call any number of times, in any order, for the same
    /// transaction.
    #[instrument(
        skip(self, callback),
        fields(source = source.as_str(), tran_id = %callback.tran_id)
    )]
    pub async fn handle_callback(
        &self,
        source: CallbackSource,
        callback: GatewayCallback,
    ) -> Result<CallbackResolution, ServiceError> {
        let result = self.reconcile_callback(source, &callback).await;

        let (gateway_status, outcome) = match &result {
            Ok((status, resolution)) => (status.clone(), resolution.outcome.as_str().to_string()),
            Err(e) => (
                callback.status.clone().unwrap_or_default(),
                format!("rejected:{}", e.code()),
            ),
        };
        metrics::counter!(
            "storefront_payments.callbacks",
            1,
            "source" => source.as_str(),
            "outcome" => outcome.clone()
        );
        self.audit(source, &callback, gateway_status, outcome).await;

        result.map(|(_, resolution)| resolution)
    }

    async fn reconcile_callback(
        &self,
        source: CallbackSource,
        callback: &GatewayCallback,
    ) -> Result<(String, CallbackResolution), ServiceError> {
        let payment = self.gateway.reconcile(source, callback).await?;
        let record = self.ledger.get(&payment.order_id).await?;

        if let Some(amount) = payment.payment_details.as_ref().and_then(|d| d.amount) {
            if amount.round_dp(2) != record.order.total.round_dp(2) {
                warn!(
                    order_id = %payment.order_id,
                    paid = %amount,
                    expected = %record.order.total,
                    "Payment amount does not match order total"
                );
                return Err(ServiceError::ValidationError(format!(
                    "paid amount {} does not match order total {}",
                    amount, record.order.total
                )));
            }
        }

        let target = match payment.outcome {
            PaymentOutcome::Paid => OrderStatus::Paid,
            PaymentOutcome::Failed => OrderStatus::Failed,
        };

        let (outcome, status) = match self
            .ledger
            .apply_transition(&payment.order_id, target, payment.payment_details.clone())
            .await
        {
            Ok(TransitionOutcome::Applied { order, .. }) => {
                self.event_sender
                    .send_or_log(Event::PaymentReconciled {
                        order_id: order.id.clone(),
                        paid: payment.outcome == PaymentOutcome::Paid,
                        source: source.as_str().to_string(),
                    })
                    .await;
                (CallbackOutcome::Applied, order.status)
            }
            Ok(TransitionOutcome::AlreadyInState(order)) => {
                info!(order_id = %order.id, "Duplicate gateway callback");
                (CallbackOutcome::Duplicate, order.status)
            }
            Err(ServiceError::InvalidTransition { from, .. }) => {
                info!(
                    order_id = %payment.order_id,
                    from = %from,
                    "Callback does not apply to current status"
                );
                let current = self.ledger.get(&payment.order_id).await?.order.status;
                (CallbackOutcome::Ignored, current)
            }
            Err(e) => return Err(e),
        };

        Ok((
            payment.gateway_status,
            CallbackResolution {
                order_id: payment.order_id,
                outcome,
                payment: payment.outcome,
                status,
            },
        ))
    }

    async fn audit(
        &self,
        source: CallbackSource,
        callback: &GatewayCallback,
        gateway_status: String,
        outcome: String,
    ) {
        let payload = serde_json::to_value(callback).unwrap_or_default();
        let row = payment_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(callback.tran_id.trim().to_string()),
            source: Set(source.as_str().to_string()),
            gateway_status: Set(gateway_status),
            validation_id: Set(callback.val_id.clone()),
            outcome: Set(outcome),
            payload: Set(payload),
            created_at: Set(Utc::now()),
        };
        if let Err(e) = row.insert(&*self.db).await {
            error!(error = %e, "Failed to record payment event");
        }
    }

    /// Administrative accept or reject
    #[instrument(skip(self))]
    pub async fn act(
        &self,
        order_id: &str,
        action: OrderAction,
    ) -> Result<TransitionOutcome, ServiceError> {
        self.ledger.apply_transition(order_id, action.target(), None).await
    }

    /// Re-runs the cart rules against an order's lines, or against a
    /// replacement line set, before an administrator accepts it
    #[instrument(skip(self, products))]
    pub async fn validate_order_products(
        &self,
        order_id: &str,
        products: Option<Vec<CartLine>>,
    ) -> Result<OrderProductsCheck, ServiceError> {
        let OrderRecord { order, items } = self.ledger.get(order_id).await?;
        let lines = products.unwrap_or_else(|| {
            items
                .iter()
                .map(|i| CartLine {
                    product_id: i.product_id,
                    quantity: i.quantity,
                })
                .collect()
        });

        let validation = self.cart.validate(&lines).await?;
        Ok(OrderProductsCheck {
            order_id: order.id,
            is_valid: validation.is_valid,
            issues: validation
                .results
                .into_iter()
                .filter(|r| !r.is_valid)
                .collect(),
        })
    }

    /// Explicit attribution for a paid or accepted order; the cookie code
    /// wins over the one captured at checkout
    #[instrument(skip(self, cookie_code))]
    pub async fn attribute_purchase(
        &self,
        order_id: &str,
        cookie_code: Option<String>,
    ) -> Result<Option<affiliate_transaction::Model>, ServiceError> {
        let record = self.ledger.get(order_id).await?;
        if !matches!(record.order.status, OrderStatus::Paid | OrderStatus::Accepted) {
            return Err(ServiceError::Conflict(format!(
                "Order {} is {} and cannot be attributed yet",
                order_id, record.order.status
            )));
        }

        let code = cookie_code
            .filter(|c| !c.trim().is_empty())
            .or_else(|| record.order.affiliate_code.clone());
        match code {
            Some(code) => self.affiliates.attribute_purchase(&code, &record.order).await,
            None => Ok(None),
        }
    }
}

fn lines_with_totals(lines: &[PricedLine]) -> Vec<(Uuid, Decimal)> {
    lines
        .iter()
        .map(|l| (l.product_id, l.unit_price * Decimal::from(l.quantity)))
        .collect()
}
