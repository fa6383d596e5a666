use std::{str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, info, instrument, warn};
use url::Url;
use utoipa::ToSchema;

use crate::{
    config::{AppConfig, PaymentGatewayConfig},
    entities::order::{self, PaymentDetails},
    errors::ServiceError,
    middleware_helpers::admin_key::constant_time_eq,
    services::orders::CustomerInfo,
};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying hex(HMAC-SHA256(ipn_secret, raw body))
pub const IPN_SIGNATURE_HEADER: &str = "x-signature";

/// Outbound payload for a hosted checkout session
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSessionRequest {
    pub tran_id: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub success_url: String,
    pub fail_url: String,
    pub cancel_url: String,
    pub ipn_url: String,
    pub customer: CustomerInfo,
    pub product_name: String,
    pub num_of_item: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    pub redirect_url: String,
    pub session_key: Option<String>,
}

/// Gateway's answer when asked to confirm a validation id
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayValidation {
    pub status: String,
    pub tran_id: Option<String>,
    pub amount: Option<Decimal>,
    pub bank_tran_id: Option<String>,
    pub card_type: Option<String>,
}

impl GatewayValidation {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.status.to_uppercase().as_str(), "VALID" | "VALIDATED")
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, ServiceError>;

    async fn validate_transaction(
        &self,
        validation_id: &str,
    ) -> Result<GatewayValidation, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    status: String,
    #[serde(rename = "GatewayPageURL", default)]
    gateway_page_url: Option<String>,
    #[serde(default)]
    failedreason: Option<String>,
    #[serde(default)]
    sessionkey: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    status: String,
    #[serde(default)]
    tran_id: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    bank_tran_id: Option<String>,
    #[serde(default)]
    card_type: Option<String>,
}

/// Form-post client for a hosted checkout gateway
pub struct HostedCheckoutClient {
    client: reqwest::Client,
    base_url: Url,
    session_path: String,
    validation_path: String,
    store_id: String,
    store_password: String,
}

impl HostedCheckoutClient {
    pub fn new(config: &PaymentGatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("gateway client: {}", e)))?;
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ServiceError::InternalError(format!("invalid gateway base url: {}", e))
        })?;

        Ok(Self {
            client,
            base_url,
            session_path: config.session_path.clone(),
            validation_path: config.validation_path.clone(),
            store_id: config.store_id.clone(),
            store_password: config.store_password.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        self.base_url
            .join(path)
            .map_err(|e| {
                ServiceError::InternalError(format!("invalid gateway path {}: {}", path, e))
            })
    }
}

#[async_trait]
impl PaymentGateway for HostedCheckoutClient {
    #[instrument(skip(self, request), fields(tran_id = %request.tran_id))]
    async fn create_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, ServiceError> {
        let customer = &request.customer;
        let form = [
            ("store_id", self.store_id.clone()),
            ("store_passwd", self.store_password.clone()),
            ("total_amount", request.total_amount.round_dp(2).to_string()),
            ("currency", request.currency.clone()),
            ("tran_id", request.tran_id.clone()),
            ("success_url", request.success_url.clone()),
            ("fail_url", request.fail_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("ipn_url", request.ipn_url.clone()),
            ("cus_name", customer.name.clone()),
            ("cus_email", customer.email.clone()),
            ("cus_phone", customer.phone.clone()),
            ("cus_add1", customer.address.clone()),
            ("cus_city", customer.city.clone()),
            ("cus_postcode", customer.postcode.clone()),
            ("cus_country", customer.country.clone()),
            ("shipping_method", "NO".to_string()),
            ("product_name", request.product_name.clone()),
            ("product_category", "general".to_string()),
            ("product_profile", "general".to_string()),
            ("num_of_item", request.num_of_item.to_string()),
        ];

        let response = self
            .client
            .post(self.endpoint(&self.session_path)?)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Gateway session request failed");
                ServiceError::GatewayError(format!("session request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::GatewayError(format!(
                "session request returned {}",
                response.status()
            )));
        }

        let body: SessionResponse = response
            .json()
            .await
            .map_err(|e| {
                ServiceError::GatewayError(format!("unexpected session response: {}", e))
            })?;

        match body.gateway_page_url.filter(|url| !url.is_empty()) {
            Some(redirect_url) if body.status.eq_ignore_ascii_case("SUCCESS") => {
                Ok(PaymentSession {
                    redirect_url,
                    session_key: body.sessionkey,
                })
            }
            _ => Err(ServiceError::GatewayError(
                body.failedreason
                    .unwrap_or_else(|| format!("session refused with status {}", body.status)),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn validate_transaction(
        &self,
        validation_id: &str,
    ) -> Result<GatewayValidation, ServiceError> {
        let response = self
            .client
            .get(self.endpoint(&self.validation_path)?)
            .query(&[
                ("val_id", validation_id),
                ("store_id", self.store_id.as_str()),
                ("store_passwd", self.store_password.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("validation request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::GatewayError(format!(
                "validation request returned {}",
                response.status()
            )));
        }

        let body: ValidationResponse = response.json().await.map_err(|e| {
            ServiceError::GatewayError(format!("unexpected validation response: {}", e))
        })?;

        Ok(GatewayValidation {
            status: body.status,
            tran_id: body.tran_id,
            amount: body.amount.as_deref().and_then(parse_amount),
            bank_tran_id: body.bank_tran_id,
            card_type: body.card_type,
        })
    }
}

/// Where a gateway callback came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackSource {
    /// Server-to-server notification
    Ipn,
    Success,
    Fail,
    Cancel,
}

impl CallbackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ipn => "ipn",
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        }
    }

    pub fn is_browser(&self) -> bool {
        !matches!(self, Self::Ipn)
    }
}

/// Fields posted by the gateway on both the redirect and the notification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GatewayCallback {
    #[serde(default)]
    pub tran_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub val_id: Option<String>,
    #[serde(default)]
    pub bank_tran_id: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub card_type: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Paid,
    Failed,
}

/// A callback reduced to what the ledger needs
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledPayment {
    pub order_id: String,
    pub outcome: PaymentOutcome,
    pub gateway_status: String,
    pub payment_details: Option<PaymentDetails>,
}

fn parse_amount(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim()).ok()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Maps either callback shape onto one payment outcome
pub fn normalize(
    source: CallbackSource,
    callback: &GatewayCallback,
    now: DateTime<Utc>,
) -> Result<ReconciledPayment, ServiceError> {
    let order_id = callback.tran_id.trim();
    if order_id.is_empty() {
        return Err(ServiceError::ValidationError(
            "callback is missing tran_id".to_string(),
        ));
    }

    let status = non_empty(&callback.status)
        .unwrap_or_default()
        .to_uppercase();
    let outcome = match (source, status.as_str()) {
        (CallbackSource::Fail | CallbackSource::Cancel, _) => PaymentOutcome::Failed,
        (_, "VALID" | "VALIDATED") => PaymentOutcome::Paid,
        (_, "FAILED" | "CANCELLED" | "EXPIRED" | "UNATTEMPTED") => PaymentOutcome::Failed,
        (_, other) => {
            return Err(ServiceError::GatewayError(format!(
                "unrecognized gateway status '{}'",
                other
            )))
        }
    };

    let payment_details = (outcome == PaymentOutcome::Paid).then(|| PaymentDetails {
        transaction_id: order_id.to_string(),
        validation_id: non_empty(&callback.val_id),
        bank_reference: non_empty(&callback.bank_tran_id),
        amount: callback.amount.as_deref().and_then(parse_amount),
        card_brand: non_empty(&callback.card_type),
        confirmed_at: now,
    });

    Ok(ReconciledPayment {
        order_id: order_id.to_string(),
        outcome,
        gateway_status: if status.is_empty() {
            source.as_str().to_uppercase()
        } else {
            status
        },
        payment_details,
    })
}

/// Checks the IPN signature against the raw request body
pub fn verify_ipn_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, signature.trim().to_lowercase().as_str())
}

/// Builds outbound sessions and turns inbound callbacks into ledger input.
/// Never mutates orders itself.
#[derive(Clone)]
pub struct PaymentGatewayAdapter {
    gateway: Arc<dyn PaymentGateway>,
    verify_with_gateway: bool,
    currency: String,
    callback_base: String,
}

impl PaymentGatewayAdapter {
    pub fn new(gateway: Arc<dyn PaymentGateway>, config: &AppConfig) -> Self {
        Self {
            gateway,
            verify_with_gateway: config.payment_gateway.verify_with_gateway,
            currency: config.settlement_currency.clone(),
            callback_base: config.public_url("/api/v1/payment"),
        }
    }

    fn callback_url(&self, kind: &str) -> String {
        format!("{}/{}", self.callback_base, kind)
    }

    /// Opens a hosted checkout session for `order` and returns its redirect URL
    #[instrument(skip(self, order, titles), fields(order_id = %order.id))]
    pub async fn initiate(
        &self,
        order: &order::Model,
        titles: &[String],
    ) -> Result<PaymentSession, ServiceError> {
        let request = PaymentSessionRequest {
            tran_id: order.id.clone(),
            total_amount: order.total,
            currency: self.currency.clone(),
            success_url: self.callback_url("success"),
            fail_url: self.callback_url("fail"),
            cancel_url: self.callback_url("cancel"),
            ipn_url: self.callback_url("ipn"),
            customer: CustomerInfo {
                name: order.customer_name.clone(),
                email: order.customer_email.clone(),
                phone: order.customer_phone.clone(),
                address: order.address.clone(),
                city: order.city.clone(),
                postcode: order.postcode.clone(),
                country: order.country.clone(),
            },
            product_name: titles.join(", ").chars().take(255).collect(),
            num_of_item: titles.len(),
        };

        let session = self.gateway.create_session(&request).await?;
        info!("Payment session opened");
        Ok(session)
    }

    /// Normalizes a callback. A VALID claim is confirmed with the gateway when
    /// it came through the customer's browser or when confirmation is enabled.
    #[instrument(
        skip(self, callback),
        fields(source = source.as_str(), tran_id = %callback.tran_id)
    )]
    pub async fn reconcile(
        &self,
        source: CallbackSource,
        callback: &GatewayCallback,
    ) -> Result<ReconciledPayment, ServiceError> {
        let mut payment = normalize(source, callback, Utc::now())?;
        if payment.outcome != PaymentOutcome::Paid
            || !(self.verify_with_gateway || source.is_browser())
        {
            return Ok(payment);
        }

        let Some(validation_id) = non_empty(&callback.val_id) else {
            return Err(ServiceError::ValidationError(
                "VALID callback carries no val_id to confirm".to_string(),
            ));
        };

        let confirmation = self.gateway.validate_transaction(&validation_id).await?;
        let same_order = confirmation
            .tran_id
            .as_deref()
            .map_or(true, |tran_id| tran_id == payment.order_id);
        if !confirmation.is_confirmed() || !same_order {
            warn!(status = %confirmation.status, "Gateway did not confirm payment claim");
            return Err(ServiceError::ValidationError(format!(
                "gateway did not confirm transaction {} (status {})",
                payment.order_id, confirmation.status
            )));
        }

        if let Some(details) = payment.payment_details.as_mut() {
            details.amount = confirmation.amount.or(details.amount);
            details.bank_reference = confirmation.bank_tran_id.or(details.bank_reference.take());
            details.card_brand = confirmation.card_type.or(details.card_brand.take());
        }
        Ok(payment)
    }
}
