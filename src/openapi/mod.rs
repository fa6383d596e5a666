use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware_helpers::ADMIN_KEY_HEADER;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront order and payment API

Checkout, cart validation, coupons, shipping zones and the order ledger for a
single-merchant storefront, plus reconciliation of hosted payment gateway
callbacks and affiliate commission tracking.

## Order lifecycle

`pending` and `pending_payment` orders move to `paid`, `failed`, `accepted` or
`rejected`. Stock is decremented, one-time coupons are consumed and affiliate
commission is recorded only when an order is accepted.

## Administrative routes

Catalog, coupon, shipping and order management routes require the
`x-admin-key` header when an admin key is configured.

## Errors

```json
{
  "error": "Conflict",
  "code": "INSUFFICIENT_STOCK",
  "message": "Insufficient stock for 1 line(s) of order ORD...",
  "details": {"lines": [{"product_id": "...", "requested": 2, "available": 1}]},
  "timestamp": "2026-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Products", description = "Catalog stock levels"),
        (name = "Cart", description = "Cart validation"),
        (name = "Coupons", description = "Discount coupons"),
        (name = "Shipping", description = "Zone shipping charges"),
        (name = "Orders", description = "Checkout and order lifecycle"),
        (name = "Payments", description = "Hosted gateway sessions and callbacks"),
        (name = "Affiliates", description = "Referral tracking and commissions")
    ),
    paths(
        crate::handlers::products::create_product,
        crate::handlers::products::get_stock,
        crate::handlers::products::set_stock,

        crate::handlers::cart::validate_cart,

        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::validate_coupon,
        crate::handlers::coupons::record_usage,

        crate::handlers::shipping::list_charges,
        crate::handlers::shipping::update_charges,

        crate::handlers::orders::checkout,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::validate_products,
        crate::handlers::orders::order_action,

        crate::handlers::payments::initiate_payment,
        crate::handlers::payments::ipn,
        crate::handlers::payments::payment_success,
        crate::handlers::payments::payment_fail,
        crate::handlers::payments::payment_cancel,

        crate::handlers::affiliates::apply,
        crate::handlers::affiliates::approve,
        crate::handlers::affiliates::reject,
        crate::handlers::affiliates::stats,
        crate::handlers::affiliates::track_visit,
        crate::handlers::affiliates::purchase,
    ),
    components(
        schemas(
            crate::handlers::common::PaginationMeta,
            crate::services::cart_validator::LineIssue,
            crate::services::coupons::CouponRejection,
            crate::services::reconciliation::CallbackOutcome,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentMethod,
            crate::entities::order::PaymentDetails,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&AdminKeyAddon)
)]
pub struct ApiDocV1;

struct AdminKeyAddon;

impl Modify for AdminKeyAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "admin_key",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(ADMIN_KEY_HEADER))),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_pipeline_routes() {
        let json = serde_json::to_string_pretty(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/orders/checkout"));
        assert!(json.contains("/api/v1/payment/ipn"));
        assert!(json.contains("/api/v1/affiliate/track-visit"));
        assert!(json.contains("x-admin-key"));
    }
}
