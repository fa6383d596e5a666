mod common;

use axum::http::{header, Method, StatusCode};
use common::{cart_line, customer_info, decimal, read_json, TestApp};
use futures::future::join_all;
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde_json::{json, Value};
use sha2::Sha256;
use storefront_api::{
    entities::payment_event,
    services::payment_gateway::{GatewayValidation, IPN_SIGNATURE_HEADER},
};

const IPN: &str = "/api/v1/payment/ipn";

/// Places a pay-first order for 2 × 500 shipped inside Dhaka (total 1060)
async fn initiate(app: &TestApp) -> String {
    let kurta = app.seed_product("Kurta", 10, dec!(500)).await;
    let (status, body) = app
        .post(
            "/api/v1/payment/initiate",
            json!({
                "amount": "1060",
                "customerInfo": customer_info(),
                "orderData": {
                    "cartItems": [cart_line(kurta.id, 2)],
                    "shippingZone": "Dhaka-Chattogram"
                }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "initiate failed: {body}");
    body["data"]["orderId"].as_str().unwrap().to_string()
}

async fn order(app: &TestApp, order_id: &str) -> Value {
    let (status, body) = app.get(&format!("/api/v1/orders/{order_id}")).await;
    assert_eq!(status, StatusCode::OK);
    body["data"].clone()
}

async fn notify(app: &TestApp, form: &str) -> (StatusCode, Value) {
    let response = app.post_form(IPN, form, &[]).await;
    let status = response.status();
    (status, read_json(response).await)
}

fn valid_ipn(order_id: &str, amount: &str) -> String {
    format!(
        "tran_id={order_id}&status=VALID&val_id=VAL-77&amount={amount}\
         &bank_tran_id=BANK-9&card_type=VISA-Dutch%20Bangla"
    )
}

/// Makes the stub gateway vouch for `order_id` when asked by `val_id`
fn confirm_payment(app: &TestApp, order_id: &str) {
    app.gateway.confirm_with(GatewayValidation {
        status: "VALID".to_string(),
        tran_id: Some(order_id.to_string()),
        amount: Some(dec!(1060.00)),
        bank_tran_id: Some("BANK-9".to_string()),
        card_type: Some("VISA-Dutch Bangla".to_string())
    });
}

fn location(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn initiation_opens_a_session_and_waits_for_payment() {
    let app = TestApp::new().await;
    let order_id = initiate(&app).await;

    let data = order(&app, &order_id).await;
    assert_eq!(data["status"], "pending_payment");
    assert_eq!(data["paymentMethod"], "pay_first");
    assert_eq!(decimal(&data["total"]), dec!(1060));
    assert!(data["paymentDetails"].is_null());

    let sessions = app.gateway.sessions.lock().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].tran_id, order_id);
    assert_eq!(sessions[0].total_amount, dec!(1060));
    assert_eq!(sessions[0].ipn_url, "https://api.shop.test/api/v1/payment/ipn");
    assert_eq!(sessions[0].success_url, "https://api.shop.test/api/v1/payment/success");
}

#[tokio::test]
async fn initiation_refuses_a_stale_amount() {
    let app = TestApp::new().await;
    let kurta = app.seed_product("Kurta", 10, dec!(500)).await;

    let (status, body) = app
        .post(
            "/api/v1/payment/initiate",
            json!({
                "amount": "1000",
                "customerInfo": customer_info(),
                "orderData": {
                    "cartItems": [cart_line(kurta.id, 2)],
                    "shippingZone": "Dhaka-Chattogram"
                }
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(app.gateway.session_count(), 0);
}

#[tokio::test]
async fn refused_session_keeps_the_order_pending() {
    let app = TestApp::new().await;
    app.gateway.refuse();
    let kurta = app.seed_product("Kurta", 10, dec!(500)).await;

    let (status, body) = app
        .post(
            "/api/v1/payment/initiate",
            json!({
                "amount": "1060",
                "customerInfo": customer_info(),
                "orderData": {
                    "cartItems": [cart_line(kurta.id, 2)],
                    "shippingZone": "Dhaka-Chattogram"
                }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "GATEWAY_ERROR");

    let (_, listing) = app
        .admin(Method::GET, "/api/v1/orders?status=pending", None)
        .await;
    assert_eq!(listing["data"]["pagination"]["total"], 1);
    assert_eq!(app.stock_of(kurta.id).await, 10);
}

#[tokio::test]
async fn valid_notification_marks_the_order_paid_once() {
    let app = TestApp::new().await;
    let order_id = initiate(&app).await;

    let (status, body) = notify(&app, &valid_ipn(&order_id, "1060.00")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "applied");
    assert_eq!(body["data"]["status"], "paid");

    let paid = order(&app, &order_id).await;
    assert_eq!(paid["status"], "paid");
    let details = paid["paymentDetails"].clone();
    assert_eq!(details["transaction_id"], order_id.as_str());
    assert_eq!(details["validation_id"], "VAL-77");
    assert_eq!(details["bank_reference"], "BANK-9");
    assert_eq!(details["card_brand"], "VISA-Dutch Bangla");

    // Gateways resend notifications
    let (status, body) = notify(&app, &valid_ipn(&order_id, "1060.00")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "duplicate");
    assert_eq!(order(&app, &order_id).await["paymentDetails"], details);
}

#[tokio::test]
async fn racing_redirect_and_notifications_pay_exactly_once() {
    let app = TestApp::new().await;
    let order_id = initiate(&app).await;
    confirm_payment(&app, &order_id);
    let form = valid_ipn(&order_id, "1060.00");

    let notices = (0..3).map(|_| notify(&app, &form));
    let redirect = app.post_form("/api/v1/payment/success", &form, &[]);
    let (notices, redirect) = tokio::join!(join_all(notices), redirect);

    assert_eq!(redirect.status(), StatusCode::SEE_OTHER);
    assert!(notices.iter().all(|(status, _)| *status == StatusCode::OK));

    let events = payment_event::Entity::find()
        .filter(payment_event::Column::OrderId.eq(order_id.as_str()))
        .order_by_asc(payment_event::Column::CreatedAt)
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(events.len(), 4);
    assert_eq!(events.iter().filter(|e| e.outcome == "applied").count(), 1);
    assert_eq!(events.iter().filter(|e| e.outcome == "duplicate").count(), 3);
    assert_eq!(events.iter().filter(|e| e.source == "success").count(), 1);
    assert_eq!(order(&app, &order_id).await["status"], "paid");
}

#[tokio::test]
async fn rejected_notifications_are_audited() {
    let app = TestApp::new().await;
    let order_id = initiate(&app).await;
    notify(&app, &valid_ipn(&order_id, "1.00")).await;

    let events = payment_event::Entity::find()
        .filter(payment_event::Column::OrderId.eq(order_id.as_str()))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, "ipn");
    assert_eq!(events[0].gateway_status, "VALID");
    assert_eq!(events[0].outcome, "rejected:VALIDATION_ERROR");
    assert_eq!(events[0].validation_id.as_deref(), Some("VAL-77"));
}

#[tokio::test]
async fn paid_order_commits_stock_only_when_accepted() {
    let app = TestApp::new().await;
    let order_id = initiate(&app).await;
    let product_id = order(&app, &order_id).await["items"][0]["productId"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    notify(&app, &valid_ipn(&order_id, "1060.00")).await;
    assert_eq!(app.stock_of(product_id).await, 10);

    let (status, _) = app
        .admin(
            Method::POST,
            "/api/v1/orders/action",
            Some(json!({ "orderId": order_id, "action": "accept" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.stock_of(product_id).await, 8);

    // A late failure notice cannot undo an accepted order
    let (status, body) = notify(&app, &format!("tran_id={order_id}&status=FAILED")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "ignored");
    assert_eq!(body["data"]["status"], "accepted");
}

#[tokio::test]
async fn amount_mismatch_is_acknowledged_but_not_applied() {
    let app = TestApp::new().await;
    let order_id = initiate(&app).await;

    let (status, body) = notify(&app, &valid_ipn(&order_id, "999.00")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(order(&app, &order_id).await["status"], "pending_payment");
}

#[tokio::test]
async fn failed_order_ignores_a_late_valid_notice() {
    let app = TestApp::new().await;
    let order_id = initiate(&app).await;

    let (_, body) = notify(&app, &format!("tran_id={order_id}&status=FAILED")).await;
    assert_eq!(body["data"]["status"], "failed");

    let (status, body) = notify(&app, &valid_ipn(&order_id, "1060.00")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "ignored");
    assert_eq!(order(&app, &order_id).await["status"], "failed");
}

#[tokio::test]
async fn unknown_gateway_status_asks_for_a_retry() {
    let app = TestApp::new().await;
    let order_id = initiate(&app).await;

    let (status, body) = notify(&app, &format!("tran_id={order_id}&status=PENDING")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "GATEWAY_ERROR");
    assert_eq!(order(&app, &order_id).await["status"], "pending_payment");
}

#[tokio::test]
async fn notifications_for_unknown_orders_are_acknowledged() {
    let app = TestApp::new().await;

    let (status, body) = notify(&app, "tran_id=ORDNOPE&status=VALID&val_id=x").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn signed_notifications_are_enforced_when_a_secret_is_set() {
    let app = TestApp::with_config(|cfg| {
        cfg.payment_gateway.ipn_secret = Some("ipn-secret".to_string());
    })
    .await;
    let order_id = initiate(&app).await;
    let form = valid_ipn(&order_id, "1060.00");

    let response = app.post_form(IPN, &form, &[]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_form(IPN, &form, &[(IPN_SIGNATURE_HEADER, "deadbeef")])
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(order(&app, &order_id).await["status"], "pending_payment");

    let mut mac = Hmac::<Sha256>::new_from_slice(b"ipn-secret").unwrap();
    mac.update(form.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    let response = app
        .post_form(IPN, &form, &[(IPN_SIGNATURE_HEADER, signature.as_str())])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(order(&app, &order_id).await["status"], "paid");
}

#[tokio::test]
async fn gateway_confirmation_overrides_claimed_details() {
    let app = TestApp::with_config(|cfg| {
        cfg.payment_gateway.verify_with_gateway = true;
    })
    .await;
    let order_id = initiate(&app).await;

    // Validation endpoint unreachable: the gateway should try again later
    let (status, _) = notify(&app, &valid_ipn(&order_id, "1060.00")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(order(&app, &order_id).await["status"], "pending_payment");

    app.gateway.confirm_with(GatewayValidation {
        status: "VALID".to_string(),
        tran_id: Some(order_id.clone()),
        amount: Some(dec!(1060.00)),
        bank_tran_id: Some("BANK-CONFIRMED".to_string()),
        card_type: Some("MASTER".to_string())
    });
    let (status, body) = notify(&app, &valid_ipn(&order_id, "1060.00")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "applied");

    let details = order(&app, &order_id).await["paymentDetails"].clone();
    assert_eq!(details["bank_reference"], "BANK-CONFIRMED");
    assert_eq!(details["card_brand"], "MASTER");
}

#[tokio::test]
async fn unconfirmed_claim_is_not_applied() {
    let app = TestApp::with_config(|cfg| {
        cfg.payment_gateway.verify_with_gateway = true;
    })
    .await;
    let order_id = initiate(&app).await;
    app.gateway.confirm_with(GatewayValidation {
        status: "INVALID_TRANSACTION".to_string(),
        tran_id: Some(order_id.clone()),
        amount: None,
        bank_tran_id: None,
        card_type: None
    });

    let (status, body) = notify(&app, &valid_ipn(&order_id, "1060.00")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(order(&app, &order_id).await["status"], "pending_payment");
}

#[tokio::test]
async fn browser_success_redirects_to_the_storefront() {
    let app = TestApp::new().await;
    let order_id = initiate(&app).await;
    confirm_payment(&app, &order_id);

    let response = app
        .post_form("/api/v1/payment/success", &valid_ipn(&order_id, "1060.00"), &[])
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        format!("https://shop.test/payment/success?orderId={order_id}")
    );
    assert_eq!(order(&app, &order_id).await["status"], "paid");
}

#[tokio::test]
async fn browser_cancel_fails_the_order() {
    let app = TestApp::new().await;
    let order_id = initiate(&app).await;

    let response = app
        .post_form(
            "/api/v1/payment/cancel",
            &format!("tran_id={order_id}&status=CANCELLED"),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        format!("https://shop.test/payment/cancelled?orderId={order_id}")
    );
    assert_eq!(order(&app, &order_id).await["status"], "failed");
}

#[tokio::test]
async fn browser_success_after_failure_lands_on_failed_page() {
    let app = TestApp::new().await;
    let order_id = initiate(&app).await;
    confirm_payment(&app, &order_id);
    notify(&app, &format!("tran_id={order_id}&status=FAILED")).await;

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/payment/success?{}", valid_ipn(&order_id, "1060.00")),
            None,
            &[],
        )
        .await;
    assert_eq!(status, StatusCode::SEE_OTHER);

    let response = app
        .post_form("/api/v1/payment/success", &valid_ipn(&order_id, "1060.00"), &[])
        .await;
    assert_eq!(
        location(&response),
        format!("https://shop.test/payment/failed?orderId={order_id}")
    );
}

#[tokio::test]
async fn browser_success_is_not_trusted_without_the_gateway() {
    let app = TestApp::new().await;
    let order_id = initiate(&app).await;

    // Hand-made redirect: no val_id to confirm
    let response = app
        .post_form(
            "/api/v1/payment/success",
            &format!("tran_id={order_id}&status=VALID"),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        format!("https://shop.test/payment/failed?orderId={order_id}")
    );
    assert_eq!(order(&app, &order_id).await["status"], "pending_payment");

    // A val_id the gateway does not recognise fares no better
    app.gateway.confirm_with(GatewayValidation {
        status: "INVALID_TRANSACTION".to_string(),
        tran_id: Some(order_id.clone()),
        amount: None,
        bank_tran_id: None,
        card_type: None
    });
    let response = app
        .post_form("/api/v1/payment/success", &valid_ipn(&order_id, "1060.00"), &[])
        .await;
    assert_eq!(
        location(&response),
        format!("https://shop.test/payment/failed?orderId={order_id}")
    );
    assert_eq!(order(&app, &order_id).await["status"], "pending_payment");

    let events = payment_event::Entity::find()
        .filter(payment_event::Column::OrderId.eq(order_id.as_str()))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|e| e.source == "success" && e.outcome == "rejected:VALIDATION_ERROR"));
}
