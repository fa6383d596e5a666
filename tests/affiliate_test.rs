mod common;

use axum::http::{header, Method, StatusCode};
use common::{cart_line, customer_info, decimal, TestApp};
use futures::future::join_all;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

/// Applies and approves an affiliate; returns its id and code
async fn approved_affiliate(app: &TestApp, user_id: Uuid) -> (String, String) {
    let (status, body) = app
        .post("/api/v1/affiliate/apply", json!({ "userId": user_id }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .admin(Method::POST, &format!("/api/v1/affiliates/{id}/approve"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let code = body["data"]["affiliateCode"].as_str().unwrap().to_string();
    (id, code)
}

async fn stats(app: &TestApp, code: &str) -> Value {
    let (status, body) = app
        .admin(Method::GET, &format!("/api/v1/affiliate/stats/{code}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    body["data"].clone()
}

async fn accept(app: &TestApp, order_id: &str) {
    let (status, body) = app
        .admin(
            Method::POST,
            "/api/v1/orders/action",
            Some(json!({ "orderId": order_id, "action": "accept" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "accept failed: {body}");
}

fn referred_checkout(product_id: Uuid, code: &str, user_id: Option<Uuid>) -> Value {
    json!({
        "customerInfo": customer_info(),
        "cartItems": [cart_line(product_id, 2)],
        "paymentMethod": "cash_on_delivery",
        "shippingZone": "Others",
        "affiliateCode": code,
        "userId": user_id
    })
}

#[tokio::test]
async fn applications_are_one_per_user() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let (status, body) = app
        .post("/api/v1/affiliate/apply", json!({ "userId": user_id }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "pending");
    assert!(body["data"]["affiliateCode"].is_null());

    let (status, body) = app
        .post("/api/v1/affiliate/apply", json!({ "userId": user_id }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn concurrent_applications_from_one_user_conflict() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let attempts =
        (0..4).map(|_| app.post("/api/v1/affiliate/apply", json!({ "userId": user_id })));
    let statuses: Vec<StatusCode> = join_all(attempts)
        .await
        .into_iter()
        .map(|(status, _)| status)
        .collect();

    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CREATED).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(), 3);
}

#[tokio::test]
async fn approval_issues_a_code_and_needs_the_admin_key() {
    let app = TestApp::new().await;
    let (_, body) = app
        .post("/api/v1/affiliate/apply", json!({ "userId": Uuid::new_v4() }))
        .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .post(&format!("/api/v1/affiliates/{id}/approve"), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .admin(Method::POST, &format!("/api/v1/affiliates/{id}/approve"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "approved");
    let code = body["data"]["affiliateCode"].as_str().unwrap();
    assert_eq!(code.len(), 8);
    assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    assert!(!body["data"]["approvedAt"].is_null());

    // Re-approving keeps the issued code
    let (_, again) = app
        .admin(Method::POST, &format!("/api/v1/affiliates/{id}/approve"), None)
        .await;
    assert_eq!(again["data"]["affiliateCode"], code);

    let (status, _) = app
        .admin(
            Method::POST,
            &format!("/api/v1/affiliates/{}/approve", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn visits_are_counted_only_for_approved_codes() {
    let app = TestApp::new().await;
    let (id, code) = approved_affiliate(&app, Uuid::new_v4()).await;
    let cookie = format!("{}={}", app.state.config.affiliate_cookie_name, code);

    let (status, _) = app
        .post(
            "/api/v1/affiliate/track-visit",
            json!({ "affiliateCode": code.to_lowercase(), "page": "/products/kurta" }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/affiliate/track-visit",
            Some(json!({ "page": "/" })),
            &[(header::COOKIE.as_str(), cookie.as_str()), ("x-forwarded-for", "203.0.113.7")],
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Unknown codes look exactly the same to the caller
    let (status, _) = app
        .post(
            "/api/v1/affiliate/track-visit",
            json!({ "affiliateCode": "NOSUCH01" }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(stats(&app, &code).await["visits"], 2);

    app.admin(Method::POST, &format!("/api/v1/affiliates/{id}/reject"), None)
        .await;
    app.post(
        "/api/v1/affiliate/track-visit",
        json!({ "affiliateCode": code }),
    )
    .await;
    let after = stats(&app, &code).await;
    assert_eq!(after["status"], "rejected");
    assert_eq!(after["visits"], 2);
}

#[tokio::test]
async fn commission_is_credited_when_the_order_is_accepted() {
    let app = TestApp::new().await;
    let kurta = app.seed_product("Kurta", 10, dec!(500)).await;
    let (_, code) = approved_affiliate(&app, Uuid::new_v4()).await;
    app.admin(
        Method::POST,
        "/api/v1/coupons",
        Some(json!({
            "code": "TEN",
            "scope": "global",
            "discountPercentage": "10",
            "useType": "multiple"
        })),
    )
    .await;

    let mut body = referred_checkout(kurta.id, &code, None);
    body["couponCode"] = json!("TEN");
    let (status, placed) = app.post("/api/v1/orders/checkout", body).await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = placed["data"]["orderId"].as_str().unwrap().to_string();

    assert_eq!(stats(&app, &code).await["transactions"], 0);

    accept(&app, &order_id).await;

    // 8% of (1000 - 100); shipping is not commissionable
    let credited = stats(&app, &code).await;
    assert_eq!(credited["transactions"], 1);
    assert_eq!(decimal(&credited["totalCommission"]), dec!(72));

    // Explicit attribution afterwards is a no-op
    let (status, body) = app
        .post("/api/v1/affiliate/purchase", json!({ "orderId": order_id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_null());
    assert_eq!(stats(&app, &code).await["transactions"], 1);
}

#[tokio::test]
async fn checkout_reads_the_referral_cookie() {
    let app = TestApp::new().await;
    let kurta = app.seed_product("Kurta", 10, dec!(500)).await;
    let (_, code) = approved_affiliate(&app, Uuid::new_v4()).await;
    let cookie = format!("{}={}", app.state.config.affiliate_cookie_name, code);

    let (status, placed) = app
        .request(
            Method::POST,
            "/api/v1/orders/checkout",
            Some(json!({
                "customerInfo": customer_info(),
                "cartItems": [cart_line(kurta.id, 1)],
                "paymentMethod": "cash_on_delivery",
                "shippingZone": "Dhaka-Chattogram"
            })),
            &[(header::COOKIE.as_str(), cookie.as_str())],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = placed["data"]["orderId"].as_str().unwrap().to_string();

    let (_, order) = app.get(&format!("/api/v1/orders/{order_id}")).await;
    assert_eq!(order["data"]["affiliateCode"], code.as_str());

    accept(&app, &order_id).await;
    assert_eq!(decimal(&stats(&app, &code).await["totalCommission"]), dec!(40));
}

#[tokio::test]
async fn self_referrals_earn_nothing() {
    let app = TestApp::new().await;
    let kurta = app.seed_product("Kurta", 10, dec!(500)).await;
    let affiliate_user = Uuid::new_v4();
    let (_, code) = approved_affiliate(&app, affiliate_user).await;

    let (_, placed) = app
        .post(
            "/api/v1/orders/checkout",
            referred_checkout(kurta.id, &code, Some(affiliate_user)),
        )
        .await;
    let order_id = placed["data"]["orderId"].as_str().unwrap().to_string();
    accept(&app, &order_id).await;

    let summary = stats(&app, &code).await;
    assert_eq!(summary["transactions"], 0);
    assert_eq!(decimal(&summary["totalCommission"]), dec!(0));
}

#[tokio::test]
async fn explicit_attribution_waits_for_payment_or_acceptance() {
    let app = TestApp::new().await;
    let kurta = app.seed_product("Kurta", 10, dec!(500)).await;
    let (_, code) = approved_affiliate(&app, Uuid::new_v4()).await;

    let (_, placed) = app
        .post(
            "/api/v1/orders/checkout",
            json!({
                "customerInfo": customer_info(),
                "cartItems": [cart_line(kurta.id, 2)],
                "paymentMethod": "cash_on_delivery",
                "shippingZone": "Dhaka-Chattogram"
            }),
        )
        .await;
    let order_id = placed["data"]["orderId"].as_str().unwrap().to_string();

    let purchase = json!({ "orderId": order_id, "affiliateCode": code });
    let (status, body) = app.post("/api/v1/affiliate/purchase", purchase.clone()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    accept(&app, &order_id).await;
    assert_eq!(stats(&app, &code).await["transactions"], 0);

    let (status, body) = app.post("/api/v1/affiliate/purchase", purchase).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["orderId"], order_id.as_str());
    assert_eq!(decimal(&body["data"]["commission"]), dec!(80));

    let (status, _) = app
        .post("/api/v1/affiliate/purchase", json!({ "orderId": "ORDMISSING" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
