mod common;

use axum::http::{Method, StatusCode};
use common::{cart_line, decimal, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::entities::product::ProductType;
use uuid::Uuid;

#[tokio::test]
async fn valid_cart_is_priced_per_line() {
    let app = TestApp::new().await;
    let kurta = app.seed_product("Kurta", 10, dec!(500)).await;

    let (status, body) = app
        .post(
            "/api/v1/cart/validate",
            json!({ "cartItems": [cart_line(kurta.id, 2)] }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["isValid"], true);
    assert_eq!(decimal(&data["totalCartValue"]), dec!(1000));
    assert_eq!(data["results"][0]["title"], "Kurta");
    assert_eq!(decimal(&data["results"][0]["lineTotal"]), dec!(1000));
}

#[tokio::test]
async fn over_limit_line_reports_allowed_quantity() {
    let app = TestApp::new().await;
    let scarf = app.seed_product("Scarf", 10, dec!(250)).await;

    let (status, body) = app
        .post(
            "/api/v1/cart/validate",
            json!({ "cartItems": [cart_line(scarf.id, 4)] }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let line = &body["data"]["results"][0];
    assert_eq!(body["data"]["isValid"], false);
    assert_eq!(line["issue"], "QUANTITY_EXCEEDS_LIMIT");
    assert_eq!(line["availableQuantity"], 3);
}

#[tokio::test]
async fn low_stock_caps_allowed_quantity() {
    let app = TestApp::new().await;
    let saree = app.seed_product("Saree", 1, dec!(3200)).await;

    let (_, body) = app
        .post(
            "/api/v1/cart/validate",
            json!({ "cartItems": [cart_line(saree.id, 2)] }),
        )
        .await;

    let line = &body["data"]["results"][0];
    assert_eq!(line["isValid"], false);
    assert_eq!(line["availableQuantity"], 1);
}

#[tokio::test]
async fn unknown_and_affiliate_products_are_rejected() {
    let app = TestApp::new().await;
    let listed = app
        .seed_product_of_type("Partner watch", ProductType::Affiliate, 50, dec!(900))
        .await;
    let missing = Uuid::new_v4();

    let (status, body) = app
        .post(
            "/api/v1/cart/validate",
            json!({ "cartItems": [cart_line(listed.id, 1), cart_line(missing, 1)] }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results[0]["issue"], "NOT_PURCHASABLE");
    assert_eq!(results[1]["issue"], "NOT_FOUND");
    assert_eq!(decimal(&body["data"]["totalCartValue"]), dec!(0));
}

#[tokio::test]
async fn empty_and_duplicate_carts_are_bad_requests() {
    let app = TestApp::new().await;
    let kurta = app.seed_product("Kurta", 10, dec!(500)).await;

    let (status, body) = app
        .post("/api/v1/cart/validate", json!({ "cartItems": [] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = app
        .post(
            "/api/v1/cart/validate",
            json!({ "cartItems": [cart_line(kurta.id, 1), cart_line(kurta.id, 2)] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn catalog_writes_require_admin_key() {
    let app = TestApp::new().await;
    let product = json!({
        "title": "Panjabi",
        "productType": "own",
        "quantity": 5,
        "prices": [{ "currency": "BDT", "amount": "1500" }]
    });

    let (status, body) = app.post("/api/v1/products", product.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, body) = app
        .admin(Method::POST, "/api/v1/products", Some(product))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app.get(&format!("/api/v1/products/{id}/stock")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["quantity"], 5);
    assert_eq!(body["data"]["purchasable"], true);
}

#[tokio::test]
async fn stock_can_be_set_but_never_negative() {
    let app = TestApp::new().await;
    let kurta = app.seed_product("Kurta", 10, dec!(500)).await;
    let uri = format!("/api/v1/products/{}/stock", kurta.id);

    let (status, body) = app
        .admin(Method::PUT, &uri, Some(json!({ "quantity": 2 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["quantity"], 2);

    let (status, _) = app
        .admin(Method::PUT, &uri, Some(json!({ "quantity": -1 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.stock_of(kurta.id).await, 2);

    let (status, _) = app
        .get(&format!("/api/v1/products/{}/stock", Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn shipping_charges_are_seeded_and_updatable() {
    let app = TestApp::new().await;

    let (status, body) = app.get("/api/v1/shipping-charges").await;
    assert_eq!(status, StatusCode::OK);
    let charges = body["data"].as_array().unwrap();
    assert_eq!(charges.len(), 2);
    let inside = charges
        .iter()
        .find(|c| c["zone"] == "Dhaka-Chattogram")
        .unwrap();
    assert_eq!(decimal(&inside["amount"]), dec!(60));

    let (status, _) = app
        .admin(
            Method::POST,
            "/api/v1/shipping-charges",
            Some(json!({ "charges": [{ "zone": "Others", "amount": "-5" }] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .admin(
            Method::POST,
            "/api/v1/shipping-charges",
            Some(json!({ "charges": [{ "zone": "Others", "amount": "150" }] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let others = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["zone"] == "Others")
        .cloned()
        .unwrap();
    assert_eq!(decimal(&others["amount"]), dec!(150));
}

#[tokio::test]
async fn health_reports_database() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["checks"]["database"], "healthy");
}
