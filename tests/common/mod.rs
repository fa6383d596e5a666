#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use storefront_api::{
    config::AppConfig,
    db,
    entities::product::{self, ProductPrice, ProductType},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    middleware_helpers::ADMIN_KEY_HEADER,
    services::{
        payment_gateway::{GatewayValidation, PaymentGateway, PaymentSession, PaymentSessionRequest},
        stock::CreateProductInput,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN_KEY: &str = "test-admin-key";

/// In-process stand-in for the hosted checkout gateway
#[derive(Default)]
pub struct StubGateway {
    pub sessions: Mutex<Vec<PaymentSessionRequest>>,
    pub refuse_sessions: AtomicBool,
    pub validation: Mutex<Option<GatewayValidation>>,
}

impl StubGateway {
    pub fn refuse(&self) {
        self.refuse_sessions.store(true, Ordering::SeqCst);
    }

    pub fn confirm_with(&self, validation: GatewayValidation) {
        *self.validation.lock().unwrap() = Some(validation);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, ServiceError> {
        if self.refuse_sessions.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError("Store credential error".into()));
        }
        self.sessions.lock().unwrap().push(request.clone());
        Ok(PaymentSession {
            redirect_url: format!("https://gateway.test/pay/{}", request.tran_id),
            session_key: Some(format!("sess-{}", request.tran_id)),
        })
    }

    async fn validate_transaction(
        &self,
        _validation_id: &str,
    ) -> Result<GatewayValidation, ServiceError> {
        self.validation
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ServiceError::GatewayError("validation endpoint unavailable".into()))
    }
}

/// Application wired against an in-memory SQLite database and a stub gateway
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<StubGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.admin_api_key = Some(ADMIN_KEY.to_string());
        cfg.storefront_url = "https://shop.test".to_string();
        cfg.public_base_url = "https://api.shop.test".to_string();
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(StubGateway::default());
        let services =
            AppServices::new(db_arc.clone(), event_sender.clone(), &cfg, gateway.clone());

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            router: storefront_api::app_router(state.clone()),
            state,
            gateway,
            _event_task: event_task,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// JSON request; returns the status and the parsed body (Null when empty)
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let response = self.send(builder.body(body).expect("build request")).await;
        let status = response.status();
        (status, read_json(response).await)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None, &[]).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body), &[]).await
    }

    pub async fn admin(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.request(method, uri, body, &[(ADMIN_KEY_HEADER, ADMIN_KEY)])
            .await
    }

    /// Form-encoded POST as sent by the gateway
    pub async fn post_form(&self, uri: &str, form: &str, headers: &[(&str, &str)]) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(
            builder
                .body(Body::from(form.to_string()))
                .expect("build form request"),
        )
        .await
    }

    pub async fn seed_product(&self, title: &str, quantity: i32, price: Decimal) -> product::Model {
        self.seed_product_of_type(title, ProductType::Own, quantity, price)
            .await
    }

    pub async fn seed_product_of_type(
        &self,
        title: &str,
        product_type: ProductType,
        quantity: i32,
        price: Decimal,
    ) -> product::Model {
        self.state
            .services
            .stock
            .create_product(CreateProductInput {
                title: title.to_string(),
                product_type,
                quantity,
                prices: vec![ProductPrice {
                    currency: "BDT".to_string(),
                    amount: price,
                }],
            })
            .await
            .expect("seed product for tests")
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.state
            .services
            .stock
            .get(product_id)
            .await
            .expect("product exists")
            .quantity
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn read_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }
}

pub fn customer_info() -> Value {
    serde_json::json!({
        "name": "Nusrat Jahan",
        "email": "nusrat@example.com",
        "phone": "+8801711000000",
        "address": "House 12, Road 5, Dhanmondi",
        "city": "Dhaka",
        "country": "Bangladesh"
    })
}

/// Decimal carried as a JSON string
pub fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected decimal string, got {value}"))
        .parse()
        .expect("decimal string")
}

pub fn cart_line(product_id: Uuid, quantity: i32) -> Value {
    serde_json::json!({ "productId": product_id, "quantity": quantity })
}
