#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use storefront_api::{
    auth::{AuthUser, ADMIN_ROLE},
    config::AppConfig,
    db,
    entities::{order, product, product_variant, shop},
    errors::ServiceError,
    events::{self, EventSender},
    payments::{CheckoutGateway, CheckoutSession, CheckoutSessionRequest, RefundReceipt},
    services::{checkout_service::CheckoutRequest, orders::Address},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Payment provider double: records what it was asked and answers from memory.
#[derive(Default)]
pub struct FakeGateway {
    created: Mutex<Vec<CheckoutSessionRequest>>,
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    refunds: Mutex<Vec<(String, String)>>,
    fail_sessions: AtomicBool,
    counter: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every subsequent `create_checkout_session` fail.
    pub fn refuse_sessions(&self) {
        self.fail_sessions.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<CheckoutSessionRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn refunds(&self) -> Vec<(String, String)> {
        self.refunds.lock().unwrap().clone()
    }

    /// Overrides what `retrieve_checkout_session` reports for a session.
    pub fn set_session(&self, session: CheckoutSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }
}

#[async_trait]
impl CheckoutGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(ServiceError::UpstreamGateway(
                "card_error: account cannot accept payments".to_string(),
            ));
        }
        self.created.lock().unwrap().push(request.clone());

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let session = CheckoutSession {
            id: format!("cs_test_{}", n),
            url: Some(format!("https://checkout.stripe.test/c/pay/cs_test_{}", n)),
            status: Some("open".to_string()),
            payment_status: Some("unpaid".to_string()),
            payment_intent: None,
        };
        self.set_session(session.clone());
        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        _connected_account: &str,
        session_id: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ServiceError::UpstreamGateway(format!("No such session: {}", session_id)))
    }

    async fn refund_payment(
        &self,
        connected_account: &str,
        payment_intent_id: &str,
    ) -> Result<RefundReceipt, ServiceError> {
        self.refunds
            .lock()
            .unwrap()
            .push((connected_account.to_string(), payment_intent_id.to_string()));
        Ok(RefundReceipt {
            id: format!("re_{}", payment_intent_id),
            status: Some("succeeded".to_string()),
        })
    }
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "test".to_string(),
        );
        // A single connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.stripe.webhook_secret = TEST_WEBHOOK_SECRET.to_string();
        cfg.stripe.platform_fee_percent = Decimal::from(10);
        cfg.stripe.success_url = "https://shop.test/{shop}/orders/{tracking_id}".to_string();
        cfg.stripe.cancel_url = "https://shop.test/{shop}/cart".to_string();
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = FakeGateway::new();
        let state = AppState::new(pool, cfg, event_sender, gateway.clone());
        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &db::DbPool {
        &self.state.db
    }

    pub fn token_for(&self, user: &AuthUser) -> String {
        self.state
            .jwt
            .issue(user, Duration::from_secs(3600))
            .expect("issue test token")
    }

    pub async fn seed_shop(&self, subdomain: &str, owner_id: Uuid, connected: bool) -> shop::Model {
        self.seed_shop_in(subdomain, owner_id, connected, "USD").await
    }

    pub async fn seed_shop_in(
        &self,
        subdomain: &str,
        owner_id: Uuid,
        connected: bool,
        currency: &str,
    ) -> shop::Model {
        let now = Utc::now();
        shop::ActiveModel {
            id: Set(Uuid::new_v4()),
            subdomain: Set(subdomain.to_string()),
            name: Set(format!("{} shop", subdomain)),
            owner_id: Set(owner_id),
            currency: Set(currency.to_string()),
            stripe_account_id: Set(Some(connected_account(subdomain))),
            stripe_connected: Set(connected),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed shop")
    }

    pub async fn seed_product(
        &self,
        shop_id: Uuid,
        name: &str,
        price: Decimal,
        discount: Decimal,
        stock: i32,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            shop_id: Set(shop_id),
            name: Set(name.to_string()),
            price: Set(price),
            discount: Set(discount),
            stock_quantity: Set(stock),
            sales_count: Set(0),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed product")
    }

    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        position: i32,
        stock: i32,
        price: Option<Decimal>,
    ) -> product_variant::Model {
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            position: Set(position),
            name: Set(format!("Variant {}", position)),
            stock_quantity: Set(stock),
            price: Set(price),
            discount: Set(None),
        }
        .insert(self.db())
        .await
        .expect("seed variant")
    }

    pub async fn product(&self, id: Uuid) -> product::Model {
        product::Entity::find_by_id(id)
            .one(self.db())
            .await
            .expect("load product")
            .expect("product exists")
    }

    pub async fn variant(&self, id: Uuid) -> product_variant::Model {
        product_variant::Entity::find_by_id(id)
            .one(self.db())
            .await
            .expect("load variant")
            .expect("variant exists")
    }

    pub async fn order(&self, id: Uuid) -> Option<order::Model> {
        order::Entity::find_by_id(id)
            .one(self.db())
            .await
            .expect("load order")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Connected account id given to a seeded shop.
pub fn connected_account(subdomain: &str) -> String {
    format!("acct_{}", subdomain)
}

pub fn customer() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        email: Some("ada@example.com".to_string()),
        roles: vec!["customer".to_string()],
    }
}

pub fn admin() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        email: Some("ops@example.com".to_string()),
        roles: vec![ADMIN_ROLE.to_string()],
    }
}

pub fn address() -> Address {
    Address {
        full_name: "Ada Lovelace".to_string(),
        address_line_1: "12 St James's Square".to_string(),
        address_line_2: None,
        city: "London".to_string(),
        state: "London".to_string(),
        postal_code: "SW1Y 4JH".to_string(),
        country: "GB".to_string(),
    }
}

pub fn checkout_request() -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: address(),
        billing_address: None,
        payment_method: Some("card".to_string()),
        notes: None,
        tax_rate: Decimal::ZERO,
        shipping_cost: Decimal::ZERO,
        discount_amount: Decimal::ZERO,
    }
}

pub async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("response body is json")
}
