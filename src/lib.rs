//! Storefront API Library
//!
//! Carts, orders, inventory bookkeeping and Stripe Connect checkout for a
//! multi-tenant storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod migrator;
pub mod openapi;
pub mod payments;
pub mod services;
pub mod tracing;
pub mod webhooks;

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
    pub jwt: auth::JwtVerifier,
}

impl AppState {
    pub fn new(
        db: db::DbPool,
        config: config::AppConfig,
        event_sender: events::EventSender,
        gateway: Arc<dyn payments::CheckoutGateway>,
    ) -> Self {
        let services = handlers::AppServices::new(&config, event_sender.clone(), gateway);
        let jwt = auth::JwtVerifier::new(&config.jwt_secret);
        Self {
            db: Arc::new(db),
            config,
            event_sender,
            services,
            jwt,
        }
    }
}

impl FromRef<AppState> for auth::JwtVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

/// Routes served under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/shops/:shop/cart", handlers::carts::cart_routes())
        .nest("/shops/:shop/orders", handlers::orders::order_routes())
        // Signature-verified instead of bearer-authenticated
        .route(
            "/webhooks/stripe",
            post(handlers::payment_webhooks::stripe_webhook),
        )
}

/// The complete application: API, health, metrics and docs, with request ids
/// and HTTP tracing. Transport policies (CORS, timeouts) are added by the binary.
pub fn app_router(state: AppState) -> Router {
    Router::<AppState>::new()
        .nest("/health", handlers::health::health_routes())
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            crate::tracing::request_id_middleware,
        ))
        .with_state(state)
}
