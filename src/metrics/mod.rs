//! Prometheus counters for the order, payment and inventory paths.
//!
//! Everything registers into a private [`Registry`] that the `/metrics` route
//! renders in the text exposition format.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new_custom(Some("storefront".into()), None)
        .expect("registry can be created");
    pub static ref ORDERS_CREATED: IntCounter = register(IntCounter::new(
        "orders_created_total",
        "Orders persisted with a checkout session"
    ));
    pub static ref ORDERS_ROLLED_BACK: IntCounter = register(IntCounter::new(
        "orders_rolled_back_total",
        "Orders deleted after the payment provider refused a checkout session"
    ));
    pub static ref ORPHANED_ORDERS: IntCounter = register(IntCounter::new(
        "orphaned_orders_total",
        "Orders whose compensating delete failed and need manual reconciliation"
    ));
    pub static ref ORDERS_PAID: IntCounter = register(IntCounter::new(
        "orders_paid_total",
        "Orders transitioned to paid"
    ));
    pub static ref ORDER_CANCELLATIONS: IntCounter = register(IntCounter::new(
        "order_cancellations_total",
        "Total number of order cancellations"
    ));
    pub static ref ORDER_REFUNDS: IntCounter = register(IntCounter::new(
        "order_refunds_total",
        "Total number of refunded orders"
    ));
    pub static ref STOCK_SHORTFALLS: IntCounter = register(IntCounter::new(
        "stock_shortfalls_total",
        "Confirmed sales that found less stock than they consumed"
    ));
    pub static ref WEBHOOK_EVENTS: IntCounterVec = register(IntCounterVec::new(
        Opts::new("webhook_events_total", "Stripe webhook deliveries by outcome"),
        &["outcome"]
    ));
    pub static ref RECONCILED_ORDERS: IntCounterVec = register(IntCounterVec::new(
        Opts::new(
            "reconciled_orders_total",
            "Pending-payment orders settled by the reconciliation sweep"
        ),
        &["result"]
    ));
}

fn register<M>(metric: prometheus::Result<M>) -> M
where
    M: prometheus::core::Collector + Clone + 'static,
{
    let metric = metric.expect("metric can be created");
    REGISTRY
        .register(Box::new(metric.clone()))
        .expect("metric names are unique");
    metric
}

/// Records the outcome label of one webhook delivery.
pub fn webhook_outcome(outcome: &str) {
    WEBHOOK_EVENTS.with_label_values(&[outcome]).inc();
}

/// Renders the registry in Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// `GET /metrics`
pub async fn metrics_handler() -> Response {
    match render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
