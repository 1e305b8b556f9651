pub mod carts;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

use crate::{
    config::AppConfig,
    events::EventSender,
    payments::{CheckoutAdapter, CheckoutGateway},
    services::{
        cart_service::CartService, checkout_service::CheckoutService, orders::OrderService,
        reconciliation::ReconciliationService, shops::ShopService,
    },
    webhooks::WebhookProcessor,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub shops: ShopService,
    pub carts: CartService,
    pub orders: OrderService,
    pub checkout: CheckoutService,
    pub webhooks: WebhookProcessor,
    pub reconciliation: ReconciliationService,
}

impl AppServices {
    pub fn new(
        config: &AppConfig,
        event_sender: EventSender,
        gateway: Arc<dyn CheckoutGateway>,
    ) -> Self {
        let shops = ShopService::new(event_sender.clone());
        let carts = CartService::new(event_sender.clone());
        let orders = OrderService::new(event_sender.clone());
        let adapter = CheckoutAdapter::new(gateway.clone(), &config.stripe);
        let checkout = CheckoutService::new(
            carts.clone(),
            orders.clone(),
            adapter,
            event_sender,
        );
        let webhooks = WebhookProcessor::new(orders.clone(), shops.clone(), &config.stripe);
        let reconciliation = ReconciliationService::new(
            orders.clone(),
            gateway,
            std::time::Duration::from_secs(config.reconciliation_stale_after_secs),
        );

        Self {
            shops,
            carts,
            orders,
            checkout,
            webhooks,
            reconciliation,
        }
    }
}
