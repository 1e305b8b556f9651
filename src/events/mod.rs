use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Handle for publishing domain events onto the in-process bus.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishing is best effort; a closed bus never fails the business operation.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        shop_id: Uuid,
        tracking_id: String,
    },
    /// Compensating delete after the payment provider refused a checkout session.
    OrderRolledBack {
        order_id: Uuid,
        tracking_id: String,
    },
    OrderPaid {
        order_id: Uuid,
        tracking_id: String,
    },
    OrderPaymentFailed {
        order_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: String,
    },
    OrderRefunded {
        order_id: Uuid,
        restocked: bool,
    },
    CartMerged {
        user_id: Uuid,
        shop_id: Uuid,
        lines: usize,
    },
    CartCleared {
        user_id: Uuid,
        shop_id: Uuid,
    },
    StockAdjusted {
        product_id: Uuid,
        variant_index: Option<i32>,
        delta: i32,
    },
    /// A confirmed sale found less stock than it consumed.
    StockShortfall {
        product_id: Uuid,
        variant_index: Option<i32>,
        requested: i32,
        available: i32,
    },
    ShopPaymentsEnabled {
        shop_id: Uuid,
    },
}

/// Drains the event bus until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_id,
                shop_id,
                tracking_id,
            } => info!(%order_id, %shop_id, %tracking_id, "order created"),
            Event::OrderRolledBack {
                order_id,
                tracking_id,
            } => warn!(%order_id, %tracking_id, "order rolled back after checkout failure"),
            Event::OrderPaid {
                order_id,
                tracking_id,
            } => info!(%order_id, %tracking_id, "order paid"),
            Event::OrderPaymentFailed { order_id } => warn!(%order_id, "order payment failed"),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(%order_id, %old_status, %new_status, "order status changed"),
            Event::OrderCancelled { order_id, reason } => {
                info!(%order_id, %reason, "order cancelled")
            }
            Event::OrderRefunded {
                order_id,
                restocked,
            } => info!(%order_id, restocked, "order refunded"),
            Event::CartMerged {
                user_id,
                shop_id,
                lines,
            } => info!(%user_id, %shop_id, lines, "anonymous cart merged"),
            Event::CartCleared { user_id, shop_id } => info!(%user_id, %shop_id, "cart cleared"),
            Event::StockAdjusted {
                product_id,
                variant_index,
                delta,
            } => info!(%product_id, ?variant_index, delta, "stock adjusted"),
            Event::StockShortfall {
                product_id,
                variant_index,
                requested,
                available,
            } => error!(
                %product_id,
                ?variant_index,
                requested,
                available,
                "sale exceeded available stock; counter floored at zero"
            ),
            Event::ShopPaymentsEnabled { shop_id } => info!(%shop_id, "shop payments enabled"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let shop_id = Uuid::new_v4();

        sender
            .send(Event::ShopPaymentsEnabled { shop_id })
            .await
            .unwrap();
        sender
            .send_or_log(Event::CartCleared {
                user_id: Uuid::nil(),
                shop_id,
            })
            .await;

        assert_eq!(rx.recv().await, Some(Event::ShopPaymentsEnabled { shop_id }));
        assert!(matches!(rx.recv().await, Some(Event::CartCleared { .. })));
    }

    #[tokio::test]
    async fn send_reports_closed_bus() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender
            .send(Event::OrderPaymentFailed {
                order_id: Uuid::nil()
            })
            .await
            .is_err());
        // Must not panic.
        sender
            .send_or_log(Event::OrderPaymentFailed {
                order_id: Uuid::nil(),
            })
            .await;
    }

    #[tokio::test]
    async fn processor_exits_when_senders_drop() {
        let (tx, rx) = mpsc::channel(2);
        let handle = tokio::spawn(process_events(rx));
        EventSender::new(tx.clone())
            .send_or_log(Event::OrderRefunded {
                order_id: Uuid::nil(),
                restocked: true,
            })
            .await;
        drop(tx);
        handle.await.unwrap();
    }
}
