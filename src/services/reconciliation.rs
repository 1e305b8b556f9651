use crate::{
    entities::shop,
    errors::ServiceError,
    metrics,
    payments::CheckoutGateway,
    services::orders::{OrderService, PaymentTransition},
};
use chrono::Utc;
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait, TransactionTrait};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

const DEFAULT_BATCH_SIZE: u64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub examined: usize,
    pub paid: usize,
    pub expired: usize,
    pub still_open: usize,
    pub errors: usize,
}

/// Catches up on orders whose payment webhook never arrived by asking the
/// provider for the state of their checkout session.
#[derive(Clone)]
pub struct ReconciliationService {
    orders: OrderService,
    gateway: Arc<dyn CheckoutGateway>,
    stale_after: Duration,
    batch_size: u64,
}

impl ReconciliationService {
    pub fn new(orders: OrderService, gateway: Arc<dyn CheckoutGateway>, stale_after: Duration) -> Self {
        Self {
            orders,
            gateway,
            stale_after,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[instrument(skip(self, db))]
    pub async fn sweep<C>(&self, db: &C) -> Result<ReconciliationReport, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| ServiceError::InternalError(format!("invalid stale threshold: {}", e)))?;
        let cutoff = Utc::now() - stale_after;
        let candidates = self
            .orders
            .stale_pending_payments(db, cutoff, self.batch_size)
            .await?;

        let mut report = ReconciliationReport {
            examined: candidates.len(),
            ..Default::default()
        };

        for order in candidates {
            let Some(session_id) = order.checkout_session_id.as_deref() else {
                continue;
            };
            let account = match shop::Entity::find_by_id(order.shop_id).one(db).await? {
                Some(shop) => shop.stripe_account_id,
                None => None,
            };
            let Some(account) = account else {
                warn!(order_id = %order.id, "no connected account for stale order");
                report.errors += 1;
                metrics::RECONCILED_ORDERS.with_label_values(&["error"]).inc();
                continue;
            };

            let session = match self.gateway.retrieve_checkout_session(&account, session_id).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "could not fetch checkout session");
                    report.errors += 1;
                    metrics::RECONCILED_ORDERS.with_label_values(&["error"]).inc();
                    continue;
                }
            };

            if session.is_paid() {
                if self
                    .orders
                    .mark_paid(db, order.id, session.payment_intent.clone())
                    .await?
                    == PaymentTransition::Applied
                {
                    report.paid += 1;
                    metrics::RECONCILED_ORDERS.with_label_values(&["paid"]).inc();
                }
            } else if session.is_expired() {
                if self.orders.mark_payment_failed(db, order.id).await? {
                    report.expired += 1;
                    metrics::RECONCILED_ORDERS.with_label_values(&["expired"]).inc();
                }
            } else {
                report.still_open += 1;
            }
        }

        if report.examined > 0 {
            info!(?report, "payment reconciliation sweep finished");
        }
        Ok(report)
    }

    /// Runs [`Self::sweep`] every `interval` until the runtime shuts down.
    pub fn spawn(self, db: DatabaseConnection, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep(&db).await {
                    warn!(error = %e, "payment reconciliation sweep failed");
                }
            }
        })
    }
}
