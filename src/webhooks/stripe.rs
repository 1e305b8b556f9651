use super::signature::verify_signature;
use crate::{
    config::StripeConfig,
    entities::stripe_event,
    errors::ServiceError,
    metrics,
    services::{
        orders::{OrderService, PaymentTransition},
        shops::{AccountUpdate, ShopService},
    },
};
use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ConnectionTrait, DatabaseTransaction, EntityTrait, Set,
    TransactionTrait,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const ACCOUNT_UPDATED: &str = "account.updated";

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub account: Option<String>,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    payment_intent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AccountObject {
    id: String,
    #[serde(default)]
    details_submitted: bool,
}

/// Event types this service acts on. Everything else is stored and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripeEventKind {
    CheckoutSessionCompleted {
        session_id: String,
        tracking_id: Option<String>,
        payment_intent: Option<String>,
    },
    AccountUpdated {
        account_id: String,
        details_submitted: bool,
    },
    Other(String),
}

impl StripeEventKind {
    pub fn from_envelope(envelope: &StripeEventEnvelope) -> Result<Self, ServiceError> {
        match envelope.event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED => {
                let session: SessionObject = serde_json::from_value(envelope.data.object.clone())
                    .map_err(|e| {
                        ServiceError::ValidationError(format!("malformed checkout session: {}", e))
                    })?;
                let tracking_id = session
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("tracking_id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or(session.client_reference_id);
                Ok(Self::CheckoutSessionCompleted {
                    session_id: session.id,
                    tracking_id,
                    payment_intent: session.payment_intent,
                })
            }
            ACCOUNT_UPDATED => {
                let account: AccountObject = serde_json::from_value(envelope.data.object.clone())
                    .map_err(|e| {
                        ServiceError::ValidationError(format!("malformed account: {}", e))
                    })?;
                Ok(Self::AccountUpdated {
                    account_id: account.id,
                    details_submitted: account.details_submitted,
                })
            }
            other => Ok(Self::Other(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The event id was already in the ledger.
    Duplicate,
    Ignored(String),
    OrderPaid { order_id: Uuid },
    AlreadyPaid { order_id: Uuid },
    ShopConnected { shop_id: Uuid },
    AccountUnchanged,
    UnknownAccount,
}

impl WebhookOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Ignored(_) => "ignored",
            Self::OrderPaid { .. } => "order_paid",
            Self::AlreadyPaid { .. } => "already_paid",
            Self::ShopConnected { .. } => "shop_connected",
            Self::AccountUnchanged => "account_unchanged",
            Self::UnknownAccount => "unknown_account",
        }
    }
}

/// Verifies, deduplicates, records and dispatches provider events.
///
/// The ledger insert and the dispatch share a transaction. Transient failures
/// roll both back so the provider's redelivery is processed again; permanent
/// failures keep the ledger row so a bad event is not retried forever.
#[derive(Clone)]
pub struct WebhookProcessor {
    orders: OrderService,
    shops: ShopService,
    secret: String,
    tolerance_secs: u64,
}

impl WebhookProcessor {
    pub fn new(orders: OrderService, shops: ShopService, config: &StripeConfig) -> Self {
        Self {
            orders,
            shops,
            secret: config.webhook_secret.clone(),
            tolerance_secs: config.webhook_tolerance_secs,
        }
    }

    /// Entry point for the HTTP endpoint: raw body plus signature header.
    pub async fn handle<C>(
        &self,
        db: &C,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let result = self.verify_and_process(db, payload, signature).await;
        match &result {
            Ok(outcome) => metrics::webhook_outcome(outcome.label()),
            Err(ServiceError::SignatureError(_)) => metrics::webhook_outcome("bad_signature"),
            Err(e) if e.kind().is_permanent() => metrics::webhook_outcome("rejected"),
            Err(_) => metrics::webhook_outcome("failed"),
        }
        result
    }

    async fn verify_and_process<C>(
        &self,
        db: &C,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let header = signature.ok_or_else(|| {
            ServiceError::SignatureError("missing Stripe-Signature header".to_string())
        })?;
        if let Err(e) = verify_signature(
            payload,
            header,
            &self.secret,
            self.tolerance_secs,
            Utc::now().timestamp(),
        ) {
            warn!(error = %e, "rejecting webhook with invalid signature");
            return Err(e);
        }

        let raw: Value = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::ValidationError(format!("invalid event body: {}", e)))?;
        let envelope: StripeEventEnvelope = serde_json::from_value(raw.clone())
            .map_err(|e| ServiceError::ValidationError(format!("invalid event envelope: {}", e)))?;
        self.process(db, &envelope, raw).await
    }

    /// Dedup, store and dispatch an already-authenticated event.
    #[instrument(skip(self, db, envelope, raw), fields(event_id = %envelope.id, event_type = %envelope.event_type))]
    pub async fn process<C>(
        &self,
        db: &C,
        envelope: &StripeEventEnvelope,
        raw: Value,
    ) -> Result<WebhookOutcome, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        if stripe_event::Entity::find_by_id(envelope.id.clone())
            .one(db)
            .await?
            .is_some()
        {
            info!("duplicate webhook delivery acknowledged");
            return Ok(WebhookOutcome::Duplicate);
        }

        let txn = db.begin().await?;
        let inserted = stripe_event::Entity::insert(stripe_event::ActiveModel {
            id: Set(envelope.id.clone()),
            event_type: Set(envelope.event_type.clone()),
            payload: Set(raw),
            received_at: Set(Utc::now()),
        })
        .on_conflict(
            OnConflict::column(stripe_event::Column::Id)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(&txn)
        .await?;
        if inserted == 0 {
            // A concurrent delivery stored it first.
            txn.rollback().await?;
            info!("duplicate webhook delivery acknowledged");
            return Ok(WebhookOutcome::Duplicate);
        }

        match self.dispatch(&txn, envelope).await {
            Ok(outcome) => {
                txn.commit().await?;
                info!(outcome = outcome.label(), "webhook processed");
                Ok(outcome)
            }
            Err(e) if e.kind().is_permanent() => {
                txn.commit().await?;
                warn!(error = %e, "webhook stored but could not be applied");
                Err(e)
            }
            Err(e) => {
                txn.rollback().await?;
                error!(error = %e, "webhook processing failed; awaiting redelivery");
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        txn: &DatabaseTransaction,
        envelope: &StripeEventEnvelope,
    ) -> Result<WebhookOutcome, ServiceError> {
        match StripeEventKind::from_envelope(envelope)? {
            StripeEventKind::CheckoutSessionCompleted {
                session_id,
                tracking_id,
                payment_intent,
            } => {
                let tracking_id = tracking_id.ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "checkout session {} carries no tracking_id",
                        session_id
                    ))
                })?;
                let order = self.orders.find_by_tracking_id(txn, &tracking_id).await?;
                if order
                    .checkout_session_id
                    .as_deref()
                    .is_some_and(|known| known != session_id)
                {
                    warn!(%tracking_id, %session_id, "completed session differs from the one on record");
                }

                match self.orders.mark_paid(txn, order.id, payment_intent).await? {
                    PaymentTransition::Applied => Ok(WebhookOutcome::OrderPaid { order_id: order.id }),
                    PaymentTransition::AlreadyPaid => {
                        Ok(WebhookOutcome::AlreadyPaid { order_id: order.id })
                    }
                }
            }
            StripeEventKind::AccountUpdated {
                account_id,
                details_submitted,
            } => match self
                .shops
                .apply_account_update(txn, &account_id, details_submitted)
                .await?
            {
                AccountUpdate::Connected(shop_id) => Ok(WebhookOutcome::ShopConnected { shop_id }),
                AccountUpdate::Unchanged => Ok(WebhookOutcome::AccountUnchanged),
                AccountUpdate::UnknownAccount => {
                    warn!(%account_id, "account.updated for an account no shop uses");
                    Ok(WebhookOutcome::UnknownAccount)
                }
            },
            StripeEventKind::Other(event_type) => {
                info!(%event_type, "event type stored and ignored");
                Ok(WebhookOutcome::Ignored(event_type))
            }
        }
    }
}
