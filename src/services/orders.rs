use crate::{
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    services::{
        cart_service::CartLine,
        pricing::{line_subtotal, order_totals, MAX_LINE_QUANTITY},
        stock_ledger::{InventoryEvent, StockLedger},
    },
};
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_CANCEL_REASON: &str = "Order cancelled by customer";
const SHOP_CANCEL_REASON: &str = "Order cancelled by shop";
const TRACKING_ID_PREFIX: &str = "ORD-";
const TRACKING_ID_LEN: usize = 12;

/// Postal address stored on the order as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct Address {
    #[validate(length(min = 1, max = 100))]
    pub full_name: String,
    #[validate(length(min = 1, max = 200))]
    pub address_line_1: String,
    #[validate(length(max = 200))]
    pub address_line_2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 56))]
    pub country: String,
}

/// Everything needed to persist an order from a validated cart snapshot.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub shop_id: Uuid,
    pub currency: String,
    pub items: Vec<CartLine>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub tax_rate: Decimal,
    pub shipping_cost: Decimal,
    pub discount_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Admin edit of an order; every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct StatusUpdate {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    #[validate(length(max = 2000))]
    pub admin_notes: Option<String>,
    #[validate(length(max = 100))]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTransition {
    /// This call moved the order to paid and booked the sale.
    Applied,
    /// Someone else already did.
    AlreadyPaid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundOutcome {
    pub order: order::Model,
    pub restocked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub variant_index: Option<i32>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub tracking_id: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub currency: String,
    #[schema(value_type = Object)]
    pub shipping_address: serde_json::Value,
    #[schema(value_type = Object)]
    pub billing_address: serde_json::Value,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub admin_notes: Option<String>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub shipping_cost: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub cancellation_reason: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderWithItems> for OrderResponse {
    fn from(value: OrderWithItems) -> Self {
        let OrderWithItems { order, items } = value;
        Self {
            id: order.id,
            tracking_id: order.tracking_id,
            status: order.status,
            payment_status: order.payment_status,
            currency: order.currency,
            shipping_address: order.shipping_address,
            billing_address: order.billing_address,
            payment_method: order.payment_method,
            notes: order.notes,
            admin_notes: order.admin_notes,
            subtotal: order.subtotal,
            tax_rate: order.tax_rate,
            tax_amount: order.tax_amount,
            shipping_cost: order.shipping_cost,
            discount_amount: order.discount_amount,
            final_amount: order.final_amount,
            cancellation_reason: order.cancellation_reason,
            items: items
                .into_iter()
                .map(|i| OrderItemResponse {
                    product_id: i.product_id,
                    variant_index: i.variant_index,
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                    discount: i.discount,
                    subtotal: i.subtotal,
                })
                .collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Order persistence and the two interlocking state machines.
///
/// `status` follows [`OrderStatus::can_transition_to`]; `payment_status`
/// becomes `paid` only through [`OrderService::mark_paid`], which is also the
/// only place stock is consumed.
#[derive(Clone)]
pub struct OrderService {
    ledger: StockLedger,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(event_sender: EventSender) -> Self {
        Self {
            ledger: StockLedger::new(event_sender.clone()),
            event_sender,
        }
    }

    pub async fn get<C: ConnectionTrait>(
        &self,
        db: &C,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    pub async fn find_by_tracking_id<C: ConnectionTrait>(
        &self,
        db: &C,
        tracking_id: &str,
    ) -> Result<order::Model, ServiceError> {
        order::Entity::find()
            .filter(order::Column::TrackingId.eq(tracking_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", tracking_id)))
    }

    pub async fn items<C: ConnectionTrait>(
        &self,
        db: &C,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::ProductId)
            .all(db)
            .await?)
    }

    pub async fn with_items<C: ConnectionTrait>(
        &self,
        db: &C,
        order: order::Model,
    ) -> Result<OrderWithItems, ServiceError> {
        let items = self.items(db, order.id).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Persists an order with immutable item snapshots. Stock is not touched.
    #[instrument(skip(self, db, new_order), fields(user_id = %new_order.user_id, shop_id = %new_order.shop_id))]
    pub async fn create<C>(&self, db: &C, new_order: NewOrder) -> Result<OrderWithItems, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        if new_order.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "An order needs at least one item".to_string(),
            ));
        }
        if new_order
            .items
            .iter()
            .any(|i| !(1..=MAX_LINE_QUANTITY).contains(&i.quantity))
        {
            return Err(ServiceError::ValidationError(format!(
                "Item quantities must be between 1 and {}",
                MAX_LINE_QUANTITY
            )));
        }
        if new_order.tax_rate < Decimal::ZERO || new_order.tax_rate > Decimal::ONE_HUNDRED {
            return Err(ServiceError::ValidationError(
                "tax_rate must be between 0 and 100".to_string(),
            ));
        }
        if new_order.shipping_cost < Decimal::ZERO || new_order.discount_amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "shipping_cost and discount_amount cannot be negative".to_string(),
            ));
        }

        let snapshots: Vec<(CartLine, Decimal)> = new_order
            .items
            .iter()
            .map(|line| {
                let subtotal = line_subtotal(
                    line.quantity,
                    line.unit_price,
                    line.discount,
                    &new_order.currency,
                );
                (line.clone(), subtotal)
            })
            .collect();
        let subtotal: Decimal = snapshots.iter().map(|(_, s)| *s).sum();
        let totals = order_totals(
            subtotal,
            new_order.tax_rate,
            new_order.shipping_cost,
            new_order.discount_amount,
            &new_order.currency,
        );
        if totals.final_amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discount_amount exceeds the order total".to_string(),
            ));
        }

        let shipping_address = serde_json::to_value(&new_order.shipping_address)?;
        let billing_address = match &new_order.billing_address {
            Some(address) => serde_json::to_value(address)?,
            None => shipping_address.clone(),
        };

        let txn = db.begin().await?;
        let tracking_id = unused_tracking_id(&txn).await?;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let order = order::ActiveModel {
            id: Set(order_id),
            tracking_id: Set(tracking_id.clone()),
            user_id: Set(new_order.user_id),
            shop_id: Set(new_order.shop_id),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            currency: Set(new_order.currency.to_ascii_uppercase()),
            shipping_address: Set(shipping_address),
            billing_address: Set(billing_address),
            payment_method: Set(new_order.payment_method.clone()),
            notes: Set(new_order.notes.clone()),
            admin_notes: Set(None),
            subtotal: Set(totals.subtotal),
            tax_rate: Set(new_order.tax_rate),
            tax_amount: Set(totals.tax_amount),
            shipping_cost: Set(new_order.shipping_cost),
            discount_amount: Set(new_order.discount_amount),
            final_amount: Set(totals.final_amount),
            checkout_session_id: Set(None),
            payment_intent_id: Set(None),
            cancellation_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(snapshots.len());
        for (line, subtotal) in snapshots {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                variant_index: Set(line.variant_index),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                discount: Set(line.discount),
                subtotal: Set(subtotal),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }
        txn.commit().await?;

        metrics::ORDERS_CREATED.inc();
        info!(%order_id, %tracking_id, final_amount = %totals.final_amount, "order created");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                shop_id: new_order.shop_id,
                tracking_id,
            })
            .await;

        Ok(OrderWithItems { order, items })
    }

    /// Records the hosted checkout session that will pay for this order.
    pub async fn attach_checkout_session<C: ConnectionTrait>(
        &self,
        db: &C,
        order_id: Uuid,
        session_id: &str,
    ) -> Result<(), ServiceError> {
        order::Entity::update_many()
            .col_expr(order::Column::CheckoutSessionId, Expr::value(session_id))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(db)
            .await?;
        Ok(())
    }

    /// Hard-deletes an order that never got a working checkout session.
    #[instrument(skip(self, db))]
    pub async fn delete<C>(&self, db: &C, order_id: Uuid) -> Result<(), ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let txn = db.begin().await?;
        let order = self.get(&txn, order_id).await?;
        if matches!(
            order.payment_status,
            PaymentStatus::Paid | PaymentStatus::Refunded
        ) {
            return Err(ServiceError::InvalidState(format!(
                "Order {} has been paid and cannot be deleted",
                order.tracking_id
            )));
        }

        order_item::Entity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        order::Entity::delete_many()
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!(%order_id, tracking_id = %order.tracking_id, "order deleted");
        Ok(())
    }

    /// Cancels an order from pending, confirmed or processing.
    ///
    /// Every item is restocked regardless of whether the order was ever paid.
    #[instrument(skip(self, db))]
    pub async fn cancel<C>(
        &self,
        db: &C,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());

        let txn = db.begin().await?;
        let order = self.get(&txn, order_id).await?;
        if !order.status.is_cancellable() {
            return Err(ServiceError::InvalidState(format!(
                "Cannot cancel an order that is {}",
                order.status
            )));
        }

        // Guarded on the cancellable set so two racing cancels restock once.
        let updated = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(order::Column::CancellationReason, Expr::value(reason.clone()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in([
                OrderStatus::Pending,
                OrderStatus::Confirmed,
                OrderStatus::Processing,
            ]))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(ServiceError::InvalidState(format!(
                "Order {} changed state while cancelling",
                order.tracking_id
            )));
        }

        // TODO: skip the restock for orders that were never paid once product
        // owners decide unpaid cancellations should not return stock.
        for item in self.items(&txn, order_id).await? {
            self.book(
                &txn,
                InventoryEvent::Restock {
                    product_id: item.product_id,
                    variant_index: item.variant_index,
                    quantity: item.quantity,
                },
            )
            .await?;
        }

        let cancelled = self.get(&txn, order_id).await?;
        txn.commit().await?;

        metrics::ORDER_CANCELLATIONS.inc();
        info!(%order_id, %reason, "order cancelled");
        self.event_sender
            .send_or_log(Event::OrderCancelled { order_id, reason })
            .await;
        Ok(cancelled)
    }

    /// Moves payment to `paid` and books the sale for every item, at most once.
    ///
    /// The status write is conditional on the payment still being pending or
    /// failed; only the caller that wins it consumes stock. Fulfilment status
    /// is left alone.
    #[instrument(skip(self, db))]
    pub async fn mark_paid<C>(
        &self,
        db: &C,
        order_id: Uuid,
        payment_intent_id: Option<String>,
    ) -> Result<PaymentTransition, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let txn = db.begin().await?;
        let order = self.get(&txn, order_id).await?;

        let mut update = order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Paid))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(intent) = payment_intent_id {
            update = update.col_expr(order::Column::PaymentIntentId, Expr::value(intent));
        }
        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(
                order::Column::PaymentStatus.is_in([PaymentStatus::Pending, PaymentStatus::Failed]),
            )
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            info!(%order_id, payment_status = %order.payment_status, "payment already recorded");
            return Ok(PaymentTransition::AlreadyPaid);
        }
        if order.status == OrderStatus::Cancelled {
            warn!(%order_id, "payment received for a cancelled order; refund required");
        }

        for item in self.items(&txn, order_id).await? {
            self.book(
                &txn,
                InventoryEvent::Sale {
                    product_id: item.product_id,
                    variant_index: item.variant_index,
                    quantity: item.quantity,
                },
            )
            .await?;
        }
        txn.commit().await?;

        metrics::ORDERS_PAID.inc();
        info!(%order_id, tracking_id = %order.tracking_id, "order paid");
        self.event_sender
            .send_or_log(Event::OrderPaid {
                order_id,
                tracking_id: order.tracking_id,
            })
            .await;
        Ok(PaymentTransition::Applied)
    }

    /// Pending payment becomes failed (expired or abandoned session).
    pub async fn mark_payment_failed<C: ConnectionTrait>(
        &self,
        db: &C,
        order_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Failed))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(db)
            .await?;

        let changed = result.rows_affected == 1;
        if changed {
            self.event_sender
                .send_or_log(Event::OrderPaymentFailed { order_id })
                .await;
        }
        Ok(changed)
    }

    /// Refunded on both machines; goods still in the shop go back on the shelf.
    #[instrument(skip(self, db))]
    pub async fn record_refund<C>(&self, db: &C, order_id: Uuid) -> Result<RefundOutcome, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let txn = db.begin().await?;
        let order = self.get(&txn, order_id).await?;
        if order.payment_status != PaymentStatus::Paid {
            return Err(ServiceError::InvalidState(format!(
                "Cannot refund an order whose payment is {}",
                order.payment_status
            )));
        }

        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Refunded))
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Refunded))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Paid))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Order {} was refunded concurrently",
                order.tracking_id
            )));
        }

        // Cancellation already returned the stock.
        let restocked = !order.status.has_shipped() && order.status != OrderStatus::Cancelled;
        if restocked {
            for item in self.items(&txn, order_id).await? {
                self.book(
                    &txn,
                    InventoryEvent::Restock {
                        product_id: item.product_id,
                        variant_index: item.variant_index,
                        quantity: item.quantity,
                    },
                )
                .await?;
            }
        }

        let refunded = self.get(&txn, order_id).await?;
        txn.commit().await?;

        metrics::ORDER_REFUNDS.inc();
        self.event_sender
            .send_or_log(Event::OrderRefunded {
                order_id,
                restocked,
            })
            .await;
        Ok(RefundOutcome {
            order: refunded,
            restocked,
        })
    }

    /// Admin edit. Only values that differ from the stored ones are written.
    ///
    /// `cancelled` is routed through [`Self::cancel`], `refunded` through
    /// [`Self::record_refund`] and a `paid` payment through [`Self::mark_paid`],
    /// so the stock side effects of those transitions always happen.
    #[instrument(skip(self, db, update))]
    pub async fn update_status<C>(
        &self,
        db: &C,
        order_id: Uuid,
        update: StatusUpdate,
    ) -> Result<order::Model, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let txn = db.begin().await?;
        let mut order = self.get(&txn, order_id).await?;
        let mut status_event = None;

        if let Some(next) = update.status.filter(|s| *s != order.status) {
            if !order.status.can_transition_to(next) {
                return Err(ServiceError::InvalidState(format!(
                    "Cannot move order from {} to {}",
                    order.status, next
                )));
            }
            let previous = order.status;
            order = match next {
                OrderStatus::Cancelled => {
                    self.cancel(&txn, order_id, Some(SHOP_CANCEL_REASON.to_string()))
                        .await?
                }
                OrderStatus::Refunded => self.record_refund(&txn, order_id).await?.order,
                _ => {
                    let result = order::Entity::update_many()
                        .col_expr(order::Column::Status, Expr::value(next))
                        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                        .filter(order::Column::Id.eq(order_id))
                        .filter(order::Column::Status.eq(previous))
                        .exec(&txn)
                        .await?;
                    if result.rows_affected == 0 {
                        return Err(ServiceError::Conflict(format!(
                            "Order {} changed while updating",
                            order.tracking_id
                        )));
                    }
                    self.get(&txn, order_id).await?
                }
            };
            status_event = Some((previous, next));
        }

        if let Some(next) = update.payment_status.filter(|p| *p != order.payment_status) {
            match (order.payment_status, next) {
                (PaymentStatus::Pending | PaymentStatus::Failed, PaymentStatus::Paid) => {
                    self.mark_paid(&txn, order_id, None).await?;
                }
                (PaymentStatus::Paid, PaymentStatus::Refunded) => {
                    self.record_refund(&txn, order_id).await?;
                }
                (PaymentStatus::Pending, PaymentStatus::Failed) => {
                    self.mark_payment_failed(&txn, order_id).await?;
                }
                (current, next) => {
                    return Err(ServiceError::InvalidState(format!(
                        "Cannot move payment from {} to {}",
                        current, next
                    )));
                }
            }
            order = self.get(&txn, order_id).await?;
        }

        if update.admin_notes.is_some() || update.payment_method.is_some() {
            let mut active: order::ActiveModel = order.into();
            if let Some(notes) = update.admin_notes {
                active.admin_notes = Set(Some(notes));
            }
            if let Some(method) = update.payment_method {
                active.payment_method = Set(Some(method));
            }
            active.updated_at = Set(Utc::now());
            order = active.update(&txn).await?;
        }

        txn.commit().await?;

        if let Some((old, new)) = status_event {
            info!(%order_id, %old, %new, "order status updated");
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: old.to_string(),
                    new_status: new.to_string(),
                })
                .await;
        }
        Ok(order)
    }

    /// Orders whose payment is still pending after `older_than` and that have a
    /// checkout session the gateway can be asked about.
    pub async fn stale_pending_payments<C: ConnectionTrait>(
        &self,
        db: &C,
        older_than: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .filter(order::Column::Status.ne(OrderStatus::Cancelled))
            .filter(order::Column::CheckoutSessionId.is_not_null())
            .filter(order::Column::CreatedAt.lt(older_than))
            .order_by_asc(order::Column::CreatedAt)
            .limit(limit)
            .all(db)
            .await?)
    }

    /// Books one inventory movement. Products removed from the catalog since the
    /// order was placed have nothing left to adjust.
    async fn book<C: ConnectionTrait>(
        &self,
        db: &C,
        event: InventoryEvent,
    ) -> Result<(), ServiceError> {
        match self.ledger.apply(db, event).await {
            Ok(_) => Ok(()),
            Err(ServiceError::NotFound(message)) => {
                warn!(?event, %message, "skipping stock movement for removed catalog entry");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn generate_tracking_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TRACKING_ID_LEN)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect();
    format!("{}{}", TRACKING_ID_PREFIX, suffix)
}

async fn unused_tracking_id<C: ConnectionTrait>(db: &C) -> Result<String, ServiceError> {
    for _ in 0..5 {
        let candidate = generate_tracking_id();
        let taken = order::Entity::find()
            .filter(order::Column::TrackingId.eq(candidate.as_str()))
            .one(db)
            .await?
            .is_some();
        if !taken {
            return Ok(candidate);
        }
    }
    Err(ServiceError::InternalError(
        "could not allocate a unique tracking id".to_string(),
    ))
}
