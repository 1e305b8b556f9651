use crate::{
    entities::{product, product_variant},
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Conditional decrements retried before giving up on a contended row.
const MAX_CONTENDED_ATTEMPTS: usize = 5;

/// Inventory movements the ledger knows how to book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryEvent {
    /// A confirmed sale consumes stock and counts towards `sales_count`.
    Sale {
        product_id: Uuid,
        variant_index: Option<i32>,
        quantity: i32,
    },
    /// Stock returned to the shelf (cancellation, refund before shipping).
    Restock {
        product_id: Uuid,
        variant_index: Option<i32>,
        quantity: i32,
    },
}

impl InventoryEvent {
    pub fn product_id(&self) -> Uuid {
        match self {
            InventoryEvent::Sale { product_id, .. } | InventoryEvent::Restock { product_id, .. } => {
                *product_id
            }
        }
    }

    pub fn variant_index(&self) -> Option<i32> {
        match self {
            InventoryEvent::Sale { variant_index, .. }
            | InventoryEvent::Restock { variant_index, .. } => *variant_index,
        }
    }

    /// Signed change to the stock counter.
    pub fn delta(&self) -> i32 {
        match self {
            InventoryEvent::Sale { quantity, .. } => -quantity,
            InventoryEvent::Restock { quantity, .. } => *quantity,
        }
    }
}

/// What a single ledger booking actually did to the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockAdjustment {
    pub product_id: Uuid,
    pub variant_index: Option<i32>,
    pub delta: i32,
    /// Units requested by a sale that were not on the shelf.
    pub shortfall: i32,
}

impl StockAdjustment {
    fn noop(product_id: Uuid, variant_index: Option<i32>) -> Self {
        Self {
            product_id,
            variant_index,
            delta: 0,
            shortfall: 0,
        }
    }
}

/// Owns the per-product and per-variant stock counters.
///
/// Every booking is a single conditional `UPDATE`; counters are never read,
/// modified and written back. Consumption is guarded by
/// `stock_quantity >= quantity`. A sale that loses that guard has already been
/// paid for, so it is still booked: the counter is floored at zero and the
/// shortfall is reported through logs, metrics and [`Event::StockShortfall`].
///
/// A variant sale touches two rows (variant stock and product `sales_count`);
/// callers pass a transaction when both must land together.
#[derive(Clone)]
pub struct StockLedger {
    event_sender: EventSender,
}

impl StockLedger {
    pub fn new(event_sender: EventSender) -> Self {
        Self { event_sender }
    }

    /// Applies a signed delta: positive restores, negative consumes.
    pub async fn adjust_stock<C: ConnectionTrait>(
        &self,
        db: &C,
        product_id: Uuid,
        delta: i32,
        variant_index: Option<i32>,
    ) -> Result<StockAdjustment, ServiceError> {
        let event = match delta.cmp(&0) {
            Ordering::Equal => return Ok(StockAdjustment::noop(product_id, variant_index)),
            Ordering::Greater => InventoryEvent::Restock {
                product_id,
                variant_index,
                quantity: delta,
            },
            Ordering::Less => InventoryEvent::Sale {
                product_id,
                variant_index,
                quantity: delta.checked_neg().ok_or_else(|| {
                    ServiceError::ValidationError("stock delta out of range".to_string())
                })?,
            },
        };
        self.apply(db, event).await
    }

    #[instrument(skip(self, db))]
    pub async fn apply<C: ConnectionTrait>(
        &self,
        db: &C,
        event: InventoryEvent,
    ) -> Result<StockAdjustment, ServiceError> {
        let adjustment = match event {
            InventoryEvent::Sale {
                product_id,
                variant_index,
                quantity,
            } => self.consume(db, product_id, variant_index, quantity).await?,
            InventoryEvent::Restock {
                product_id,
                variant_index,
                quantity,
            } => self.restore(db, product_id, variant_index, quantity).await?,
        };

        if adjustment.delta != 0 {
            self.event_sender
                .send_or_log(Event::StockAdjusted {
                    product_id: adjustment.product_id,
                    variant_index: adjustment.variant_index,
                    delta: adjustment.delta,
                })
                .await;
        }
        Ok(adjustment)
    }

    async fn restore<C: ConnectionTrait>(
        &self,
        db: &C,
        product_id: Uuid,
        variant_index: Option<i32>,
        quantity: i32,
    ) -> Result<StockAdjustment, ServiceError> {
        if quantity <= 0 {
            return Ok(StockAdjustment::noop(product_id, variant_index));
        }

        let rows = match variant_index {
            Some(position) => {
                product_variant::Entity::update_many()
                    .col_expr(
                        product_variant::Column::StockQuantity,
                        Expr::col(product_variant::Column::StockQuantity).add(quantity),
                    )
                    .filter(product_variant::Column::ProductId.eq(product_id))
                    .filter(product_variant::Column::Position.eq(position))
                    .exec(db)
                    .await?
                    .rows_affected
            }
            None => {
                product::Entity::update_many()
                    .col_expr(
                        product::Column::StockQuantity,
                        Expr::col(product::Column::StockQuantity).add(quantity),
                    )
                    .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(product::Column::Id.eq(product_id))
                    .exec(db)
                    .await?
                    .rows_affected
            }
        };

        if rows == 0 {
            return Err(not_found(product_id, variant_index));
        }

        info!(%product_id, ?variant_index, quantity, "stock restored");
        Ok(StockAdjustment {
            product_id,
            variant_index,
            delta: quantity,
            shortfall: 0,
        })
    }

    async fn consume<C: ConnectionTrait>(
        &self,
        db: &C,
        product_id: Uuid,
        variant_index: Option<i32>,
        quantity: i32,
    ) -> Result<StockAdjustment, ServiceError> {
        if quantity <= 0 {
            return Ok(StockAdjustment::noop(product_id, variant_index));
        }

        let mut shortfall = 0;
        let mut booked = false;
        for _ in 0..MAX_CONTENDED_ATTEMPTS {
            if self
                .guarded_decrement(db, product_id, variant_index, quantity)
                .await?
            {
                booked = true;
                break;
            }

            let available = current_stock(db, product_id, variant_index)
                .await?
                .ok_or_else(|| not_found(product_id, variant_index))?;

            // A concurrent restock may have refilled the row since the guard failed.
            if self
                .floor_at_zero(db, product_id, variant_index, quantity)
                .await?
            {
                shortfall = quantity - available.max(0);
                booked = true;
                break;
            }
        }

        if !booked {
            return Err(ServiceError::InternalError(format!(
                "stock row for product {} stayed contended",
                product_id
            )));
        }

        if variant_index.is_some() {
            product::Entity::update_many()
                .col_expr(
                    product::Column::SalesCount,
                    Expr::col(product::Column::SalesCount).add(quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(product::Column::Id.eq(product_id))
                .exec(db)
                .await?;
        }

        if shortfall > 0 {
            warn!(
                %product_id,
                ?variant_index,
                requested = quantity,
                available = quantity - shortfall,
                "confirmed sale exceeded available stock"
            );
            metrics::STOCK_SHORTFALLS.inc();
            self.event_sender
                .send_or_log(Event::StockShortfall {
                    product_id,
                    variant_index,
                    requested: quantity,
                    available: quantity - shortfall,
                })
                .await;
        } else {
            info!(%product_id, ?variant_index, quantity, "stock consumed");
        }

        Ok(StockAdjustment {
            product_id,
            variant_index,
            delta: -(quantity - shortfall),
            shortfall,
        })
    }

    /// `stock -= quantity WHERE stock >= quantity`, plus the product sales counter
    /// in the same statement when the stock lives on the product row.
    async fn guarded_decrement<C: ConnectionTrait>(
        &self,
        db: &C,
        product_id: Uuid,
        variant_index: Option<i32>,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        let rows = match variant_index {
            Some(position) => {
                product_variant::Entity::update_many()
                    .col_expr(
                        product_variant::Column::StockQuantity,
                        Expr::col(product_variant::Column::StockQuantity).sub(quantity),
                    )
                    .filter(product_variant::Column::ProductId.eq(product_id))
                    .filter(product_variant::Column::Position.eq(position))
                    .filter(product_variant::Column::StockQuantity.gte(quantity))
                    .exec(db)
                    .await?
                    .rows_affected
            }
            None => {
                product::Entity::update_many()
                    .col_expr(
                        product::Column::StockQuantity,
                        Expr::col(product::Column::StockQuantity).sub(quantity),
                    )
                    .col_expr(
                        product::Column::SalesCount,
                        Expr::col(product::Column::SalesCount).add(quantity),
                    )
                    .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(product::Column::Id.eq(product_id))
                    .filter(product::Column::StockQuantity.gte(quantity))
                    .exec(db)
                    .await?
                    .rows_affected
            }
        };
        Ok(rows == 1)
    }

    /// `stock = 0 WHERE stock < quantity`; succeeds only while the row is still short.
    async fn floor_at_zero<C: ConnectionTrait>(
        &self,
        db: &C,
        product_id: Uuid,
        variant_index: Option<i32>,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        let rows = match variant_index {
            Some(position) => {
                product_variant::Entity::update_many()
                    .col_expr(product_variant::Column::StockQuantity, Expr::value(0))
                    .filter(product_variant::Column::ProductId.eq(product_id))
                    .filter(product_variant::Column::Position.eq(position))
                    .filter(product_variant::Column::StockQuantity.lt(quantity))
                    .exec(db)
                    .await?
                    .rows_affected
            }
            None => {
                product::Entity::update_many()
                    .col_expr(product::Column::StockQuantity, Expr::value(0))
                    .col_expr(
                        product::Column::SalesCount,
                        Expr::col(product::Column::SalesCount).add(quantity),
                    )
                    .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(product::Column::Id.eq(product_id))
                    .filter(product::Column::StockQuantity.lt(quantity))
                    .exec(db)
                    .await?
                    .rows_affected
            }
        };
        Ok(rows == 1)
    }
}

async fn current_stock<C: ConnectionTrait>(
    db: &C,
    product_id: Uuid,
    variant_index: Option<i32>,
) -> Result<Option<i32>, ServiceError> {
    let stock = match variant_index {
        Some(position) => product_variant::Entity::find()
            .filter(product_variant::Column::ProductId.eq(product_id))
            .filter(product_variant::Column::Position.eq(position))
            .one(db)
            .await?
            .map(|v| v.stock_quantity),
        None => product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .map(|p| p.stock_quantity),
    };
    Ok(stock)
}

fn not_found(product_id: Uuid, variant_index: Option<i32>) -> ServiceError {
    match variant_index {
        Some(position) => ServiceError::NotFound(format!(
            "Variant {} of product {} not found",
            position, product_id
        )),
        None => ServiceError::NotFound(format!("Product {} not found", product_id)),
    }
}
