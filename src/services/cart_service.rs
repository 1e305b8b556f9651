use crate::{
    entities::{cart, cart_item, product, product_variant, shop},
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{line_subtotal, same_amount, MAX_LINE_QUANTITY},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// One line of a cart as shown to the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub variant_index: Option<i32>,
    pub quantity: i32,
    pub unit_price: Decimal,
    /// Percentage discount applied to `unit_price`
    pub discount: Decimal,
    pub subtotal: Decimal,
}

impl From<cart_item::Model> for CartLine {
    fn from(item: cart_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            variant_index: item.variant_index,
            quantity: item.quantity,
            unit_price: item.unit_price,
            discount: item.discount,
            subtotal: item.subtotal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub cart_id: Option<Uuid>,
    pub shop_id: Uuid,
    pub items: Vec<CartLine>,
    pub total: Decimal,
}

impl CartView {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// An item arriving from a device-local cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IncomingCartItem {
    pub product_id: Uuid,
    pub quantity: i32,
    pub variant_index: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CartIssue {
    /// Product or variant no longer exists or is inactive
    Unavailable,
    /// Requested quantity exceeds current stock
    InsufficientStock,
    /// Stored price or discount differs from the live catalog
    PriceChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartValidationError {
    pub product_id: Uuid,
    pub variant_index: Option<i32>,
    pub issue: CartIssue,
    pub message: String,
}

/// Result of checking a cart against live stock and pricing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CartValidation {
    pub valid: bool,
    pub errors: Vec<CartValidationError>,
    /// Corrected copies of every line that had at least one issue
    pub updated_items: Vec<CartLine>,
}

impl CartValidation {
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Catalog values currently in force for a (product, variant) pair.
#[derive(Debug, Clone)]
pub(crate) struct LiveLine {
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub available: i32,
}

type LineKey = (Uuid, Option<i32>);

/// Server-side carts, one per (user, shop).
///
/// Prices on cart lines are always taken from the live catalog at write time,
/// never from the caller. Stock is only checked here, never consumed: the
/// ledger books a sale when the payment provider confirms the order.
#[derive(Clone)]
pub struct CartService {
    event_sender: EventSender,
}

impl CartService {
    pub fn new(event_sender: EventSender) -> Self {
        Self { event_sender }
    }

    /// Returns the cart for a user in a shop; an empty view if none exists yet.
    pub async fn get_cart<C: ConnectionTrait>(
        &self,
        db: &C,
        user_id: Uuid,
        shop_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        match find_cart(db, user_id, shop_id).await? {
            Some(cart) => cart_view(db, &cart).await,
            None => Ok(CartView {
                cart_id: None,
                shop_id,
                items: Vec::new(),
                total: Decimal::ZERO,
            }),
        }
    }

    /// Adds `quantity` units of a product (or one of its variants).
    ///
    /// Quantities accumulate on an existing line with the same
    /// (product, variant). The accumulated quantity must stay within
    /// [`MAX_LINE_QUANTITY`] and within available stock.
    #[instrument(skip(self, db))]
    pub async fn add_item<C>(
        &self,
        db: &C,
        user_id: Uuid,
        shop_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        variant_index: Option<i32>,
    ) -> Result<CartView, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
            return Err(ServiceError::ValidationError(format!(
                "Quantity must be between 1 and {}",
                MAX_LINE_QUANTITY
            )));
        }

        let txn = db.begin().await?;
        let product = shop_product(&txn, shop_id, product_id).await?;
        if !product.is_active {
            return Err(ServiceError::ValidationError(format!(
                "Product {} is not available",
                product_id
            )));
        }
        let live = live_line(&txn, &product, variant_index)
            .await?
            .ok_or_else(|| variant_not_found(product_id, variant_index))?;

        let currency = shop_currency(&txn, shop_id).await?;

        let cart = get_or_create_cart(&txn, user_id, shop_id).await?;
        let existing = find_item(&txn, cart.id, product_id, variant_index).await?;
        let new_quantity = existing.map(|i| i.quantity).unwrap_or(0) + quantity;

        if new_quantity > MAX_LINE_QUANTITY {
            return Err(ServiceError::ValidationError(format!(
                "At most {} units of a product per order",
                MAX_LINE_QUANTITY
            )));
        }
        if new_quantity > live.available {
            return Err(ServiceError::ValidationError(format!(
                "Only {} units of product {} in stock",
                live.available, product_id
            )));
        }

        upsert_line(&txn, cart.id, product_id, variant_index, new_quantity, &live, &currency)
            .await?;
        let view = cart_view(&txn, &cart).await?;
        txn.commit().await?;

        info!(%user_id, %shop_id, %product_id, new_quantity, "cart item added");
        Ok(view)
    }

    /// Sets the quantity of an existing line. Zero or less removes it.
    #[instrument(skip(self, db))]
    pub async fn update_quantity<C>(
        &self,
        db: &C,
        user_id: Uuid,
        shop_id: Uuid,
        product_id: Uuid,
        variant_index: Option<i32>,
        quantity: i32,
    ) -> Result<CartView, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        if quantity <= 0 {
            return self
                .remove_item(db, user_id, shop_id, product_id, variant_index)
                .await;
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(ServiceError::ValidationError(format!(
                "Quantity must be between 1 and {}",
                MAX_LINE_QUANTITY
            )));
        }

        let txn = db.begin().await?;
        let cart = find_cart(&txn, user_id, shop_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;
        find_item(&txn, cart.id, product_id, variant_index)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;

        let product = shop_product(&txn, shop_id, product_id).await?;
        let live = live_line(&txn, &product, variant_index)
            .await?
            .filter(|_| product.is_active)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("Product {} is not available", product_id))
            })?;
        if quantity > live.available {
            return Err(ServiceError::ValidationError(format!(
                "Only {} units of product {} in stock",
                live.available, product_id
            )));
        }

        let currency = shop_currency(&txn, shop_id).await?;
        upsert_line(&txn, cart.id, product_id, variant_index, quantity, &live, &currency).await?;
        let view = cart_view(&txn, &cart).await?;
        txn.commit().await?;
        Ok(view)
    }

    /// Removes a line; removing a line that is not there is not an error.
    #[instrument(skip(self, db))]
    pub async fn remove_item<C: ConnectionTrait>(
        &self,
        db: &C,
        user_id: Uuid,
        shop_id: Uuid,
        product_id: Uuid,
        variant_index: Option<i32>,
    ) -> Result<CartView, ServiceError> {
        let Some(cart) = find_cart(db, user_id, shop_id).await? else {
            return self.get_cart(db, user_id, shop_id).await;
        };

        let deleted = cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .filter(cart_item::Column::VariantKey.eq(cart_item::variant_key(variant_index)))
            .exec(db)
            .await?;
        if deleted.rows_affected > 0 {
            info!(%user_id, %shop_id, %product_id, "cart item removed");
        }

        cart_view(db, &cart).await
    }

    /// Empties the cart. The cart row itself is kept.
    #[instrument(skip(self, db))]
    pub async fn clear_cart<C: ConnectionTrait>(
        &self,
        db: &C,
        user_id: Uuid,
        shop_id: Uuid,
    ) -> Result<(), ServiceError> {
        if let Some(cart) = find_cart(db, user_id, shop_id).await? {
            cart_item::Entity::delete_many()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .exec(db)
                .await?;
            self.event_sender
                .send_or_log(Event::CartCleared { user_id, shop_id })
                .await;
        }
        Ok(())
    }

    /// Re-checks every line against the live catalog without modifying anything.
    ///
    /// Each line is checked for (a) the product/variant still existing and being
    /// active, (b) its quantity fitting current stock and (c) its stored price
    /// and discount matching live values. Every mismatch adds an error, and every
    /// line with at least one mismatch appears once in `updated_items` with the
    /// quantity clamped and live pricing applied.
    #[instrument(skip(self, db))]
    pub async fn validate_cart<C: ConnectionTrait>(
        &self,
        db: &C,
        user_id: Uuid,
        shop_id: Uuid,
    ) -> Result<CartValidation, ServiceError> {
        let Some(cart) = find_cart(db, user_id, shop_id).await? else {
            return Ok(CartValidation {
                valid: true,
                ..Default::default()
            });
        };

        let currency = shop_currency(db, shop_id).await?;
        let items = cart_items(db, cart.id).await?;
        let mut validation = CartValidation::default();

        for item in items {
            let product = product::Entity::find_by_id(item.product_id)
                .filter(product::Column::ShopId.eq(shop_id))
                .one(db)
                .await?;
            let live = match &product {
                Some(p) if p.is_active => live_line(db, p, item.variant_index).await?,
                _ => None,
            };

            let Some(live) = live else {
                validation.errors.push(CartValidationError {
                    product_id: item.product_id,
                    variant_index: item.variant_index,
                    issue: CartIssue::Unavailable,
                    message: format!("Product {} is no longer available", item.product_id),
                });
                validation.updated_items.push(CartLine {
                    quantity: 0,
                    subtotal: Decimal::ZERO,
                    ..CartLine::from(item)
                });
                continue;
            };

            let mut corrected = CartLine::from(item.clone());
            let mut changed = false;

            if item.quantity > live.available {
                validation.errors.push(CartValidationError {
                    product_id: item.product_id,
                    variant_index: item.variant_index,
                    issue: CartIssue::InsufficientStock,
                    message: format!(
                        "Only {} units of product {} in stock, {} requested",
                        live.available.max(0),
                        item.product_id,
                        item.quantity
                    ),
                });
                corrected.quantity = live.available.clamp(0, MAX_LINE_QUANTITY);
                changed = true;
            }

            if !same_amount(item.unit_price, live.unit_price)
                || !same_amount(item.discount, live.discount)
            {
                validation.errors.push(CartValidationError {
                    product_id: item.product_id,
                    variant_index: item.variant_index,
                    issue: CartIssue::PriceChanged,
                    message: format!("Price of product {} has changed", item.product_id),
                });
                corrected.unit_price = live.unit_price;
                corrected.discount = live.discount;
                changed = true;
            }

            if changed {
                corrected.subtotal = line_subtotal(
                    corrected.quantity,
                    corrected.unit_price,
                    corrected.discount,
                    &currency,
                );
                validation.updated_items.push(corrected);
            }
        }

        validation.valid = validation.errors.is_empty();
        Ok(validation)
    }

    /// Folds a device-local cart into the user's server cart.
    ///
    /// Every incoming product must belong to `shop_id`; a single foreign or
    /// unknown product rejects the whole merge. Per line, quantities are summed
    /// with any existing line and capped at `min(99, available stock)`; the
    /// excess is dropped. Lines whose cap is zero, inactive products and unknown
    /// variants are skipped.
    #[instrument(skip(self, db, incoming), fields(incoming = incoming.len()))]
    pub async fn merge_carts<C>(
        &self,
        db: &C,
        user_id: Uuid,
        shop_id: Uuid,
        incoming: &[IncomingCartItem],
    ) -> Result<CartView, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let mut requested: BTreeMap<LineKey, i32> = BTreeMap::new();
        for item in incoming.iter().filter(|i| i.quantity > 0) {
            let entry = requested
                .entry((item.product_id, item.variant_index))
                .or_insert(0);
            *entry = entry.saturating_add(item.quantity);
        }

        let product_ids: HashSet<Uuid> = requested.keys().map(|(id, _)| *id).collect();
        let products = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids.iter().copied()))
            .filter(product::Column::ShopId.eq(shop_id))
            .all(db)
            .await?;
        if products.len() != product_ids.len() {
            let known: HashSet<Uuid> = products.iter().map(|p| p.id).collect();
            let mut foreign: Vec<String> = product_ids
                .difference(&known)
                .map(|id| id.to_string())
                .collect();
            foreign.sort();
            return Err(ServiceError::ValidationError(format!(
                "Products do not belong to this shop: {}",
                foreign.join(", ")
            )));
        }

        let txn = db.begin().await?;
        let currency = shop_currency(&txn, shop_id).await?;
        let cart = get_or_create_cart(&txn, user_id, shop_id).await?;
        let mut merged_lines = 0;

        for ((product_id, variant_index), incoming_quantity) in requested {
            let Some(product) = products.iter().find(|p| p.id == product_id) else {
                continue;
            };
            if !product.is_active {
                warn!(%product_id, "skipping inactive product during cart merge");
                continue;
            }
            let Some(live) = live_line(&txn, product, variant_index).await? else {
                warn!(%product_id, ?variant_index, "skipping unknown variant during cart merge");
                continue;
            };

            let current = find_item(&txn, cart.id, product_id, variant_index)
                .await?
                .map(|i| i.quantity)
                .unwrap_or(0);
            let cap = live.available.min(MAX_LINE_QUANTITY);
            if cap <= 0 {
                warn!(%product_id, ?variant_index, "skipping out-of-stock item during cart merge");
                continue;
            }
            let quantity = current.saturating_add(incoming_quantity).min(cap);

            upsert_line(&txn, cart.id, product_id, variant_index, quantity, &live, &currency)
                .await?;
            merged_lines += 1;
        }

        let view = cart_view(&txn, &cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartMerged {
                user_id,
                shop_id,
                lines: merged_lines,
            })
            .await;
        info!(%user_id, %shop_id, merged_lines, "cart merge complete");
        Ok(view)
    }
}

async fn find_cart<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    shop_id: Uuid,
) -> Result<Option<cart::Model>, ServiceError> {
    Ok(cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .filter(cart::Column::ShopId.eq(shop_id))
        .one(db)
        .await?)
}

/// Insert-if-absent on the unique (user, shop) index, so concurrent first adds
/// end up sharing one cart.
async fn get_or_create_cart<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    shop_id: Uuid,
) -> Result<cart::Model, ServiceError> {
    if let Some(cart) = find_cart(db, user_id, shop_id).await? {
        return Ok(cart);
    }

    let now = Utc::now();
    let model = cart::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        shop_id: Set(shop_id),
        created_at: Set(now),
        updated_at: Set(now),
    };
    cart::Entity::insert(model)
        .on_conflict(
            OnConflict::columns([cart::Column::UserId, cart::Column::ShopId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    find_cart(db, user_id, shop_id)
        .await?
        .ok_or_else(|| ServiceError::InternalError("cart vanished after insert".to_string()))
}

async fn cart_items<C: ConnectionTrait>(
    db: &C,
    cart_id: Uuid,
) -> Result<Vec<cart_item::Model>, ServiceError> {
    Ok(cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .all(db)
        .await?)
}

async fn cart_view<C: ConnectionTrait>(
    db: &C,
    cart: &cart::Model,
) -> Result<CartView, ServiceError> {
    let items: Vec<CartLine> = cart_items(db, cart.id)
        .await?
        .into_iter()
        .map(CartLine::from)
        .collect();
    let total = items.iter().map(|i| i.subtotal).sum();
    Ok(CartView {
        cart_id: Some(cart.id),
        shop_id: cart.shop_id,
        items,
        total,
    })
}

/// Snapshot of the cart lines, used as the input to order creation.
pub(crate) async fn cart_lines<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    shop_id: Uuid,
) -> Result<Vec<CartLine>, ServiceError> {
    match find_cart(db, user_id, shop_id).await? {
        Some(cart) => Ok(cart_items(db, cart.id)
            .await?
            .into_iter()
            .map(CartLine::from)
            .collect()),
        None => Ok(Vec::new()),
    }
}

async fn find_item<C: ConnectionTrait>(
    db: &C,
    cart_id: Uuid,
    product_id: Uuid,
    variant_index: Option<i32>,
) -> Result<Option<cart_item::Model>, ServiceError> {
    Ok(cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .filter(cart_item::Column::ProductId.eq(product_id))
        .filter(cart_item::Column::VariantKey.eq(cart_item::variant_key(variant_index)))
        .one(db)
        .await?)
}

/// Writes a line at `quantity` with live pricing. The unique line index turns
/// a concurrent first insert of the same line into an update of one row.
async fn upsert_line<C: ConnectionTrait>(
    db: &C,
    cart_id: Uuid,
    product_id: Uuid,
    variant_index: Option<i32>,
    quantity: i32,
    live: &LiveLine,
    currency: &str,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    let line = cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        cart_id: Set(cart_id),
        product_id: Set(product_id),
        variant_index: Set(variant_index),
        variant_key: Set(cart_item::variant_key(variant_index)),
        quantity: Set(quantity),
        unit_price: Set(live.unit_price),
        discount: Set(live.discount),
        subtotal: Set(line_subtotal(quantity, live.unit_price, live.discount, currency)),
        created_at: Set(now),
        updated_at: Set(now),
    };

    cart_item::Entity::insert(line)
        .on_conflict(
            OnConflict::columns([
                cart_item::Column::CartId,
                cart_item::Column::ProductId,
                cart_item::Column::VariantKey,
            ])
            .update_columns([
                cart_item::Column::Quantity,
                cart_item::Column::UnitPrice,
                cart_item::Column::Discount,
                cart_item::Column::Subtotal,
                cart_item::Column::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

async fn shop_currency<C: ConnectionTrait>(db: &C, shop_id: Uuid) -> Result<String, ServiceError> {
    shop::Entity::find_by_id(shop_id)
        .one(db)
        .await?
        .map(|shop| shop.currency)
        .ok_or_else(|| ServiceError::NotFound(format!("Shop {} not found", shop_id)))
}

async fn shop_product<C: ConnectionTrait>(
    db: &C,
    shop_id: Uuid,
    product_id: Uuid,
) -> Result<product::Model, ServiceError> {
    product::Entity::find_by_id(product_id)
        .filter(product::Column::ShopId.eq(shop_id))
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
}

fn variant_not_found(product_id: Uuid, variant_index: Option<i32>) -> ServiceError {
    match variant_index {
        Some(position) => ServiceError::NotFound(format!(
            "Variant {} of product {} not found",
            position, product_id
        )),
        None => ServiceError::ValidationError(format!(
            "Product {} has variants; choose one",
            product_id
        )),
    }
}

/// Resolves the price, discount and stock in force for a line.
///
/// A variant falls back to the product's price and discount when it has no
/// override. A product with variants is only sold through one of them, so a
/// line without a variant index resolves to `None` for such a product.
pub(crate) async fn live_line<C: ConnectionTrait>(
    db: &C,
    product: &product::Model,
    variant_index: Option<i32>,
) -> Result<Option<LiveLine>, ServiceError> {
    let variants = product_variant::Entity::find()
        .filter(product_variant::Column::ProductId.eq(product.id))
        .all(db)
        .await?;

    let live = match variant_index {
        Some(position) => variants
            .iter()
            .find(|v| v.position == position)
            .map(|variant| LiveLine {
                unit_price: variant.price.unwrap_or(product.price),
                discount: variant.discount.unwrap_or(product.discount),
                available: variant.stock_quantity,
            }),
        None if variants.is_empty() => Some(LiveLine {
            unit_price: product.price,
            discount: product.discount,
            available: product.stock_quantity,
        }),
        None => None,
    };
    Ok(live)
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn missing_variant_choice_is_a_validation_error() {
        let product_id = Uuid::new_v4();
        assert!(matches!(
            variant_not_found(product_id, None),
            ServiceError::ValidationError(_)
        ));
        assert!(matches!(
            variant_not_found(product_id, Some(3)),
            ServiceError::NotFound(message) if message.contains("Variant 3")
        ));
    }

    #[test]
    fn validation_summary_joins_messages() {
        let validation = CartValidation {
            valid: false,
            errors: vec![
                CartValidationError {
                    product_id: Uuid::nil(),
                    variant_index: None,
                    issue: CartIssue::PriceChanged,
                    message: "a".into(),
                },
                CartValidationError {
                    product_id: Uuid::nil(),
                    variant_index: None,
                    issue: CartIssue::InsufficientStock,
                    message: "b".into(),
                },
            ],
            updated_items: vec![],
        };
        assert_eq!(validation.error_summary(), "a; b");
    }
}
