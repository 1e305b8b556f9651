use crate::{
    entities::{order::PaymentStatus, product, shop},
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    payments::{CheckoutAdapter, CheckoutItem, CheckoutRedirect, Customer},
    services::{
        cart_service::{cart_lines, CartService},
        orders::{Address, NewOrder, OrderService, OrderWithItems, RefundOutcome},
    },
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Customer-supplied part of an order; items come from the server cart.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate]
    pub shipping_address: Address,
    #[validate]
    pub billing_address: Option<Address>,
    #[validate(length(max = 100))]
    pub payment_method: Option<String>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
    #[serde(default)]
    #[validate(custom = "validate_tax_rate")]
    pub tax_rate: Decimal,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub shipping_cost: Decimal,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub discount_amount: Decimal,
}

fn validate_tax_rate(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > Decimal::ONE_HUNDRED {
        return Err(ValidationError::new("tax_rate_out_of_range"));
    }
    Ok(())
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("must_not_be_negative"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutStarted {
    pub order_id: Uuid,
    pub tracking_id: String,
    /// Hosted payment page to redirect the customer to
    pub url: String,
}

/// Cart → order → hosted checkout session, with the order rolled back when
/// the payment provider cannot open a session.
#[derive(Clone)]
pub struct CheckoutService {
    carts: CartService,
    orders: OrderService,
    adapter: CheckoutAdapter,
    event_sender: EventSender,
}

impl CheckoutService {
    pub fn new(
        carts: CartService,
        orders: OrderService,
        adapter: CheckoutAdapter,
        event_sender: EventSender,
    ) -> Self {
        Self {
            carts,
            orders,
            adapter,
            event_sender,
        }
    }

    #[instrument(skip(self, db, shop, customer, request), fields(shop_id = %shop.id, user_id = %customer.user_id))]
    pub async fn start_checkout<C>(
        &self,
        db: &C,
        shop: &shop::Model,
        customer: &Customer,
        request: CheckoutRequest,
    ) -> Result<CheckoutStarted, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        request.validate()?;
        if shop.payment_account().is_none() {
            return Err(ServiceError::ValidationError(format!(
                "Shop '{}' is not accepting payments yet",
                shop.subdomain
            )));
        }

        let lines = cart_lines(db, customer.user_id, shop.id).await?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }
        let validation = self
            .carts
            .validate_cart(db, customer.user_id, shop.id)
            .await?;
        if !validation.valid {
            return Err(ServiceError::ValidationError(format!(
                "Cart needs attention: {}",
                validation.error_summary()
            )));
        }

        let placed = self
            .orders
            .create(
                db,
                NewOrder {
                    user_id: customer.user_id,
                    shop_id: shop.id,
                    currency: shop.currency.clone(),
                    items: lines,
                    shipping_address: request.shipping_address,
                    billing_address: request.billing_address,
                    payment_method: request.payment_method,
                    notes: request.notes,
                    tax_rate: request.tax_rate,
                    shipping_cost: request.shipping_cost,
                    discount_amount: request.discount_amount,
                },
            )
            .await?;

        let redirect = match self.open_session(db, shop, customer, &placed).await {
            Ok(redirect) => redirect,
            Err(e) => {
                self.roll_back(db, &placed).await;
                return Err(e);
            }
        };

        let order_id = placed.order.id;
        if let Err(e) = self
            .orders
            .attach_checkout_session(db, order_id, &redirect.session_id)
            .await
        {
            warn!(%order_id, error = %e, "could not record checkout session on order");
        }
        if let Err(e) = self.carts.clear_cart(db, customer.user_id, shop.id).await {
            warn!(%order_id, error = %e, "order placed but cart was not cleared");
        }

        info!(%order_id, tracking_id = %placed.order.tracking_id, "checkout started");
        Ok(CheckoutStarted {
            order_id,
            tracking_id: placed.order.tracking_id,
            url: redirect.url,
        })
    }

    async fn open_session<C: ConnectionTrait>(
        &self,
        db: &C,
        shop: &shop::Model,
        customer: &Customer,
        placed: &OrderWithItems,
    ) -> Result<CheckoutRedirect, ServiceError> {
        let product_ids: Vec<Uuid> = placed.items.iter().map(|i| i.product_id).collect();
        let names: HashMap<Uuid, String> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect();

        let items: Vec<CheckoutItem> = placed
            .items
            .iter()
            .map(|item| CheckoutItem {
                name: names
                    .get(&item.product_id)
                    .cloned()
                    .unwrap_or_else(|| item.product_id.to_string()),
                quantity: item.quantity,
                subtotal: item.subtotal,
            })
            .collect();

        self.adapter
            .checkout_items(&items, shop, customer, &placed.order.tracking_id)
            .await
    }

    /// Compensating delete. A failure here leaves an orphaned order that needs
    /// manual reconciliation.
    async fn roll_back<C>(&self, db: &C, placed: &OrderWithItems)
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let order_id = placed.order.id;
        let tracking_id = placed.order.tracking_id.clone();
        match self.orders.delete(db, order_id).await {
            Ok(()) => {
                metrics::ORDERS_ROLLED_BACK.inc();
                warn!(%order_id, %tracking_id, "checkout session failed; order rolled back");
                self.event_sender
                    .send_or_log(Event::OrderRolledBack {
                        order_id,
                        tracking_id,
                    })
                    .await;
            }
            Err(e) => {
                metrics::ORPHANED_ORDERS.inc();
                error!(
                    %order_id,
                    %tracking_id,
                    error = %e,
                    "orphaned order: rollback after checkout failure did not complete"
                );
            }
        }
    }

    /// Refunds the captured payment on the shop's connected account, then
    /// records the refund on the order.
    #[instrument(skip(self, db))]
    pub async fn refund<C>(&self, db: &C, order_id: Uuid) -> Result<RefundOutcome, ServiceError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let order = self.orders.get(db, order_id).await?;
        if order.payment_status != PaymentStatus::Paid {
            return Err(ServiceError::InvalidState(format!(
                "Cannot refund an order whose payment is {}",
                order.payment_status
            )));
        }
        let payment_intent = order.payment_intent_id.as_deref().ok_or_else(|| {
            ServiceError::InvalidState(format!(
                "Order {} has no recorded payment to refund",
                order.tracking_id
            ))
        })?;
        let shop = shop::Entity::find_by_id(order.shop_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Shop {} not found", order.shop_id)))?;
        let account = shop.stripe_account_id.as_deref().ok_or_else(|| {
            ServiceError::InvalidState(format!(
                "Shop '{}' has no connected payment account",
                shop.subdomain
            ))
        })?;

        let receipt = self
            .adapter
            .gateway()
            .refund_payment(account, payment_intent)
            .await?;
        info!(%order_id, refund_id = %receipt.id, "refund issued by payment provider");

        self.orders.record_refund(db, order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn address() -> Address {
        Address {
            full_name: "Grace Hopper".into(),
            address_line_1: "1 Navy Way".into(),
            address_line_2: None,
            city: "Arlington".into(),
            state: "VA".into(),
            postal_code: "22202".into(),
            country: "US".into(),
        }
    }

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            shipping_address: address(),
            billing_address: None,
            payment_method: None,
            notes: None,
            tax_rate: dec!(10),
            shipping_cost: dec!(5),
            discount_amount: Decimal::ZERO,
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_amounts() {
        let mut r = request();
        r.tax_rate = dec!(100.01);
        assert!(r.validate().is_err());

        let mut r = request();
        r.shipping_cost = dec!(-1);
        assert!(r.validate().is_err());

        let mut r = request();
        r.notes = Some("x".repeat(501));
        assert!(r.validate().is_err());
    }

    #[test]
    fn rejects_incomplete_billing_address() {
        let mut r = request();
        let mut billing = address();
        billing.postal_code = String::new();
        r.billing_address = Some(billing);
        assert!(r.validate().is_err());
    }
}
