use super::{
    currency::to_minor_units, CheckoutGateway, CheckoutLineItem, CheckoutSessionRequest,
};
use crate::{
    config::StripeConfig,
    entities::shop,
    errors::ServiceError,
    services::pricing::platform_fee,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// An order line as it is shown on the payment page, priced at purchase time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutItem {
    pub name: String,
    pub quantity: i32,
    /// Snapshotted line subtotal, discount included
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub user_id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRedirect {
    pub session_id: String,
    pub url: String,
}

/// Turns snapshotted order items into a hosted checkout session on the
/// shop's connected account, with the platform fee attached.
#[derive(Clone)]
pub struct CheckoutAdapter {
    gateway: Arc<dyn CheckoutGateway>,
    fee_percent: Decimal,
    success_url: String,
    cancel_url: String,
}

impl CheckoutAdapter {
    pub fn new(gateway: Arc<dyn CheckoutGateway>, config: &StripeConfig) -> Self {
        Self {
            gateway,
            fee_percent: config.platform_fee_percent,
            success_url: config.success_url.clone(),
            cancel_url: config.cancel_url.clone(),
        }
    }

    pub fn gateway(&self) -> &Arc<dyn CheckoutGateway> {
        &self.gateway
    }

    #[instrument(skip(self, items, shop, customer), fields(shop_id = %shop.id, %tracking_id))]
    pub async fn checkout_items(
        &self,
        items: &[CheckoutItem],
        shop: &shop::Model,
        customer: &Customer,
        tracking_id: &str,
    ) -> Result<CheckoutRedirect, ServiceError> {
        let account = shop.payment_account().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Shop '{}' is not set up to accept payments",
                shop.subdomain
            ))
        })?;

        let subtotal: Decimal = items.iter().map(|i| i.subtotal).sum();
        let fee = platform_fee(subtotal, self.fee_percent, &shop.currency);

        let line_items = items
            .iter()
            .map(|item| line_item(item, &shop.currency))
            .collect::<Result<Vec<_>, ServiceError>>()?;

        let request = CheckoutSessionRequest {
            connected_account: account.to_string(),
            currency: shop.currency.to_ascii_lowercase(),
            line_items,
            application_fee_amount: to_minor_units(fee, &shop.currency)?,
            tracking_id: tracking_id.to_string(),
            customer_email: customer.email.clone(),
            success_url: expand_url(&self.success_url, shop, tracking_id),
            cancel_url: expand_url(&self.cancel_url, shop, tracking_id),
        };

        let session = self.gateway.create_checkout_session(&request).await?;
        let url = session.url.filter(|u| !u.is_empty()).ok_or_else(|| {
            ServiceError::UpstreamGateway("checkout session has no redirect URL".to_string())
        })?;

        info!(session_id = %session.id, fee = %fee, "checkout session ready");
        Ok(CheckoutRedirect {
            session_id: session.id,
            url,
        })
    }
}

/// Charges exactly the stored line subtotal. When it does not split evenly
/// into unit amounts the line is sent as a single bundle.
fn line_item(item: &CheckoutItem, currency: &str) -> Result<CheckoutLineItem, ServiceError> {
    let amount = to_minor_units(item.subtotal, currency)?;
    let quantity = i64::from(item.quantity);
    if quantity > 0 && amount % quantity == 0 {
        Ok(CheckoutLineItem {
            name: item.name.clone(),
            unit_amount: amount / quantity,
            quantity,
        })
    } else {
        Ok(CheckoutLineItem {
            name: format!("{} × {}", item.name, item.quantity),
            unit_amount: amount,
            quantity: 1,
        })
    }
}

fn expand_url(template: &str, shop: &shop::Model, tracking_id: &str) -> String {
    template
        .replace("{tracking_id}", tracking_id)
        .replace("{shop}", &shop.subdomain)
}
