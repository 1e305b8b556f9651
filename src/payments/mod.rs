//! Hosted checkout on the shops' connected payment accounts.

pub mod checkout;
pub mod currency;
pub mod stripe;

pub use checkout::{CheckoutAdapter, CheckoutItem, CheckoutRedirect, Customer};
pub use stripe::StripeGateway;

use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One priced line on the hosted payment page, amounts in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLineItem {
    pub name: String,
    pub unit_amount: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    /// Connected account that receives the funds.
    pub connected_account: String,
    /// Lower-case ISO 4217 code.
    pub currency: String,
    pub line_items: Vec<CheckoutLineItem>,
    pub application_fee_amount: i64,
    pub tracking_id: String,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

/// The subset of a provider checkout session this service reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    /// `open`, `complete` or `expired`.
    pub status: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`.
    pub payment_status: Option<String>,
    pub payment_intent: Option<String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.status.as_deref() == Some("complete") && self.payment_status.as_deref() == Some("paid")
    }

    pub fn is_expired(&self) -> bool {
        self.status.as_deref() == Some("expired")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub id: String,
    pub status: Option<String>,
}

/// Payment provider operations used by checkout, refunds and reconciliation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError>;

    async fn retrieve_checkout_session(
        &self,
        connected_account: &str,
        session_id: &str,
    ) -> Result<CheckoutSession, ServiceError>;

    async fn refund_payment(
        &self,
        connected_account: &str,
        payment_intent_id: &str,
    ) -> Result<RefundReceipt, ServiceError>;
}
