use super::{CheckoutGateway, CheckoutSession, CheckoutSessionRequest, RefundReceipt};
use crate::{config::StripeConfig, errors::ServiceError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const STRIPE_ACCOUNT_HEADER: &str = "Stripe-Account";

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Form-encoded Stripe REST client acting on connected accounts.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(config: &StripeConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn read<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ServiceError::UpstreamGateway(format!("unreadable response: {}", e)));
        }

        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<StripeErrorBody>(&text)
            .ok()
            .map(|body| {
                format!(
                    "{}: {}",
                    body.error.kind.unwrap_or_else(|| "api_error".to_string()),
                    body.error.message.unwrap_or_default()
                )
            })
            .unwrap_or(text);
        warn!(%status, %detail, "stripe request failed");
        Err(ServiceError::UpstreamGateway(format!("{} {}", status, detail)))
    }
}

/// Stripe's bracketed form encoding for a checkout session.
pub fn session_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("client_reference_id".to_string(), request.tracking_id.clone()),
        ("metadata[tracking_id]".to_string(), request.tracking_id.clone()),
        (
            "payment_intent_data[metadata][tracking_id]".to_string(),
            request.tracking_id.clone(),
        ),
        (
            "payment_intent_data[application_fee_amount]".to_string(),
            request.application_fee_amount.to_string(),
        ),
    ];
    if let Some(email) = &request.customer_email {
        form.push(("customer_email".to_string(), email.clone()));
    }
    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{}]", i);
        form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        form.push((
            format!("{}[price_data][currency]", prefix),
            request.currency.clone(),
        ));
        form.push((
            format!("{}[price_data][unit_amount]", prefix),
            item.unit_amount.to_string(),
        ));
        form.push((
            format!("{}[price_data][product_data][name]", prefix),
            item.name.clone(),
        ));
    }
    form
}

#[async_trait]
impl CheckoutGateway for StripeGateway {
    #[instrument(skip(self, request), fields(tracking_id = %request.tracking_id, account = %request.connected_account))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(&self.secret_key)
            .header(STRIPE_ACCOUNT_HEADER, &request.connected_account)
            .form(&session_form(request))
            .send()
            .await
            .map_err(|e| ServiceError::UpstreamGateway(e.to_string()))?;

        let session: CheckoutSession = Self::read(response).await?;
        debug!(session_id = %session.id, "checkout session created");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn retrieve_checkout_session(
        &self,
        connected_account: &str,
        session_id: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/checkout/sessions/{}", session_id)))
            .bearer_auth(&self.secret_key)
            .header(STRIPE_ACCOUNT_HEADER, connected_account)
            .send()
            .await
            .map_err(|e| ServiceError::UpstreamGateway(e.to_string()))?;
        Self::read(response).await
    }

    #[instrument(skip(self))]
    async fn refund_payment(
        &self,
        connected_account: &str,
        payment_intent_id: &str,
    ) -> Result<RefundReceipt, ServiceError> {
        let form = [
            ("payment_intent", payment_intent_id),
            ("refund_application_fee", "true"),
        ];
        let response = self
            .client
            .post(self.url("/v1/refunds"))
            .bearer_auth(&self.secret_key)
            .header(STRIPE_ACCOUNT_HEADER, connected_account)
            .form(&form)
            .send()
            .await
            .map_err(|e| ServiceError::UpstreamGateway(e.to_string()))?;
        Self::read(response).await
    }
}
