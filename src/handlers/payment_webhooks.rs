use crate::{errors::ServiceError, webhooks::SIGNATURE_HEADER, AppState};
use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

// POST /api/v1/webhooks/stripe
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/stripe",
    request_body = String,
    params(("Stripe-Signature" = String, Header, description = "Provider signature over the raw body")),
    responses(
        (status = 200, description = "Event verified and recorded", body = WebhookAck),
        (status = 400, description = "Invalid signature or unusable event", body = crate::errors::ErrorResponse),
        (status = 404, description = "Event refers to an unknown order", body = crate::errors::ErrorResponse),
        (status = 500, description = "Transient failure; the provider should redeliver", body = crate::errors::ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state
        .services
        .webhooks
        .handle(&*state.db, &body, signature)
        .await?;
    debug!(outcome = outcome.label(), "webhook acknowledged");

    Ok(Json(WebhookAck { received: true }))
}
