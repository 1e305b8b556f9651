use super::common::{
    created_response, require_shop_admin, resolve_shop, success_response, validate_input,
    visible_order,
};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    payments::Customer,
    services::{
        checkout_service::{CheckoutRequest, CheckoutStarted},
        orders::{OrderResponse, StatusUpdate},
    },
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct CancelOrderRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefundResponse {
    pub order: OrderResponse,
    /// Whether the items went back into stock
    pub restocked: bool,
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/:tracking_id", get(get_order))
        .route("/:tracking_id/status", patch(update_order_status))
        .route("/:tracking_id/cancel", post(cancel_order))
        .route("/:tracking_id/refund", post(refund_order))
}

/// Create an order from the caller's cart and open a hosted checkout session
#[utoipa::path(
    post,
    path = "/api/v1/shops/{shop}/orders",
    params(("shop" = String, Path, description = "Shop subdomain")),
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created; redirect the customer to `url`", body = CheckoutStarted,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Empty or stale cart, bad input, or shop not accepting payments", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 500, description = "Payment provider refused the checkout session", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(shop): Path<String>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let shop = resolve_shop(&state, &shop).await?;
    let customer = Customer {
        user_id: user.user_id,
        email: user.email.clone(),
    };
    let started = state
        .services
        .checkout
        .start_checkout(&*state.db, &shop, &customer, payload)
        .await?;
    Ok(created_response(started))
}

#[utoipa::path(
    get,
    path = "/api/v1/shops/{shop}/orders/{tracking_id}",
    params(
        ("shop" = String, Path, description = "Shop subdomain"),
        ("tracking_id" = String, Path, description = "Public order identifier")
    ),
    responses(
        (status = 200, description = "Order with its items", body = OrderResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path((shop, tracking_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    let shop = resolve_shop(&state, &shop).await?;
    let order = visible_order(&state, &shop, &user, &tracking_id).await?;
    let details = state.services.orders.with_items(&*state.db, order).await?;
    Ok(success_response(OrderResponse::from(details)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/shops/{shop}/orders/{tracking_id}/status",
    params(
        ("shop" = String, Path, description = "Shop subdomain"),
        ("tracking_id" = String, Path, description = "Public order identifier")
    ),
    request_body = StatusUpdate,
    responses(
        (status = 200, description = "Order updated", body = OrderResponse),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not a shop administrator", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path((shop, tracking_id)): Path<(String, String)>,
    Json(payload): Json<StatusUpdate>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let shop = resolve_shop(&state, &shop).await?;
    let order = visible_order(&state, &shop, &user, &tracking_id).await?;
    require_shop_admin(&user, &shop)?;

    let orders = &state.services.orders;
    let updated = orders.update_status(&*state.db, order.id, payload).await?;
    info!(%tracking_id, admin = %user.user_id, status = %updated.status, "order updated by admin");
    let details = orders.with_items(&*state.db, updated).await?;
    Ok(success_response(OrderResponse::from(details)))
}

#[utoipa::path(
    post,
    path = "/api/v1/shops/{shop}/orders/{tracking_id}/cancel",
    params(
        ("shop" = String, Path, description = "Shop subdomain"),
        ("tracking_id" = String, Path, description = "Public order identifier")
    ),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled and stock restored", body = OrderResponse),
        (status = 400, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path((shop, tracking_id)): Path<(String, String)>,
    payload: Option<Json<CancelOrderRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    validate_input(&payload)?;
    let shop = resolve_shop(&state, &shop).await?;
    let order = visible_order(&state, &shop, &user, &tracking_id).await?;

    let orders = &state.services.orders;
    let cancelled = orders.cancel(&*state.db, order.id, payload.reason).await?;
    let details = orders.with_items(&*state.db, cancelled).await?;
    Ok(success_response(OrderResponse::from(details)))
}

#[utoipa::path(
    post,
    path = "/api/v1/shops/{shop}/orders/{tracking_id}/refund",
    params(
        ("shop" = String, Path, description = "Shop subdomain"),
        ("tracking_id" = String, Path, description = "Public order identifier")
    ),
    responses(
        (status = 200, description = "Payment refunded", body = RefundResponse),
        (status = 400, description = "Order is not paid", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not a shop administrator", body = crate::errors::ErrorResponse),
        (status = 500, description = "Payment provider refused the refund", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn refund_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path((shop, tracking_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    let shop = resolve_shop(&state, &shop).await?;
    let order = visible_order(&state, &shop, &user, &tracking_id).await?;
    require_shop_admin(&user, &shop)?;

    let outcome = state.services.checkout.refund(&*state.db, order.id).await?;
    let details = state
        .services
        .orders
        .with_items(&*state.db, outcome.order)
        .await?;
    Ok(success_response(RefundResponse {
        order: OrderResponse::from(details),
        restocked: outcome.restocked,
    }))
}
