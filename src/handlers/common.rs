use crate::{
    auth::AuthUser,
    entities::{order, shop},
    errors::ServiceError,
    AppState,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}

/// Resolves the `{shop}` path segment.
pub async fn resolve_shop(state: &AppState, subdomain: &str) -> Result<shop::Model, ServiceError> {
    state
        .services
        .shops
        .find_by_subdomain(&*state.db, subdomain)
        .await
}

/// Loads an order of `shop` that the caller may see: its buyer or a shop admin.
///
/// Orders of other shops and other customers are reported as missing.
pub async fn visible_order(
    state: &AppState,
    shop: &shop::Model,
    user: &AuthUser,
    tracking_id: &str,
) -> Result<order::Model, ServiceError> {
    let order = state
        .services
        .orders
        .find_by_tracking_id(&*state.db, tracking_id)
        .await?;
    if order.shop_id != shop.id || (order.user_id != user.user_id && !user.can_manage(shop)) {
        return Err(ServiceError::NotFound(format!(
            "Order {} not found",
            tracking_id
        )));
    }
    Ok(order)
}

/// Rejects callers that are not admins of `shop`.
pub fn require_shop_admin(user: &AuthUser, shop: &shop::Model) -> Result<(), ServiceError> {
    if user.can_manage(shop) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Only shop administrators may do this".to_string(),
        ))
    }
}
