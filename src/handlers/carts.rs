use super::common::{resolve_shop, success_response, validate_input};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::{
        cart_service::{CartValidation, CartView, IncomingCartItem},
        pricing::MAX_LINE_QUANTITY,
    },
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 99))]
    pub quantity: i32,
    pub variant_index: Option<i32>,
}

/// A quantity of zero removes the line.
#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct UpdateCartItemRequest {
    pub product_id: Uuid,
    pub variant_index: Option<i32>,
    #[validate(range(min = 0, max = 99))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct MergeCartItem {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 99))]
    pub quantity: i32,
    pub variant_index: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct MergeCartRequest {
    #[validate]
    pub items: Vec<MergeCartItem>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct VariantQuery {
    pub variant_index: Option<i32>,
}

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item).put(update_item))
        .route("/items/:product_id", delete(remove_item))
        .route("/validate", post(validate_cart))
        .route("/merge", post(merge_cart))
}

#[utoipa::path(
    get,
    path = "/api/v1/shops/{shop}/cart",
    params(("shop" = String, Path, description = "Shop subdomain")),
    responses(
        (status = 200, description = "Current cart", body = CartView),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Shop not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(shop): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let shop = resolve_shop(&state, &shop).await?;
    let view = state
        .services
        .carts
        .get_cart(&*state.db, user.user_id, shop.id)
        .await?;
    Ok(success_response(view))
}

#[utoipa::path(
    post,
    path = "/api/v1/shops/{shop}/cart/items",
    params(("shop" = String, Path, description = "Shop subdomain")),
    request_body = AddCartItemRequest,
    responses(
        (status = 200, description = "Item added", body = CartView),
        (status = 400, description = "Invalid quantity or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Shop or product not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(shop): Path<String>,
    Json(payload): Json<AddCartItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let shop = resolve_shop(&state, &shop).await?;
    let view = state
        .services
        .carts
        .add_item(
            &*state.db,
            user.user_id,
            shop.id,
            payload.product_id,
            payload.quantity,
            payload.variant_index,
        )
        .await?;
    Ok(success_response(view))
}

#[utoipa::path(
    put,
    path = "/api/v1/shops/{shop}/cart/items",
    params(("shop" = String, Path, description = "Shop subdomain")),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Quantity updated", body = CartView),
        (status = 400, description = "Invalid quantity or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Line not in cart", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(shop): Path<String>,
    Json(payload): Json<UpdateCartItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let shop = resolve_shop(&state, &shop).await?;
    let view = state
        .services
        .carts
        .update_quantity(
            &*state.db,
            user.user_id,
            shop.id,
            payload.product_id,
            payload.variant_index,
            payload.quantity,
        )
        .await?;
    Ok(success_response(view))
}

#[utoipa::path(
    delete,
    path = "/api/v1/shops/{shop}/cart/items/{product_id}",
    params(
        ("shop" = String, Path, description = "Shop subdomain"),
        ("product_id" = Uuid, Path, description = "Product to remove"),
        VariantQuery
    ),
    responses(
        (status = 200, description = "Line removed (or was absent)", body = CartView)
    ),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((shop, product_id)): Path<(String, Uuid)>,
    Query(query): Query<VariantQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let shop = resolve_shop(&state, &shop).await?;
    let view = state
        .services
        .carts
        .remove_item(
            &*state.db,
            user.user_id,
            shop.id,
            product_id,
            query.variant_index,
        )
        .await?;
    Ok(success_response(view))
}

#[utoipa::path(
    delete,
    path = "/api/v1/shops/{shop}/cart",
    params(("shop" = String, Path, description = "Shop subdomain")),
    responses((status = 200, description = "Cart emptied", body = CartView)),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(shop): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let shop = resolve_shop(&state, &shop).await?;
    let carts = &state.services.carts;
    carts.clear_cart(&*state.db, user.user_id, shop.id).await?;
    let view = carts.get_cart(&*state.db, user.user_id, shop.id).await?;
    Ok(success_response(view))
}

#[utoipa::path(
    post,
    path = "/api/v1/shops/{shop}/cart/validate",
    params(("shop" = String, Path, description = "Shop subdomain")),
    responses(
        (status = 200, description = "Validation report; `valid` is false when lines need attention", body = CartValidation)
    ),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn validate_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(shop): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let shop = resolve_shop(&state, &shop).await?;
    let validation = state
        .services
        .carts
        .validate_cart(&*state.db, user.user_id, shop.id)
        .await?;
    Ok(success_response(validation))
}

#[utoipa::path(
    post,
    path = "/api/v1/shops/{shop}/cart/merge",
    params(("shop" = String, Path, description = "Shop subdomain")),
    request_body = MergeCartRequest,
    responses(
        (status = 200, description = "Merged cart", body = CartView),
        (status = 400, description = "A product does not belong to this shop", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn merge_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(shop): Path<String>,
    Json(payload): Json<MergeCartRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let shop = resolve_shop(&state, &shop).await?;
    let incoming: Vec<IncomingCartItem> = payload
        .items
        .iter()
        .map(|item| IncomingCartItem {
            product_id: item.product_id,
            quantity: item.quantity.min(MAX_LINE_QUANTITY),
            variant_index: item.variant_index,
        })
        .collect();
    let view = state
        .services
        .carts
        .merge_carts(&*state.db, user.user_id, shop.id, &incoming)
        .await?;
    Ok(success_response(view))
}
