use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront API

Carts, orders and Stripe Connect checkout for multi-tenant shops. Every shop is
addressed by its subdomain in the `{shop}` path segment.

## Authentication

Cart and order endpoints require a bearer token issued by the platform identity
service:

```
Authorization: Bearer <jwt>
```

The Stripe webhook endpoint is authenticated by its `Stripe-Signature` header instead.

## Errors

```json
{
  "error": "Bad Request",
  "message": "Invalid state: Cannot cancel an order that is shipped",
  "request_id": "5f0c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Carts", description = "Per-shop customer carts"),
        (name = "Orders", description = "Order placement and lifecycle"),
        (name = "Webhooks", description = "Payment provider callbacks"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Carts
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_item,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::carts::validate_cart,
        crate::handlers::carts::merge_cart,
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::refund_order,
        // Webhooks
        crate::handlers::payment_webhooks::stripe_webhook,
        // Health
        crate::handlers::health::liveness_check,
        crate::handlers::health::readiness_check,
    ),
    components(
        schemas(
            crate::services::cart_service::CartLine,
            crate::services::cart_service::CartView,
            crate::services::cart_service::CartIssue,
            crate::services::cart_service::CartValidationError,
            crate::services::cart_service::CartValidation,
            crate::handlers::carts::AddCartItemRequest,
            crate::handlers::carts::UpdateCartItemRequest,
            crate::handlers::carts::MergeCartItem,
            crate::handlers::carts::MergeCartRequest,
            crate::services::orders::Address,
            crate::services::orders::StatusUpdate,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::checkout_service::CheckoutRequest,
            crate::services::checkout_service::CheckoutStarted,
            crate::handlers::orders::CancelOrderRequest,
            crate::handlers::orders::RefundResponse,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentStatus,
            crate::handlers::payment_webhooks::WebhookAck,
            crate::handlers::health::ReadinessResponse,
            crate::handlers::health::ComponentStatus,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_core_routes() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/shops/{shop}/orders"));
        assert!(json.contains("/api/v1/webhooks/stripe"));
        assert!(json.contains("Bearer"));
    }
}
