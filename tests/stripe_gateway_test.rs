use assert_matches::assert_matches;
use serde_json::json;
use storefront_api::{
    config::StripeConfig,
    errors::ServiceError,
    payments::{CheckoutGateway, CheckoutLineItem, CheckoutSessionRequest, StripeGateway},
};
use wiremock::{
    matchers::{body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn gateway(server: &MockServer) -> StripeGateway {
    StripeGateway::new(&StripeConfig {
        secret_key: "sk_test_123".to_string(),
        api_base: server.uri(),
        ..StripeConfig::default()
    })
    .unwrap()
}

fn session_request() -> CheckoutSessionRequest {
    CheckoutSessionRequest {
        connected_account: "acct_mugs".to_string(),
        currency: "usd".to_string(),
        line_items: vec![CheckoutLineItem {
            name: "Enamel mug".to_string(),
            unit_amount: 1800,
            quantity: 3,
        }],
        application_fee_amount: 270,
        tracking_id: "ORD-ABC123DEF456".to_string(),
        customer_email: Some("ada@example.com".to_string()),
        success_url: "https://shop.test/ok".to_string(),
        cancel_url: "https://shop.test/cancel".to_string(),
    }
}

#[tokio::test]
async fn creates_sessions_on_the_connected_account() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(header("stripe-account", "acct_mugs"))
        .and(body_string_contains("mode=payment"))
        .and(body_string_contains(
            "metadata%5Btracking_id%5D=ORD-ABC123DEF456",
        ))
        .and(body_string_contains(
            "payment_intent_data%5Bapplication_fee_amount%5D=270",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_a1",
            "object": "checkout.session",
            "url": "https://checkout.stripe.com/c/pay/cs_test_a1",
            "status": "open",
            "payment_status": "unpaid",
            "payment_intent": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = gateway(&server)
        .create_checkout_session(&session_request())
        .await
        .unwrap();

    assert_eq!(session.id, "cs_test_a1");
    assert_eq!(
        session.url.as_deref(),
        Some("https://checkout.stripe.com/c/pay/cs_test_a1")
    );
    assert!(!session.is_paid());
}

#[tokio::test]
async fn provider_errors_become_gateway_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "type": "invalid_request_error",
                "message": "This account cannot currently make live charges."
            }
        })))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .create_checkout_session(&session_request())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::UpstreamGateway(message) if message.contains("cannot currently make live charges")
    );
}

#[tokio::test]
async fn retrieves_session_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/checkout/sessions/cs_test_a1"))
        .and(header("stripe-account", "acct_mugs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_a1",
            "status": "complete",
            "payment_status": "paid",
            "payment_intent": "pi_123"
        })))
        .mount(&server)
        .await;

    let session = gateway(&server)
        .retrieve_checkout_session("acct_mugs", "cs_test_a1")
        .await
        .unwrap();
    assert!(session.is_paid());
    assert_eq!(session.payment_intent.as_deref(), Some("pi_123"));
}

#[tokio::test]
async fn refunds_return_the_platform_fee() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .and(header("stripe-account", "acct_mugs"))
        .and(body_string_contains("payment_intent=pi_123"))
        .and(body_string_contains("refund_application_fee=true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "re_1",
            "object": "refund",
            "status": "succeeded"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = gateway(&server)
        .refund_payment("acct_mugs", "pi_123")
        .await
        .unwrap();
    assert_eq!(receipt.id, "re_1");
    assert_eq!(receipt.status.as_deref(), Some("succeeded"));
}

#[tokio::test]
async fn unreachable_provider_is_a_gateway_error() {
    let gateway = StripeGateway::new(&StripeConfig {
        api_base: "http://127.0.0.1:9".to_string(),
        timeout_secs: 1,
        ..StripeConfig::default()
    })
    .unwrap();

    assert_matches!(
        gateway.refund_payment("acct_mugs", "pi_123").await,
        Err(ServiceError::UpstreamGateway(_))
    );
}
