//! # Stripe Checkout Sessions
//!
//! Implementation of the Stripe Checkout Sessions API.
//! Amounts arrive already converted and locked; Stripe is only asked to
//! charge them, never to convert currencies.

use crate::config::StripeConfig;
use crate::webhook::{self, PROVIDER};
use async_trait::async_trait;
use cart_core::{
    CheckoutRequest, CheckoutSession, OrderError, OrderResult, PaymentStrategy, WebhookEvent,
};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info, instrument};

/// Stripe Checkout Session strategy
///
/// Uses Stripe's hosted checkout page for secure payments.
/// This is the recommended approach for PCI compliance.
pub struct StripeCheckoutStrategy {
    config: StripeConfig,
    client: Client,
}

impl StripeCheckoutStrategy {
    /// Create a new Stripe checkout strategy
    pub fn new(config: StripeConfig) -> OrderResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| OrderError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> OrderResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Form-encoded body for `POST /v1/checkout/sessions`
    fn form_params(request: &CheckoutRequest) -> Vec<(String, String)> {
        let order_id = request.order_id.to_string();
        let mut params: Vec<(String, String)> = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("client_reference_id".to_string(), order_id.clone()),
            ("metadata[order_id]".to_string(), order_id.clone()),
            ("metadata[order_number]".to_string(), request.order_number.clone()),
            ("payment_intent_data[metadata][order_id]".to_string(), order_id),
        ];

        let currency = request.currency.as_str();
        for (i, line) in request.lines.iter().enumerate() {
            params.push((
                format!("line_items[{i}][price_data][currency]"),
                currency.to_string(),
            ));
            params.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                line.unit_amount.to_string(),
            ));
            params.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                line.name.clone(),
            ));
            params.push((format!("line_items[{i}][quantity]"), line.quantity.to_string()));
        }

        params
    }
}

#[async_trait]
impl PaymentStrategy for StripeCheckoutStrategy {
    #[instrument(skip(self, request), fields(order_id = %request.order_id, currency = %request.currency))]
    async fn create_checkout(&self, request: &CheckoutRequest) -> OrderResult<CheckoutSession> {
        if request.lines.is_empty() {
            return Err(OrderError::Validation("Order has no items".to_string()));
        }

        let form_params = Self::form_params(request);
        debug!(
            lines = request.lines.len(),
            amount = request.amount_total(),
            "Creating Stripe checkout session"
        );

        let url = format!("{}/v1/checkout/sessions", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form_params)
            .send()
            .await
            .map_err(|e| OrderError::gateway(PROVIDER, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OrderError::gateway(PROVIDER, e.to_string()))?;

        if !status.is_success() {
            error!(%status, body = %body, "Stripe API error");

            // Parse Stripe error
            if let Ok(error_response) = serde_json::from_str::<StripeErrorResponse>(&body) {
                return Err(OrderError::gateway(PROVIDER, error_response.error.message));
            }

            return Err(OrderError::gateway(PROVIDER, format!("HTTP {status}: {body}")));
        }

        let session_response: StripeCheckoutSessionResponse = serde_json::from_str(&body)
            .map_err(|e| OrderError::Serialization(format!("Failed to parse Stripe response: {e}")))?;

        let checkout_url = session_response.url.ok_or_else(|| {
            OrderError::gateway(PROVIDER, format!("session {} has no URL", session_response.id))
        })?;

        info!(session_id = %session_response.id, "Created Stripe checkout session");

        Ok(CheckoutSession {
            session_id: session_response.id,
            provider: PROVIDER.to_string(),
            checkout_url,
            expires_at: session_response
                .expires_at
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            payment_intent_id: session_response.payment_intent,
            created_at: Utc::now(),
        })
    }

    #[instrument(skip(self, payload, signature))]
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> OrderResult<WebhookEvent> {
        webhook::verify_signature(
            &self.config.webhook_secret,
            payload,
            signature,
            self.config.webhook_tolerance_secs,
            Utc::now(),
        )?;

        let event = webhook::parse_event(payload)?;
        debug!(event_id = %event.event_id, event_type = ?event.event_type, "Verified Stripe webhook");
        Ok(event)
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cart_core::{CheckoutLine, Currency, WebhookEventType};
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CheckoutRequest {
        let order_id = Uuid::new_v4();
        CheckoutRequest {
            order_id,
            order_number: "ORD-20261018-DDDD0001".to_string(),
            currency: Currency::INR,
            lines: vec![
                CheckoutLine {
                    name: "Dot Grid Notebook".to_string(),
                    unit_amount: 29952,
                    quantity: 2,
                },
                CheckoutLine {
                    name: "Shipping".to_string(),
                    unit_amount: 14951,
                    quantity: 1,
                },
            ],
            success_url: "https://shop.example.com/checkout/success?order=ORD-20261018-DDDD0001".to_string(),
            cancel_url: "https://shop.example.com/checkout/cancel".to_string(),
            idempotency_key: format!("checkout-{order_id}-1"),
        }
    }

    fn strategy(server: &MockServer) -> StripeCheckoutStrategy {
        let config = StripeConfig::new("sk_test_abc", "pk_test_abc", "whsec_abc")
            .with_api_base_url(server.uri());
        StripeCheckoutStrategy::new(config).unwrap()
    }

    #[test]
    fn test_form_params_carry_locked_amounts() {
        let request = request();
        let params = StripeCheckoutStrategy::form_params(&request);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("mode"), Some("payment"));
        assert_eq!(get("line_items[0][price_data][currency]"), Some("inr"));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("29952"));
        assert_eq!(get("line_items[0][quantity]"), Some("2"));
        assert_eq!(get("line_items[1][price_data][product_data][name]"), Some("Shipping"));
        assert_eq!(get("metadata[order_number]"), Some("ORD-20261018-DDDD0001"));
        assert_eq!(
            get("client_reference_id").map(String::from),
            Some(request.order_id.to_string())
        );
    }

    #[tokio::test]
    async fn test_create_checkout_session() {
        let server = MockServer::start().await;
        let request = request();

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("Authorization", "Bearer sk_test_abc"))
            .and(header("Idempotency-Key", request.idempotency_key.as_str()))
            .and(body_string_contains("unit_amount%5D=29952"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_test_123",
                "url": "https://checkout.stripe.com/c/pay/cs_test_123",
                "payment_intent": null,
                "expires_at": 1_900_000_000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = strategy(&server).create_checkout(&request).await.unwrap();

        assert_eq!(session.session_id, "cs_test_123");
        assert_eq!(session.provider, "stripe");
        assert_eq!(session.checkout_url, "https://checkout.stripe.com/c/pay/cs_test_123");
        assert_eq!(session.expires_at.map(|t| t.timestamp()), Some(1_900_000_000));
        assert!(session.payment_intent_id.is_none());
    }

    #[tokio::test]
    async fn test_stripe_error_is_gateway_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "message": "Invalid currency: xyz", "type": "invalid_request_error" }
            })))
            .mount(&server)
            .await;

        let err = strategy(&server).create_checkout(&request()).await.unwrap_err();

        assert!(matches!(
            err,
            OrderError::ExternalGateway { ref provider, ref message }
                if provider == "stripe" && message.contains("Invalid currency")
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_request_is_rejected_locally() {
        let server = MockServer::start().await;
        let mut request = request();
        request.lines.clear();

        let err = strategy(&server).create_checkout(&request).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_verify_webhook() {
        let server = MockServer::start().await;
        let strategy = strategy(&server);

        let payload = serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": Utc::now().timestamp(),
            "data": { "object": { "id": "cs_test_123", "payment_status": "paid" } }
        }))
        .unwrap();
        let signature =
            webhook::signature_header("whsec_abc", &payload, Utc::now().timestamp()).unwrap();

        let event = strategy.verify_webhook(&payload, &signature).await.unwrap();
        assert_eq!(event.event_type, WebhookEventType::PaymentSucceeded);
        assert_eq!(event.session_id.as_deref(), Some("cs_test_123"));

        let err = strategy.verify_webhook(&payload, "t=1,v1=deadbeef").await.unwrap_err();
        assert!(matches!(err, OrderError::WebhookVerificationFailed(_)));
    }
}
