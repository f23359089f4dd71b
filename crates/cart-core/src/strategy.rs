//! # Payment Gateway Strategy
//!
//! The contract the order engine needs from a payment gateway. Each provider
//! (Stripe today) implements [`PaymentStrategy`]; the engine only ever talks
//! to the trait object.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PaymentStrategy (trait)                  │
//! │  ├── create_checkout()   locked amounts in, hosted URL out  │
//! │  ├── verify_webhook()    signed payload in, event out       │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                    ┌───────┴───────┐
//!                    │StripeCheckout │
//!                    │   Strategy    │
//!                    └───────────────┘
//! ```

use crate::error::OrderResult;
use crate::order::{CheckoutSession, Order, WebhookEvent};
use crate::product::Currency;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Core trait for payment provider implementations.
#[async_trait]
pub trait PaymentStrategy: Send + Sync {
    /// Create a hosted checkout session charging exactly the request's
    /// amounts, in the request's currency.
    ///
    /// Implementations must forward `idempotency_key` so that repeated calls
    /// for the same attempt yield the same session.
    async fn create_checkout(&self, request: &CheckoutRequest) -> OrderResult<CheckoutSession>;

    /// Verify a webhook signature and parse the event.
    ///
    /// # Arguments
    /// * `payload` - Raw webhook body bytes
    /// * `signature` - Signature header from the request
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> OrderResult<WebhookEvent>;

    /// Get the provider name (for logging and routing).
    fn provider_name(&self) -> &'static str;

    /// Get the webhook endpoint path for this provider.
    /// Default: `/webhook/{provider_name}`
    fn webhook_path(&self) -> String {
        format!("/webhook/{}", self.provider_name())
    }
}

/// Type alias for a boxed payment strategy (dynamic dispatch)
pub type BoxedPaymentStrategy = Arc<dyn PaymentStrategy>;

/// One charged line, amounts already locked and PPP-adjusted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLine {
    pub name: String,
    /// Smallest currency unit
    pub unit_amount: i64,
    pub quantity: u32,
}

/// Everything a gateway needs to charge an order
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub currency: Currency,
    pub lines: Vec<CheckoutLine>,
    pub success_url: String,
    pub cancel_url: String,
    pub idempotency_key: String,
}

impl CheckoutRequest {
    /// Build the request from an order's locked items, shipping and tax.
    pub fn from_order(
        order: &Order,
        success_url: impl Into<String>,
        cancel_url: impl Into<String>,
        attempt: u32,
    ) -> Self {
        let mut lines: Vec<CheckoutLine> = order
            .items
            .iter()
            .map(|item| CheckoutLine {
                name: item.name.clone(),
                unit_amount: item.unit_price.amount,
                quantity: item.quantity,
            })
            .collect();

        if order.totals.shipping > 0 {
            lines.push(CheckoutLine {
                name: "Shipping".to_string(),
                unit_amount: order.totals.shipping,
                quantity: 1,
            });
        }
        if order.totals.tax > 0 {
            lines.push(CheckoutLine {
                name: "Tax".to_string(),
                unit_amount: order.totals.tax,
                quantity: 1,
            });
        }

        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            currency: order.currency(),
            lines,
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
            idempotency_key: format!("checkout-{}-{}", order.id, attempt),
        }
    }

    /// Sum charged by the gateway, smallest unit
    pub fn amount_total(&self) -> i64 {
        self.lines
            .iter()
            .map(|l| l.unit_amount * l.quantity as i64)
            .sum()
    }
}

/// Storefront redirect targets used for checkout
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Base URL of the storefront (e.g., "https://shop.example.com")
    pub base_url: String,
    /// Success page path (e.g., "/checkout/success")
    pub success_path: String,
    /// Cancel page path (e.g., "/checkout/cancel")
    pub cancel_path: String,
}

impl CheckoutUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            success_path: "/checkout/success".to_string(),
            cancel_path: "/checkout/cancel".to_string(),
        }
    }

    pub fn success_url(&self) -> String {
        format!("{}{}", self.base_url, self.success_path)
    }

    pub fn cancel_url(&self) -> String {
        format!("{}{}", self.base_url, self.cancel_path)
    }

    /// Whether a caller-supplied redirect stays on the storefront
    pub fn is_allowed(&self, url: &str) -> bool {
        url == self.base_url || url.starts_with(&format!("{}/", self.base_url))
    }

    /// Append `key=value` to a URL, respecting an existing query string
    pub fn with_query(url: &str, key: &str, value: &str) -> String {
        let sep = if url.contains('?') { '&' } else { '?' };
        format!("{url}{sep}{key}={value}")
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:3000")
    }
}
