//! # Order Types
//!
//! Persisted order, line items, checkout session and gateway event types.

use crate::error::{OrderError, OrderResult};
use crate::product::{Currency, Price};
use crate::state::{OrderState, OrderStatus, PaymentStatus};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Postal address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Address {
    /// Check required fields; `label` names the address in error messages
    pub fn validate(&self, label: &str) -> OrderResult<()> {
        let required = [
            ("name", &self.name),
            ("line1", &self.line1),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(OrderError::Validation(format!(
                    "{label} address is missing {field}"
                )));
            }
        }

        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(OrderError::Validation(format!(
                "{label} address country must be a two-letter code, got {:?}",
                self.country
            )));
        }

        Ok(())
    }

    /// Upper-cased country code
    pub fn country_code(&self) -> String {
        self.country.to_ascii_uppercase()
    }
}

/// A line item, price locked at purchase time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,

    /// Parent order
    pub order_id: Uuid,

    pub product_id: String,

    /// Product name (denormalized for display)
    pub name: String,

    pub quantity: u32,

    /// PPP-adjusted unit price in the order's currency
    pub unit_price: Price,

    /// `unit_price × quantity`
    pub line_total: Price,
}

/// Order totals in minor units of the settlement currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub currency: Currency,
    pub subtotal: i64,
    pub tax: i64,
    pub shipping: i64,
    pub discount: i64,
    pub total: i64,
}

impl OrderTotals {
    /// Build totals; `total` is derived so the sum invariant holds exactly.
    ///
    /// Fails with [`OrderError::Validation`] when the sum does not fit in `i64`.
    pub fn new(
        currency: Currency,
        subtotal: i64,
        tax: i64,
        shipping: i64,
        discount: i64,
    ) -> OrderResult<Self> {
        let total = Self::sum(subtotal, tax, shipping, discount)
            .ok_or_else(|| OrderError::Validation("Order total overflows".to_string()))?;

        Ok(Self {
            currency,
            subtotal,
            tax,
            shipping,
            discount,
            total,
        })
    }

    fn sum(subtotal: i64, tax: i64, shipping: i64, discount: i64) -> Option<i64> {
        subtotal
            .checked_add(tax)?
            .checked_add(shipping)?
            .checked_sub(discount)
    }

    /// `subtotal + tax + shipping - discount == total`
    pub fn is_consistent(&self) -> bool {
        Self::sum(self.subtotal, self.tax, self.shipping, self.discount) == Some(self.total)
    }

    pub fn total_price(&self) -> Price {
        Price::from_cents(self.total, self.currency)
    }
}

/// Regional pricing inputs captured when the order was placed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub country_code: String,
    pub currency: Currency,
    pub ppp_multiplier: Decimal,
    pub exchange_rate: Decimal,
    pub tax_rate: Decimal,
}

/// Gateway-side references attached to an order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReferences {
    /// Provider name (e.g., "stripe")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_expires_at: Option<DateTime<Utc>>,

    /// Set when the gateway reported the session expired
    #[serde(default)]
    pub session_expired: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,

    /// Number of gateway sessions requested so far
    #[serde(default)]
    pub checkout_attempts: u32,
}

impl PaymentReferences {
    /// The attached session, if it can still be paid
    pub fn active_session(&self, now: DateTime<Utc>, margin: Duration) -> Option<CheckoutSession> {
        if self.session_expired {
            return None;
        }
        let session_id = self.session_id.clone()?;
        let checkout_url = self.checkout_url.clone()?;
        if let Some(expires_at) = self.session_expires_at {
            if expires_at <= now + margin {
                return None;
            }
        }

        Some(CheckoutSession {
            session_id,
            provider: self.provider.clone().unwrap_or_default(),
            checkout_url,
            expires_at: self.session_expires_at,
            payment_intent_id: self.payment_intent_id.clone(),
            created_at: now,
        })
    }

    /// Opaque references usable to look the order up from gateway events
    pub fn lookup_keys(&self) -> impl Iterator<Item = &str> {
        self.session_id
            .iter()
            .chain(self.payment_intent_id.iter())
            .map(|s| s.as_str())
    }
}

/// A placed order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,

    /// Human-readable unique number (e.g., "ORD-20261018-4F2A9C1B")
    pub order_number: String,

    #[serde(flatten)]
    pub state: OrderState,

    pub items: Vec<OrderItem>,

    pub totals: OrderTotals,

    pub pricing: PricingSnapshot,

    pub shipping_method_id: String,

    pub shipping_address: Address,

    pub billing_address: Address,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,

    #[serde(default)]
    pub payment: PaymentReferences,

    /// Optimistic concurrency counter, bumped on every write
    pub version: u64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn status(&self) -> OrderStatus {
        self.state.status()
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.state.payment_status()
    }

    pub fn currency(&self) -> Currency {
        self.totals.currency
    }

    /// Get item count
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// The fields an update may change
    pub fn mutable_part(&self) -> OrderUpdate {
        OrderUpdate {
            state: self.state,
            tracking_number: self.tracking_number.clone(),
            payment: self.payment.clone(),
        }
    }
}

/// Mutable subset of an order. Items, totals and addresses are immutable
/// once placed, so updates cannot reach them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdate {
    pub state: OrderState,
    pub tracking_number: Option<String>,
    pub payment: PaymentReferences,
}

/// Hosted checkout session created by a payment provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider's session ID
    pub session_id: String,

    /// Provider name (e.g., "stripe")
    pub provider: String,

    /// URL to redirect customer to for payment
    pub checkout_url: String,

    /// When the session expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Payment intent ID, if the provider already allocated one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn new(
        session_id: impl Into<String>,
        provider: impl Into<String>,
        checkout_url: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            provider: provider.into(),
            checkout_url: checkout_url.into(),
            expires_at: None,
            payment_intent_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Payment outcome reported by a gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// Payment captured
    PaymentSucceeded,
    /// Payment attempt failed
    PaymentFailed,
    /// Payment refunded at the gateway
    RefundIssued,
    /// Hosted session expired unpaid
    SessionExpired,
    /// Unknown event (passthrough)
    Unknown(String),
}

/// A verified gateway event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Event ID from provider
    pub event_id: String,

    pub event_type: WebhookEventType,

    /// Provider name
    pub provider: String,

    /// Related checkout session ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Related payment intent ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,

    /// Amount reported by the gateway (in smallest unit)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,

    pub timestamp: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(event_id: impl Into<String>, event_type: WebhookEventType, provider: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            event_type,
            provider: provider.into(),
            session_id: None,
            payment_intent_id: None,
            amount: None,
            currency: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_payment_intent(mut self, payment_intent_id: impl Into<String>) -> Self {
        self.payment_intent_id = Some(payment_intent_id.into());
        self
    }

    pub fn with_amount(mut self, amount: i64, currency: Currency) -> Self {
        self.amount = Some(amount);
        self.currency = Some(currency);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address {
            name: "Ana Silva".to_string(),
            line1: "Rua Augusta 100".to_string(),
            line2: None,
            city: "São Paulo".to_string(),
            region: Some("SP".to_string()),
            postal_code: "01305-000".to_string(),
            country: "br".to_string(),
            phone: None,
        }
    }

    #[test]
    fn test_address_validation() {
        assert!(address().validate("shipping").is_ok());
        assert_eq!(address().country_code(), "BR");

        let mut missing_city = address();
        missing_city.city = " ".to_string();
        assert!(matches!(
            missing_city.validate("shipping"),
            Err(OrderError::Validation(msg)) if msg.contains("city")
        ));

        let mut bad_country = address();
        bad_country.country = "Brazil".to_string();
        assert!(bad_country.validate("billing").is_err());
    }

    #[test]
    fn test_totals_invariant() {
        let totals = OrderTotals::new(Currency::USD, 8500, 680, 0, 0).unwrap();
        assert_eq!(totals.total, 9180);
        assert!(totals.is_consistent());
        assert_eq!(totals.total_price().display(), "$91.80");
    }

    #[test]
    fn test_totals_overflow_is_rejected() {
        let err = OrderTotals::new(Currency::KRW, i64::MAX - 10, 100, 0, 0).unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));

        let err = OrderTotals::new(Currency::USD, 0, 0, 0, i64::MIN).unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));

        let tampered = OrderTotals {
            currency: Currency::USD,
            subtotal: i64::MAX,
            tax: 1,
            shipping: 0,
            discount: 0,
            total: i64::MIN,
        };
        assert!(!tampered.is_consistent());
    }

    #[test]
    fn test_active_session() {
        let now = Utc::now();
        let mut refs = PaymentReferences {
            provider: Some("stripe".to_string()),
            session_id: Some("cs_test_1".to_string()),
            checkout_url: Some("https://checkout.stripe.com/c/pay/cs_test_1".to_string()),
            session_expires_at: Some(now + Duration::hours(1)),
            ..Default::default()
        };
        assert!(refs.active_session(now, Duration::seconds(60)).is_some());

        refs.session_expires_at = Some(now + Duration::seconds(30));
        assert!(refs.active_session(now, Duration::seconds(60)).is_none());

        refs.session_expires_at = None;
        refs.session_expired = true;
        assert!(refs.active_session(now, Duration::seconds(60)).is_none());
    }

    #[test]
    fn test_lookup_keys() {
        let refs = PaymentReferences {
            session_id: Some("cs_1".to_string()),
            payment_intent_id: Some("pi_1".to_string()),
            ..Default::default()
        };
        assert_eq!(refs.lookup_keys().collect::<Vec<_>>(), vec!["cs_1", "pi_1"]);
    }
}
