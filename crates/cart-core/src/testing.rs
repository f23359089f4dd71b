//! Fixtures shared by the unit tests of this crate.

use crate::error::{OrderError, OrderResult};
use crate::order::{
    Address, CheckoutSession, Order, OrderItem, OrderTotals, OrderUpdate, PaymentReferences,
    PricingSnapshot, WebhookEvent,
};
use crate::pricing::{Country, CountryTable};
use crate::product::{Currency, Price, Product, ProductCatalog};
use crate::reference::ReferenceData;
use crate::shipping::{ShippingMethod, ShippingTable};
use crate::state::OrderState;
use crate::store::{InMemoryOrderStore, OrderStore, ReconciliationAnomaly, StoreError};
use crate::strategy::{CheckoutRequest, PaymentStrategy};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub fn reference_data() -> ReferenceData {
    let catalog = ProductCatalog::new()
        .with_product(Product::new("desk-lamp", "Desk Lamp", 10000))
        .with_product(Product::new("notebook", "Dot Grid Notebook", 1200))
        .with_product(Product::new("retired-mug", "Retired Mug", 900).inactive());

    let shipping = ShippingTable::new()
        .with_method(ShippingMethod::new("standard", "Standard", 599).with_free_shipping_over(5000))
        .with_method(ShippingMethod::new("express", "Express", 1999).ships_to(["US", "AR"]))
        .with_method(ShippingMethod::new("freight", "Freight", 9900).inactive());

    let countries = CountryTable::new()
        .with_default_tax_rate(dec!(0.08))
        .with_country(Country::new("US", Currency::USD))
        .with_country(Country::new("AR", Currency::USD).with_multiplier(Some(dec!(0.85))))
        .with_country(
            Country::new("IN", Currency::INR)
                .with_exchange_rate(dec!(83.2))
                .with_multiplier(Some(dec!(0.3)))
                .with_tax_rate(dec!(0.18)),
        )
        .with_country(
            Country::new("JP", Currency::JPY)
                .with_exchange_rate(dec!(149.5))
                .with_multiplier(Some(dec!(0.9)))
                .with_tax_rate(dec!(0.1)),
        )
        .with_country(
            Country::new("KR", Currency::KRW)
                .with_exchange_rate(dec!(1330))
                .with_multiplier(Some(dec!(0.7)))
                .with_tax_rate(dec!(0.1)),
        );

    ReferenceData::new(catalog, shipping, countries)
}

pub fn address(country: &str) -> Address {
    Address {
        name: "Mara Quispe".to_string(),
        line1: "Av. Corrientes 1234".to_string(),
        line2: None,
        city: "Buenos Aires".to_string(),
        region: None,
        postal_code: "C1043".to_string(),
        country: country.to_string(),
        phone: None,
    }
}

/// A `pending/pending` USD order with one $100 item
pub fn sample_order(order_number: &str) -> Order {
    let id = Uuid::new_v4();
    let now = Utc::now();
    Order {
        id,
        order_number: order_number.to_string(),
        state: OrderState::new(),
        items: vec![OrderItem {
            id: Uuid::new_v4(),
            order_id: id,
            product_id: "desk-lamp".to_string(),
            name: "Desk Lamp".to_string(),
            quantity: 1,
            unit_price: Price::usd(10000),
            line_total: Price::usd(10000),
        }],
        totals: OrderTotals::new(Currency::USD, 10000, 800, 0, 0).unwrap(),
        pricing: PricingSnapshot {
            country_code: "US".to_string(),
            currency: Currency::USD,
            ppp_multiplier: Decimal::ONE,
            exchange_rate: Decimal::ONE,
            tax_rate: dec!(0.08),
        },
        shipping_method_id: "standard".to_string(),
        shipping_address: address("US"),
        billing_address: address("US"),
        tracking_number: None,
        payment: PaymentReferences::default(),
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

/// Store whose every write fails
pub struct FailingStore;

#[async_trait]
impl OrderStore for FailingStore {
    async fn insert(&self, _order: Order) -> Result<Order, StoreError> {
        Err(StoreError::Backend("disk full".to_string()))
    }

    async fn get(&self, _id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(None)
    }

    async fn find_by_payment_reference(&self, _reference: &str) -> Result<Option<Order>, StoreError> {
        Ok(None)
    }

    async fn compare_and_set(
        &self,
        _id: Uuid,
        _expected_version: u64,
        _update: OrderUpdate,
    ) -> Result<Order, StoreError> {
        Err(StoreError::Backend("disk full".to_string()))
    }

    async fn record_anomaly(&self, _anomaly: ReconciliationAnomaly) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".to_string()))
    }

    async fn anomalies(&self) -> Result<Vec<ReconciliationAnomaly>, StoreError> {
        Ok(Vec::new())
    }
}

/// Yields to the scheduler before every store call, so handlers joined on
/// one task interleave between reading an order and writing it
pub struct YieldingStore(pub Arc<InMemoryOrderStore>);

#[async_trait]
impl OrderStore for YieldingStore {
    async fn insert(&self, order: Order) -> Result<Order, StoreError> {
        tokio::task::yield_now().await;
        self.0.insert(order).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        tokio::task::yield_now().await;
        self.0.get(id).await
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, StoreError> {
        tokio::task::yield_now().await;
        self.0.find_by_payment_reference(reference).await
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expected_version: u64,
        update: OrderUpdate,
    ) -> Result<Order, StoreError> {
        tokio::task::yield_now().await;
        self.0.compare_and_set(id, expected_version, update).await
    }

    async fn record_anomaly(&self, anomaly: ReconciliationAnomaly) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.0.record_anomaly(anomaly).await
    }

    async fn anomalies(&self) -> Result<Vec<ReconciliationAnomaly>, StoreError> {
        self.0.anomalies().await
    }
}

/// In-process gateway that records what it was asked to charge
#[derive(Default)]
pub struct FakeGateway {
    calls: AtomicU32,
    fail: bool,
    delay: Option<std::time::Duration>,
    last_request: Mutex<Option<CheckoutRequest>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CheckoutRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }
}

#[async_trait]
impl PaymentStrategy for FakeGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> OrderResult<CheckoutSession> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(OrderError::gateway("fake", "card network unavailable"));
        }

        let session_id = format!("cs_fake_{}_{call}", request.order_number);
        Ok(CheckoutSession::new(
            session_id.clone(),
            "fake",
            format!("https://pay.example.com/{session_id}"),
        )
        .with_expiry(Utc::now() + Duration::hours(1)))
    }

    async fn verify_webhook(&self, _payload: &[u8], _signature: &str) -> OrderResult<WebhookEvent> {
        Err(OrderError::WebhookVerificationFailed(
            "fake gateway does not sign events".to_string(),
        ))
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}
