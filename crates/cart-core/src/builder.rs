//! # Order Builder
//!
//! Turns a cart into a persisted order. The cart is only a list of product
//! ids and quantities: prices, shipping and tax are always recomputed from
//! reference data, and totals submitted by the client are advisory.

use crate::error::{OrderError, OrderResult};
use crate::order::{Address, Order, OrderItem, OrderTotals, PaymentReferences, PricingSnapshot};
use crate::product::{Currency, Price};
use crate::reference::ReferenceData;
use crate::state::OrderState;
use crate::store::{SharedOrderStore, StoreError};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// Most distinct lines accepted in one cart
pub const MAX_LINE_ITEMS: usize = 100;

/// Most units of one product accepted per line
pub const MAX_QUANTITY: u32 = 999;

/// Item in a cart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

impl CartItem {
    pub fn new(product_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Totals the client computed for display; never trusted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientTotals {
    #[serde(default)]
    pub subtotal: Option<i64>,
    #[serde(default)]
    pub shipping: Option<i64>,
    #[serde(default)]
    pub tax: Option<i64>,
    #[serde(default)]
    pub total: Option<i64>,
}

/// Create-order request payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<CartItem>,
    pub shipping_address: Address,
    /// Defaults to the shipping address
    #[serde(default)]
    pub billing_address: Option<Address>,
    pub shipping_method_id: String,
    #[serde(default)]
    pub client_totals: Option<ClientTotals>,
}

/// A priced cart line, before persistence
#[derive(Debug, Clone, Serialize)]
pub struct QuotedLine {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Price,
    pub line_total: Price,
}

/// Server-side price of a cart for a destination
#[derive(Debug, Clone, Serialize)]
pub struct OrderQuote {
    pub lines: Vec<QuotedLine>,
    pub totals: OrderTotals,
    pub pricing: PricingSnapshot,
    /// Formatted total for display
    pub display_total: String,
}

/// Validates carts and persists orders
#[derive(Clone)]
pub struct OrderBuilder {
    reference: Arc<ReferenceData>,
    store: SharedOrderStore,
}

impl OrderBuilder {
    pub fn new(reference: Arc<ReferenceData>, store: SharedOrderStore) -> Self {
        Self { reference, store }
    }

    /// Price a cart for a destination without persisting anything.
    pub fn quote(
        &self,
        items: &[CartItem],
        country_code: &str,
        shipping_method_id: &str,
    ) -> OrderResult<OrderQuote> {
        if items.is_empty() {
            return Err(OrderError::Validation("Order has no items".to_string()));
        }
        if items.len() > MAX_LINE_ITEMS {
            return Err(OrderError::Validation(format!(
                "Order has {} line items; at most {MAX_LINE_ITEMS} are allowed",
                items.len()
            )));
        }

        let country_code = country_code.to_ascii_uppercase();
        let countries = &self.reference.countries;
        let currency = countries.calculate_ppp(Decimal::ZERO, &country_code).currency;

        let mut lines = Vec::with_capacity(items.len());
        let mut base_subtotal = Decimal::ZERO;
        let mut subtotal: i64 = 0;

        for item in items {
            if item.quantity == 0 || item.quantity > MAX_QUANTITY {
                return Err(OrderError::Validation(format!(
                    "Quantity for {} must be between 1 and {MAX_QUANTITY}",
                    item.product_id
                )));
            }

            let product = self
                .reference
                .catalog
                .get(&item.product_id)
                .ok_or_else(|| OrderError::not_found("product", &item.product_id))?;

            if !product.active {
                return Err(OrderError::Validation(format!(
                    "Product is not available: {}",
                    item.product_id
                )));
            }

            let base_unit = product.price.as_decimal();
            let adjusted = countries.calculate_ppp(base_unit, &country_code);
            let unit_amount = to_minor(currency, adjusted.adjusted_amount)?;
            let line_amount = unit_amount
                .checked_mul(i64::from(item.quantity))
                .ok_or_else(|| OrderError::Validation("Line total overflows".to_string()))?;

            base_subtotal = base_unit
                .checked_mul(Decimal::from(item.quantity))
                .and_then(|line| base_subtotal.checked_add(line))
                .ok_or_else(|| OrderError::Validation("Subtotal overflows".to_string()))?;
            subtotal = subtotal
                .checked_add(line_amount)
                .ok_or_else(|| OrderError::Validation("Subtotal overflows".to_string()))?;

            lines.push(QuotedLine {
                product_id: product.id.clone(),
                name: product.name.clone(),
                quantity: item.quantity,
                unit_price: Price::from_cents(unit_amount, currency),
                line_total: Price::from_cents(line_amount, currency),
            });
        }

        let method = self
            .reference
            .shipping
            .resolve(shipping_method_id, &country_code)?;
        let shipping_base = method.base_cost(base_subtotal);
        let shipping = to_minor(
            currency,
            countries.calculate_ppp(shipping_base, &country_code).adjusted_amount,
        )?;

        let tax_rate = countries.tax_rate(&country_code);
        let taxable = currency
            .from_minor_units(subtotal)
            .checked_mul(tax_rate)
            .ok_or_else(|| OrderError::Validation("Tax overflows".to_string()))?;
        let tax = to_minor(currency, taxable)?;

        let totals = OrderTotals::new(currency, subtotal, tax, shipping, 0)?;
        let snapshot = countries.calculate_ppp(Decimal::ONE, &country_code);

        Ok(OrderQuote {
            lines,
            display_total: totals.total_price().display(),
            totals,
            pricing: PricingSnapshot {
                country_code,
                currency,
                ppp_multiplier: snapshot.multiplier,
                exchange_rate: snapshot.exchange_rate,
                tax_rate,
            },
        })
    }

    /// Validate a cart, price it and persist the order with its items.
    ///
    /// The new order is always `pending/pending`.
    #[instrument(skip(self, request), fields(items = request.items.len(), country = %request.shipping_address.country))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> OrderResult<Order> {
        if request.items.is_empty() {
            return Err(OrderError::Validation("Order has no items".to_string()));
        }
        request.shipping_address.validate("shipping")?;
        let billing_address = match request.billing_address {
            Some(billing) => {
                billing.validate("billing")?;
                billing
            }
            None => request.shipping_address.clone(),
        };

        let quote = self.quote(
            &request.items,
            &request.shipping_address.country_code(),
            &request.shipping_method_id,
        )?;

        if let Some(client) = &request.client_totals {
            log_client_mismatch(client, &quote.totals);
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let items: Vec<OrderItem> = quote
            .lines
            .iter()
            .map(|line| OrderItem {
                id: Uuid::new_v4(),
                order_id: id,
                product_id: line.product_id.clone(),
                name: line.name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                line_total: line.line_total,
            })
            .collect();

        let mut order = Order {
            id,
            order_number: generate_order_number(),
            state: OrderState::new(),
            items,
            totals: quote.totals,
            pricing: quote.pricing,
            shipping_method_id: request.shipping_method_id,
            shipping_address: request.shipping_address,
            billing_address,
            tracking_number: None,
            payment: PaymentReferences::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        };

        for attempt in 1..=ORDER_NUMBER_ATTEMPTS {
            match self.store.insert(order.clone()).await {
                Ok(stored) => {
                    info!(
                        order_id = %stored.id,
                        order_number = %stored.order_number,
                        items = stored.item_count(),
                        total = %stored.totals.total_price().display(),
                        "Order created"
                    );
                    return Ok(stored);
                }
                Err(StoreError::DuplicateOrderNumber(number)) => {
                    warn!(attempt, order_number = %number, "Order number clash, regenerating");
                    order.order_number = generate_order_number();
                }
                Err(e) => {
                    return Err(OrderError::CreationFailed(e.to_string()));
                }
            }
        }

        Err(OrderError::CreationFailed(format!(
            "no free order number after {ORDER_NUMBER_ATTEMPTS} attempts"
        )))
    }
}

fn to_minor(currency: Currency, amount: Decimal) -> OrderResult<i64> {
    currency
        .to_minor_units(amount)
        .ok_or_else(|| OrderError::Validation(format!("Amount out of range: {amount}")))
}

/// `ORD-YYYYMMDD-XXXXXXXX`
pub fn generate_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}

fn log_client_mismatch(client: &ClientTotals, server: &OrderTotals) {
    let fields = [
        ("subtotal", client.subtotal, server.subtotal),
        ("shipping", client.shipping, server.shipping),
        ("tax", client.tax, server.tax),
        ("total", client.total, server.total),
    ];
    for (field, claimed, computed) in fields {
        if let Some(claimed) = claimed {
            if claimed != computed {
                warn!(field, claimed, computed, "Client totals disagree with server quote, using server values");
            }
        }
    }
}
