//! # cart-wasm
//!
//! WebAssembly bindings for regional price previews.
//!
//! Runs the same PPP adjustment as the server so an edge worker or browser
//! can show a destination price before an order exists. The server always
//! recomputes on order creation; these numbers are display only.
//!
//! ## Usage (JavaScript)
//!
//! ```javascript
//! import init, { preview_price, format_price } from 'cart-wasm';
//!
//! await init();
//!
//! const country = { code: 'IN', currency: 'inr', exchange_rate: '83.2', ppp_multiplier: '0.3' };
//! const quote = JSON.parse(preview_price('100.00', JSON.stringify(country)));
//! console.log(quote.display); // "₹2496.00"
//! ```
//!
//! ## Building
//!
//! ```bash
//! wasm-pack build --target web
//! ```

use cart_core::{pricing, Country, Currency};
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use wasm_bindgen::prelude::*;

/// Price preview returned to JavaScript (serialized as JSON)
#[derive(Debug, Serialize)]
struct PricePreview {
    /// Adjusted amount at the currency's precision, as a decimal string
    amount: String,
    currency: Currency,
    /// Amount in the currency's smallest unit
    minor_units: i64,
    multiplier: Decimal,
    exchange_rate: Decimal,
    display: String,
}

fn parse_amount(amount: &str) -> Result<Decimal, String> {
    Decimal::from_str(amount.trim()).map_err(|e| format!("Invalid amount {amount:?}: {e}"))
}

/// Adjust a USD base price for a country record.
///
/// An empty `country_json` (unknown destination) gives the USD price unchanged.
fn preview(base_usd: &str, country_json: &str) -> Result<String, String> {
    let base = parse_amount(base_usd)?;
    let country: Option<Country> = if country_json.trim().is_empty() {
        None
    } else {
        Some(serde_json::from_str(country_json).map_err(|e| format!("Invalid country: {e}"))?)
    };

    let quote = pricing::calculate_ppp(base, country.as_ref());
    let minor_units = quote
        .currency
        .to_minor_units(quote.adjusted_amount)
        .ok_or_else(|| format!("Amount out of range: {}", quote.adjusted_amount))?;
    let preview = PricePreview {
        amount: quote.rounded().to_string(),
        currency: quote.currency,
        minor_units,
        multiplier: quote.multiplier,
        exchange_rate: quote.exchange_rate,
        display: pricing::format_price(quote.adjusted_amount, quote.currency),
    };

    serde_json::to_string(&preview).map_err(|e| e.to_string())
}

fn format(amount: &str, currency: &str) -> Result<String, String> {
    let amount = parse_amount(amount)?;
    let currency = Currency::from_str(currency)?;
    Ok(pricing::format_price(amount, currency))
}

/// Preview the regional price of a USD amount; returns JSON
#[wasm_bindgen]
pub fn preview_price(base_usd: &str, country_json: &str) -> Result<String, JsValue> {
    preview(base_usd, country_json).map_err(|e| JsValue::from_str(&e))
}

/// Format a decimal amount (e.g. "1234.5") for display in `currency`
#[wasm_bindgen]
pub fn format_price(amount: &str, currency: &str) -> Result<String, JsValue> {
    format(amount, currency).map_err(|e| JsValue::from_str(&e))
}

/// Get library version
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
