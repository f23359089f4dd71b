//! # Shipping Methods
//!
//! Authoritative shipping-method table, loaded from `config/shipping.toml`.
//! Client-submitted shipping amounts are never used; the order builder always
//! re-derives the cost from this table.

use crate::error::{OrderError, OrderResult};
use crate::product::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A shipping method offered at checkout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingMethod {
    /// Unique method identifier (e.g., "standard")
    pub id: String,

    /// Display name
    pub name: String,

    /// Base price, USD
    pub price: Price,

    /// Destination country codes; empty means every destination
    #[serde(default)]
    pub countries: Vec<String>,

    /// USD base subtotal at or above which shipping is free
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_shipping_threshold: Option<Price>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_days: Option<u32>,

    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl ShippingMethod {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price_cents: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price: Price::usd(price_cents),
            countries: Vec::new(),
            free_shipping_threshold: None,
            estimated_days: None,
            active: true,
        }
    }

    /// Builder: free shipping from a USD subtotal (in cents)
    pub fn with_free_shipping_over(mut self, cents: i64) -> Self {
        self.free_shipping_threshold = Some(Price::usd(cents));
        self
    }

    /// Builder: restrict to destination countries
    pub fn ships_to<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries = countries.into_iter().map(Into::into).collect();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Whether this method delivers to the given country code
    pub fn ships_to_country(&self, country_code: &str) -> bool {
        self.countries.is_empty()
            || self
                .countries
                .iter()
                .any(|c| c.eq_ignore_ascii_case(country_code))
    }

    /// USD base cost for an order with the given USD base subtotal
    pub fn base_cost(&self, base_subtotal_usd: Decimal) -> Decimal {
        match self.free_shipping_threshold {
            Some(threshold) if base_subtotal_usd >= threshold.as_decimal() => Decimal::ZERO,
            _ => self.price.as_decimal(),
        }
    }
}

/// Shipping-method table (loaded from config)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShippingTable {
    #[serde(default)]
    pub methods: Vec<ShippingMethod>,
}

impl ShippingTable {
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: ShippingMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn get(&self, id: &str) -> Option<&ShippingMethod> {
        self.methods.iter().find(|m| m.id == id)
    }

    /// Methods a buyer may pick for a destination
    pub fn available_for(&self, country_code: &str) -> impl Iterator<Item = &ShippingMethod> + '_ {
        let code = country_code.to_string();
        self.methods
            .iter()
            .filter(move |m| m.active && m.ships_to_country(&code))
    }

    /// Resolve a method for a destination, rejecting unknown, inactive and
    /// ineligible methods.
    pub fn resolve(&self, method_id: &str, country_code: &str) -> OrderResult<&ShippingMethod> {
        let method = self
            .get(method_id)
            .ok_or_else(|| OrderError::not_found("shipping method", method_id))?;

        if !method.active {
            return Err(OrderError::Validation(format!(
                "Shipping method is not available: {method_id}"
            )));
        }

        if !method.ships_to_country(country_code) {
            return Err(OrderError::Validation(format!(
                "Shipping method {method_id} does not deliver to {country_code}"
            )));
        }

        Ok(method)
    }

    /// Load table from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn table() -> ShippingTable {
        ShippingTable::new()
            .with_method(ShippingMethod::new("standard", "Standard", 599).with_free_shipping_over(5000))
            .with_method(ShippingMethod::new("express", "Express", 1999).ships_to(["US", "CA"]))
            .with_method(ShippingMethod::new("freight", "Freight", 9900).inactive())
    }

    #[test]
    fn test_free_shipping_threshold() {
        let standard = table().get("standard").cloned().unwrap();
        assert_eq!(standard.base_cost(dec!(49.99)), dec!(5.99));
        assert_eq!(standard.base_cost(dec!(50)), Decimal::ZERO);
        assert_eq!(standard.base_cost(dec!(100)), Decimal::ZERO);
    }

    #[test]
    fn test_resolve_rejects_unknown_inactive_and_ineligible() {
        let table = table();

        assert!(matches!(
            table.resolve("teleport", "US"),
            Err(OrderError::NotFound { .. })
        ));
        assert!(matches!(
            table.resolve("freight", "US"),
            Err(OrderError::Validation(_))
        ));
        assert!(matches!(
            table.resolve("express", "IN"),
            Err(OrderError::Validation(_))
        ));
        assert!(table.resolve("express", "ca").is_ok());
    }

    #[test]
    fn test_available_for() {
        let table = table();
        let ids: Vec<_> = table.available_for("IN").map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["standard"]);
    }
}
