//! # Reference Data
//!
//! Read-only inputs fed into the engine by external collaborators: product
//! catalog, shipping-method table and country/PPP table. Loaded once at
//! startup from a config directory:
//!
//! ```text
//! config/
//! ├── products.toml
//! ├── shipping.toml
//! └── countries.toml
//! ```

use crate::error::{OrderError, OrderResult};
use crate::pricing::CountryTable;
use crate::product::{Currency, ProductCatalog};
use crate::shipping::ShippingTable;
use std::path::Path;

/// Everything the pricing engine and order builder read
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub catalog: ProductCatalog,
    pub shipping: ShippingTable,
    pub countries: CountryTable,
}

impl ReferenceData {
    pub fn new(catalog: ProductCatalog, shipping: ShippingTable, countries: CountryTable) -> Self {
        Self {
            catalog,
            shipping,
            countries,
        }
    }

    /// Load and validate the three TOML files from `dir`
    pub fn load_dir(dir: impl AsRef<Path>) -> OrderResult<Self> {
        let dir = dir.as_ref();

        let catalog = ProductCatalog::from_toml(&read(dir, "products.toml")?)
            .map_err(|e| OrderError::Configuration(format!("products.toml: {e}")))?;
        let shipping = ShippingTable::from_toml(&read(dir, "shipping.toml")?)
            .map_err(|e| OrderError::Configuration(format!("shipping.toml: {e}")))?;
        let countries = CountryTable::from_toml(&read(dir, "countries.toml")?)
            .map_err(|e| OrderError::Configuration(format!("countries.toml: {e}")))?;

        let data = Self::new(catalog, shipping, countries);
        data.validate()?;

        tracing::info!(
            products = data.catalog.products.len(),
            shipping_methods = data.shipping.methods.len(),
            countries = data.countries.countries.len(),
            "Loaded reference data from {}",
            dir.display()
        );

        Ok(data)
    }

    /// Base prices must be USD and rates non-negative
    pub fn validate(&self) -> OrderResult<()> {
        for product in &self.catalog.products {
            if product.price.currency != Currency::USD {
                return Err(OrderError::Configuration(format!(
                    "product {} must be priced in USD, found {}",
                    product.id, product.price.currency
                )));
            }
            if product.price.amount < 0 {
                return Err(OrderError::Configuration(format!(
                    "product {} has a negative price",
                    product.id
                )));
            }
        }

        for method in &self.shipping.methods {
            let threshold_currency = method.free_shipping_threshold.map(|t| t.currency);
            if method.price.currency != Currency::USD
                || threshold_currency.is_some_and(|c| c != Currency::USD)
            {
                return Err(OrderError::Configuration(format!(
                    "shipping method {} must be priced in USD",
                    method.id
                )));
            }
        }

        if self.countries.default_tax_rate.is_sign_negative() {
            return Err(OrderError::Configuration(
                "default_tax_rate must not be negative".to_string(),
            ));
        }
        for country in &self.countries.countries {
            let negative = [country.exchange_rate, country.ppp_multiplier, country.tax_rate]
                .iter()
                .flatten()
                .any(|v| v.is_sign_negative() && !v.is_zero());
            if negative {
                return Err(OrderError::Configuration(format!(
                    "country {} has a negative rate",
                    country.code
                )));
            }
        }

        Ok(())
    }
}

fn read(dir: &Path, file: &str) -> OrderResult<String> {
    let path = dir.join(file);
    std::fs::read_to_string(&path)
        .map_err(|e| OrderError::Configuration(format!("failed to read {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::{Price, Product};
    use crate::testing::reference_data;

    #[test]
    fn test_fixture_is_valid() {
        assert!(reference_data().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_usd_product() {
        let mut data = reference_data();
        let mut product = Product::new("euro-thing", "Euro Thing", 100);
        product.price = Price::from_cents(100, Currency::EUR);
        data.catalog.add(product);

        assert!(matches!(data.validate(), Err(OrderError::Configuration(_))));
    }

    #[test]
    fn test_load_dir_reports_missing_files() {
        let err = ReferenceData::load_dir("/nonexistent/config").unwrap_err();
        assert!(matches!(err, OrderError::Configuration(msg) if msg.contains("products.toml")));
    }

    #[test]
    fn test_load_dir_reads_shipped_config() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config");
        let data = ReferenceData::load_dir(dir).unwrap();
        assert!(!data.catalog.products.is_empty());
        assert!(!data.shipping.methods.is_empty());
        assert!(!data.countries.countries.is_empty());
    }
}
