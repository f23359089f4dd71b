//! # Regional Pricing Engine
//!
//! Purchasing-power-parity (PPP) adjustment of USD base prices by destination
//! country. Countries are loaded from `config/countries.toml`.
//!
//! Every function here is pure. Results keep full `Decimal` precision so the
//! engine can be applied to unit prices, shipping and tax independently and
//! summed afterwards; rounding happens only through [`Currency::round`] /
//! [`Currency::to_minor_units`] at the persist boundary, or in
//! [`format_price`] for display.

use crate::product::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Country / PPP reference record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Country {
    /// ISO 3166-1 alpha-2 code (e.g., "IN")
    pub code: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Settlement currency for buyers shipping to this country
    pub currency: Currency,

    /// Units of `currency` per 1 USD
    #[serde(default)]
    pub exchange_rate: Option<Decimal>,

    /// Purchasing-power multiplier applied to the USD base price
    #[serde(default)]
    pub ppp_multiplier: Option<Decimal>,

    /// Sales tax override for this country
    #[serde(default)]
    pub tax_rate: Option<Decimal>,

    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Country {
    pub fn new(code: impl Into<String>, currency: Currency) -> Self {
        Self {
            code: code.into(),
            name: String::new(),
            currency,
            exchange_rate: Some(Decimal::ONE),
            ppp_multiplier: Some(Decimal::ONE),
            tax_rate: None,
            active: true,
        }
    }

    pub fn with_exchange_rate(mut self, rate: Decimal) -> Self {
        self.exchange_rate = Some(rate);
        self
    }

    pub fn with_multiplier(mut self, multiplier: Option<Decimal>) -> Self {
        self.ppp_multiplier = multiplier;
        self
    }

    pub fn with_tax_rate(mut self, rate: Decimal) -> Self {
        self.tax_rate = Some(rate);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Multiplier actually applied: a missing or zero value passes through as 1.0
    pub fn effective_multiplier(&self) -> Decimal {
        match self.ppp_multiplier {
            Some(m) if !m.is_zero() => m,
            _ => Decimal::ONE,
        }
    }

    /// Exchange rate actually applied, `None` when the country cannot be priced
    pub fn effective_exchange_rate(&self) -> Option<Decimal> {
        self.exchange_rate.filter(|rate| !rate.is_zero())
    }
}

/// Result of a PPP adjustment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PppQuote {
    /// Amount in `currency`, unrounded
    pub adjusted_amount: Decimal,
    /// USD base amount that was adjusted
    pub original_amount: Decimal,
    pub currency: Currency,
    pub multiplier: Decimal,
    pub exchange_rate: Decimal,
}

impl PppQuote {
    fn identity(base_amount_usd: Decimal) -> Self {
        Self {
            adjusted_amount: base_amount_usd,
            original_amount: base_amount_usd,
            currency: Currency::USD,
            multiplier: Decimal::ONE,
            exchange_rate: Decimal::ONE,
        }
    }

    /// Adjusted amount rounded for display
    pub fn rounded(&self) -> Decimal {
        self.currency.round(self.adjusted_amount)
    }
}

/// Adjust a USD base amount for a (possibly unknown) country.
///
/// `None`, an inactive country, or a country without a usable exchange rate
/// all fall back to identity (USD, unchanged amount).
pub fn calculate_ppp(base_amount_usd: Decimal, country: Option<&Country>) -> PppQuote {
    let Some(country) = country.filter(|c| c.active) else {
        return PppQuote::identity(base_amount_usd);
    };
    let Some(exchange_rate) = country.effective_exchange_rate() else {
        return PppQuote::identity(base_amount_usd);
    };
    let multiplier = country.effective_multiplier();

    let adjusted_amount = if base_amount_usd > Decimal::ZERO {
        base_amount_usd * multiplier * exchange_rate
    } else {
        base_amount_usd
    };

    PppQuote {
        adjusted_amount,
        original_amount: base_amount_usd,
        currency: country.currency,
        multiplier,
        exchange_rate,
    }
}

/// Render an amount with the currency symbol at the currency's precision
pub fn format_price(amount: Decimal, currency: Currency) -> String {
    let rounded = currency.round(amount);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    let digits = currency.decimal_places() as usize;
    format!("{}{}{:.*}", sign, currency.symbol(), digits, rounded.abs())
}

/// Country table (loaded from config)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryTable {
    /// Tax rate used when a country has no override
    #[serde(default)]
    pub default_tax_rate: Decimal,

    #[serde(default)]
    pub countries: Vec<Country>,
}

impl Default for CountryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CountryTable {
    pub fn new() -> Self {
        Self {
            default_tax_rate: Decimal::ZERO,
            countries: Vec::new(),
        }
    }

    pub fn with_default_tax_rate(mut self, rate: Decimal) -> Self {
        self.default_tax_rate = rate;
        self
    }

    pub fn with_country(mut self, country: Country) -> Self {
        self.countries.push(country);
        self
    }

    /// Find an active country by code (case-insensitive)
    pub fn get(&self, code: &str) -> Option<&Country> {
        self.countries
            .iter()
            .find(|c| c.active && c.code.eq_ignore_ascii_case(code))
    }

    /// PPP-adjust a USD base amount for a country code
    pub fn calculate_ppp(&self, base_amount_usd: Decimal, country_code: &str) -> PppQuote {
        calculate_ppp(base_amount_usd, self.get(country_code))
    }

    /// Tax rate for a destination country
    pub fn tax_rate(&self, country_code: &str) -> Decimal {
        self.get(country_code)
            .and_then(|c| c.tax_rate)
            .unwrap_or(self.default_tax_rate)
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

    fn table() -> CountryTable {
        CountryTable::new()
            .with_default_tax_rate(dec!(0.08))
            .with_country(Country::new("AR", Currency::USD).with_multiplier(Some(dec!(0.85))))
            .with_country(
                Country::new("IN", Currency::INR)
                    .with_exchange_rate(dec!(83.2))
                    .with_multiplier(Some(dec!(0.3)))
                    .with_tax_rate(dec!(0.18)),
            )
            .with_country(Country::new("NG", Currency::USD).with_multiplier(Some(Decimal::ZERO)))
            .with_country(Country::new("XX", Currency::EUR).with_multiplier(None))
            .with_country(Country::new("DE", Currency::EUR).inactive())
    }

    #[test]
    fn test_zero_amount_stays_zero() {
        let quote = table().calculate_ppp(Decimal::ZERO, "IN");
        assert_eq!(quote.adjusted_amount, Decimal::ZERO);
        assert_eq!(quote.currency, Currency::INR);
    }

    #[test]
    fn test_negative_amount_passes_through() {
        let quote = table().calculate_ppp(dec!(-5), "AR");
        assert_eq!(quote.adjusted_amount, dec!(-5));
    }

    #[test]
    fn test_unknown_country_is_identity() {
        let quote = table().calculate_ppp(dec!(42.50), "ZZ");
        assert_eq!(quote.adjusted_amount, dec!(42.50));
        assert_eq!(quote.currency, Currency::USD);
        assert_eq!(quote.multiplier, Decimal::ONE);
    }

    #[test]
    fn test_inactive_country_is_identity() {
        let quote = table().calculate_ppp(dec!(10), "DE");
        assert_eq!(quote.currency, Currency::USD);
        assert_eq!(quote.adjusted_amount, dec!(10));
    }

    #[test]
    fn test_missing_or_zero_multiplier_passes_through() {
        let table = table();
        assert_eq!(table.calculate_ppp(dec!(100), "NG").adjusted_amount, dec!(100));

        let quote = table.calculate_ppp(dec!(100), "XX");
        assert_eq!(quote.adjusted_amount, dec!(100));
        assert_eq!(quote.currency, Currency::EUR);
    }

    #[test]
    fn test_missing_exchange_rate_falls_back_to_identity() {
        let mut country = Country::new("BR", Currency::BRL);
        country.exchange_rate = None;
        let quote = calculate_ppp(dec!(20), Some(&country));
        assert_eq!(quote.currency, Currency::USD);
        assert_eq!(quote.adjusted_amount, dec!(20));
    }

    #[test]
    fn test_multiplier_and_exchange_rate() {
        let table = table();
        assert_eq!(table.calculate_ppp(dec!(100), "ar").adjusted_amount, dec!(85.00));

        let quote = table.calculate_ppp(dec!(10), "IN");
        assert_eq!(quote.adjusted_amount, dec!(249.6));
        assert_eq!(quote.currency, Currency::INR);
    }

    #[test]
    fn test_redundant_application_does_not_compound_rounding() {
        // 3 × 0.333 at 0.85 rounds to 0.85 once, not 3 × 0.28 = 0.84
        let table = table();
        let per_line: Decimal = (0..3)
            .map(|_| table.calculate_ppp(dec!(0.333), "AR").adjusted_amount)
            .sum();
        let whole = table.calculate_ppp(dec!(0.999), "AR").adjusted_amount;
        assert_eq!(Currency::USD.round(per_line), Currency::USD.round(whole));
        assert_eq!(Currency::USD.round(per_line), dec!(0.85));
    }

    #[test]
    fn test_tax_rate_override() {
        let table = table();
        assert_eq!(table.tax_rate("IN"), dec!(0.18));
        assert_eq!(table.tax_rate("AR"), dec!(0.08));
        assert_eq!(table.tax_rate("ZZ"), dec!(0.08));
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(dec!(91.8), Currency::USD), "$91.80");
        assert_eq!(format_price(dec!(249.6), Currency::INR), "₹249.60");
        assert_eq!(format_price(dec!(1234.5), Currency::JPY), "¥1235");
        assert_eq!(format_price(dec!(-3.456), Currency::EUR), "-€3.46");
    }

    #[test]
    fn test_table_from_toml() {
        let table = CountryTable::from_toml(
            r#"
            default_tax_rate = 0.08

            [[countries]]
            code = "IN"
            name = "India"
            currency = "inr"
            exchange_rate = 83.2
            ppp_multiplier = 0.3
            "#,
        )
        .unwrap();

        assert_eq!(table.default_tax_rate, dec!(0.08));
        assert_eq!(table.get("in").unwrap().currency, Currency::INR);
    }
}
