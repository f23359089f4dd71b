//! # cart-core
//!
//! Order lifecycle engine for a storefront with regional (PPP) pricing.
//!
//! This crate provides:
//! - `calculate_ppp` and `CountryTable` for purchasing-power-adjusted prices
//! - `OrderBuilder` to turn a cart into a persisted, server-priced order
//! - `CheckoutService` to hand a pending order to a payment gateway
//! - `WebhookProcessor` to reconcile gateway events with orders
//! - `AdminService` for operator fulfillment transitions
//! - `OrderState`, a checked `(status, payment_status)` pair with an explicit
//!   transition table
//! - `PaymentStrategy` and `OrderStore`, the gateway and persistence seams
//! - `SqliteOrderStore`, the durable store (`sqlite` feature)
//!
//! ## Example
//!
//! ```rust,ignore
//! use cart_core::{CartItem, CheckoutService, CreateOrderRequest, OrderBuilder, RedirectTargets};
//!
//! let reference = Arc::new(ReferenceData::load_dir("config")?);
//! let store = InMemoryOrderStore::shared();
//!
//! let order = OrderBuilder::new(reference, store.clone())
//!     .create_order(request)
//!     .await?;
//!
//! let session = CheckoutService::new(store, gateway, CheckoutUrls::new(base_url))
//!     .create_checkout_session(order.id, RedirectTargets::default())
//!     .await?;
//!
//! // Redirect the buyer to session.checkout_url
//! ```

pub mod admin;
pub mod builder;
pub mod checkout;
pub mod error;
pub mod order;
pub mod pricing;
pub mod product;
pub mod reference;
pub mod shipping;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod state;
pub mod store;
pub mod strategy;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use admin::{AdminService, AdminTransitionRequest};
pub use builder::{CartItem, ClientTotals, CreateOrderRequest, OrderBuilder, OrderQuote, QuotedLine};
pub use checkout::{CheckoutService, RedirectTargets};
pub use error::{OrderError, OrderResult};
pub use order::{
    Address, CheckoutSession, Order, OrderItem, OrderTotals, OrderUpdate, PaymentReferences,
    PricingSnapshot, WebhookEvent, WebhookEventType,
};
pub use pricing::{calculate_ppp, format_price, Country, CountryTable, PppQuote};
pub use product::{Currency, Price, Product, ProductCatalog};
pub use reference::ReferenceData;
pub use shipping::{ShippingMethod, ShippingTable};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteOrderStore;
pub use state::{OrderState, OrderStatus, PaymentStatus, Transition, TransitionError, TransitionKind};
pub use store::{InMemoryOrderStore, OrderStore, ReconciliationAnomaly, SharedOrderStore, StoreError};
pub use strategy::{BoxedPaymentStrategy, CheckoutLine, CheckoutRequest, CheckoutUrls, PaymentStrategy};
pub use webhook::{WebhookDisposition, WebhookProcessor};
