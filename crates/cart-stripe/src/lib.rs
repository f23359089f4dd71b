//! # cart-stripe
//!
//! Stripe payment gateway for the regional cart engine.
//!
//! **StripeCheckoutStrategy** implements `cart_core::PaymentStrategy` with
//! the Checkout Sessions API:
//!    - Line items in the order's settlement currency, amounts already locked
//!    - Idempotency key per checkout attempt
//!    - Order id and number in session metadata
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cart_stripe::StripeCheckoutStrategy;
//! use cart_core::{CheckoutService, CheckoutUrls};
//!
//! // Create strategy from environment
//! let strategy = Arc::new(StripeCheckoutStrategy::from_env()?);
//!
//! let checkout = CheckoutService::new(store, strategy, CheckoutUrls::new(base_url));
//! ```
//!
//! ## Webhook Handling
//!
//! ```rust,ignore
//! // In your webhook endpoint:
//! let event = strategy.verify_webhook(payload, signature).await?;
//! let outcome = processor.process(&event).await?;
//! ```

pub mod checkout;
pub mod config;
pub mod webhook;

// Re-exports
pub use checkout::StripeCheckoutStrategy;
pub use config::StripeConfig;
pub use webhook::{signature_header, webhook_setup_instructions, REQUIRED_WEBHOOK_EVENTS};
