//! # cart-api
//!
//! HTTP API layer for the regional cart engine.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - REST endpoints for quotes, orders and checkout
//! - Operator endpoints for status changes and reconciliation anomalies
//! - Webhook handler for payment events
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/api/v1/quote` | Price a cart for a country |
//! | POST | `/api/v1/orders` | Create order |
//! | GET | `/api/v1/orders/{order_id}` | Get order |
//! | POST | `/api/v1/orders/{order_id}/checkout` | Create or reuse checkout session |
//! | POST | `/api/v1/admin/orders/{order_id}/transition` | Operator status change |
//! | GET | `/api/v1/admin/anomalies` | Reconciliation anomalies |
//! | POST | `/webhook/stripe` | Stripe webhook |

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState, StoreBackend};
