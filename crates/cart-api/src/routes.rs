//! # Routes
//!
//! Axum router configuration for the order API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Storefront:
///   - POST /api/v1/quote - Price a cart for a destination
///   - POST /api/v1/orders - Create order
///   - GET  /api/v1/orders/{order_id} - Get order
///   - POST /api/v1/orders/{order_id}/checkout - Create or reuse checkout session
///
/// - Operator:
///   - POST /api/v1/admin/orders/{order_id}/transition - Change order status
///   - GET  /api/v1/admin/anomalies - Unapplied webhook events
///
/// - Webhooks:
///   - POST /webhook/stripe - Stripe webhook handler
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let order_routes = Router::new()
        .route("/quote", post(handlers::quote))
        .route("/orders", post(handlers::create_order))
        .route("/orders/{order_id}", get(handlers::get_order))
        .route("/orders/{order_id}/checkout", post(handlers::create_checkout));

    let admin_routes = Router::new()
        .route(
            "/orders/{order_id}/transition",
            post(handlers::admin_transition),
        )
        .route("/anomalies", get(handlers::list_anomalies));

    let api_routes = order_routes.nest("/admin", admin_routes);

    // Webhook routes (must accept raw body)
    let webhook_routes = Router::new().route("/stripe", post(handlers::stripe_webhook));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .nest("/api/v1", api_routes)
        .nest("/webhook", webhook_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
