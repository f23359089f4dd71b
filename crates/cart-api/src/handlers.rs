//! # Request Handlers
//!
//! Axum request handlers for the order API.
//! Prices are never taken from the request: every amount in a response is
//! computed server-side from reference data.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use cart_core::{
    AdminTransitionRequest, CartItem, CreateOrderRequest, Order, OrderError, OrderQuote,
    OrderTotals, RedirectTargets,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Price preview request
#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub items: Vec<CartItem>,
    /// Destination country code
    pub country: String,
    pub shipping_method_id: String,
}

/// Create order response
#[derive(Debug, Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: String,
    pub payment_status: String,
    pub totals: OrderTotals,
    /// Formatted total (e.g., "$91.80")
    pub display_total: String,
}

impl From<&Order> for OrderCreatedResponse {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            status: order.status().to_string(),
            payment_status: order.payment_status().to_string(),
            totals: order.totals,
            display_total: order.totals.total_price().display(),
        }
    }
}

/// Create checkout response
#[derive(Debug, Serialize)]
pub struct CreateCheckoutResponse {
    /// Session ID
    pub session_id: String,
    /// Checkout URL (redirect user here)
    pub checkout_url: String,
    /// Session expiration time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn order_error_to_response(err: OrderError) -> ApiError {
    let code = err.status_code();
    let mut response = ErrorResponse::new(err.to_string(), code);
    if err.is_retryable() {
        response = response.with_details("retryable");
    }
    (StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), Json(response))
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "ppp-cart",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Price a cart for a destination without creating an order
#[instrument(skip(state, request), fields(country = %request.country, items = request.items.len()))]
pub async fn quote(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<OrderQuote>, ApiError> {
    state
        .orders
        .quote(&request.items, &request.country, &request.shipping_method_id)
        .map(Json)
        .map_err(order_error_to_response)
}

/// Create an order from a cart
#[instrument(skip(state, request), fields(items = request.items.len()))]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let order = state.orders.create_order(request).await.map_err(|e| {
        warn!("Order rejected: {}", e);
        order_error_to_response(e)
    })?;

    Ok((StatusCode::CREATED, Json(OrderCreatedResponse::from(&order))))
}

/// Read an order with its items
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .store
        .get(order_id)
        .await
        .map_err(|e| order_error_to_response(e.into()))?
        .ok_or_else(|| order_error_to_response(OrderError::not_found("order", order_id)))?;

    Ok(Json(order))
}

/// Create (or reuse) a hosted checkout session for an order.
///
/// The body is optional; when present it may override the redirect targets.
#[instrument(skip(state, body))]
pub async fn create_checkout(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<CreateCheckoutResponse>, ApiError> {
    let targets: RedirectTargets = if body.is_empty() {
        RedirectTargets::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Invalid checkout request body", 400).with_details(e.to_string())),
            )
        })?
    };

    let session = state
        .checkout
        .create_checkout_session(order_id, targets)
        .await
        .map_err(|e| {
            error!("Failed to create checkout: {}", e);
            order_error_to_response(e)
        })?;

    info!("Checkout session ready: {}", session.session_id);

    Ok(Json(CreateCheckoutResponse {
        session_id: session.session_id,
        checkout_url: session.checkout_url,
        expires_at: session.expires_at.map(|t| t.to_rfc3339()),
    }))
}

/// Operator status change
#[instrument(skip(state, request), fields(target = %request.target))]
pub async fn admin_transition(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<AdminTransitionRequest>,
) -> Result<Json<Order>, ApiError> {
    state
        .admin
        .transition(order_id, request)
        .await
        .map(Json)
        .map_err(order_error_to_response)
}

/// Webhooks that were acknowledged but not applied
pub async fn list_anomalies(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let anomalies = state.admin.anomalies().await.map_err(order_error_to_response)?;
    Ok(Json(serde_json::json!({
        "count": anomalies.len(),
        "anomalies": anomalies
    })))
}

/// Handle Stripe webhook
///
/// Once the signature verifies, duplicates and contradictory events are
/// acknowledged with 200. Only storage failures and exhausted retries
/// answer 5xx, which makes Stripe redeliver.
#[instrument(skip(state, headers, body))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // Get signature header
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Missing Stripe-Signature header", 400)),
            )
        })?;

    // Verify and parse webhook
    let event = state
        .gateway
        .verify_webhook(&body, signature)
        .await
        .map_err(|e| {
            error!("Webhook verification failed: {}", e);
            order_error_to_response(e)
        })?;

    info!(
        "Received webhook: type={:?}, id={}",
        event.event_type, event.event_id
    );

    let outcome = state.webhooks.process(&event).await.map_err(|e| {
        error!("Webhook processing failed, asking for redelivery: {}", e);
        order_error_to_response(e)
    })?;

    Ok(Json(serde_json::json!({
        "received": true,
        "outcome": outcome.as_str()
    })))
}
