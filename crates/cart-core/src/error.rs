//! # Order Error Types
//!
//! Typed error handling for the order engine.
//! All order, checkout and webhook operations return `Result<T, OrderError>`.

use crate::state::TransitionError;
use crate::store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Core error type for all order operations
#[derive(Debug, Error)]
pub enum OrderError {
    /// Malformed or incomplete order input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced product, shipping method or order does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Illegal status change
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Payment gateway call failed or timed out; the order is unchanged
    #[error("Gateway error [{provider}]: {message}")]
    ExternalGateway { provider: String, message: String },

    /// Webhook replay of an outcome that is already applied
    #[error("Duplicate event {event_id} for order {order_id}")]
    DuplicateEvent { event_id: String, order_id: Uuid },

    /// Webhook contradicts the recorded payment outcome
    #[error("Reconciliation anomaly on order {order_id}: {reason}")]
    ReconciliationAnomaly { order_id: Uuid, reason: String },

    /// The atomic order + items write failed; nothing was persisted
    #[error("Order creation failed: {0}")]
    CreationFailed(String),

    /// Compare-and-set retries exhausted
    #[error("Order {order_id} was modified concurrently, retries exhausted")]
    ConcurrentModification { order_id: Uuid },

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload parsing error
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Configuration errors (missing keys, invalid reference data)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Persistence backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrderError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        OrderError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn gateway(provider: impl Into<String>, message: impl Into<String>) -> Self {
        OrderError::ExternalGateway {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns true if the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderError::ExternalGateway { .. }
                | OrderError::ConcurrentModification { .. }
                | OrderError::Storage(_)
        )
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            OrderError::Validation(_) => 422,
            OrderError::NotFound { .. } => 404,
            OrderError::Transition(_) => 409,
            OrderError::ExternalGateway { .. } => 502,
            OrderError::DuplicateEvent { .. } => 200,
            OrderError::ReconciliationAnomaly { .. } => 200,
            OrderError::CreationFailed(_) => 500,
            OrderError::ConcurrentModification { .. } => 503,
            OrderError::WebhookVerificationFailed(_) => 401,
            OrderError::WebhookParse(_) => 400,
            OrderError::Configuration(_) => 500,
            OrderError::Storage(_) => 500,
            OrderError::Serialization(_) => 500,
            OrderError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => OrderError::not_found("order", id),
            StoreError::VersionConflict { order_id, .. } => {
                OrderError::ConcurrentModification { order_id }
            }
            other => OrderError::Storage(other.to_string()),
        }
    }
}

/// Result type alias for order operations
pub type OrderResult<T> = Result<T, OrderError>;
