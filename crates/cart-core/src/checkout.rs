//! # Checkout Session Initiator
//!
//! Hands a pending order to the payment gateway. At most one usable hosted
//! session is attached to an order at a time: an unexpired session is reused
//! without calling the gateway, and a new one is only requested once the
//! previous one expired or is about to.

use crate::error::{OrderError, OrderResult};
use crate::order::{CheckoutSession, Order, OrderUpdate};
use crate::state::OrderState;
use crate::store::{SharedOrderStore, StoreError};
use crate::strategy::{BoxedPaymentStrategy, CheckoutRequest, CheckoutUrls};
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Sessions expiring sooner than this are replaced rather than reused
pub const SESSION_REUSE_MARGIN_SECS: i64 = 60;

pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);

const ATTACH_ATTEMPTS: usize = 3;

/// Caller-supplied redirect targets; absent fields use the storefront defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectTargets {
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

/// Creates or reuses hosted checkout sessions
#[derive(Clone)]
pub struct CheckoutService {
    store: SharedOrderStore,
    gateway: BoxedPaymentStrategy,
    urls: CheckoutUrls,
    timeout: Duration,
}

impl CheckoutService {
    pub fn new(store: SharedOrderStore, gateway: BoxedPaymentStrategy, urls: CheckoutUrls) -> Self {
        Self {
            store,
            gateway,
            urls,
            timeout: DEFAULT_CHECKOUT_TIMEOUT,
        }
    }

    /// Builder: bound on a single gateway call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.gateway.provider_name()
    }

    /// Return a payable session for a `pending/pending` order.
    #[instrument(skip(self, targets), fields(provider = self.gateway.provider_name()))]
    pub async fn create_checkout_session(
        &self,
        order_id: Uuid,
        targets: RedirectTargets,
    ) -> OrderResult<CheckoutSession> {
        let order = self.load(order_id).await?;
        ensure_payable(&order)?;

        if let Some(session) = self.reusable(&order) {
            debug!(session_id = %session.session_id, "Reusing active checkout session");
            return Ok(session);
        }

        let (success_url, cancel_url) = self.resolve_targets(targets, &order.order_number)?;
        let attempt = order.payment.checkout_attempts + 1;
        let request = CheckoutRequest::from_order(&order, success_url, cancel_url, attempt);

        info!(
            order_number = %order.order_number,
            attempt,
            amount = request.amount_total(),
            currency = %request.currency,
            "Requesting checkout session"
        );

        let session = match tokio::time::timeout(self.timeout, self.gateway.create_checkout(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Checkout session request timed out");
                return Err(OrderError::gateway(
                    self.gateway.provider_name(),
                    format!("no response within {}s", self.timeout.as_secs()),
                ));
            }
        };

        self.attach(order, attempt, session).await
    }

    async fn load(&self, order_id: Uuid) -> OrderResult<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or_else(|| OrderError::not_found("order", order_id))
    }

    fn reusable(&self, order: &Order) -> Option<CheckoutSession> {
        order.payment.active_session(
            Utc::now(),
            chrono::Duration::seconds(SESSION_REUSE_MARGIN_SECS),
        )
    }

    fn resolve_targets(
        &self,
        targets: RedirectTargets,
        order_number: &str,
    ) -> OrderResult<(String, String)> {
        let success = targets.success_url.unwrap_or_else(|| self.urls.success_url());
        let cancel = targets.cancel_url.unwrap_or_else(|| self.urls.cancel_url());

        for url in [&success, &cancel] {
            if !self.urls.is_allowed(url) {
                return Err(OrderError::Validation(format!(
                    "Redirect target must stay on {}: {url}",
                    self.urls.base_url
                )));
            }
        }

        Ok((CheckoutUrls::with_query(&success, "order", order_number), cancel))
    }

    /// Store the session reference. On a version conflict the order is
    /// re-read: a session attached by a concurrent handler wins.
    async fn attach(
        &self,
        mut order: Order,
        attempt: u32,
        session: CheckoutSession,
    ) -> OrderResult<CheckoutSession> {
        for _ in 0..ATTACH_ATTEMPTS {
            let mut update: OrderUpdate = order.mutable_part();
            update.payment.provider = Some(session.provider.clone());
            update.payment.session_id = Some(session.session_id.clone());
            update.payment.checkout_url = Some(session.checkout_url.clone());
            update.payment.session_expires_at = session.expires_at;
            update.payment.session_expired = false;
            update.payment.checkout_attempts = update.payment.checkout_attempts.max(attempt);
            if session.payment_intent_id.is_some() {
                update.payment.payment_intent_id = session.payment_intent_id.clone();
            }

            match self.store.compare_and_set(order.id, order.version, update).await {
                Ok(stored) => {
                    info!(
                        order_number = %stored.order_number,
                        session_id = %session.session_id,
                        "Checkout session attached"
                    );
                    return Ok(session);
                }
                Err(StoreError::VersionConflict { .. }) => {
                    order = self.load(order.id).await?;
                    // Paid or cancelled in the meantime: its session must not be handed out
                    ensure_payable(&order)?;
                    if let Some(active) = self.reusable(&order) {
                        debug!(session_id = %active.session_id, "Concurrent checkout attached a session first");
                        return Ok(active);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(OrderError::ConcurrentModification { order_id: order.id })
    }
}

fn ensure_payable(order: &Order) -> OrderResult<()> {
    if order.state != OrderState::new() {
        return Err(OrderError::Validation(format!(
            "Order {} is {} and cannot be paid",
            order.order_number, order.state
        )));
    }
    Ok(())
}
