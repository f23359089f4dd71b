//! # Payment Webhook Processor
//!
//! Applies verified gateway events to orders. Every event resolves to one of
//! a handful of outcomes, and every outcome except a storage failure is
//! acknowledged to the gateway:
//!
//! | Event       | Order state             | Outcome                          |
//! |-------------|-------------------------|----------------------------------|
//! | succeeded   | pending/pending         | processing/paid                  |
//! | succeeded   | pending, amount differs | anomaly                          |
//! | succeeded   | payment paid/refunded   | duplicate                        |
//! | succeeded   | cancelled, unpaid       | anomaly (captured for cancelled) |
//! | failed      | pending/pending         | cancelled/failed                 |
//! | failed      | cancelled, unpaid       | duplicate                        |
//! | failed      | payment paid/refunded   | anomaly                          |
//! | refunded    | payment paid            | payment refunded                 |
//! | refunded    | payment refunded        | duplicate                        |
//! | expired     | pending, same session   | session marked expired           |
//!
//! Writes are a single compare-and-set per attempt. A version conflict means
//! another handler got there first: the order is re-read and the decision is
//! recomputed against the newer state.

use crate::error::{OrderError, OrderResult};
use crate::order::{Order, OrderUpdate, WebhookEvent, WebhookEventType};
use crate::state::{OrderState, OrderStatus, PaymentStatus, Transition};
use crate::store::{ReconciliationAnomaly, SharedOrderStore, StoreError};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_RETRIES: u32 = 8;

/// What processing an event did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookDisposition {
    /// The event changed the order
    Applied { order_id: Uuid, state: OrderState },
    /// Already reflected in the order; nothing written
    Duplicate { order_id: Uuid },
    /// No order carries the event's gateway reference
    UnknownOrder,
    /// Contradicts the order; recorded for review, not applied
    Anomaly { order_id: Uuid },
    /// Event type the engine does not act on
    Ignored,
}

impl WebhookDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookDisposition::Applied { .. } => "applied",
            WebhookDisposition::Duplicate { .. } => "duplicate",
            WebhookDisposition::UnknownOrder => "unknown_order",
            WebhookDisposition::Anomaly { .. } => "anomaly",
            WebhookDisposition::Ignored => "ignored",
        }
    }
}

/// Reconciles gateway events with stored orders
#[derive(Clone)]
pub struct WebhookProcessor {
    store: SharedOrderStore,
    max_retries: u32,
}

impl WebhookProcessor {
    pub fn new(store: SharedOrderStore) -> Self {
        Self {
            store,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Apply one verified event.
    ///
    /// Duplicates and contradictions are absorbed into the returned
    /// disposition. Errors are storage failures or exhausted retries, both
    /// of which should make the gateway redeliver.
    #[instrument(skip(self, event), fields(event_id = %event.event_id, event_type = ?event.event_type))]
    pub async fn process(&self, event: &WebhookEvent) -> OrderResult<WebhookDisposition> {
        if let WebhookEventType::Unknown(kind) = &event.event_type {
            debug!(kind = %kind, "Ignoring unhandled event type");
            return Ok(WebhookDisposition::Ignored);
        }

        let Some(mut order) = self.locate(event).await? else {
            warn!(
                payment_intent = ?event.payment_intent_id,
                session = ?event.session_id,
                "Event references no known order"
            );
            self.record(event, None, "no order matches the payment reference")
                .await?;
            return Ok(WebhookDisposition::UnknownOrder);
        };

        for attempt in 0..=self.max_retries {
            let update = match plan(&order, event) {
                Ok(update) => update,
                Err(OrderError::DuplicateEvent { order_id, .. }) => {
                    info!(order_number = %order.order_number, state = %order.state, "Duplicate event, nothing to do");
                    return Ok(WebhookDisposition::Duplicate { order_id });
                }
                Err(OrderError::ReconciliationAnomaly { order_id, reason }) => {
                    warn!(order_number = %order.order_number, state = %order.state, reason = %reason, "Reconciliation anomaly");
                    self.record(event, Some(&order), &reason).await?;
                    return Ok(WebhookDisposition::Anomaly { order_id });
                }
                Err(e) => return Err(e),
            };

            match self.store.compare_and_set(order.id, order.version, update).await {
                Ok(stored) => {
                    info!(
                        order_number = %stored.order_number,
                        from = %order.state,
                        to = %stored.state,
                        "Webhook applied"
                    );
                    return Ok(WebhookDisposition::Applied {
                        order_id: stored.id,
                        state: stored.state,
                    });
                }
                Err(StoreError::VersionConflict { actual, .. }) => {
                    debug!(attempt, actual, "Order changed underneath, re-reading");
                    order = self
                        .store
                        .get(order.id)
                        .await?
                        .ok_or_else(|| OrderError::not_found("order", order.id))?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(order_id = %order.id, retries = self.max_retries, "Giving up after repeated version conflicts");
        Err(OrderError::ConcurrentModification { order_id: order.id })
    }

    /// Look the order up by payment intent first, then by session
    async fn locate(&self, event: &WebhookEvent) -> OrderResult<Option<Order>> {
        let references = [&event.payment_intent_id, &event.session_id];
        for reference in references.into_iter().flatten() {
            if let Some(order) = self.store.find_by_payment_reference(reference).await? {
                return Ok(Some(order));
            }
        }
        Ok(None)
    }

    async fn record(&self, event: &WebhookEvent, order: Option<&Order>, reason: &str) -> OrderResult<()> {
        let anomaly = ReconciliationAnomaly {
            id: Uuid::new_v4(),
            order_id: order.map(|o| o.id),
            event_id: event.event_id.clone(),
            event_type: event_type_name(&event.event_type).to_string(),
            payment_reference: event
                .payment_intent_id
                .clone()
                .or_else(|| event.session_id.clone()),
            observed_state: order.map(|o| o.state),
            reason: reason.to_string(),
            recorded_at: Utc::now(),
        };
        self.store.record_anomaly(anomaly).await?;
        Ok(())
    }
}

fn event_type_name(event_type: &WebhookEventType) -> &str {
    match event_type {
        WebhookEventType::PaymentSucceeded => "payment_succeeded",
        WebhookEventType::PaymentFailed => "payment_failed",
        WebhookEventType::RefundIssued => "refund_issued",
        WebhookEventType::SessionExpired => "session_expired",
        WebhookEventType::Unknown(kind) => kind,
    }
}

/// Decide what `event` does to `order`, without touching the store
fn plan(order: &Order, event: &WebhookEvent) -> OrderResult<OrderUpdate> {
    let duplicate = || OrderError::DuplicateEvent {
        event_id: event.event_id.clone(),
        order_id: order.id,
    };
    let anomaly = |reason: &str| OrderError::ReconciliationAnomaly {
        order_id: order.id,
        reason: reason.to_string(),
    };

    let mut update = order.mutable_part();

    match &event.event_type {
        WebhookEventType::PaymentSucceeded => match order.payment_status() {
            PaymentStatus::Paid | PaymentStatus::Refunded => return Err(duplicate()),
            PaymentStatus::Failed => {
                return Err(anomaly("payment captured after the gateway reported it failed"))
            }
            PaymentStatus::Pending if order.status() == OrderStatus::Cancelled => {
                return Err(anomaly("payment captured for a cancelled order"))
            }
            PaymentStatus::Pending => {
                if let Some(reason) = charge_mismatch(order, event) {
                    return Err(anomaly(&reason));
                }
                update.state = transition(order, &Transition::ConfirmPayment, &anomaly)?;
                if let Some(intent) = &event.payment_intent_id {
                    update.payment.payment_intent_id = Some(intent.clone());
                }
            }
        },

        WebhookEventType::PaymentFailed => match order.payment_status() {
            PaymentStatus::Paid | PaymentStatus::Refunded => {
                return Err(anomaly("payment failure reported after payment was confirmed"))
            }
            _ if order.status() == OrderStatus::Cancelled => return Err(duplicate()),
            _ => {
                update.state = transition(order, &Transition::FailPayment, &anomaly)?;
            }
        },

        WebhookEventType::RefundIssued => match order.payment_status() {
            PaymentStatus::Paid => {
                update.state = transition(order, &Transition::RecordRefund, &anomaly)?;
            }
            PaymentStatus::Refunded => return Err(duplicate()),
            _ => return Err(anomaly("refund reported for an order that was never paid")),
        },

        WebhookEventType::SessionExpired => {
            let same_session = event.session_id.is_some() && event.session_id == order.payment.session_id;
            if order.state != OrderState::new() || !same_session || order.payment.session_expired {
                return Err(duplicate());
            }
            update.payment.session_expired = true;
        }

        WebhookEventType::Unknown(_) => return Err(duplicate()),
    }

    Ok(update)
}

/// Why the captured charge differs from the order, if it does.
/// Events that carry no amount or currency are taken at face value.
fn charge_mismatch(order: &Order, event: &WebhookEvent) -> Option<String> {
    let totals = &order.totals;
    if let Some(currency) = event.currency {
        if currency != totals.currency {
            return Some(format!(
                "gateway charged in {currency}, order is priced in {}",
                totals.currency
            ));
        }
    }
    match event.amount {
        Some(amount) if amount != totals.total => Some(format!(
            "gateway charged {amount}, order total is {} ({})",
            totals.total, totals.currency
        )),
        _ => None,
    }
}

fn transition(
    order: &Order,
    transition: &Transition,
    anomaly: &dyn Fn(&str) -> OrderError,
) -> OrderResult<OrderState> {
    order
        .state
        .apply(transition)
        .map_err(|e| anomaly(&e.to_string()))
}
