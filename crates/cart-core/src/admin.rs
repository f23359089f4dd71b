//! # Admin Transitions
//!
//! Operator-driven fulfillment changes (ship, deliver, cancel, refund). Payment
//! confirmation is never an operator action, so `pending` and `processing`
//! are not accepted as targets.

use crate::error::{OrderError, OrderResult};
use crate::order::Order;
use crate::state::{OrderStatus, PaymentStatus, Transition, TransitionError};
use crate::store::{SharedOrderStore, StoreError};
use crate::webhook::DEFAULT_MAX_RETRIES;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Requested status change
#[derive(Debug, Clone, Deserialize)]
pub struct AdminTransitionRequest {
    pub target: OrderStatus,
    #[serde(default)]
    pub tracking_number: Option<String>,
    /// The refund was already issued at the gateway
    #[serde(default)]
    pub refund_confirmed: bool,
}

impl AdminTransitionRequest {
    pub fn new(target: OrderStatus) -> Self {
        Self {
            target,
            tracking_number: None,
            refund_confirmed: false,
        }
    }

    pub fn with_tracking(mut self, tracking_number: impl Into<String>) -> Self {
        self.tracking_number = Some(tracking_number.into());
        self
    }

    pub fn refund_confirmed(mut self) -> Self {
        self.refund_confirmed = true;
        self
    }
}

#[derive(Clone)]
pub struct AdminService {
    store: SharedOrderStore,
    max_retries: u32,
}

impl AdminService {
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

    /// Move an order to `request.target`, or leave it untouched and explain why not.
    #[instrument(skip(self, request), fields(target = %request.target))]
    pub async fn transition(&self, order_id: Uuid, request: AdminTransitionRequest) -> OrderResult<Order> {
        let tracking_number = request
            .tracking_number
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        if request.target == OrderStatus::Shipped && tracking_number.is_none() {
            return Err(OrderError::Validation(
                "A tracking number is required to ship an order".to_string(),
            ));
        }

        let mut order = self.load(order_id).await?;

        for attempt in 0..=self.max_retries {
            let steps = steps_for(&order, &request, tracking_number.as_deref())?;

            let mut state = order.state;
            for step in &steps {
                state = state.apply(step)?;
            }

            let mut update = order.mutable_part();
            update.state = state;
            if request.target == OrderStatus::Shipped {
                update.tracking_number = tracking_number.clone();
            }

            match self.store.compare_and_set(order.id, order.version, update).await {
                Ok(stored) => {
                    info!(
                        order_number = %stored.order_number,
                        from = %order.state,
                        to = %stored.state,
                        "Admin transition applied"
                    );
                    return Ok(stored);
                }
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(attempt, "Order changed underneath, re-reading");
                    order = self.load(order_id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(OrderError::ConcurrentModification { order_id })
    }

    /// Reconciliation anomalies awaiting review
    pub async fn anomalies(&self) -> OrderResult<Vec<crate::store::ReconciliationAnomaly>> {
        Ok(self.store.anomalies().await?)
    }

    async fn load(&self, order_id: Uuid) -> OrderResult<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or_else(|| OrderError::not_found("order", order_id))
    }
}

/// Transitions, applied in order within one write, that reach the target
fn steps_for(
    order: &Order,
    request: &AdminTransitionRequest,
    tracking_number: Option<&str>,
) -> Result<Vec<Transition>, TransitionError> {
    let steps = match request.target {
        OrderStatus::Pending | OrderStatus::Processing => {
            return Err(TransitionError::status_not_settable(order.state, request.target))
        }
        OrderStatus::Shipped => vec![Transition::Ship {
            tracking_number: tracking_number.unwrap_or_default().to_string(),
        }],
        OrderStatus::Delivered => vec![Transition::Deliver],
        OrderStatus::Cancelled if request.refund_confirmed && order.payment_status() == PaymentStatus::Paid => {
            vec![Transition::CancelWithRefund]
        }
        OrderStatus::Cancelled => vec![Transition::Cancel],
        OrderStatus::Refunded if request.refund_confirmed && order.payment_status() == PaymentStatus::Paid => {
            vec![Transition::RecordRefund, Transition::Refund]
        }
        OrderStatus::Refunded => vec![Transition::Refund],
    };
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::OrderState;
    use crate::store::{InMemoryOrderStore, OrderStore};
    use crate::testing::sample_order;
    use std::sync::Arc;

    async fn setup_with(transitions: &[Transition]) -> (AdminService, Arc<InMemoryOrderStore>, Order) {
        let store = Arc::new(InMemoryOrderStore::new());
        let mut order = store.insert(sample_order("ORD-20261018-CCCC0001")).await.unwrap();

        for transition in transitions {
            let mut update = order.mutable_part();
            update.state = order.state.apply(transition).unwrap();
            order = store.compare_and_set(order.id, order.version, update).await.unwrap();
        }

        (AdminService::new(store.clone()), store, order)
    }

    fn ship() -> Transition {
        Transition::Ship {
            tracking_number: "1Z999AA10123456784".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ship_then_deliver() {
        let (admin, _, order) = setup_with(&[Transition::ConfirmPayment]).await;

        let shipped = admin
            .transition(
                order.id,
                AdminTransitionRequest::new(OrderStatus::Shipped).with_tracking(" 1Z999AA10123456784 "),
            )
            .await
            .unwrap();
        assert_eq!(shipped.status(), OrderStatus::Shipped);
        assert_eq!(shipped.tracking_number.as_deref(), Some("1Z999AA10123456784"));

        let delivered = admin
            .transition(order.id, AdminTransitionRequest::new(OrderStatus::Delivered))
            .await
            .unwrap();
        assert_eq!(delivered.status(), OrderStatus::Delivered);
        assert_eq!(delivered.tracking_number, shipped.tracking_number);
    }

    #[tokio::test]
    async fn test_ship_requires_tracking_number() {
        let (admin, store, order) = setup_with(&[Transition::ConfirmPayment]).await;

        let err = admin
            .transition(
                order.id,
                AdminTransitionRequest::new(OrderStatus::Shipped).with_tracking("   "),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::Validation(_)));
        assert_eq!(store.get(order.id).await.unwrap().unwrap().version, order.version);
    }

    #[tokio::test]
    async fn test_delivered_cannot_go_back_to_processing() {
        let (admin, store, order) =
            setup_with(&[Transition::ConfirmPayment, ship(), Transition::Deliver]).await;

        let err = admin
            .transition(order.id, AdminTransitionRequest::new(OrderStatus::Processing))
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::Transition(_)));
        assert_eq!(err.status_code(), 409);
        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.state, order.state);
        assert_eq!(stored.version, order.version);
    }

    #[tokio::test]
    async fn test_cannot_ship_unpaid_order() {
        let (admin, _, order) = setup_with(&[]).await;

        let err = admin
            .transition(
                order.id,
                AdminTransitionRequest::new(OrderStatus::Shipped).with_tracking("TRK-1"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::Transition(_)));
    }

    #[tokio::test]
    async fn test_cancel_paths() {
        let (admin, _, pending) = setup_with(&[]).await;
        let cancelled = admin
            .transition(pending.id, AdminTransitionRequest::new(OrderStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(cancelled.payment_status(), PaymentStatus::Pending);

        let (admin, _, paid) = setup_with(&[Transition::ConfirmPayment]).await;
        let err = admin
            .transition(paid.id, AdminTransitionRequest::new(OrderStatus::Cancelled))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Transition(_)));

        let cancelled = admin
            .transition(
                paid.id,
                AdminTransitionRequest::new(OrderStatus::Cancelled).refund_confirmed(),
            )
            .await
            .unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(cancelled.payment_status(), PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_refund_records_payment_refund_in_one_write() {
        let (admin, _, order) = setup_with(&[Transition::ConfirmPayment, ship(), Transition::Deliver]).await;

        let err = admin
            .transition(order.id, AdminTransitionRequest::new(OrderStatus::Refunded))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Transition(_)));

        let refunded = admin
            .transition(
                order.id,
                AdminTransitionRequest::new(OrderStatus::Refunded).refund_confirmed(),
            )
            .await
            .unwrap();
        assert_eq!(
            refunded.state,
            OrderState::try_from((OrderStatus::Refunded, PaymentStatus::Refunded)).unwrap()
        );
        assert_eq!(refunded.version, order.version + 1);
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let (admin, _, _) = setup_with(&[]).await;
        let err = admin
            .transition(Uuid::new_v4(), AdminTransitionRequest::new(OrderStatus::Delivered))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
