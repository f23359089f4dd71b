//! # Order State Machine
//!
//! An order's state is the pair `(status, payment_status)`. Only the pairs
//! reachable through [`TRANSITIONS`] from `pending/pending` are representable:
//! [`OrderState`] has private fields and is produced by [`OrderState::new`],
//! [`OrderState::apply`], or the checked `TryFrom` conversion.
//!
//! ```text
//!  pending/pending ──ConfirmPayment──▶ processing/paid ──Ship──▶ shipped/paid ──Deliver──▶ delivered/paid
//!        │   │                              │                        │                         │
//!        │   └─Cancel─▶ cancelled/pending   └──── RecordRefund ──────┴───────────┬─────────────┘
//!        │                                                                       ▼
//!        └─FailPayment─▶ cancelled/failed                        {processing,shipped,delivered}/refunded
//!                                                                                │ Refund
//!                                                                                ▼
//!                                                                         refunded/refunded
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fulfillment status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Delivered, cancelled and refunded end the fulfillment lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Payment status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// A state change request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Gateway confirmed the payment
    ConfirmPayment,
    /// Gateway reported the payment failed
    FailPayment,
    /// Admin: hand the parcel to the carrier
    Ship { tracking_number: String },
    /// Admin: carrier confirmed delivery
    Deliver,
    /// Cancel an order with nothing (left) to refund
    Cancel,
    /// Admin: cancel a paid order together with its gateway-side refund
    CancelWithRefund,
    /// The gateway refunded the payment
    RecordRefund,
    /// Close out an order whose payment has been refunded
    Refund,
}

impl Transition {
    pub fn kind(&self) -> TransitionKind {
        match self {
            Transition::ConfirmPayment => TransitionKind::ConfirmPayment,
            Transition::FailPayment => TransitionKind::FailPayment,
            Transition::Ship { .. } => TransitionKind::Ship,
            Transition::Deliver => TransitionKind::Deliver,
            Transition::Cancel => TransitionKind::Cancel,
            Transition::CancelWithRefund => TransitionKind::CancelWithRefund,
            Transition::RecordRefund => TransitionKind::RecordRefund,
            Transition::Refund => TransitionKind::Refund,
        }
    }
}

/// Data-free discriminant of [`Transition`], used as the table key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    ConfirmPayment,
    FailPayment,
    Ship,
    Deliver,
    Cancel,
    CancelWithRefund,
    RecordRefund,
    Refund,
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Rejected state change; the order state is unchanged
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal transition from {from}: {reason}")]
pub struct TransitionError {
    pub from: OrderState,
    /// `None` when no transition leads to the requested status at all
    pub transition: Option<TransitionKind>,
    pub reason: String,
}

impl TransitionError {
    /// An operator asked for a status only the system may set
    pub fn status_not_settable(from: OrderState, target: OrderStatus) -> Self {
        Self {
            from,
            transition: None,
            reason: format!("{target} cannot be set by an operator"),
        }
    }
}

/// Checked `(status, payment_status)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawOrderState")]
pub struct OrderState {
    status: OrderStatus,
    payment_status: PaymentStatus,
}

const fn st(status: OrderStatus, payment_status: PaymentStatus) -> OrderState {
    OrderState {
        status,
        payment_status,
    }
}

use OrderStatus as S;
use PaymentStatus as P;
use TransitionKind as T;

/// Every legal transition. Anything not listed is rejected.
pub const TRANSITIONS: &[(OrderState, TransitionKind, OrderState)] = &[
    (st(S::Pending, P::Pending), T::ConfirmPayment, st(S::Processing, P::Paid)),
    (st(S::Pending, P::Pending), T::FailPayment, st(S::Cancelled, P::Failed)),
    (st(S::Pending, P::Pending), T::Cancel, st(S::Cancelled, P::Pending)),
    (st(S::Processing, P::Paid), T::Ship, st(S::Shipped, P::Paid)),
    (st(S::Shipped, P::Paid), T::Deliver, st(S::Delivered, P::Paid)),
    (st(S::Processing, P::Paid), T::CancelWithRefund, st(S::Cancelled, P::Refunded)),
    (st(S::Shipped, P::Paid), T::CancelWithRefund, st(S::Cancelled, P::Refunded)),
    (st(S::Processing, P::Refunded), T::Cancel, st(S::Cancelled, P::Refunded)),
    (st(S::Shipped, P::Refunded), T::Cancel, st(S::Cancelled, P::Refunded)),
    (st(S::Processing, P::Paid), T::RecordRefund, st(S::Processing, P::Refunded)),
    (st(S::Shipped, P::Paid), T::RecordRefund, st(S::Shipped, P::Refunded)),
    (st(S::Delivered, P::Paid), T::RecordRefund, st(S::Delivered, P::Refunded)),
    (st(S::Processing, P::Refunded), T::Refund, st(S::Refunded, P::Refunded)),
    (st(S::Shipped, P::Refunded), T::Refund, st(S::Refunded, P::Refunded)),
    (st(S::Delivered, P::Refunded), T::Refund, st(S::Refunded, P::Refunded)),
];

impl OrderState {
    /// State of a freshly created order
    pub const fn new() -> Self {
        st(OrderStatus::Pending, PaymentStatus::Pending)
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    /// Whether this pair is reachable from `pending/pending`
    pub fn is_legal(status: OrderStatus, payment_status: PaymentStatus) -> bool {
        let state = st(status, payment_status);
        state == OrderState::new() || TRANSITIONS.iter().any(|(_, _, to)| *to == state)
    }

    /// No transition leaves this state
    pub fn is_final(&self) -> bool {
        !TRANSITIONS.iter().any(|(from, _, _)| from == self)
    }

    /// Transitions that may be applied from this state
    pub fn allowed(&self) -> Vec<TransitionKind> {
        TRANSITIONS
            .iter()
            .filter(|(from, _, _)| from == self)
            .map(|(_, kind, _)| *kind)
            .collect()
    }

    /// Compute the next state, or explain why the transition is illegal.
    ///
    /// Never mutates `self`.
    pub fn apply(&self, transition: &Transition) -> Result<OrderState, TransitionError> {
        let kind = transition.kind();

        if let Transition::Ship { tracking_number } = transition {
            if tracking_number.trim().is_empty() {
                return Err(self.reject(kind, "shipping requires a tracking number"));
            }
        }

        TRANSITIONS
            .iter()
            .find(|(from, k, _)| from == self && *k == kind)
            .map(|(_, _, to)| *to)
            .ok_or_else(|| {
                let reason = if self.is_final() {
                    format!("{} is a final state", self)
                } else {
                    format!("allowed from {}: {:?}", self, self.allowed())
                };
                self.reject(kind, reason)
            })
    }

    fn reject(&self, transition: TransitionKind, reason: impl Into<String>) -> TransitionError {
        TransitionError {
            from: *self,
            transition: Some(transition),
            reason: format!("{transition} rejected, {}", reason.into()),
        }
    }
}

impl Default for OrderState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.status, self.payment_status)
    }
}

/// Unchecked wire form of [`OrderState`]
#[derive(Debug, Deserialize)]
struct RawOrderState {
    status: OrderStatus,
    payment_status: PaymentStatus,
}

impl TryFrom<RawOrderState> for OrderState {
    type Error = String;

    fn try_from(raw: RawOrderState) -> Result<Self, Self::Error> {
        OrderState::try_from((raw.status, raw.payment_status))
    }
}

impl TryFrom<(OrderStatus, PaymentStatus)> for OrderState {
    type Error = String;

    fn try_from((status, payment_status): (OrderStatus, PaymentStatus)) -> Result<Self, Self::Error> {
        if OrderState::is_legal(status, payment_status) {
            Ok(st(status, payment_status))
        } else {
            Err(format!("unreachable order state {status}/{payment_status}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ship() -> Transition {
        Transition::Ship {
            tracking_number: "1Z999AA10123456784".to_string(),
        }
    }

    fn delivered() -> OrderState {
        OrderState::new()
            .apply(&Transition::ConfirmPayment)
            .and_then(|s| s.apply(&ship()))
            .and_then(|s| s.apply(&Transition::Deliver))
            .unwrap()
    }

    #[test]
    fn test_happy_path() {
        let paid = OrderState::new().apply(&Transition::ConfirmPayment).unwrap();
        assert_eq!(paid.status(), OrderStatus::Processing);
        assert_eq!(paid.payment_status(), PaymentStatus::Paid);

        let state = delivered();
        assert_eq!(state.status(), OrderStatus::Delivered);
        assert_eq!(state.payment_status(), PaymentStatus::Paid);
    }

    #[test]
    fn test_failed_payment_cancels() {
        let state = OrderState::new().apply(&Transition::FailPayment).unwrap();
        assert_eq!(state.to_string(), "cancelled/failed");
        assert!(state.is_final());
    }

    #[test]
    fn test_delivered_cannot_go_back_to_processing() {
        let state = delivered();
        let err = state.apply(&Transition::ConfirmPayment).unwrap_err();
        assert_eq!(err.from, state);
        assert_eq!(err.transition, Some(TransitionKind::ConfirmPayment));
    }

    #[test]
    fn test_ship_requires_tracking_number() {
        let paid = OrderState::new().apply(&Transition::ConfirmPayment).unwrap();
        let err = paid
            .apply(&Transition::Ship {
                tracking_number: "  ".to_string(),
            })
            .unwrap_err();
        assert!(err.reason.contains("tracking"));
    }

    #[test]
    fn test_cancel_of_paid_order_requires_refund() {
        let paid = OrderState::new().apply(&Transition::ConfirmPayment).unwrap();
        assert!(paid.apply(&Transition::Cancel).is_err());

        let cancelled = paid.apply(&Transition::CancelWithRefund).unwrap();
        assert_eq!(cancelled.to_string(), "cancelled/refunded");
    }

    #[test]
    fn test_refund_requires_payment_refunded_first() {
        let state = delivered();
        assert!(state.apply(&Transition::Refund).is_err());

        let refunded = state
            .apply(&Transition::RecordRefund)
            .and_then(|s| s.apply(&Transition::Refund))
            .unwrap();
        assert_eq!(refunded.to_string(), "refunded/refunded");
        assert!(refunded.is_final());
    }

    #[test]
    fn test_cancelled_and_refunded_are_final() {
        for state in TRANSITIONS.iter().map(|(_, _, to)| *to) {
            if matches!(state.status(), OrderStatus::Cancelled | OrderStatus::Refunded) {
                assert!(state.is_final(), "{state} should be final");
            }
        }
    }

    #[test]
    fn test_no_reachable_state_is_fulfilling_with_failed_payment() {
        for status in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
            assert!(!OrderState::is_legal(status, PaymentStatus::Failed));
        }
    }

    #[test]
    fn test_table_targets_are_legal_and_sources_reachable() {
        for (from, _, to) in TRANSITIONS {
            assert!(OrderState::is_legal(from.status(), from.payment_status()));
            assert!(OrderState::is_legal(to.status(), to.payment_status()));
        }
    }

    #[test]
    fn test_deserialize_rejects_illegal_pair() {
        let ok: OrderState =
            serde_json::from_str(r#"{"status":"processing","payment_status":"paid"}"#).unwrap();
        assert_eq!(ok.status(), OrderStatus::Processing);

        let bad = serde_json::from_str::<OrderState>(r#"{"status":"shipped","payment_status":"failed"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_serializes_flat_fields() {
        let json = serde_json::to_value(OrderState::new()).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["payment_status"], "pending");
    }
}
