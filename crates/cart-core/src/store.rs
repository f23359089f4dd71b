//! # Order Store
//!
//! Persistence seam for orders. The only coordination point between
//! concurrently running handlers: writes after creation are compare-and-set
//! on the order `version`, so a handler that read a stale
//! `(status, payment_status)` can never overwrite a newer state.
//!
//! [`InMemoryOrderStore`] keeps orders and items in separate tables behind a
//! single lock and serves tests and local runs. The durable backend is
//! `SqliteOrderStore` behind the `sqlite` feature.

use crate::order::{Order, OrderItem, OrderUpdate};
use crate::state::OrderState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Store-level failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Order number already taken: {0}")]
    DuplicateOrderNumber(String),

    #[error("Order id already exists: {0}")]
    DuplicateOrderId(Uuid),

    #[error("Order not found: {0}")]
    NotFound(Uuid),

    /// The order changed since it was read
    #[error("Version conflict on order {order_id}: expected {expected}, found {actual}")]
    VersionConflict {
        order_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// A webhook that was acknowledged but not applied, kept for manual review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationAnomaly {
    pub id: Uuid,
    /// `None` when the gateway reference matched no order
    pub order_id: Option<Uuid>,
    pub event_id: String,
    pub event_type: String,
    pub payment_reference: Option<String>,
    /// Order state when the event arrived
    pub observed_state: Option<OrderState>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Order persistence
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order and its items as one unit.
    ///
    /// Fails with [`StoreError::DuplicateOrderNumber`] without writing
    /// anything when the order number is taken.
    async fn insert(&self, order: Order) -> Result<Order, StoreError>;

    /// Read an order with its items
    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Find an order by an opaque gateway reference (session or payment intent id)
    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, StoreError>;

    /// Write `update` only if the stored version still equals
    /// `expected_version`. Returns the order as stored after the write.
    async fn compare_and_set(
        &self,
        id: Uuid,
        expected_version: u64,
        update: OrderUpdate,
    ) -> Result<Order, StoreError>;

    async fn record_anomaly(&self, anomaly: ReconciliationAnomaly) -> Result<(), StoreError>;

    async fn anomalies(&self) -> Result<Vec<ReconciliationAnomaly>, StoreError>;
}

/// Type alias for a shared store
pub type SharedOrderStore = Arc<dyn OrderStore>;

#[derive(Default)]
struct Tables {
    /// Order rows, stored without items
    orders: HashMap<Uuid, Order>,
    /// Item rows keyed by parent order id
    items: HashMap<Uuid, Vec<OrderItem>>,
    order_numbers: HashMap<String, Uuid>,
    payment_refs: HashMap<String, Uuid>,
    anomalies: Vec<ReconciliationAnomaly>,
}

impl Tables {
    fn assemble(&self, id: Uuid) -> Option<Order> {
        let mut order = self.orders.get(&id)?.clone();
        order.items = self.items.get(&id).cloned().unwrap_or_default();
        Some(order)
    }
}

/// In-process order store
#[derive(Default)]
pub struct InMemoryOrderStore {
    tables: RwLock<Tables>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedOrderStore {
        Arc::new(Self::new())
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, mut order: Order) -> Result<Order, StoreError> {
        let mut tables = self.tables.write().await;

        if tables.order_numbers.contains_key(&order.order_number) {
            return Err(StoreError::DuplicateOrderNumber(order.order_number));
        }
        if tables.orders.contains_key(&order.id) {
            return Err(StoreError::DuplicateOrderId(order.id));
        }

        let id = order.id;
        let items = std::mem::take(&mut order.items);
        tables.order_numbers.insert(order.order_number.clone(), id);
        for key in order.payment.lookup_keys() {
            tables.payment_refs.insert(key.to_string(), id);
        }
        tables.items.insert(id, items);
        tables.orders.insert(id, order);

        tables
            .assemble(id)
            .ok_or_else(|| StoreError::Backend(format!("order {id} vanished during insert")))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.tables.read().await.assemble(id))
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .payment_refs
            .get(reference)
            .and_then(|id| tables.assemble(*id)))
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expected_version: u64,
        update: OrderUpdate,
    ) -> Result<Order, StoreError> {
        let mut tables = self.tables.write().await;

        let stored = tables.orders.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                order_id: id,
                expected: expected_version,
                actual: stored.version,
            });
        }

        stored.state = update.state;
        stored.tracking_number = update.tracking_number;
        stored.payment = update.payment;
        stored.version += 1;
        stored.updated_at = Utc::now();

        let keys: Vec<String> = stored.payment.lookup_keys().map(str::to_string).collect();
        for key in keys {
            tables.payment_refs.insert(key, id);
        }

        tables
            .assemble(id)
            .ok_or_else(|| StoreError::Backend(format!("order {id} vanished during update")))
    }

    async fn record_anomaly(&self, anomaly: ReconciliationAnomaly) -> Result<(), StoreError> {
        self.tables.write().await.anomalies.push(anomaly);
        Ok(())
    }

    async fn anomalies(&self) -> Result<Vec<ReconciliationAnomaly>, StoreError> {
        Ok(self.tables.read().await.anomalies.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Transition;
    use crate::testing::sample_order;

    #[tokio::test]
    async fn test_insert_and_get_returns_items() {
        let store = InMemoryOrderStore::new();
        let order = sample_order("ORD-1");
        let id = order.id;

        let stored = store.insert(order).await.unwrap();
        assert_eq!(stored.items.len(), 1);

        let read = store.get(id).await.unwrap().unwrap();
        assert_eq!(read.items, stored.items);
        assert_eq!(read.items[0].order_id, id);
    }

    #[tokio::test]
    async fn test_duplicate_order_number_writes_nothing() {
        let store = InMemoryOrderStore::new();
        store.insert(sample_order("ORD-1")).await.unwrap();

        let clash = sample_order("ORD-1");
        let clash_id = clash.id;
        let err = store.insert(clash).await.unwrap_err();

        assert!(matches!(err, StoreError::DuplicateOrderNumber(_)));
        assert!(store.get(clash_id).await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_compare_and_set_rejects_stale_version() {
        let store = InMemoryOrderStore::new();
        let order = store.insert(sample_order("ORD-1")).await.unwrap();

        let mut paid = order.mutable_part();
        paid.state = order.state.apply(&Transition::ConfirmPayment).unwrap();
        let updated = store.compare_and_set(order.id, order.version, paid).await.unwrap();
        assert_eq!(updated.version, order.version + 1);

        let mut failed = order.mutable_part();
        failed.state = order.state.apply(&Transition::FailPayment).unwrap();
        let err = store
            .compare_and_set(order.id, order.version, failed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let current = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(current.state, updated.state);
    }

    #[tokio::test]
    async fn test_payment_reference_index_follows_updates() {
        let store = InMemoryOrderStore::new();
        let order = store.insert(sample_order("ORD-1")).await.unwrap();
        assert!(store.find_by_payment_reference("cs_test_1").await.unwrap().is_none());

        let mut update = order.mutable_part();
        update.payment.session_id = Some("cs_test_1".to_string());
        store.compare_and_set(order.id, order.version, update).await.unwrap();

        let found = store.find_by_payment_reference("cs_test_1").await.unwrap().unwrap();
        assert_eq!(found.id, order.id);
        assert_eq!(found.items.len(), 1);
    }
}
