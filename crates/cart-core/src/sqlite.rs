//! # SQLite Order Store
//!
//! Durable [`OrderStore`] on SQLite through `sqlx`.
//!
//! Orders and their items live in two tables and are written in one
//! transaction. Updates are a single `UPDATE ... WHERE id = ? AND version = ?`
//! whose affected-row count decides between success and a version conflict,
//! so concurrent writers are serialized by the database rather than by the
//! process. Gateway references and reconciliation anomalies get their own
//! tables so a restart loses neither.

use crate::order::{Order, OrderItem, OrderTotals, OrderUpdate};
use crate::product::{Currency, Price};
use crate::state::{OrderState, OrderStatus, PaymentStatus};
use crate::store::{OrderStore, ReconciliationAnomaly, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const CREATE_ORDERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY NOT NULL,
    order_number TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    payment_status TEXT NOT NULL,
    currency TEXT NOT NULL,
    subtotal INTEGER NOT NULL,
    tax INTEGER NOT NULL,
    shipping INTEGER NOT NULL,
    discount INTEGER NOT NULL,
    total INTEGER NOT NULL,
    pricing TEXT NOT NULL,
    shipping_method_id TEXT NOT NULL,
    shipping_address TEXT NOT NULL,
    billing_address TEXT NOT NULL,
    tracking_number TEXT,
    payment TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

const CREATE_ORDER_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS order_items (
    id TEXT PRIMARY KEY NOT NULL,
    order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    product_id TEXT NOT NULL,
    name TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    unit_amount INTEGER NOT NULL,
    line_total INTEGER NOT NULL,
    currency TEXT NOT NULL
)
"#;

const CREATE_ORDER_ITEMS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items (order_id, position)";

const CREATE_PAYMENT_REFERENCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payment_references (
    reference TEXT PRIMARY KEY NOT NULL,
    order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE
)
"#;

const CREATE_ANOMALIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS reconciliation_anomalies (
    id TEXT PRIMARY KEY NOT NULL,
    order_id TEXT,
    event_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payment_reference TEXT,
    observed_status TEXT,
    observed_payment_status TEXT,
    reason TEXT NOT NULL,
    recorded_at TEXT NOT NULL
)
"#;

const SCHEMA: [&str; 5] = [
    CREATE_ORDERS_TABLE,
    CREATE_ORDER_ITEMS_TABLE,
    CREATE_ORDER_ITEMS_INDEX,
    CREATE_PAYMENT_REFERENCES_TABLE,
    CREATE_ANOMALIES_TABLE,
];

const UPSERT_PAYMENT_REFERENCE: &str = "INSERT INTO payment_references (reference, order_id) VALUES (?, ?) \
     ON CONFLICT(reference) DO UPDATE SET order_id = excluded.order_id";

/// SQLite implementation of [`OrderStore`]
#[derive(Clone)]
pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    /// Wrap an existing pool. Call [`SqliteOrderStore::init`] before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and apply the schema.
    ///
    /// `url` is a sqlx SQLite URL such as `sqlite://data/orders.db`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(db)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(db)?;

        let store = Self::new(pool);
        store.init().await?;
        info!(url, "SQLite order store ready");
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    ///
    /// Limited to one connection that never recycles, since every SQLite
    /// connection to `:memory:` sees its own empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(db)?;

        let store = Self::new(pool);
        store.init().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist
    pub async fn init(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await.map_err(db)?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn insert(&self, order: Order) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        sqlx::query(
            "INSERT INTO orders (id, order_number, status, payment_status, currency, subtotal, tax, \
             shipping, discount, total, pricing, shipping_method_id, shipping_address, \
             billing_address, tracking_number, payment, version, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(order.id.to_string())
        .bind(&order.order_number)
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.totals.currency.as_str())
        .bind(order.totals.subtotal)
        .bind(order.totals.tax)
        .bind(order.totals.shipping)
        .bind(order.totals.discount)
        .bind(order.totals.total)
        .bind(to_json(&order.pricing)?)
        .bind(&order.shipping_method_id)
        .bind(to_json(&order.shipping_address)?)
        .bind(to_json(&order.billing_address)?)
        .bind(&order.tracking_number)
        .bind(to_json(&order.payment)?)
        .bind(version_column(order.version)?)
        .bind(order.created_at.to_rfc3339())
        .bind(order.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| insert_error(e, &order))?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, position, product_id, name, quantity, \
                 unit_amount, line_total, currency) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(item.id.to_string())
            .bind(order.id.to_string())
            .bind(position as i64)
            .bind(&item.product_id)
            .bind(&item.name)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.amount)
            .bind(item.line_total.amount)
            .bind(item.unit_price.currency.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        for reference in order.payment.lookup_keys() {
            sqlx::query(UPSERT_PAYMENT_REFERENCE)
                .bind(reference)
                .bind(order.id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(db)?;
        }

        let stored = load_order(&mut tx, order.id)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("order {} vanished during insert", order.id)))?;
        tx.commit().await.map_err(db)?;

        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        load_order(&mut conn, id).await
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;

        let order_id: Option<String> =
            sqlx::query_scalar("SELECT order_id FROM payment_references WHERE reference = ?")
                .bind(reference)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db)?;

        match order_id {
            Some(order_id) => load_order(&mut conn, parse_uuid("order_id", &order_id)?).await,
            None => Ok(None),
        }
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expected_version: u64,
        update: OrderUpdate,
    ) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let result = sqlx::query(
            "UPDATE orders SET status = ?, payment_status = ?, tracking_number = ?, payment = ?, \
             version = version + 1, updated_at = ? WHERE id = ? AND version = ?",
        )
        .bind(update.state.status().as_str())
        .bind(update.state.payment_status().as_str())
        .bind(&update.tracking_number)
        .bind(to_json(&update.payment)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(version_column(expected_version)?)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db)?;
            tx.rollback().await.map_err(db)?;

            return Err(match actual {
                None => StoreError::NotFound(id),
                Some(actual) => StoreError::VersionConflict {
                    order_id: id,
                    expected: expected_version,
                    actual: version_value(actual)?,
                },
            });
        }

        for reference in update.payment.lookup_keys() {
            sqlx::query(UPSERT_PAYMENT_REFERENCE)
                .bind(reference)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(db)?;
        }

        let stored = load_order(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("order {id} vanished during update")))?;
        tx.commit().await.map_err(db)?;

        Ok(stored)
    }

    async fn record_anomaly(&self, anomaly: ReconciliationAnomaly) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reconciliation_anomalies (id, order_id, event_id, event_type, \
             payment_reference, observed_status, observed_payment_status, reason, recorded_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(anomaly.id.to_string())
        .bind(anomaly.order_id.map(|id| id.to_string()))
        .bind(&anomaly.event_id)
        .bind(&anomaly.event_type)
        .bind(&anomaly.payment_reference)
        .bind(anomaly.observed_state.map(|s| s.status().as_str()))
        .bind(anomaly.observed_state.map(|s| s.payment_status().as_str()))
        .bind(&anomaly.reason)
        .bind(anomaly.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        Ok(())
    }

    async fn anomalies(&self) -> Result<Vec<ReconciliationAnomaly>, StoreError> {
        let rows = sqlx::query("SELECT * FROM reconciliation_anomalies ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

        rows.iter().map(anomaly_from_row).collect()
    }
}

async fn load_order(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Order>, StoreError> {
    let Some(row) = sqlx::query("SELECT * FROM orders WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db)?
    else {
        return Ok(None);
    };

    let item_rows = sqlx::query("SELECT * FROM order_items WHERE order_id = ? ORDER BY position")
        .bind(id.to_string())
        .fetch_all(&mut *conn)
        .await
        .map_err(db)?;

    let items = item_rows
        .iter()
        .map(item_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    order_from_row(&row, items).map(Some)
}

fn order_from_row(row: &SqliteRow, items: Vec<OrderItem>) -> Result<Order, StoreError> {
    let status: String = column(row, "status")?;
    let payment_status: String = column(row, "payment_status")?;
    let currency: String = column(row, "currency")?;

    Ok(Order {
        id: parse_uuid("id", &column::<String>(row, "id")?)?,
        order_number: column(row, "order_number")?,
        state: parse_state(&status, &payment_status)?,
        items,
        totals: OrderTotals {
            currency: parse_currency(&currency)?,
            subtotal: column(row, "subtotal")?,
            tax: column(row, "tax")?,
            shipping: column(row, "shipping")?,
            discount: column(row, "discount")?,
            total: column(row, "total")?,
        },
        pricing: json_column(row, "pricing")?,
        shipping_method_id: column(row, "shipping_method_id")?,
        shipping_address: json_column(row, "shipping_address")?,
        billing_address: json_column(row, "billing_address")?,
        tracking_number: column(row, "tracking_number")?,
        payment: json_column(row, "payment")?,
        version: version_value(column(row, "version")?)?,
        created_at: parse_timestamp("created_at", &column::<String>(row, "created_at")?)?,
        updated_at: parse_timestamp("updated_at", &column::<String>(row, "updated_at")?)?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<OrderItem, StoreError> {
    let currency = parse_currency(&column::<String>(row, "currency")?)?;
    let quantity: i64 = column(row, "quantity")?;

    Ok(OrderItem {
        id: parse_uuid("id", &column::<String>(row, "id")?)?,
        order_id: parse_uuid("order_id", &column::<String>(row, "order_id")?)?,
        product_id: column(row, "product_id")?,
        name: column(row, "name")?,
        quantity: u32::try_from(quantity).map_err(|e| corrupt("quantity", e))?,
        unit_price: Price::from_cents(column(row, "unit_amount")?, currency),
        line_total: Price::from_cents(column(row, "line_total")?, currency),
    })
}

fn anomaly_from_row(row: &SqliteRow) -> Result<ReconciliationAnomaly, StoreError> {
    let order_id: Option<String> = column(row, "order_id")?;
    let observed_status: Option<String> = column(row, "observed_status")?;
    let observed_payment_status: Option<String> = column(row, "observed_payment_status")?;

    let observed_state = match (observed_status, observed_payment_status) {
        (Some(status), Some(payment_status)) => Some(parse_state(&status, &payment_status)?),
        _ => None,
    };

    Ok(ReconciliationAnomaly {
        id: parse_uuid("id", &column::<String>(row, "id")?)?,
        order_id: order_id.as_deref().map(|id| parse_uuid("order_id", id)).transpose()?,
        event_id: column(row, "event_id")?,
        event_type: column(row, "event_type")?,
        payment_reference: column(row, "payment_reference")?,
        observed_state,
        reason: column(row, "reason")?,
        recorded_at: parse_timestamp("recorded_at", &column::<String>(row, "recorded_at")?)?,
    })
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(db)
}

fn json_column<T: DeserializeOwned>(row: &SqliteRow, name: &str) -> Result<T, StoreError> {
    let raw: String = column(row, name)?;
    serde_json::from_str(&raw).map_err(|e| corrupt(name, e))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Backend(format!("encode failed: {e}")))
}

fn parse_state(status: &str, payment_status: &str) -> Result<OrderState, StoreError> {
    let status = OrderStatus::from_str(status).map_err(|e| corrupt("status", e))?;
    let payment_status =
        PaymentStatus::from_str(payment_status).map_err(|e| corrupt("payment_status", e))?;
    OrderState::try_from((status, payment_status)).map_err(|e| corrupt("state", e))
}

fn parse_currency(raw: &str) -> Result<Currency, StoreError> {
    Currency::from_str(raw).map_err(|e| corrupt("currency", e))
}

fn parse_uuid(name: &str, raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| corrupt(name, e))
}

fn parse_timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(name, e))
}

fn version_column(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|e| StoreError::Backend(format!("version out of range: {e}")))
}

fn version_value(version: i64) -> Result<u64, StoreError> {
    u64::try_from(version).map_err(|e| corrupt("version", e))
}

fn corrupt(name: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("corrupt {name} column: {err}"))
}

fn db(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn insert_error(err: sqlx::Error, order: &Order) -> StoreError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return if db_err.message().contains("order_number") {
                StoreError::DuplicateOrderNumber(order.order_number.clone())
            } else {
                StoreError::DuplicateOrderId(order.id)
            };
        }
    }
    db(err)
}
