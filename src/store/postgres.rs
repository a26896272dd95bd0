use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::inventory::InventoryRecord;
use crate::domain::order::{
    Money, Order, OrderItem, OrderStatus, StatusTransitionEvent, TaxRate,
};
use super::{OrderStore, OrderTransaction, StockTransaction, StoreError};

// ============================================================================
// PostgreSQL Store
// ============================================================================
//
// Row locks come from `SELECT ... FOR UPDATE` inside one database
// transaction per operation, bounded by `SET LOCAL lock_timeout`. Order
// updates are additionally guarded by the `version` column so that a write
// based on a stale read fails instead of overwriting. Plain reads of an
// order run in one read-only snapshot so its row, items and timeline agree.
//
// ============================================================================

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id UUID PRIMARY KEY,
        order_number TEXT NOT NULL UNIQUE,
        version BIGINT NOT NULL,
        status TEXT NOT NULL,
        payment_status TEXT NOT NULL,
        subtotal BIGINT NOT NULL,
        shipping_fee BIGINT NOT NULL,
        tax BIGINT NOT NULL,
        discount BIGINT NOT NULL,
        total BIGINT NOT NULL CHECK (total >= 0),
        tax_rate_bps BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_items (
        order_id UUID NOT NULL REFERENCES orders (id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        product_id UUID NOT NULL,
        unit_price BIGINT NOT NULL,
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        line_total BIGINT NOT NULL,
        PRIMARY KEY (order_id, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_events (
        order_id UUID NOT NULL REFERENCES orders (id) ON DELETE CASCADE,
        sequence INTEGER NOT NULL,
        from_status TEXT,
        to_status TEXT NOT NULL,
        triggered_by TEXT NOT NULL,
        note TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (order_id, sequence)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory (
        product_id UUID PRIMARY KEY,
        available BIGINT NOT NULL CHECK (available >= 0),
        reserved BIGINT NOT NULL CHECK (reserved >= 0),
        threshold BIGINT NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_sequences (
        sequence_key TEXT PRIMARY KEY,
        value BIGINT NOT NULL
    )
    "#,
];

pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub async fn connect(url: &str, max_connections: u32, lock_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;

        tracing::info!(max_connections = max_connections, "✅ Connected to PostgreSQL");
        Ok(Self { pool, lock_timeout })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("📋 Database schema ready");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await?;
        // SET does not accept bind parameters
        let statement = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&statement).execute(&mut *tx).await?;
        Ok(tx)
    }

    async fn begin_snapshot(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            "INSERT INTO orders (id, order_number, version, status, payment_status, subtotal, \
             shipping_fee, tax, discount, total, tax_rate_bps, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.version)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.subtotal.amount())
        .bind(order.shipping_fee.amount())
        .bind(order.tax.amount())
        .bind(order.discount.amount())
        .bind(order.total.amount())
        .bind(i64::from(order.tax_rate.bps()))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_items(&mut tx, order).await?;
        for (sequence, event) in order.timeline.iter().enumerate() {
            insert_event(&mut tx, order.id, sequence, event).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut tx = self.begin_snapshot().await?;
        let order = fetch_order(&mut tx, order_id, false).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn begin_order(&self, order_id: Uuid) -> Result<Option<Box<dyn OrderTransaction>>, StoreError> {
        let mut tx = self.begin().await?;

        let order = match fetch_order(&mut tx, order_id, true).await? {
            Some(order) => order,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        Ok(Some(Box::new(PgOrderTransaction {
            stock: PgStockTransaction::new(tx),
            order,
        })))
    }

    async fn begin_stock(&self) -> Result<Box<dyn StockTransaction>, StoreError> {
        Ok(Box::new(PgStockTransaction::new(self.begin().await?)))
    }

    async fn load_inventory(&self, product_id: Uuid) -> Result<Option<InventoryRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT product_id, available, reserved, threshold, updated_at FROM inventory WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| inventory_from_row(&row)).transpose()
    }
}

struct PgStockTransaction {
    tx: Transaction<'static, Postgres>,
    locked: HashSet<Uuid>,
}

impl PgStockTransaction {
    fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            tx,
            locked: HashSet::new(),
        }
    }

    async fn lock(&mut self, product_id: Uuid) -> Result<Option<InventoryRecord>, StoreError> {
        // Claim the row first so that a never-stocked product is locked too
        let created = sqlx::query(
            "INSERT INTO inventory (product_id, available, reserved, threshold, updated_at) \
             VALUES ($1, 0, 0, 0, now()) ON CONFLICT (product_id) DO NOTHING RETURNING product_id",
        )
        .bind(product_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        self.locked.insert(product_id);

        if created.is_some() {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT product_id, available, reserved, threshold, updated_at FROM inventory \
             WHERE product_id = $1 FOR UPDATE",
        )
        .bind(product_id)
        .fetch_one(&mut *self.tx)
        .await?;

        inventory_from_row(&row).map(Some)
    }

    async fn write(&mut self, record: &InventoryRecord) -> Result<(), StoreError> {
        if !self.locked.contains(&record.product_id) {
            return Err(StoreError::Conflict(format!(
                "inventory {} written without holding its lock",
                record.product_id
            )));
        }

        sqlx::query(
            "UPDATE inventory SET available = $2, reserved = $3, threshold = $4, updated_at = $5 \
             WHERE product_id = $1",
        )
        .bind(record.product_id)
        .bind(i64::from(record.available))
        .bind(i64::from(record.reserved))
        .bind(i64::from(record.threshold))
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StockTransaction for PgStockTransaction {
    async fn lock_inventory(&mut self, product_id: Uuid) -> Result<Option<InventoryRecord>, StoreError> {
        self.lock(product_id).await
    }

    async fn write_inventory(&mut self, record: &InventoryRecord) -> Result<(), StoreError> {
        self.write(record).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

struct PgOrderTransaction {
    stock: PgStockTransaction,
    /// Last persisted state; its version guards the next update
    order: Order,
}

#[async_trait]
impl StockTransaction for PgOrderTransaction {
    async fn lock_inventory(&mut self, product_id: Uuid) -> Result<Option<InventoryRecord>, StoreError> {
        self.stock.lock(product_id).await
    }

    async fn write_inventory(&mut self, record: &InventoryRecord) -> Result<(), StoreError> {
        self.stock.write(record).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.stock.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.stock.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderTransaction for PgOrderTransaction {
    fn order(&self) -> &Order {
        &self.order
    }

    async fn save_order(
        &mut self,
        order: &Order,
        event: Option<&StatusTransitionEvent>,
    ) -> Result<(), StoreError> {
        let tx = &mut self.stock.tx;

        let updated = sqlx::query(
            "UPDATE orders SET version = $3, status = $4, payment_status = $5, subtotal = $6, \
             shipping_fee = $7, tax = $8, discount = $9, total = $10, updated_at = $11 \
             WHERE id = $1 AND version = $2",
        )
        .bind(order.id)
        .bind(self.order.version)
        .bind(order.version)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.subtotal.amount())
        .bind(order.shipping_fee.amount())
        .bind(order.tax.amount())
        .bind(order.discount.amount())
        .bind(order.total.amount())
        .bind(order.updated_at)
        .execute(&mut **tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "order {} changed since version {}",
                order.id, self.order.version
            )));
        }

        if order.items != self.order.items {
            sqlx::query("DELETE FROM order_items WHERE order_id = $1")
                .bind(order.id)
                .execute(&mut **tx)
                .await?;
            insert_items(tx, order).await?;
        }

        if let Some(event) = event {
            let sequence = order.timeline.len().saturating_sub(1);
            insert_event(tx, order.id, sequence, event).await?;
        }

        self.order = order.clone();
        Ok(())
    }
}

async fn insert_items(connection: &mut PgConnection, order: &Order) -> Result<(), StoreError> {
    for (position, item) in order.items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO order_items (order_id, position, product_id, unit_price, quantity, line_total) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(order.id)
        .bind(to_position(position)?)
        .bind(item.product_id)
        .bind(item.unit_price.amount())
        .bind(i64::from(item.quantity))
        .bind(item.line_total.amount())
        .execute(&mut *connection)
        .await?;
    }
    Ok(())
}

async fn insert_event(
    connection: &mut PgConnection,
    order_id: Uuid,
    sequence: usize,
    event: &StatusTransitionEvent,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO order_events (order_id, sequence, from_status, to_status, triggered_by, note, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(order_id)
    .bind(to_position(sequence)?)
    .bind(event.from_status.map(|status| status.as_str()))
    .bind(event.to_status.as_str())
    .bind(&event.triggered_by)
    .bind(event.note.as_deref())
    .bind(event.timestamp)
    .execute(&mut *connection)
    .await?;
    Ok(())
}

async fn fetch_order(
    connection: &mut PgConnection,
    order_id: Uuid,
    for_update: bool,
) -> Result<Option<Order>, StoreError> {
    let statement = if for_update {
        "SELECT * FROM orders WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT * FROM orders WHERE id = $1"
    };

    let row = match sqlx::query(statement)
        .bind(order_id)
        .fetch_optional(&mut *connection)
        .await?
    {
        Some(row) => row,
        None => return Ok(None),
    };

    let items = sqlx::query(
        "SELECT product_id, unit_price, quantity, line_total FROM order_items \
         WHERE order_id = $1 ORDER BY position",
    )
    .bind(order_id)
    .fetch_all(&mut *connection)
    .await?
    .iter()
    .map(item_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    let timeline = sqlx::query(
        "SELECT from_status, to_status, triggered_by, note, created_at FROM order_events \
         WHERE order_id = $1 ORDER BY sequence",
    )
    .bind(order_id)
    .fetch_all(&mut *connection)
    .await?
    .iter()
    .map(event_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Order {
        id: row.try_get("id")?,
        order_number: row.try_get("order_number")?,
        version: row.try_get("version")?,
        status: parse_column(&row, "status")?,
        payment_status: parse_column(&row, "payment_status")?,
        items,
        subtotal: Money::new(row.try_get("subtotal")?),
        shipping_fee: Money::new(row.try_get("shipping_fee")?),
        tax: Money::new(row.try_get("tax")?),
        discount: Money::new(row.try_get("discount")?),
        total: Money::new(row.try_get("total")?),
        tax_rate: TaxRate::from_bps(to_count(row.try_get("tax_rate_bps")?, "tax_rate_bps")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        timeline,
    }))
}

fn item_from_row(row: &PgRow) -> Result<OrderItem, StoreError> {
    Ok(OrderItem {
        product_id: row.try_get("product_id")?,
        unit_price: Money::new(row.try_get("unit_price")?),
        quantity: to_count(row.try_get("quantity")?, "quantity")?,
        line_total: Money::new(row.try_get("line_total")?),
    })
}

fn event_from_row(row: &PgRow) -> Result<StatusTransitionEvent, StoreError> {
    let from_status: Option<String> = row.try_get("from_status")?;
    let timestamp: DateTime<Utc> = row.try_get("created_at")?;

    Ok(StatusTransitionEvent {
        from_status: from_status.as_deref().map(parse_status).transpose()?,
        to_status: parse_column(row, "to_status")?,
        timestamp,
        triggered_by: row.try_get("triggered_by")?,
        note: row.try_get("note")?,
    })
}

fn inventory_from_row(row: &PgRow) -> Result<InventoryRecord, StoreError> {
    Ok(InventoryRecord {
        product_id: row.try_get("product_id")?,
        available: to_count(row.try_get("available")?, "available")?,
        reserved: to_count(row.try_get("reserved")?, "reserved")?,
        threshold: to_count(row.try_get("threshold")?, "threshold")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_status(value: &str) -> Result<OrderStatus, StoreError> {
    OrderStatus::from_str(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value: String = row.try_get(column)?;
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Corrupt(format!("{column}: {e}")))
}

fn to_count(value: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn to_position(index: usize) -> Result<i32, StoreError> {
    i32::try_from(index).map_err(|_| StoreError::Corrupt(format!("position out of range: {index}")))
}

// ============================================================================
// Error Mapping
// ============================================================================

/// SQLSTATE codes that mean another transaction got there first
const CONFLICT_STATES: [&str; 3] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "23505", // unique_violation
];

const LOCK_NOT_AVAILABLE: &str = "55P03";

fn error_for_sqlstate(code: &str, message: &str) -> Option<StoreError> {
    if code == LOCK_NOT_AVAILABLE {
        Some(StoreError::LockTimeout {
            resource: message.to_string(),
        })
    } else if CONFLICT_STATES.contains(&code) {
        Some(StoreError::Conflict(message.to_string()))
    } else if code.starts_with("23") {
        // Any other integrity violation means the stored data disagrees
        // with what the domain allows
        Some(StoreError::Corrupt(message.to_string()))
    } else {
        None
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db_error) => db_error
                .code()
                .and_then(|code| error_for_sqlstate(&code, db_error.message()))
                .unwrap_or_else(|| StoreError::Unavailable(error.to_string())),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupt(error.to_string()),
            _ => StoreError::Unavailable(error.to_string()),
        }
    }
}
