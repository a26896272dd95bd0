use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::inventory::InventoryRecord;
use crate::domain::order::{Order, StatusTransitionEvent};
use crate::utils::IsTransient;

mod memory;
mod postgres;
mod sequence;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use sequence::{InMemorySequenceStore, PostgresSequenceStore, RedisSequenceStore, SequenceStore};

// ============================================================================
// Store Abstraction - transactional persistence for orders and inventory
// ============================================================================
//
// Contract every implementation satisfies:
// - `begin_order` takes an exclusive lock on the order row, held until the
//   transaction commits or is dropped.
// - `lock_inventory` takes an exclusive lock on one product row, held the
//   same way. Callers lock products in ascending id order.
// - Nothing written inside a transaction is visible to others before
//   `commit`. Dropping an uncommitted transaction rolls it back.
// - A lock wait longer than the configured timeout fails with
//   `StoreError::LockTimeout`.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Timed out waiting for lock on {resource}")]
    LockTimeout { resource: String },

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt stored data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Lock/version conflicts, as opposed to the store being unreachable
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. } | StoreError::Conflict(_))
    }
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        !matches!(self, StoreError::Corrupt(_))
    }
}

/// Inventory rows locked for the lifetime of a transaction
#[async_trait]
pub trait StockTransaction: Send {
    /// Lock a product row; `None` when the product has never been stocked
    async fn lock_inventory(&mut self, product_id: Uuid) -> Result<Option<InventoryRecord>, StoreError>;

    /// Write a row previously locked in this transaction
    async fn write_inventory(&mut self, record: &InventoryRecord) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// A transaction scoped to one locked order
#[async_trait]
pub trait OrderTransaction: StockTransaction {
    /// The order as it was when the lock was taken
    fn order(&self) -> &Order;

    /// Persist the order, appending `event` to its stored timeline
    async fn save_order(
        &mut self,
        order: &Order,
        event: Option<&StatusTransitionEvent>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order with its items and creation event in one commit
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn load_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    /// `None` when the order does not exist
    async fn begin_order(&self, order_id: Uuid) -> Result<Option<Box<dyn OrderTransaction>>, StoreError>;

    /// A transaction that only touches inventory rows
    async fn begin_stock(&self) -> Result<Box<dyn StockTransaction>, StoreError>;

    async fn load_inventory(&self, product_id: Uuid) -> Result<Option<InventoryRecord>, StoreError>;
}
