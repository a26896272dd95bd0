use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::inventory::InventoryRecord;
use crate::domain::order::{Order, StatusTransitionEvent};
use super::{OrderStore, OrderTransaction, StockTransaction, StoreError};

// ============================================================================
// In-Memory Store - per-row locking without a database
// ============================================================================
//
// Each order and each inventory row sits behind its own async mutex. A
// transaction holds the owned guards of every row it touched until commit
// or drop, which gives the same isolation as row-level locks in a
// relational store. Inventory writes go straight into the guarded row and
// the original values are kept so that a dropped transaction can put them
// back. Order writes are staged and only published on commit. A row that
// is still empty when its transaction finishes, and that nobody else is
// waiting on, is removed so unknown product ids do not accumulate.
//
// ============================================================================

type OrderRow = Arc<Mutex<Order>>;
type InventoryRow = Arc<Mutex<Option<InventoryRecord>>>;

pub struct InMemoryStore {
    orders: DashMap<Uuid, OrderRow>,
    order_numbers: DashMap<String, Uuid>,
    inventory: Arc<DashMap<Uuid, InventoryRow>>,
    lock_timeout: Duration,
}

impl InMemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            orders: DashMap::new(),
            order_numbers: DashMap::new(),
            inventory: Arc::new(DashMap::new()),
            lock_timeout,
        }
    }

    fn stock_transaction(&self) -> MemoryStockTransaction {
        MemoryStockTransaction {
            locked: BTreeMap::new(),
            inventory: self.inventory.clone(),
            lock_timeout: self.lock_timeout,
            finished: false,
        }
    }
}

async fn lock_row<T>(row: Arc<Mutex<T>>, timeout: Duration, resource: String) -> Result<OwnedMutexGuard<T>, StoreError> {
    tokio::time::timeout(timeout, row.lock_owned())
        .await
        .map_err(|_| StoreError::LockTimeout { resource })
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        match self.order_numbers.entry(order.order_number.clone()) {
            Entry::Occupied(_) => {
                return Err(StoreError::Conflict(format!(
                    "duplicate order number {}",
                    order.order_number
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(order.id);
            }
        }

        match self.orders.entry(order.id) {
            Entry::Occupied(_) => {
                self.order_numbers.remove(&order.order_number);
                Err(StoreError::Conflict(format!("duplicate order id {}", order.id)))
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(order.clone())));
                Ok(())
            }
        }
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = match self.orders.get(&order_id) {
            Some(row) => Arc::clone(row.value()),
            None => return Ok(None),
        };
        let guard = lock_row(row, self.lock_timeout, format!("order {order_id}")).await?;
        Ok(Some(guard.clone()))
    }

    async fn begin_order(&self, order_id: Uuid) -> Result<Option<Box<dyn OrderTransaction>>, StoreError> {
        let row = match self.orders.get(&order_id) {
            Some(row) => Arc::clone(row.value()),
            None => return Ok(None),
        };

        tracing::debug!(order_id = %order_id, "Acquiring order lock");
        let guard = lock_row(row, self.lock_timeout, format!("order {order_id}")).await?;
        Ok(Some(Box::new(MemoryOrderTransaction {
            stock: self.stock_transaction(),
            order: guard,
            staged_order: None,
        })))
    }

    async fn begin_stock(&self) -> Result<Box<dyn StockTransaction>, StoreError> {
        Ok(Box::new(self.stock_transaction()))
    }

    async fn load_inventory(&self, product_id: Uuid) -> Result<Option<InventoryRecord>, StoreError> {
        let row = match self.inventory.get(&product_id) {
            Some(row) => Arc::clone(row.value()),
            None => return Ok(None),
        };
        let guard = lock_row(row, self.lock_timeout, format!("inventory {product_id}")).await?;
        Ok(guard.clone())
    }
}

struct LockedStock {
    guard: OwnedMutexGuard<Option<InventoryRecord>>,
    original: Option<InventoryRecord>,
}

struct MemoryStockTransaction {
    locked: BTreeMap<Uuid, LockedStock>,
    inventory: Arc<DashMap<Uuid, InventoryRow>>,
    lock_timeout: Duration,
    finished: bool,
}

impl MemoryStockTransaction {
    async fn lock(&mut self, product_id: Uuid) -> Result<Option<InventoryRecord>, StoreError> {
        if let Some(locked) = self.locked.get(&product_id) {
            return Ok(locked.guard.clone());
        }

        let row = Arc::clone(self.inventory.entry(product_id).or_default().value());
        let guard = lock_row(row, self.lock_timeout, format!("inventory {product_id}")).await?;
        let current = guard.clone();
        self.locked.insert(
            product_id,
            LockedStock {
                guard,
                original: current.clone(),
            },
        );
        Ok(current)
    }

    fn write(&mut self, record: &InventoryRecord) -> Result<(), StoreError> {
        let locked = self.locked.get_mut(&record.product_id).ok_or_else(|| {
            StoreError::Conflict(format!(
                "inventory {} written without holding its lock",
                record.product_id
            ))
        })?;
        *locked.guard = Some(record.clone());
        Ok(())
    }

    fn restore(&mut self) {
        for locked in self.locked.values_mut() {
            *locked.guard = locked.original.take();
        }
        self.finish();
    }

    fn finish(&mut self) {
        for (product_id, locked) in &self.locked {
            if locked.guard.is_none() {
                // One reference in the map, one in our guard
                self.inventory
                    .remove_if(product_id, |_, row| Arc::strong_count(row) == 2);
            }
        }
        self.finished = true;
    }
}

impl Drop for MemoryStockTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.restore();
        }
    }
}

#[async_trait]
impl StockTransaction for MemoryStockTransaction {
    async fn lock_inventory(&mut self, product_id: Uuid) -> Result<Option<InventoryRecord>, StoreError> {
        self.lock(product_id).await
    }

    async fn write_inventory(&mut self, record: &InventoryRecord) -> Result<(), StoreError> {
        self.write(record)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.restore();
        Ok(())
    }
}

struct MemoryOrderTransaction {
    stock: MemoryStockTransaction,
    order: OwnedMutexGuard<Order>,
    staged_order: Option<Order>,
}

#[async_trait]
impl StockTransaction for MemoryOrderTransaction {
    async fn lock_inventory(&mut self, product_id: Uuid) -> Result<Option<InventoryRecord>, StoreError> {
        self.stock.lock(product_id).await
    }

    async fn write_inventory(&mut self, record: &InventoryRecord) -> Result<(), StoreError> {
        self.stock.write(record)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        if let Some(order) = self.staged_order.take() {
            *self.order = order;
        }
        self.stock.finish();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.staged_order = None;
        self.stock.restore();
        Ok(())
    }
}

#[async_trait]
impl OrderTransaction for MemoryOrderTransaction {
    fn order(&self) -> &Order {
        &self.order
    }

    async fn save_order(
        &mut self,
        order: &Order,
        _event: Option<&StatusTransitionEvent>,
    ) -> Result<(), StoreError> {
        // The event is already the last timeline entry of `order`
        self.staged_order = Some(order.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{NewOrder, NewOrderItem, Money, OrderDraft, OrderStatus, TaxRate};
    use chrono::Utc;

    fn sample_order() -> Order {
        let draft = OrderDraft::prepare(
            &NewOrder {
                items: vec![NewOrderItem {
                    product_id: Uuid::new_v4(),
                    unit_price: Money::new(100),
                    quantity: 1,
                }],
                shipping_fee: Money::ZERO,
                tax_rate: None,
                discount: Money::ZERO,
            },
            TaxRate::ZERO,
        )
        .unwrap();
        Order::new(Uuid::now_v7(), format!("DH{}", Uuid::new_v4().simple()), draft, "test", Utc::now())
    }

    #[tokio::test]
    async fn test_insert_and_load_order() {
        let store = InMemoryStore::new(Duration::from_millis(100));
        let order = sample_order();

        store.insert_order(&order).await.unwrap();
        let loaded = store.load_order(order.id).await.unwrap();

        assert_eq!(loaded, Some(order));
    }

    #[tokio::test]
    async fn test_duplicate_order_number_rejected() {
        let store = InMemoryStore::new(Duration::from_millis(100));
        let order = sample_order();
        let mut twin = sample_order();
        twin.order_number = order.order_number.clone();

        store.insert_order(&order).await.unwrap();
        let result = store.insert_order(&twin).await;

        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert!(store.load_order(twin.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_begin_missing_order_returns_none() {
        let store = InMemoryStore::new(Duration::from_millis(100));
        assert!(store.begin_order(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = InMemoryStore::new(Duration::from_millis(100));
        let order = sample_order();
        store.insert_order(&order).await.unwrap();
        let product_id = Uuid::new_v4();

        {
            let mut tx = store.begin_order(order.id).await.unwrap().unwrap();
            tx.write_inventory(&InventoryRecord::new(product_id, 1, 0))
                .await
                .unwrap_err();
            tx.lock_inventory(product_id).await.unwrap();
            tx.write_inventory(&InventoryRecord::new(product_id, 9, 0)).await.unwrap();

            let mut changed = tx.order().clone();
            changed.apply_transition(OrderStatus::Confirmed, "test", None, Utc::now());
            tx.save_order(&changed, None).await.unwrap();
            // dropped without commit
        }

        assert_eq!(store.load_inventory(product_id).await.unwrap(), None);
        let reloaded = store.load_order(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_commit_publishes_order_and_stock() {
        let store = InMemoryStore::new(Duration::from_millis(100));
        let order = sample_order();
        store.insert_order(&order).await.unwrap();
        let product_id = Uuid::new_v4();

        let mut tx = store.begin_order(order.id).await.unwrap().unwrap();
        tx.lock_inventory(product_id).await.unwrap();
        tx.write_inventory(&InventoryRecord::new(product_id, 9, 0)).await.unwrap();
        let mut changed = tx.order().clone();
        changed.apply_transition(OrderStatus::Cancelled, "test", None, Utc::now());
        tx.save_order(&changed, None).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.load_inventory(product_id).await.unwrap().unwrap().available, 9);
        assert_eq!(
            store.load_order(order.id).await.unwrap().unwrap().status,
            OrderStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_second_transaction_on_same_order_times_out() {
        let store = InMemoryStore::new(Duration::from_millis(50));
        let order = sample_order();
        store.insert_order(&order).await.unwrap();

        let _held = store.begin_order(order.id).await.unwrap().unwrap();
        let result = store.begin_order(order.id).await;

        assert!(matches!(result, Err(StoreError::LockTimeout { .. })));
    }

    #[tokio::test]
    async fn test_disjoint_orders_do_not_block() {
        let store = InMemoryStore::new(Duration::from_millis(50));
        let first = sample_order();
        let second = sample_order();
        store.insert_order(&first).await.unwrap();
        store.insert_order(&second).await.unwrap();

        let _held = store.begin_order(first.id).await.unwrap().unwrap();
        assert!(store.begin_order(second.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_product_leaves_no_row_behind() {
        let store = InMemoryStore::new(Duration::from_millis(100));
        let order = sample_order();
        store.insert_order(&order).await.unwrap();
        let (stocked, unknown) = (Uuid::new_v4(), Uuid::new_v4());

        let mut tx = store.begin_stock().await.unwrap();
        tx.lock_inventory(stocked).await.unwrap();
        tx.write_inventory(&InventoryRecord::new(stocked, 3, 0)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin_order(order.id).await.unwrap().unwrap();
        assert_eq!(tx.lock_inventory(unknown).await.unwrap(), None);
        tx.lock_inventory(stocked).await.unwrap();
        tx.commit().await.unwrap();

        {
            let mut tx = store.begin_stock().await.unwrap();
            assert_eq!(tx.lock_inventory(Uuid::new_v4()).await.unwrap(), None);
            // dropped without commit
        }

        assert_eq!(store.inventory.len(), 1);
        assert!(store.inventory.contains_key(&stocked));
        assert_eq!(store.load_inventory(stocked).await.unwrap().unwrap().available, 3);
    }

    #[tokio::test]
    async fn test_empty_row_kept_while_another_transaction_waits() {
        let store = Arc::new(InMemoryStore::new(Duration::from_secs(2)));
        let product_id = Uuid::new_v4();

        let mut first = store.begin_stock().await.unwrap();
        assert_eq!(first.lock_inventory(product_id).await.unwrap(), None);

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut tx = store.begin_stock().await.unwrap();
                tx.lock_inventory(product_id).await.unwrap();
                tx.write_inventory(&InventoryRecord::new(product_id, 4, 0)).await.unwrap();
                tx.commit().await.unwrap();
            })
        };
        while Arc::strong_count(store.inventory.get(&product_id).unwrap().value()) < 3 {
            tokio::task::yield_now().await;
        }

        first.rollback().await.unwrap();
        waiter.await.unwrap();

        assert_eq!(store.load_inventory(product_id).await.unwrap().unwrap().available, 4);
    }
}
