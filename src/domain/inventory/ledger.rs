use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::store::{StockTransaction, StoreError};
use super::errors::InventoryError;
use super::record::{InventoryRecord, ReservedShortfall};

// ============================================================================
// Inventory Ledger
// ============================================================================
//
// Sole writer of available/reserved counts. Every operation locks the
// product row inside the caller's transaction, applies the change to the
// record and writes it back before the lock is released, so concurrent
// reservations of one product serialize on that row and nothing else.
//
// ============================================================================

pub struct InventoryLedger {
    metrics: Arc<Metrics>,
}

impl InventoryLedger {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }

    pub async fn reserve<T>(
        &self,
        tx: &mut T,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<InventoryRecord, InventoryError>
    where
        T: StockTransaction + ?Sized,
    {
        let mut record = tx
            .lock_inventory(product_id)
            .await?
            .unwrap_or_else(|| InventoryRecord::empty(product_id));

        record.reserve(quantity)?;
        tx.write_inventory(&record).await?;
        self.metrics.record_inventory_operation("reserve");

        tracing::debug!(
            product_id = %product_id,
            quantity = quantity,
            available = record.available,
            reserved = record.reserved,
            "Reserved stock"
        );

        if record.is_low_stock() {
            self.metrics.low_stock_alerts.inc();
            tracing::warn!(
                product_id = %product_id,
                available = record.available,
                threshold = record.threshold,
                "⚠️ Product at or below low-stock threshold"
            );
        }

        Ok(record)
    }

    pub async fn release<T>(
        &self,
        tx: &mut T,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<InventoryRecord, StoreError>
    where
        T: StockTransaction + ?Sized,
    {
        let mut record = self.locked_or_empty(tx, product_id).await?;
        let shortfall = record.release(quantity);
        tx.write_inventory(&record).await?;

        self.metrics.record_inventory_operation("release");
        self.check_shortfall("release", product_id, quantity, shortfall);
        Ok(record)
    }

    pub async fn commit<T>(
        &self,
        tx: &mut T,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<InventoryRecord, StoreError>
    where
        T: StockTransaction + ?Sized,
    {
        let mut record = self.locked_or_empty(tx, product_id).await?;
        let shortfall = record.commit(quantity);
        tx.write_inventory(&record).await?;

        self.metrics.record_inventory_operation("commit");
        self.check_shortfall("commit", product_id, quantity, shortfall);
        Ok(record)
    }

    /// Reserve every line or none. Lines are visited in ascending product
    /// order; on the first shortfall the reservations already made by this
    /// call are released before the error is returned.
    pub async fn reserve_all<T>(
        &self,
        tx: &mut T,
        lines: &BTreeMap<Uuid, u32>,
    ) -> Result<(), InventoryError>
    where
        T: StockTransaction + ?Sized,
    {
        let mut reserved: Vec<(Uuid, u32)> = Vec::with_capacity(lines.len());

        for (&product_id, &quantity) in lines {
            match self.reserve(tx, product_id, quantity).await {
                Ok(_) => reserved.push((product_id, quantity)),
                Err(error) => {
                    if let InventoryError::Insufficient { requested, available, .. } = &error {
                        tracing::info!(
                            product_id = %product_id,
                            requested = requested,
                            available = available,
                            compensated = reserved.len(),
                            "Reservation failed, releasing earlier lines"
                        );
                    }
                    for (done_id, done_quantity) in reserved.into_iter().rev() {
                        self.release(tx, done_id, done_quantity).await?;
                    }
                    return Err(error);
                }
            }
        }

        Ok(())
    }

    pub async fn release_all<T>(&self, tx: &mut T, lines: &BTreeMap<Uuid, u32>) -> Result<(), StoreError>
    where
        T: StockTransaction + ?Sized,
    {
        for (&product_id, &quantity) in lines {
            self.release(tx, product_id, quantity).await?;
        }
        Ok(())
    }

    pub async fn commit_all<T>(&self, tx: &mut T, lines: &BTreeMap<Uuid, u32>) -> Result<(), StoreError>
    where
        T: StockTransaction + ?Sized,
    {
        for (&product_id, &quantity) in lines {
            self.commit(tx, product_id, quantity).await?;
        }
        Ok(())
    }

    /// Add received stock. `reserved` is not touched.
    pub async fn restock<T>(&self, tx: &mut T, product_id: Uuid, quantity: u32) -> Result<InventoryRecord, StoreError>
    where
        T: StockTransaction + ?Sized,
    {
        let mut record = self.locked_or_empty(tx, product_id).await?;
        record.restock(quantity);
        tx.write_inventory(&record).await?;
        self.metrics.record_inventory_operation("restock");
        Ok(record)
    }

    /// Overwrite sellable quantity and threshold from the back-office
    pub async fn set_levels<T>(
        &self,
        tx: &mut T,
        product_id: Uuid,
        available: u32,
        threshold: u32,
    ) -> Result<InventoryRecord, StoreError>
    where
        T: StockTransaction + ?Sized,
    {
        let mut record = self.locked_or_empty(tx, product_id).await?;
        record.set_levels(available, threshold);
        tx.write_inventory(&record).await?;
        self.metrics.record_inventory_operation("set_levels");
        Ok(record)
    }

    async fn locked_or_empty<T>(&self, tx: &mut T, product_id: Uuid) -> Result<InventoryRecord, StoreError>
    where
        T: StockTransaction + ?Sized,
    {
        Ok(tx
            .lock_inventory(product_id)
            .await?
            .unwrap_or_else(|| InventoryRecord::empty(product_id)))
    }

    fn check_shortfall(&self, operation: &str, product_id: Uuid, quantity: u32, shortfall: ReservedShortfall) {
        if shortfall.is_consistent() {
            return;
        }
        self.metrics.record_inconsistency(operation);
        tracing::warn!(
            product_id = %product_id,
            operation = operation,
            quantity = quantity,
            missing = shortfall.0,
            "Reserved count lower than the quantity being dropped, clamped to zero"
        );
    }
}
