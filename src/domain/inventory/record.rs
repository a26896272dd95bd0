use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::InventoryError;

// ============================================================================
// Inventory Record - stock of one product
// ============================================================================
//
// available: sellable now
// reserved:  taken from `available` by in-flight orders, not yet committed
//            (shipped) or released (cancelled)
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRecord {
    pub product_id: Uuid,
    pub available: u32,
    pub reserved: u32,
    /// Low-stock alert level
    pub threshold: u32,
    pub updated_at: DateTime<Utc>,
}

/// How much of a reserved-counter decrement could not be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedShortfall(pub u32);

impl ReservedShortfall {
    pub fn is_consistent(&self) -> bool {
        self.0 == 0
    }
}

impl InventoryRecord {
    pub fn new(product_id: Uuid, available: u32, threshold: u32) -> Self {
        Self {
            product_id,
            available,
            reserved: 0,
            threshold,
            updated_at: Utc::now(),
        }
    }

    /// Stand-in for a product that has never been stocked
    pub fn empty(product_id: Uuid) -> Self {
        Self::new(product_id, 0, 0)
    }

    pub fn is_low_stock(&self) -> bool {
        self.available <= self.threshold
    }

    pub fn reserve(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if self.available < quantity {
            return Err(InventoryError::Insufficient {
                product_id: self.product_id,
                requested: quantity,
                available: self.available,
            });
        }

        self.available -= quantity;
        self.reserved = self.reserved.saturating_add(quantity);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Return a reservation to `available`. `reserved` stops at zero.
    pub fn release(&mut self, quantity: u32) -> ReservedShortfall {
        self.available = self.available.saturating_add(quantity);
        self.drop_reserved(quantity)
    }

    /// Make a reservation permanent: `reserved` drops, `available` is untouched
    pub fn commit(&mut self, quantity: u32) -> ReservedShortfall {
        self.drop_reserved(quantity)
    }

    pub fn restock(&mut self, quantity: u32) {
        self.available = self.available.saturating_add(quantity);
        self.updated_at = Utc::now();
    }

    pub fn set_levels(&mut self, available: u32, threshold: u32) {
        self.available = available;
        self.threshold = threshold;
        self.updated_at = Utc::now();
    }

    fn drop_reserved(&mut self, quantity: u32) -> ReservedShortfall {
        let shortfall = quantity.saturating_sub(self.reserved);
        self.reserved = self.reserved.saturating_sub(quantity);
        self.updated_at = Utc::now();
        ReservedShortfall(shortfall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_moves_stock_to_reserved() {
        let mut record = InventoryRecord::new(Uuid::new_v4(), 5, 1);
        record.reserve(2).unwrap();

        assert_eq!(record.available, 3);
        assert_eq!(record.reserved, 2);
    }

    #[test]
    fn test_reserve_exact_available() {
        let mut record = InventoryRecord::new(Uuid::new_v4(), 2, 0);
        record.reserve(2).unwrap();
        assert_eq!(record.available, 0);
    }

    #[test]
    fn test_reserve_insufficient_leaves_record_unchanged() {
        let product_id = Uuid::new_v4();
        let mut record = InventoryRecord::new(product_id, 1, 0);
        let before = record.clone();

        let result = record.reserve(2);

        assert!(matches!(
            result,
            Err(InventoryError::Insufficient { requested: 2, available: 1, .. })
        ));
        assert_eq!(record, before);
    }

    #[test]
    fn test_release_restores_reservation() {
        let mut record = InventoryRecord::new(Uuid::new_v4(), 5, 0);
        record.reserve(2).unwrap();
        let shortfall = record.release(2);

        assert!(shortfall.is_consistent());
        assert_eq!(record.available, 5);
        assert_eq!(record.reserved, 0);
    }

    #[test]
    fn test_release_clamps_reserved_at_zero() {
        let mut record = InventoryRecord::new(Uuid::new_v4(), 5, 0);
        record.reserve(1).unwrap();
        let shortfall = record.release(3);

        assert_eq!(shortfall, ReservedShortfall(2));
        assert_eq!(record.reserved, 0);
        assert_eq!(record.available, 7);
    }

    #[test]
    fn test_commit_only_drops_reserved() {
        let mut record = InventoryRecord::new(Uuid::new_v4(), 5, 0);
        record.reserve(2).unwrap();
        let shortfall = record.commit(2);

        assert!(shortfall.is_consistent());
        assert_eq!(record.available, 3);
        assert_eq!(record.reserved, 0);
    }

    #[test]
    fn test_low_stock_threshold() {
        let mut record = InventoryRecord::new(Uuid::new_v4(), 5, 3);
        assert!(!record.is_low_stock());
        record.reserve(2).unwrap();
        assert!(record.is_low_stock());
    }
}
