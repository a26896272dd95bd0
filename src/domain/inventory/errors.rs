use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    Insufficient {
        product_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
