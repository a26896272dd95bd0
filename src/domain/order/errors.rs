use uuid::Uuid;

use super::value_objects::{Money, OrderStatus, PaymentStatus};

// ============================================================================
// Order Business Rule Errors
// ============================================================================
//
// These are outcomes the caller branches on, never retried.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("Order cannot be refunded while payment is {0}")]
    NotRefundable(PaymentStatus),

    #[error("Payment is already settled as {0}")]
    PaymentAlreadySettled(PaymentStatus),

    #[error("Line items cannot be changed in status: {0}")]
    ItemsLocked(OrderStatus),

    #[error("Order items cannot be empty")]
    EmptyItems,

    #[error("Invalid item quantity: {0}")]
    InvalidQuantity(u32),

    #[error("Combined quantity for product {0} is too large")]
    QuantityOverflow(Uuid),

    #[error("Amount cannot be negative: {0}")]
    NegativeAmount(Money),

    #[error("Discount {discount} exceeds order amount {gross}")]
    DiscountExceedsTotal { discount: Money, gross: Money },

    #[error("Order amount overflow")]
    AmountOverflow,

    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    #[error("Unknown payment status: {0}")]
    UnknownPaymentStatus(String),
}

impl OrderError {
    /// Stable machine-readable name, used in API bodies and metric labels
    pub fn reason(&self) -> &'static str {
        match self {
            OrderError::InvalidTransition { .. } => "InvalidTransition",
            OrderError::InsufficientStock { .. } => "InsufficientStock",
            OrderError::NotRefundable(_) => "NotRefundable",
            OrderError::PaymentAlreadySettled(_) => "PaymentAlreadySettled",
            OrderError::ItemsLocked(_) => "ItemsLocked",
            OrderError::EmptyItems => "EmptyItems",
            OrderError::InvalidQuantity(_) => "InvalidQuantity",
            OrderError::QuantityOverflow(_) => "QuantityOverflow",
            OrderError::NegativeAmount(_) => "NegativeAmount",
            OrderError::DiscountExceedsTotal { .. } => "DiscountExceedsTotal",
            OrderError::AmountOverflow => "AmountOverflow",
            OrderError::UnknownStatus(_) => "UnknownStatus",
            OrderError::UnknownPaymentStatus(_) => "UnknownPaymentStatus",
        }
    }
}
