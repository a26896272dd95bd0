// ============================================================================
// Order Domain - Business Logic for the Order Lifecycle
// ============================================================================
//
// - Value objects (OrderStatus, PaymentStatus, Money, OrderItem)
// - Timeline events (StatusTransitionEvent)
// - Errors (OrderError)
// - Order aggregate and total calculation
// - Status transition validator
// - Order number generator
// - Lifecycle service (the only entry point for callers)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod errors;
pub mod totals;
pub mod transitions;
pub mod aggregate;
pub mod order_number;
pub mod lifecycle_service;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use errors::*;
pub use aggregate::*;
pub use order_number::*;
pub use lifecycle_service::*;
