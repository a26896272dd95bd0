// ============================================================================
// Inventory Domain - per-product stock and the ledger that mutates it
// ============================================================================

pub mod record;
pub mod errors;
pub mod ledger;

pub use record::*;
pub use errors::*;
pub use ledger::*;
