// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// - order/     - order aggregate, transitions, totals, numbering, lifecycle
// - inventory/ - per-product stock records and the inventory ledger
//
// Persistence lives in crate::store behind traits; nothing here knows
// whether rows are in memory or in PostgreSQL.
//
// ============================================================================

pub mod inventory;
pub mod order;
