use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::domain::inventory::{InventoryError, InventoryLedger, InventoryRecord};
use crate::metrics::Metrics;
use crate::store::{OrderStore, OrderTransaction, StoreError};
use crate::utils::{retry_on_transient, IsTransient, RetryConfig};
use super::aggregate::{NewOrder, Order, OrderDraft};
use super::errors::OrderError;
use super::order_number::OrderNumberGenerator;
use super::transitions::StatusTransitionValidator;
use super::value_objects::{NewOrderItem, OrderStatus, PaymentOutcome, PaymentStatus, TaxRate};

// ============================================================================
// Order Lifecycle Service
// ============================================================================
//
// The only entry point for callers. Every mutating operation:
//
//   1. opens a store transaction holding the order's row lock
//   2. returns early when the request is already satisfied (no event)
//   3. asks the validator, and aborts with no mutation if it refuses
//   4. applies inventory effects through the ledger, inside the same
//      transaction (products locked in ascending id order after the order)
//   5. appends the timeline event and persists the order
//   6. commits
//
// A failure at any step before the commit drops the transaction and every
// effect with it. Transient store failures re-run the whole sequence; the
// early return in step 2 makes a re-run after a lost commit acknowledgement
// harmless.
//
// ============================================================================

/// Result of an operation that reached the order. Business-rule refusals
/// are ordinary values here, not errors.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// State changed and was persisted
    Applied(T),
    /// Requested state already held; nothing was written
    Unchanged(T),
    /// Refused by a business rule; nothing was written
    Rejected(OrderError),
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(#[source] StoreError),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[source] StoreError),
}

impl From<StoreError> for LifecycleError {
    fn from(error: StoreError) -> Self {
        if error.is_conflict() {
            LifecycleError::ConcurrentModification(error)
        } else {
            LifecycleError::PersistenceFailure(error)
        }
    }
}

impl IsTransient for LifecycleError {
    fn is_transient(&self) -> bool {
        match self {
            LifecycleError::NotFound(_) => false,
            LifecycleError::ConcurrentModification(error)
            | LifecycleError::PersistenceFailure(error) => error.is_transient(),
        }
    }
}

pub struct OrderLifecycleService {
    store: Arc<dyn OrderStore>,
    numbers: OrderNumberGenerator,
    ledger: InventoryLedger,
    metrics: Arc<Metrics>,
    retry: RetryConfig,
    default_tax_rate: TaxRate,
}

impl OrderLifecycleService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        numbers: OrderNumberGenerator,
        metrics: Arc<Metrics>,
        retry: RetryConfig,
        default_tax_rate: TaxRate,
    ) -> Self {
        Self {
            store,
            numbers,
            ledger: InventoryLedger::new(metrics.clone()),
            metrics,
            retry,
            default_tax_rate,
        }
    }

    // ========================================================================
    // Status Changes
    // ========================================================================

    pub async fn change_status(
        &self,
        order_id: Uuid,
        requested: OrderStatus,
        note: Option<&str>,
        actor: &str,
    ) -> Result<Outcome<Order>, LifecycleError> {
        let outcome = self
            .run("change_status", || self.try_change_status(order_id, requested, note, actor))
            .await?;
        self.observe_transition(&outcome);
        Ok(outcome)
    }

    async fn try_change_status(
        &self,
        order_id: Uuid,
        requested: OrderStatus,
        note: Option<&str>,
        actor: &str,
    ) -> Result<Outcome<Order>, LifecycleError> {
        let mut tx = self.lock_order(order_id).await?;
        let current = tx.order().clone();

        if current.status == requested {
            tracing::debug!(order_id = %order_id, status = %requested, "Status already set, nothing to do");
            tx.rollback().await?;
            return Ok(Outcome::Unchanged(current));
        }

        if let Err(rejection) = StatusTransitionValidator::validate(current.status, requested) {
            tx.rollback().await?;
            return Ok(Outcome::Rejected(rejection));
        }

        let now = Utc::now();
        let lines = match current.stock_lines() {
            Ok(lines) => lines,
            Err(rejection) => {
                tx.rollback().await?;
                return Ok(Outcome::Rejected(rejection));
            }
        };
        let mut order = current;

        match requested {
            OrderStatus::Confirmed => {
                let reserved = self.ledger.reserve_all(tx.as_mut(), &lines).await;
                match reserved {
                    Ok(()) => {}
                    Err(InventoryError::Insufficient {
                        product_id,
                        requested: quantity,
                        available,
                    }) => {
                        tx.rollback().await?;
                        return Ok(Outcome::Rejected(OrderError::InsufficientStock {
                            product_id,
                            requested: quantity,
                            available,
                        }));
                    }
                    Err(InventoryError::Store(error)) => return Err(error.into()),
                }
            }
            OrderStatus::Cancelled => {
                if order.status.holds_reservation() {
                    self.ledger.release_all(tx.as_mut(), &lines).await?;
                }
                if order.payment_status == PaymentStatus::Paid {
                    order.set_payment_status(PaymentStatus::Refunded, now);
                }
            }
            OrderStatus::Shipped => self.ledger.commit_all(tx.as_mut(), &lines).await?,
            _ => {}
        }

        let event = order.apply_transition(requested, actor, note, now);
        tx.save_order(&order, Some(&event)).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order_id,
            order_number = %order.order_number,
            from = ?event.from_status,
            to = %requested,
            terminal = requested.is_terminal(),
            actor = actor,
            "✅ Order status changed"
        );
        Ok(Outcome::Applied(order))
    }

    /// The separate `-> refunded` transition from `cancelled` or `delivered`
    pub async fn refund(
        &self,
        order_id: Uuid,
        note: Option<&str>,
        actor: &str,
    ) -> Result<Outcome<Order>, LifecycleError> {
        let outcome = self
            .run("refund", || self.try_refund(order_id, note, actor))
            .await?;
        self.observe_transition(&outcome);
        Ok(outcome)
    }

    async fn try_refund(
        &self,
        order_id: Uuid,
        note: Option<&str>,
        actor: &str,
    ) -> Result<Outcome<Order>, LifecycleError> {
        let mut tx = self.lock_order(order_id).await?;
        let mut order = tx.order().clone();

        if order.status == OrderStatus::Refunded {
            tx.rollback().await?;
            return Ok(Outcome::Unchanged(order));
        }

        if let Err(rejection) = StatusTransitionValidator::validate_refund(order.status, order.payment_status) {
            tx.rollback().await?;
            return Ok(Outcome::Rejected(rejection));
        }

        let now = Utc::now();
        if order.payment_status != PaymentStatus::Refunded {
            order.set_payment_status(PaymentStatus::Refunded, now);
        }
        let event = order.apply_transition(OrderStatus::Refunded, actor, note, now);
        tx.save_order(&order, Some(&event)).await?;
        tx.commit().await?;

        tracing::info!(order_id = %order_id, actor = actor, "💸 Order refunded");
        Ok(Outcome::Applied(order))
    }

    // ========================================================================
    // Checkout, Items and Payment
    // ========================================================================

    pub async fn create_order(&self, new_order: &NewOrder, actor: &str) -> Result<Outcome<Order>, LifecycleError> {
        let draft = match OrderDraft::prepare(new_order, self.default_tax_rate) {
            Ok(draft) => draft,
            Err(rejection) => {
                let outcome = Outcome::Rejected(rejection);
                self.observe(&outcome);
                return Ok(outcome);
            }
        };

        let order = self
            .run("create_order", || self.try_create_order(&draft, actor))
            .await?;

        self.metrics.orders_created.inc();
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total,
            items = order.items.len(),
            "🧾 Order created"
        );
        Ok(Outcome::Applied(order))
    }

    async fn try_create_order(&self, draft: &OrderDraft, actor: &str) -> Result<Order, LifecycleError> {
        // A number taken by a failed attempt is simply skipped
        let order_number = self.numbers.next().await?;
        let order = Order::new(Uuid::now_v7(), order_number, draft.clone(), actor, Utc::now());
        self.store.insert_order(&order).await?;
        Ok(order)
    }

    /// Replace the line items of a pending order and recompute its totals
    pub async fn update_items(
        &self,
        order_id: Uuid,
        items: &[NewOrderItem],
        actor: &str,
    ) -> Result<Outcome<Order>, LifecycleError> {
        let outcome = self
            .run("update_items", || self.try_update_items(order_id, items, actor))
            .await?;
        self.observe(&outcome);
        Ok(outcome)
    }

    async fn try_update_items(
        &self,
        order_id: Uuid,
        items: &[NewOrderItem],
        actor: &str,
    ) -> Result<Outcome<Order>, LifecycleError> {
        let mut tx = self.lock_order(order_id).await?;
        let mut order = tx.order().clone();

        match order.replace_items(items, Utc::now()) {
            Ok(true) => {
                tx.save_order(&order, None).await?;
                tx.commit().await?;
                tracing::info!(
                    order_id = %order_id,
                    actor = actor,
                    subtotal = %order.subtotal,
                    total = %order.total,
                    "Order items replaced"
                );
                Ok(Outcome::Applied(order))
            }
            Ok(false) => {
                tx.rollback().await?;
                Ok(Outcome::Unchanged(order))
            }
            Err(rejection) => {
                tx.rollback().await?;
                Ok(Outcome::Rejected(rejection))
            }
        }
    }

    /// Payment gateway callback
    pub async fn record_payment(
        &self,
        order_id: Uuid,
        payment: PaymentOutcome,
    ) -> Result<Outcome<Order>, LifecycleError> {
        let outcome = self
            .run("record_payment", || self.try_record_payment(order_id, payment))
            .await?;
        self.observe(&outcome);
        Ok(outcome)
    }

    async fn try_record_payment(
        &self,
        order_id: Uuid,
        payment: PaymentOutcome,
    ) -> Result<Outcome<Order>, LifecycleError> {
        let mut tx = self.lock_order(order_id).await?;
        let mut order = tx.order().clone();

        match StatusTransitionValidator::payment_transition(order.payment_status, payment) {
            Ok(Some(payment_status)) => {
                order.set_payment_status(payment_status, Utc::now());
                tx.save_order(&order, None).await?;
                tx.commit().await?;
                tracing::info!(order_id = %order_id, payment_status = %payment_status, "💳 Payment recorded");
                Ok(Outcome::Applied(order))
            }
            Ok(None) => {
                tx.rollback().await?;
                Ok(Outcome::Unchanged(order))
            }
            Err(rejection) => {
                tx.rollback().await?;
                Ok(Outcome::Rejected(rejection))
            }
        }
    }

    // ========================================================================
    // Reads and Back-Office Stock
    // ========================================================================

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, LifecycleError> {
        self.run("get_order", || async move {
            self.store
                .load_order(order_id)
                .await?
                .ok_or(LifecycleError::NotFound(order_id))
        })
        .await
    }

    /// `None` when the product has never been stocked
    pub async fn get_inventory(&self, product_id: Uuid) -> Result<Option<InventoryRecord>, LifecycleError> {
        self.run("get_inventory", || async move {
            Ok::<_, LifecycleError>(self.store.load_inventory(product_id).await?)
        })
        .await
    }

    pub async fn restock(&self, product_id: Uuid, quantity: u32) -> Result<InventoryRecord, LifecycleError> {
        self.run("restock", || async move {
            let mut tx = self.store.begin_stock().await?;
            let record = self.ledger.restock(tx.as_mut(), product_id, quantity).await?;
            tx.commit().await?;
            Ok::<_, LifecycleError>(record)
        })
        .await
    }

    pub async fn set_stock(
        &self,
        product_id: Uuid,
        available: u32,
        threshold: u32,
    ) -> Result<InventoryRecord, LifecycleError> {
        let record = self
            .run("set_stock", || async move {
                let mut tx = self.store.begin_stock().await?;
                let record = self
                    .ledger
                    .set_levels(tx.as_mut(), product_id, available, threshold)
                    .await?;
                tx.commit().await?;
                Ok::<_, LifecycleError>(record)
            })
            .await?;

        tracing::info!(
            product_id = %product_id,
            available = record.available,
            reserved = record.reserved,
            threshold = record.threshold,
            "📦 Stock levels set"
        );
        Ok(record)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn lock_order(&self, order_id: Uuid) -> Result<Box<dyn OrderTransaction>, LifecycleError> {
        self.store
            .begin_order(order_id)
            .await?
            .ok_or(LifecycleError::NotFound(order_id))
    }

    /// Run one attempt per call of `attempt`, retrying transient store
    /// failures with backoff and jitter
    async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, LifecycleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LifecycleError>>,
    {
        let started = Instant::now();

        let result = retry_on_transient(self.retry.clone(), |attempt_number| {
            if attempt_number > 1 {
                self.metrics.record_retry_attempt(operation);
            }
            attempt()
        })
        .await
        .into_result();

        self.metrics
            .record_duration(operation, started.elapsed().as_secs_f64());

        if let Err(error) = &result {
            if !matches!(error, LifecycleError::NotFound(_)) {
                tracing::error!(operation = operation, error = %error, "❌ Order operation failed");
            }
        }
        result
    }

    fn observe(&self, outcome: &Outcome<Order>) {
        if let Outcome::Rejected(rejection) = outcome {
            self.metrics.record_rejection(rejection.reason());
            tracing::info!(reason = rejection.reason(), detail = %rejection, "Order operation rejected");
        }
    }

    fn observe_transition(&self, outcome: &Outcome<Order>) {
        self.observe(outcome);
        if let Outcome::Applied(order) = outcome {
            let last = order.timeline.last();
            if let Some((from, to)) = last.and_then(|event| event.from_status.map(|from| (from, event.to_status))) {
                self.metrics.record_transition(from.as_str(), to.as_str());
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
