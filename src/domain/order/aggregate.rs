use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::errors::OrderError;
use super::events::StatusTransitionEvent;
use super::totals::{OrderTotalCalculator, OrderTotals};
use super::value_objects::{Money, NewOrderItem, OrderItem, OrderStatus, PaymentStatus, TaxRate};

// ============================================================================
// Order - the aggregate mutated by the lifecycle service
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    // Identity
    pub id: Uuid,
    pub order_number: String,
    pub version: i64,

    // Current State
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub items: Vec<OrderItem>,

    // Amounts
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub tax: Money,
    pub discount: Money,
    pub total: Money,
    pub tax_rate: TaxRate,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub timeline: Vec<StatusTransitionEvent>,
}

/// Checkout input for a new order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub items: Vec<NewOrderItem>,
    #[serde(default)]
    pub shipping_fee: Money,
    /// Falls back to the configured default rate
    #[serde(default)]
    pub tax_rate: Option<TaxRate>,
    #[serde(default)]
    pub discount: Money,
}

/// A validated order, priced but not yet numbered
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub tax_rate: TaxRate,
}

impl OrderDraft {
    pub fn prepare(new_order: &NewOrder, default_tax_rate: TaxRate) -> Result<Self, OrderError> {
        let items = build_items(&new_order.items)?;
        let tax_rate = new_order.tax_rate.unwrap_or(default_tax_rate);
        let totals = OrderTotalCalculator::compute(
            &items,
            new_order.shipping_fee,
            tax_rate,
            new_order.discount,
        )?;

        Ok(Self {
            items,
            totals,
            tax_rate,
        })
    }
}

/// Validate raw line items. An order always has at least one line, and the
/// quantity merged per product must still fit a stock counter.
pub fn build_items(items: &[NewOrderItem]) -> Result<Vec<OrderItem>, OrderError> {
    if items.is_empty() {
        return Err(OrderError::EmptyItems);
    }

    let items = items
        .iter()
        .map(|item| OrderItem::new(item.product_id, item.unit_price, item.quantity))
        .collect::<Result<Vec<_>, _>>()?;
    merged_quantities(&items)?;
    Ok(items)
}

fn merged_quantities(items: &[OrderItem]) -> Result<BTreeMap<Uuid, u32>, OrderError> {
    let mut lines = BTreeMap::new();
    for item in items {
        let quantity = lines.entry(item.product_id).or_insert(0u32);
        *quantity = quantity
            .checked_add(item.quantity)
            .ok_or(OrderError::QuantityOverflow(item.product_id))?;
    }
    Ok(lines)
}

impl Order {
    pub fn new(
        id: Uuid,
        order_number: String,
        draft: OrderDraft,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let mut order = Self {
            id,
            order_number,
            version: 1,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            items: draft.items,
            subtotal: Money::ZERO,
            shipping_fee: Money::ZERO,
            tax: Money::ZERO,
            discount: Money::ZERO,
            total: Money::ZERO,
            tax_rate: draft.tax_rate,
            created_at: now,
            updated_at: now,
            timeline: vec![StatusTransitionEvent::created(actor, now)],
        };
        order.set_totals(draft.totals);
        debug_assert!(order.totals_consistent());
        order
    }

    fn set_totals(&mut self, totals: OrderTotals) {
        self.subtotal = totals.subtotal;
        self.shipping_fee = totals.shipping_fee;
        self.tax = totals.tax;
        self.discount = totals.discount;
        self.total = totals.total;
    }

    /// Replace line items and recompute totals. Only a pending order can
    /// change its items, since no stock is held for it yet.
    pub fn replace_items(
        &mut self,
        items: &[NewOrderItem],
        now: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        if self.status != OrderStatus::Pending {
            return Err(OrderError::ItemsLocked(self.status));
        }

        let items = build_items(items)?;
        if items == self.items {
            return Ok(false);
        }

        let totals =
            OrderTotalCalculator::compute(&items, self.shipping_fee, self.tax_rate, self.discount)?;

        self.items = items;
        self.set_totals(totals);
        self.touch(now);
        Ok(true)
    }

    /// Record a validated status change and return the appended event
    pub fn apply_transition(
        &mut self,
        to: OrderStatus,
        actor: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> StatusTransitionEvent {
        let event = StatusTransitionEvent::transition(self.status, to, actor, note, now);
        self.status = to;
        self.timeline.push(event.clone());
        self.touch(now);
        event
    }

    pub fn set_payment_status(&mut self, payment_status: PaymentStatus, now: DateTime<Utc>) {
        self.payment_status = payment_status;
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }

    /// Quantity per product, merged across lines, in ascending product order.
    /// Items only enter an order through `build_items`, which rejects a merge
    /// that would overflow.
    pub fn stock_lines(&self) -> Result<BTreeMap<Uuid, u32>, OrderError> {
        merged_quantities(&self.items)
    }

    /// `total == subtotal + shipping_fee + tax - discount`, `total >= 0`, and
    /// `subtotal == Σ line totals`
    pub fn totals_consistent(&self) -> bool {
        let line_sum: i128 = self
            .items
            .iter()
            .map(|item| i128::from(item.unit_price.amount()) * i128::from(item.quantity))
            .sum();
        let expected_total = i128::from(self.subtotal.amount())
            + i128::from(self.shipping_fee.amount())
            + i128::from(self.tax.amount())
            - i128::from(self.discount.amount());

        line_sum == i128::from(self.subtotal.amount())
            && expected_total == i128::from(self.total.amount())
            && !self.total.is_negative()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order(lines: &[(Uuid, i64, u32)], shipping_fee: i64) -> NewOrder {
        NewOrder {
            items: lines
                .iter()
                .map(|(product_id, price, quantity)| NewOrderItem {
                    product_id: *product_id,
                    unit_price: Money::new(*price),
                    quantity: *quantity,
                })
                .collect(),
            shipping_fee: Money::new(shipping_fee),
            tax_rate: None,
            discount: Money::ZERO,
        }
    }

    fn create(lines: &[(Uuid, i64, u32)]) -> Order {
        let draft = OrderDraft::prepare(&new_order(lines, 10), TaxRate::ZERO).unwrap();
        Order::new(Uuid::now_v7(), "DH20260101000001".to_string(), draft, "checkout", Utc::now())
    }

    #[test]
    fn test_new_order_starts_pending_with_creation_entry() {
        let order = create(&[(Uuid::new_v4(), 100, 2), (Uuid::new_v4(), 50, 1)]);

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.subtotal, Money::new(250));
        assert_eq!(order.total, Money::new(260));
        assert_eq!(order.timeline.len(), 1);
        assert!(order.totals_consistent());
    }

    #[test]
    fn test_draft_rejects_empty_items() {
        let result = OrderDraft::prepare(&new_order(&[], 0), TaxRate::ZERO);
        assert_eq!(result, Err(OrderError::EmptyItems));
    }

    #[test]
    fn test_draft_uses_default_tax_rate() {
        let draft = OrderDraft::prepare(&new_order(&[(Uuid::new_v4(), 1000, 1)], 0), TaxRate::from_bps(1000))
            .unwrap();
        assert_eq!(draft.totals.tax, Money::new(100));
        assert_eq!(draft.tax_rate.bps(), 1000);
    }

    #[test]
    fn test_replace_items_recomputes_totals() {
        let product = Uuid::new_v4();
        let mut order = create(&[(product, 100, 2)]);
        let version = order.version;

        let changed = order
            .replace_items(
                &[NewOrderItem {
                    product_id: product,
                    unit_price: Money::new(100),
                    quantity: 5,
                }],
                Utc::now(),
            )
            .unwrap();

        assert!(changed);
        assert_eq!(order.subtotal, Money::new(500));
        assert_eq!(order.total, Money::new(510));
        assert_eq!(order.version, version + 1);
        assert!(order.totals_consistent());
    }

    #[test]
    fn test_replace_items_with_same_items_is_noop() {
        let product = Uuid::new_v4();
        let mut order = create(&[(product, 100, 2)]);
        let before = order.clone();

        let changed = order
            .replace_items(
                &[NewOrderItem {
                    product_id: product,
                    unit_price: Money::new(100),
                    quantity: 2,
                }],
                Utc::now(),
            )
            .unwrap();

        assert!(!changed);
        assert_eq!(order, before);
    }

    #[test]
    fn test_items_locked_after_confirmation() {
        let mut order = create(&[(Uuid::new_v4(), 100, 2)]);
        order.apply_transition(OrderStatus::Confirmed, "admin", None, Utc::now());

        let result = order.replace_items(
            &[NewOrderItem {
                product_id: Uuid::new_v4(),
                unit_price: Money::new(1),
                quantity: 1,
            }],
            Utc::now(),
        );
        assert_eq!(result, Err(OrderError::ItemsLocked(OrderStatus::Confirmed)));
    }

    #[test]
    fn test_apply_transition_appends_event() {
        let mut order = create(&[(Uuid::new_v4(), 100, 2)]);
        let event = order.apply_transition(OrderStatus::Confirmed, "admin", Some("ok"), Utc::now());

        assert_eq!(event.from_status, Some(OrderStatus::Pending));
        assert_eq!(event.to_status, OrderStatus::Confirmed);
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.timeline.len(), 2);
        assert_eq!(order.timeline.last(), Some(&event));
    }

    #[test]
    fn test_stock_lines_merge_duplicate_products() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let order = create(&[(a, 100, 2), (b, 50, 1), (a, 100, 3)]);

        let lines = order.stock_lines().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[&a], 5);
        assert_eq!(lines[&b], 1);
    }

    #[test]
    fn test_merged_quantity_overflow_is_rejected() {
        let product = Uuid::new_v4();
        let result = OrderDraft::prepare(&new_order(&[(product, 1, u32::MAX), (product, 1, 5)], 0), TaxRate::ZERO);
        assert_eq!(result, Err(OrderError::QuantityOverflow(product)));
    }

    #[test]
    fn test_replace_items_rejects_merged_quantity_overflow() {
        let product = Uuid::new_v4();
        let mut order = create(&[(product, 1, 2)]);
        let before = order.clone();

        let result = order.replace_items(
            &[
                NewOrderItem {
                    product_id: product,
                    unit_price: Money::new(1),
                    quantity: u32::MAX,
                },
                NewOrderItem {
                    product_id: product,
                    unit_price: Money::new(1),
                    quantity: 1,
                },
            ],
            Utc::now(),
        );

        assert_eq!(result, Err(OrderError::QuantityOverflow(product)));
        assert_eq!(order, before);
    }
}
