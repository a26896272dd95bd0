use serde::{Deserialize, Serialize};

use super::errors::OrderError;
use super::value_objects::{Money, OrderItem, TaxRate};

// ============================================================================
// Order Total Calculator
// ============================================================================
//
// subtotal = Σ unit_price × quantity
// tax      = subtotal × rate, rounded half-up on the smallest currency unit
// total    = subtotal + shipping_fee + tax - discount
//
// A discount larger than subtotal + shipping_fee + tax is rejected rather
// than clamped to zero.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub tax: Money,
    pub discount: Money,
    pub total: Money,
}

pub struct OrderTotalCalculator;

impl OrderTotalCalculator {
    pub fn compute(
        items: &[OrderItem],
        shipping_fee: Money,
        tax_rate: TaxRate,
        discount: Money,
    ) -> Result<OrderTotals, OrderError> {
        for amount in [shipping_fee, discount] {
            if amount.is_negative() {
                return Err(OrderError::NegativeAmount(amount));
            }
        }

        let subtotal = items.iter().try_fold(Money::ZERO, |acc, item| {
            item.unit_price
                .checked_mul(item.quantity)
                .and_then(|line| acc.checked_add(line))
                .ok_or(OrderError::AmountOverflow)
        })?;

        let tax = tax_rate.apply(subtotal).ok_or(OrderError::AmountOverflow)?;

        let gross = subtotal
            .checked_add(shipping_fee)
            .and_then(|sum| sum.checked_add(tax))
            .ok_or(OrderError::AmountOverflow)?;

        if discount > gross {
            return Err(OrderError::DiscountExceedsTotal { discount, gross });
        }

        let total = gross
            .checked_sub(discount)
            .ok_or(OrderError::AmountOverflow)?;

        Ok(OrderTotals {
            subtotal,
            shipping_fee,
            tax,
            discount,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn item(price: i64, quantity: u32) -> OrderItem {
        OrderItem::new(Uuid::new_v4(), Money::new(price), quantity).unwrap()
    }

    #[test]
    fn test_reference_scenario_totals() {
        let items = vec![item(100, 2), item(50, 1)];
        let totals =
            OrderTotalCalculator::compute(&items, Money::new(10), TaxRate::ZERO, Money::ZERO)
                .unwrap();

        assert_eq!(totals.subtotal, Money::new(250));
        assert_eq!(totals.tax, Money::ZERO);
        assert_eq!(totals.total, Money::new(260));
    }

    #[test]
    fn test_total_identity_with_tax_and_discount() {
        let items = vec![item(45_000, 3), item(12_500, 2)];
        let totals = OrderTotalCalculator::compute(
            &items,
            Money::new(30_000),
            TaxRate::from_bps(800),
            Money::new(20_000),
        )
        .unwrap();

        assert_eq!(totals.subtotal, Money::new(160_000));
        assert_eq!(totals.tax, Money::new(12_800));
        assert_eq!(
            totals.total.amount(),
            totals.subtotal.amount() + totals.shipping_fee.amount() + totals.tax.amount()
                - totals.discount.amount()
        );
    }

    #[test]
    fn test_discount_equal_to_gross_gives_zero_total() {
        let items = vec![item(100, 1)];
        let totals =
            OrderTotalCalculator::compute(&items, Money::new(20), TaxRate::ZERO, Money::new(120))
                .unwrap();
        assert_eq!(totals.total, Money::ZERO);
    }

    #[test]
    fn test_discount_exceeding_gross_is_rejected() {
        let items = vec![item(100, 1)];
        let result =
            OrderTotalCalculator::compute(&items, Money::new(20), TaxRate::ZERO, Money::new(121));

        assert_eq!(
            result,
            Err(OrderError::DiscountExceedsTotal {
                discount: Money::new(121),
                gross: Money::new(120),
            })
        );
    }

    #[test]
    fn test_negative_shipping_fee_is_rejected() {
        let result =
            OrderTotalCalculator::compute(&[item(1, 1)], Money::new(-5), TaxRate::ZERO, Money::ZERO);
        assert!(matches!(result, Err(OrderError::NegativeAmount(_))));
    }

    #[test]
    fn test_subtotal_overflow_is_reported() {
        let items = vec![item(i64::MAX / 2, 1), item(i64::MAX / 2, 1), item(10, 1)];
        let result = OrderTotalCalculator::compute(&items, Money::ZERO, TaxRate::ZERO, Money::ZERO);
        assert_eq!(result, Err(OrderError::AmountOverflow));
    }
}
