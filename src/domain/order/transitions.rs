use super::errors::OrderError;
use super::value_objects::{OrderStatus, PaymentOutcome, PaymentStatus};

// ============================================================================
// Status Transition Validator
// ============================================================================
//
// Forward flow:
//
//   pending -> confirmed -> processing -> shipped -> delivered
//      |           |             |            |
//      +-----------+-------------+------------+--> cancelled
//
// `refunded` is reached only through the refund operation, from
// `cancelled` or `delivered`. It is not part of the forward graph.
//
// The stock guard on `-> confirmed` is enforced by the inventory ledger
// while the product rows are locked, not here, so check and decrement
// cannot be separated by a concurrent reservation.
//
// ============================================================================

pub struct StatusTransitionValidator;

impl StatusTransitionValidator {
    /// Statuses directly reachable from `from` in the forward flow
    pub fn allowed_targets(from: OrderStatus) -> &'static [OrderStatus] {
        use OrderStatus::*;

        match from {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Processing, Cancelled],
            Processing => &[Shipped, Cancelled],
            Shipped => &[Delivered, Cancelled],
            Delivered | Cancelled | Refunded => &[],
        }
    }

    pub fn is_edge(from: OrderStatus, to: OrderStatus) -> bool {
        Self::allowed_targets(from).contains(&to)
    }

    /// Same-status requests succeed so that retried requests are harmless
    pub fn validate(current: OrderStatus, requested: OrderStatus) -> Result<(), OrderError> {
        if current == requested || Self::is_edge(current, requested) {
            Ok(())
        } else {
            Err(OrderError::InvalidTransition {
                from: current,
                to: requested,
            })
        }
    }

    /// Guard for the separate refund transition
    pub fn validate_refund(
        current: OrderStatus,
        payment: PaymentStatus,
    ) -> Result<(), OrderError> {
        match current {
            OrderStatus::Refunded => return Ok(()),
            OrderStatus::Cancelled | OrderStatus::Delivered => {}
            _ => {
                return Err(OrderError::InvalidTransition {
                    from: current,
                    to: OrderStatus::Refunded,
                })
            }
        }

        match payment {
            PaymentStatus::Paid | PaymentStatus::Refunded => Ok(()),
            PaymentStatus::Pending | PaymentStatus::Failed => {
                Err(OrderError::NotRefundable(payment))
            }
        }
    }

    /// Payment status after a gateway report; `None` means nothing changes
    pub fn payment_transition(
        current: PaymentStatus,
        outcome: PaymentOutcome,
    ) -> Result<Option<PaymentStatus>, OrderError> {
        match (current, outcome) {
            (PaymentStatus::Paid, PaymentOutcome::Succeeded)
            | (PaymentStatus::Failed, PaymentOutcome::Failed) => Ok(None),
            (PaymentStatus::Pending | PaymentStatus::Failed, PaymentOutcome::Succeeded) => {
                Ok(Some(PaymentStatus::Paid))
            }
            (PaymentStatus::Pending, PaymentOutcome::Failed) => Ok(Some(PaymentStatus::Failed)),
            (PaymentStatus::Paid | PaymentStatus::Refunded, _) => {
                Err(OrderError::PaymentAlreadySettled(current))
            }
        }
    }
}
