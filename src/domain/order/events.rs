use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::OrderStatus;

// ============================================================================
// Order Timeline Events
// ============================================================================
//
// Immutable facts appended to an order's timeline. Current state lives on
// the order itself; the timeline is audit history only.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransitionEvent {
    /// `None` for the creation entry
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub triggered_by: String,
    pub note: Option<String>,
}

impl StatusTransitionEvent {
    pub fn created(actor: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            from_status: None,
            to_status: OrderStatus::Pending,
            timestamp,
            triggered_by: actor.to_string(),
            note: Some("Order created".to_string()),
        }
    }

    pub fn transition(
        from: OrderStatus,
        to: OrderStatus,
        actor: &str,
        note: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            from_status: Some(from),
            to_status: to,
            timestamp,
            triggered_by: actor.to_string(),
            note: note.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_event_has_no_source_status() {
        let event = StatusTransitionEvent::created("checkout", Utc::now());
        assert_eq!(event.from_status, None);
        assert_eq!(event.to_status, OrderStatus::Pending);
        assert_eq!(event.triggered_by, "checkout");
    }

    #[test]
    fn test_event_serialization_uses_camel_case() {
        let event = StatusTransitionEvent::transition(
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            "admin",
            Some("called customer"),
            Utc::now(),
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["fromStatus"], "pending");
        assert_eq!(json["toStatus"], "confirmed");
        assert_eq!(json["triggeredBy"], "admin");
    }
}
