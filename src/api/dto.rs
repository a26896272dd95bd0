use serde::{Deserialize, Serialize};

use crate::domain::order::{Money, NewOrder, NewOrderItem, PaymentOutcome, TaxRate};

// ============================================================================
// Request Bodies
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<NewOrderItem>,
    #[serde(default)]
    pub shipping_fee: Money,
    /// Falls back to the configured default rate when absent
    #[serde(default)]
    pub tax_rate_bps: Option<u32>,
    #[serde(default)]
    pub discount: Money,
}

impl From<CreateOrderRequest> for NewOrder {
    fn from(request: CreateOrderRequest) -> Self {
        NewOrder {
            items: request.items,
            shipping_fee: request.shipping_fee,
            tax_rate: request.tax_rate_bps.map(TaxRate::from_bps),
            discount: request.discount,
        }
    }
}

/// Body of `PUT /orders/{id}/status`. The status stays a string here so
/// that an unknown value is reported as `UnknownStatus`, not as a
/// malformed body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateItemsRequest {
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefundRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub outcome: PaymentOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStockRequest {
    pub available: u32,
    #[serde(default)]
    pub threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
}
