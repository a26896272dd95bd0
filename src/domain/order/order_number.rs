use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;

use crate::store::{SequenceStore, StoreError};

// ============================================================================
// Order Number Generator
// ============================================================================
//
// Format: <PREFIX><YYYYMMDD><sequence>, e.g. DH20261018000042.
//
// The sequence is a per-day counter keyed by prefix and local date. Each
// increment commits on its own, outside the order transaction: an order that
// fails after taking a number leaves a gap, never a duplicate.
//
// Numbers of one prefix sort by date, then by sequence, for up to 999 999
// orders a day. Past that the sequence grows a digit wider and lexical order
// no longer matches creation order within that day; uniqueness still holds.
//
// ============================================================================

const SEQUENCE_WIDTH: usize = 6;

pub struct OrderNumberGenerator {
    sequences: Arc<dyn SequenceStore>,
    prefix: String,
    offset: FixedOffset,
}

impl OrderNumberGenerator {
    pub fn new(sequences: Arc<dyn SequenceStore>, prefix: impl Into<String>, offset: FixedOffset) -> Self {
        Self {
            sequences,
            prefix: prefix.into(),
            offset,
        }
    }

    pub async fn next(&self) -> Result<String, StoreError> {
        self.next_at(Utc::now()).await
    }

    pub async fn next_at(&self, now: DateTime<Utc>) -> Result<String, StoreError> {
        let day = now.with_timezone(&self.offset).format("%Y%m%d").to_string();
        let key = format!("{}{}", self.prefix, day);
        let sequence = self.sequences.next_value(&key).await?;

        Ok(format_order_number(&self.prefix, &day, sequence))
    }
}

pub fn format_order_number(prefix: &str, day: &str, sequence: u64) -> String {
    format!("{prefix}{day}{sequence:0width$}", width = SEQUENCE_WIDTH)
}
