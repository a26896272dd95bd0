// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

// Re-export for public API
pub use server::{health_handler, metrics_handler};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Order status transitions and guard rejections
// - Inventory ledger operations and detected inconsistencies
// - Retry attempts on transient store failures
// - Operation latency
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Order Lifecycle Metrics
    pub orders_created: IntCounter,
    pub order_transitions: IntCounterVec,
    pub order_rejections: IntCounterVec,
    pub operation_duration: HistogramVec,

    // Inventory Metrics
    pub inventory_operations: IntCounterVec,
    pub inventory_inconsistencies: IntCounterVec,
    pub low_stock_alerts: IntCounter,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_created = IntCounter::new("orders_created_total", "Total orders created")?;
        registry.register(Box::new(orders_created.clone()))?;

        let order_transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Applied order status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(order_transitions.clone()))?;

        let order_rejections = IntCounterVec::new(
            Opts::new(
                "order_transition_rejections_total",
                "Order operations rejected by a business rule",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(order_rejections.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "order_operation_duration_seconds",
                "Order lifecycle operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let inventory_operations = IntCounterVec::new(
            Opts::new("inventory_operations_total", "Inventory ledger operations"),
            &["operation"],
        )?;
        registry.register(Box::new(inventory_operations.clone()))?;

        let inventory_inconsistencies = IntCounterVec::new(
            Opts::new(
                "inventory_inconsistencies_total",
                "Ledger operations that had to clamp the reserved counter",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(inventory_inconsistencies.clone()))?;

        let low_stock_alerts = IntCounter::new(
            "inventory_low_stock_total",
            "Reservations that left a product at or below its threshold",
        )?;
        registry.register(Box::new(low_stock_alerts.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            order_transitions,
            order_rejections,
            operation_duration,
            inventory_operations,
            inventory_inconsistencies,
            low_stock_alerts,
            retry_attempts_total,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        self.order_transitions.with_label_values(&[from, to]).inc();
    }

    pub fn record_rejection(&self, reason: &str) {
        self.order_rejections.with_label_values(&[reason]).inc();
    }

    pub fn record_duration(&self, operation: &str, duration_secs: f64) {
        self.operation_duration
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn record_inventory_operation(&self, operation: &str) {
        self.inventory_operations.with_label_values(&[operation]).inc();
    }

    pub fn record_inconsistency(&self, operation: &str) {
        self.inventory_inconsistencies
            .with_label_values(&[operation])
            .inc();
    }

    pub fn record_retry_attempt(&self, operation: &str) {
        self.retry_attempts_total.with_label_values(&[operation]).inc();
    }
}
