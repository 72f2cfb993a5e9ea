//! Prometheus metrics for the grid execution core.
//!
//! Metrics cover:
//! - Dispatch (path taken, fan-out size, completion status and latency)
//! - Sub-operation failures and cancellations
//! - Functional application (entries applied per command, outcome classes)
//! - Node invocations and transaction terminations
//!
//! # Safety
//!
//! All metrics are registered to a custom registry with the "kvgrid" prefix to
//! avoid name collisions with other libraries using the default Prometheus
//! registry. Registration errors are logged and the metric keeps working
//! unregistered instead of panicking.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Registry, TextEncoder, opts,
};
use tracing::warn;

/// Custom Prometheus registry for grid metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("kvgrid".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================

/// Declare an IntCounterVec metric with labels.
macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare an IntCounter metric (no labels).
macro_rules! define_counter {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounter> =
            Lazy::new(|| register_int_counter_safe(&REGISTRY, $metric_name, $help));
    };
}

/// Declare a HistogramVec metric with labels and buckets.
macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Dispatch metrics
// =============================================================================

define_counter_vec!(
    DISPATCH_PATHS,
    "dispatch_paths_total",
    "Logical operations by dispatch path (empty, inline, parallel)",
    ["operation", "path"]
);
define_histogram_vec!(
    DISPATCH_FANOUT,
    "dispatch_fanout",
    "Number of sub-operations per logical operation",
    ["operation"],
    [1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0]
);
define_counter_vec!(
    LOGICAL_COMPLETIONS,
    "logical_completions_total",
    "Logical operation completions by status",
    ["operation", "status"]
);
define_histogram_vec!(
    DISPATCH_DURATION,
    "dispatch_duration_seconds",
    "Logical operation duration in seconds",
    ["operation", "status"],
    [0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
);
define_counter_vec!(
    SUB_OPERATION_FAILURES,
    "sub_operation_failures_total",
    "Sub-operation failures by error class",
    ["operation", "error"]
);
define_counter_vec!(
    SUB_OPERATION_CANCELLATIONS,
    "sub_operation_cancellations_total",
    "Sub-operations cancelled after their logical operation failed",
    ["operation"]
);
define_counter!(
    WORKER_TASKS_SPAWNED,
    "worker_tasks_spawned_total",
    "Tasks spawned on worker pools"
);

// =============================================================================
// Functional application metrics
// =============================================================================

define_counter_vec!(
    APPLIED_ENTRIES,
    "applied_entries_total",
    "Entries a function was applied to, by command",
    ["command"]
);
define_counter_vec!(
    ENTRY_OUTCOMES,
    "entry_outcomes_total",
    "Classified entry outcomes (hit, miss, put, delete)",
    ["kind"]
);
define_counter_vec!(
    INVOCATIONS,
    "invocations_total",
    "Command invocations on a node by status",
    ["command", "status"]
);
define_counter_vec!(
    TRANSACTION_TERMINATIONS,
    "transaction_terminations_total",
    "Transactions whose statistics were terminated, by outcome",
    ["outcome"]
);

// ============================================================================
// Safe Registration Helpers
// ============================================================================

/// Register an IntCounterVec safely, returning a fallback on error.
fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
            counter
        }
    }
}

/// Register an IntCounter safely, returning a fallback on error.
fn register_int_counter_safe(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounter metric, using unregistered fallback");
            counter
        }
    }
}

/// Register a HistogramVec safely, returning a fallback on error.
fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
            histogram
        }
    }
}

/// Force registration of every metric.
///
/// Idempotent. Metrics otherwise register lazily on first use, which leaves
/// them out of scrapes until something records.
pub fn init_metrics() {
    let _ = &*DISPATCH_PATHS;
    let _ = &*DISPATCH_FANOUT;
    let _ = &*LOGICAL_COMPLETIONS;
    let _ = &*DISPATCH_DURATION;
    let _ = &*SUB_OPERATION_FAILURES;
    let _ = &*SUB_OPERATION_CANCELLATIONS;
    let _ = &*WORKER_TASKS_SPAWNED;
    let _ = &*APPLIED_ENTRIES;
    let _ = &*ENTRY_OUTCOMES;
    let _ = &*INVOCATIONS;
    let _ = &*TRANSACTION_TERMINATIONS;
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Gather all metric families from the registry.
pub fn gather_metrics() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

// ============================================================================
// Recording helpers
// ============================================================================

/// Record which dispatch path a logical operation took.
pub fn record_dispatch_path(operation: &str, path: &str, fanout: usize) {
    DISPATCH_PATHS.with_label_values(&[operation, path]).inc();
    DISPATCH_FANOUT
        .with_label_values(&[operation])
        .observe(fanout as f64);
}

/// Record the terminal state of a logical operation.
pub fn record_completion(operation: &str, status: &str, duration_secs: f64) {
    LOGICAL_COMPLETIONS
        .with_label_values(&[operation, status])
        .inc();
    DISPATCH_DURATION
        .with_label_values(&[operation, status])
        .observe(duration_secs);
}

pub fn record_sub_operation_failure(operation: &str, error_label: &str) {
    SUB_OPERATION_FAILURES
        .with_label_values(&[operation, error_label])
        .inc();
}

pub fn record_cancellations(operation: &str, count: usize) {
    if count > 0 {
        SUB_OPERATION_CANCELLATIONS
            .with_label_values(&[operation])
            .inc_by(count as u64);
    }
}

pub fn record_worker_spawn() {
    WORKER_TASKS_SPAWNED.inc();
}

pub fn record_applied_entries(command: &str, count: usize) {
    APPLIED_ENTRIES
        .with_label_values(&[command])
        .inc_by(count as u64);
}

pub fn record_entry_outcome(kind: &str) {
    ENTRY_OUTCOMES.with_label_values(&[kind]).inc();
}

pub fn record_invocation(command: &str, status: &str) {
    INVOCATIONS.with_label_values(&[command, status]).inc();
}

pub fn record_transaction_termination(outcome: &str) {
    TRANSACTION_TERMINATIONS.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_recorded_metrics_are_encoded_with_prefix() {
        record_dispatch_path("metrics_test_op", "parallel", 3);
        record_completion("metrics_test_op", "success", 0.002);

        let text = encode_metrics().unwrap();
        assert!(text.contains("kvgrid_dispatch_paths_total"));
        assert!(text.contains("metrics_test_op"));
    }

    #[test]
    fn test_cancellations_counter_increments_by_count() {
        let before = SUB_OPERATION_CANCELLATIONS
            .with_label_values(&["metrics_cancel_op"])
            .get();
        record_cancellations("metrics_cancel_op", 2);
        record_cancellations("metrics_cancel_op", 0);
        let after = SUB_OPERATION_CANCELLATIONS
            .with_label_values(&["metrics_cancel_op"])
            .get();
        assert_eq!(after - before, 2);
    }

    #[test]
    fn test_gather_includes_applied_entries() {
        record_applied_entries("metrics_test_command", 4);
        let families = gather_metrics();
        assert!(
            families
                .iter()
                .any(|f| f.get_name() == "kvgrid_applied_entries_total")
        );
    }
}
