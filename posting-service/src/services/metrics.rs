//! Prometheus metrics for posting-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Triage decisions by outcome (auto_post, review_medium, review_high, rejected).
pub static TRIAGE_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "posting_triage_decisions_total",
        "Total number of scored posting candidates by routing decision",
        &["decision"]
    )
    .expect("Failed to register triage_decisions_total")
});

/// Voucher posts by status (no tenant label to keep cardinality bounded).
pub static VOUCHERS_POSTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "posting_vouchers_total",
        "Total number of voucher post attempts",
        &["source_type", "status"]
    )
    .expect("Failed to register vouchers_total")
});

/// Sub-ledger rows written by the posting fan-out.
pub static SUBLEDGER_FANOUT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "posting_subledger_fanout_total",
        "Total number of sub-ledger entries created or reduced by posting",
        &["ledger", "action"]
    )
    .expect("Failed to register subledger_fanout_total")
});

/// Queue claim attempts by result (claimed, empty, timeout).
pub static QUEUE_CLAIMS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "posting_queue_claims_total",
        "Total number of review task claim attempts",
        &["result"]
    )
    .expect("Failed to register queue_claims_total")
});

/// Tasks touched by the lease sweeper (requeued, failed).
pub static QUEUE_SWEEP_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "posting_queue_sweep_total",
        "Total number of expired leases handled by the sweeper",
        &["action"]
    )
    .expect("Failed to register queue_sweep_total")
});

/// Bank lines imported by result (auto_matched, queued, duplicate).
pub static BANK_IMPORTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "posting_bank_imports_total",
        "Total number of imported bank transactions by result",
        &["result"]
    )
    .expect("Failed to register bank_imports_total")
});

/// Match confirmations and reversals by method.
pub static MATCHES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "posting_matches_total",
        "Total number of reconciliation matches confirmed or reversed",
        &["method", "action"]
    )
    .expect("Failed to register matches_total")
});

/// Error counter for alerting, labelled by taxonomy class.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "posting_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "posting_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&TRIAGE_DECISIONS_TOTAL);
    Lazy::force(&VOUCHERS_POSTED_TOTAL);
    Lazy::force(&SUBLEDGER_FANOUT_TOTAL);
    Lazy::force(&QUEUE_CLAIMS_TOTAL);
    Lazy::force(&QUEUE_SWEEP_TOTAL);
    Lazy::force(&BANK_IMPORTS_TOTAL);
    Lazy::force(&MATCHES_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
