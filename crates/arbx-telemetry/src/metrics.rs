//! Prometheus metrics for the execution engine.
//!
//! Covers:
//! - Trade request outcomes per execution mode
//! - Leg order submissions per venue
//! - Fill-wait latency and resolution source
//! - Rate limiter waits and throttling cooldowns
//! - Push update dispositions (matched, early, duplicate)
//! - Compensation orders and reduce-only quarantine
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_gauge,
    CounterVec, Encoder, Gauge, HistogramVec, IntGauge, TextEncoder,
};

use crate::error::TelemetryResult;

/// Trade requests by mode and outcome.
/// Labels: mode (limit_market/market_market/limit_limit/none), outcome
pub static EXECUTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "arbx_executions_total",
        "Total trade requests processed",
        &["mode", "outcome"]
    )
    .unwrap()
});

/// Leg order submissions.
/// Labels: venue, order_type (limit/market), result (accepted/rejected/reduce_only/retry_exhausted)
pub static LEG_ORDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "arbx_leg_orders_total",
        "Total leg order submissions",
        &["venue", "order_type", "result"]
    )
    .unwrap()
});

/// Placement retries by reason (rate_limited/transient).
pub static ORDER_RETRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "arbx_order_retries_total",
        "Total order placement retries",
        &["venue", "reason"]
    )
    .unwrap()
});

/// Time spent waiting for an order to resolve, in milliseconds.
/// Labels: venue, source (ack/push/pull/history/cancel/timeout)
pub static FILL_WAIT_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "arbx_fill_wait_ms",
        "Fill wait duration in milliseconds",
        &["venue", "source"],
        vec![5.0, 20.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 15000.0, 60000.0]
    )
    .unwrap()
});

/// Time spent waiting for a rate limiter reservation, in milliseconds.
pub static RATE_LIMIT_WAIT_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "arbx_rate_limit_wait_ms",
        "Rate limiter reservation wait in milliseconds",
        &["venue"],
        vec![1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0]
    )
    .unwrap()
});

/// Cooldowns registered after throttling responses.
pub static RATE_LIMIT_COOLDOWNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "arbx_rate_limit_cooldowns_total",
        "Total throttling cooldowns registered",
        &["venue"]
    )
    .unwrap()
});

/// Push order updates by disposition (matched/early/duplicate/untracked).
pub static PUSH_UPDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "arbx_push_updates_total",
        "Total push order updates received",
        &["venue", "disposition"]
    )
    .unwrap()
});

/// Anomalous venue reports (e.g. filled status with zero quantity).
pub static FILL_ANOMALIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "arbx_fill_anomalies_total",
        "Total inconsistent fill reports",
        &["venue", "kind"]
    )
    .unwrap()
});

/// Compensation orders by status (filled/partially_filled/failed).
pub static COMPENSATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "arbx_compensations_total",
        "Total compensation orders",
        &["venue", "status"]
    )
    .unwrap()
});

/// Pairs currently quarantined as reduce-only.
pub static REDUCE_ONLY_BLOCKED_PAIRS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "arbx_reduce_only_blocked_pairs",
        "Trade pairs currently restricted to closing-only"
    )
    .unwrap()
});

/// Reduce-only probe results (success/failure).
pub static REDUCE_ONLY_PROBES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "arbx_reduce_only_probes_total",
        "Total reduce-only recovery probes",
        &["venue", "result"]
    )
    .unwrap()
});

/// Opening halt state (1 = halted).
pub static HALTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("arbx_halted", "New openings halted after a failed unwind (1=halted)")
        .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record a finished trade request.
    pub fn execution_finished(mode: &str, outcome: &str) {
        EXECUTIONS_TOTAL.with_label_values(&[mode, outcome]).inc();
    }

    /// Record a leg order submission result.
    pub fn leg_order(venue: &str, order_type: &str, result: &str) {
        LEG_ORDERS_TOTAL
            .with_label_values(&[venue, order_type, result])
            .inc();
    }

    /// Record a placement retry.
    pub fn order_retry(venue: &str, reason: &str) {
        ORDER_RETRIES_TOTAL.with_label_values(&[venue, reason]).inc();
    }

    /// Record how long a fill wait took and how it resolved.
    pub fn fill_wait(venue: &str, source: &str, elapsed_ms: f64) {
        FILL_WAIT_MS
            .with_label_values(&[venue, source])
            .observe(elapsed_ms);
    }

    /// Record a rate limiter reservation wait.
    pub fn rate_limit_wait(venue: &str, waited_ms: f64) {
        RATE_LIMIT_WAIT_MS
            .with_label_values(&[venue])
            .observe(waited_ms);
    }

    /// Record a throttling cooldown.
    pub fn rate_limit_cooldown(venue: &str) {
        RATE_LIMIT_COOLDOWNS_TOTAL.with_label_values(&[venue]).inc();
    }

    /// Record a push update disposition.
    pub fn push_update(venue: &str, disposition: &str) {
        PUSH_UPDATES_TOTAL
            .with_label_values(&[venue, disposition])
            .inc();
    }

    /// Record an inconsistent venue report.
    pub fn fill_anomaly(venue: &str, kind: &str) {
        FILL_ANOMALIES_TOTAL.with_label_values(&[venue, kind]).inc();
    }

    /// Record a compensation order.
    pub fn compensation(venue: &str, status: &str) {
        COMPENSATIONS_TOTAL.with_label_values(&[venue, status]).inc();
    }

    /// Set the number of quarantined pairs.
    pub fn reduce_only_blocked_pairs(count: usize) {
        REDUCE_ONLY_BLOCKED_PAIRS.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Record a reduce-only probe result.
    pub fn reduce_only_probe(venue: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        REDUCE_ONLY_PROBES_TOTAL
            .with_label_values(&[venue, result])
            .inc();
    }

    /// Set the opening halt state.
    pub fn halted(halted: bool) {
        HALTED.set(if halted { 1.0 } else { 0.0 });
    }

    /// Encode all registered metrics in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_metrics() {
        Metrics::execution_finished("market_market", "success");
        Metrics::compensation("alpha", "filled");
        Metrics::reduce_only_blocked_pairs(2);

        let text = Metrics::render().unwrap();
        assert!(text.contains("arbx_executions_total"));
        assert!(text.contains("arbx_compensations_total"));
        assert!(text.contains("arbx_reduce_only_blocked_pairs 2"));
    }
}
