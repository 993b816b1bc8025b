//! Prometheus metrics
//!
//! - Allocation outcomes per vehicle type
//! - Release outcomes
//! - Cache synchronizations and detected drift
//! - Operation latency

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref PARK_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parkd_park_total", "Park requests by vehicle type, placement and outcome"),
        &["vehicle_type", "placement", "status"]
    ).unwrap();

    pub static ref UNPARK_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("parkd_unpark_total", "Unpark requests by outcome"),
        &["status"]
    ).unwrap();

    pub static ref SPACES_RELEASED: IntCounter = IntCounter::new(
        "parkd_spaces_released_total",
        "Spaces freed by unpark"
    ).unwrap();

    pub static ref CACHE_SYNCS: IntCounter = IntCounter::new(
        "parkd_cache_syncs_total",
        "Availability cache synchronizations"
    ).unwrap();

    pub static ref CACHE_DRIFT: IntCounter = IntCounter::new(
        "parkd_cache_drift_total",
        "Cache verifications that found drift"
    ).unwrap();

    pub static ref COMMIT_ROLLBACKS: IntCounter = IntCounter::new(
        "parkd_commit_rollbacks_total",
        "Space writes compensated after a failed counter update"
    ).unwrap();

    pub static ref OPERATION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "parkd_operation_duration_seconds",
            "Engine operation duration in seconds"
        ).buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["operation"]
    ).unwrap();
}

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn init_metrics() {
    info!("Initializing Prometheus metrics");

    METRICS_REGISTRY.register(Box::new(PARK_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(UNPARK_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(SPACES_RELEASED.clone())).ok();
    METRICS_REGISTRY.register(Box::new(CACHE_SYNCS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(CACHE_DRIFT.clone())).ok();
    METRICS_REGISTRY.register(Box::new(COMMIT_ROLLBACKS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(OPERATION_DURATION.clone())).ok();
}

/// Export metrics in Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_registered_metrics() {
        init_metrics();
        PARK_TOTAL.with_label_values(&["car", "exact", "ok"]).inc();

        let text = export_metrics();
        assert!(text.contains("parkd_park_total"));
    }
}
