//! Replicator Metrics
//!
//! Prometheus counters for both replication paths. Items that fail and are
//! then passed by the watermark are counted separately so operators can see
//! what the liveness-over-completeness policy dropped.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "filesystem_replicator";

/// Metrics shared by the poller, dispatcher and watchers
pub struct ReplicatorMetrics {
    registry: Registry,
    /// Requests handled, by action, kind and outcome
    pub items_processed: IntCounterVec,
    /// Failed requests the watermark moved past
    pub items_skipped: IntCounterVec,
    /// Current replication cursor
    pub watermark: IntGauge,
    /// Poll cycles by result
    pub cycles: IntCounterVec,
    pub cycle_duration: Histogram,
    /// Store attempts that failed and were retried
    pub store_retries: IntCounterVec,
    /// Status notifications by kind and result
    pub status_updates: IntCounterVec,
    /// Finalizer releases by result
    pub finalizer_releases: IntCounterVec,
}

impl ReplicatorMetrics {
    /// Create metrics on a fresh registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered on `registry`
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let items_processed = IntCounterVec::new(
            Opts::new("items_processed_total", "Filesystem requests processed")
                .namespace(NAMESPACE),
            &["action", "kind", "outcome"],
        )
        .map_err(metrics_error)?;
        let items_skipped = IntCounterVec::new(
            Opts::new(
                "items_skipped_total",
                "Failed filesystem requests the watermark advanced past",
            )
            .namespace(NAMESPACE),
            &["action"],
        )
        .map_err(metrics_error)?;
        let watermark = IntGauge::with_opts(
            Opts::new("watermark", "Highest resource version replicated").namespace(NAMESPACE),
        )
        .map_err(metrics_error)?;
        let cycles = IntCounterVec::new(
            Opts::new("poll_cycles_total", "Poll cycles by result").namespace(NAMESPACE),
            &["result"],
        )
        .map_err(metrics_error)?;
        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new("poll_cycle_duration_seconds", "Duration of poll cycles")
                .namespace(NAMESPACE),
        )
        .map_err(metrics_error)?;
        let store_retries = IntCounterVec::new(
            Opts::new("store_retries_total", "Object store attempts retried")
                .namespace(NAMESPACE),
            &["operation"],
        )
        .map_err(metrics_error)?;
        let status_updates = IntCounterVec::new(
            Opts::new("status_updates_total", "Status notifications from the object store")
                .namespace(NAMESPACE),
            &["kind", "result"],
        )
        .map_err(metrics_error)?;
        let finalizer_releases = IntCounterVec::new(
            Opts::new("finalizer_releases_total", "Finalizer release calls")
                .namespace(NAMESPACE),
            &["result"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(items_processed.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(items_skipped.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(watermark.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(cycles.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(cycle_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(store_retries.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(status_updates.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(finalizer_releases.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            items_processed,
            items_skipped,
            watermark,
            cycles,
            cycle_duration,
            store_retries,
            status_updates,
            finalizer_releases,
        })
    }

    pub fn set_watermark(&self, watermark: u64) {
        self.watermark
            .set(i64::try_from(watermark).unwrap_or(i64::MAX));
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn metrics_error(err: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", err))
}
