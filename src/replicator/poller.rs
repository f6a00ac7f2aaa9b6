//! Watermark Poller
//!
//! Pulls pending filesystem requests on a fixed interval and hands them to
//! the dispatcher one at a time. The watermark is the highest resource
//! version seen so far; it only moves forward and is never persisted, so a
//! restart rescans from zero and relies on idempotent writes.

use super::dispatcher::RequestDispatcher;
use super::metrics::ReplicatorMetrics;
use crate::domain::ports::RequestServiceRef;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Summary of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Requests read from the stream
    pub fetched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Watermark after the cycle
    pub watermark: u64,
    /// The cycle stopped before the end of the stream
    pub aborted: bool,
}

/// Drives the write path: request service to object store
pub struct WatermarkPoller {
    requests: RequestServiceRef,
    dispatcher: RequestDispatcher,
    metrics: Arc<ReplicatorMetrics>,
    availability_zone: String,
    interval: Duration,
    watermark: u64,
}

impl WatermarkPoller {
    pub fn new(
        requests: RequestServiceRef,
        dispatcher: RequestDispatcher,
        metrics: Arc<ReplicatorMetrics>,
        availability_zone: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            requests,
            dispatcher,
            metrics,
            availability_zone: availability_zone.into(),
            interval,
            watermark: 0,
        }
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Poll until `shutdown` fires. The first cycle starts immediately; a
    /// cycle that overruns the interval delays the next one instead of
    /// bunching them up. Shutdown abandons an in-flight cycle; the writes it
    /// made are idempotent and the next process rescans from zero anyway.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            availability_zone = %self.availability_zone,
            interval_secs = self.interval.as_secs(),
            "watermark poller started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            warn!("abandoning in-flight poll cycle");
                            break;
                        }
                        _ = self.run_cycle() => {}
                    }
                }
            }
        }

        info!(watermark = self.watermark, "watermark poller stopped");
    }

    /// Fetch every request at or above the watermark and dispatch it.
    ///
    /// A failed dispatch does not hold the watermark back: the item is
    /// logged, counted as skipped and passed. An unparsable resource version
    /// ends the cycle with the watermark where it was. A broken stream ends
    /// the cycle keeping the progress made so far.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport {
            watermark: self.watermark,
            ..Default::default()
        };

        let mut stream = match self
            .requests
            .search_filesystem_requests(&self.availability_zone, self.watermark)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!(watermark = self.watermark, error = %e, "failed to search filesystem requests");
                report.aborted = true;
                self.finish(started, "search_failed");
                return report;
            }
        };

        let mut result = "completed";
        while let Some(item) = stream.next().await {
            let request = match item {
                Ok(request) => request,
                Err(e) => {
                    warn!(watermark = self.watermark, error = %e, "request stream broke off");
                    report.aborted = true;
                    result = "stream_error";
                    break;
                }
            };
            report.fetched += 1;

            let action = request.action();
            debug!(
                tenant = %request.tenant(),
                name = %request.name(),
                resource_version = %request.metadata.resource_version,
                action = %action,
                "dispatching filesystem request"
            );

            let dispatched = self.dispatcher.dispatch(&request).await;
            match &dispatched {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        tenant = %request.tenant(),
                        name = %request.name(),
                        resource_version = %request.metadata.resource_version,
                        action = %action,
                        error = %e,
                        "failed to replicate filesystem request"
                    );
                }
            }

            let version = match request.version() {
                Ok(version) => version,
                Err(e) => {
                    error!(watermark = self.watermark, error = %e, "ending poll cycle");
                    report.aborted = true;
                    result = "malformed_version";
                    break;
                }
            };

            if dispatched.is_err() {
                self.metrics
                    .items_skipped
                    .with_label_values(&[action.as_str()])
                    .inc();
                warn!(
                    tenant = %request.tenant(),
                    name = %request.name(),
                    resource_version = version,
                    "watermark advances past failed request"
                );
            }

            self.watermark = self.watermark.max(version);
            self.metrics.set_watermark(self.watermark);
        }

        report.watermark = self.watermark;
        self.finish(started, result);
        debug!(?report, "poll cycle finished");
        report
    }

    fn finish(&self, started: Instant, result: &str) {
        self.metrics.cycles.with_label_values(&[result]).inc();
        self.metrics
            .cycle_duration
            .observe(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_requests::tests::request;
    use crate::domain::ports::{ObjectStore, StorageKind};
    use crate::replicator::dispatcher::tests::Harness;
    use chrono::Utc;

    fn poller(harness: &Harness) -> WatermarkPoller {
        WatermarkPoller::new(
            harness.requests.clone(),
            harness.dispatcher(false),
            harness.metrics.clone(),
            "az1",
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_cycle_advances_watermark() {
        let harness = Harness::new();
        harness.requests.push(request("t1", "fs-1", "3"));
        harness.requests.push(request("t2", "fs-2", "8"));
        let mut poller = poller(&harness);

        let report = poller.run_cycle().await;
        assert_eq!(
            report,
            CycleReport {
                fetched: 2,
                succeeded: 2,
                failed: 0,
                watermark: 8,
                aborted: false,
            }
        );
        assert_eq!(harness.store.len(), 2);

        // Next search starts at the watermark
        poller.run_cycle().await;
        assert_eq!(harness.requests.searches(), vec![0, 8]);
        assert_eq!(poller.watermark(), 8);
    }

    #[tokio::test]
    async fn test_watermark_never_decreases() {
        let harness = Harness::new();
        harness.requests.push(request("t1", "fs-1", "9"));
        harness.requests.push(request("t1", "fs-2", "4"));
        let mut poller = poller(&harness);

        let report = poller.run_cycle().await;
        assert_eq!(report.watermark, 9);
        assert_eq!(harness.metrics.watermark.get(), 9);
    }

    #[tokio::test]
    async fn test_failed_item_is_skipped() {
        let harness = Harness::new();
        let mut bad = request("t1", "fs-1", "5");
        bad.spec.request.storage = "lots".into();
        harness.requests.push(bad);
        harness.requests.push(request("t1", "fs-2", "6"));
        let mut poller = poller(&harness);

        let report = poller.run_cycle().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.watermark, 6);
        assert_eq!(
            harness
                .metrics
                .items_skipped
                .with_label_values(&["create"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_malformed_version_aborts_cycle() {
        let harness = Harness::new();
        harness.requests.push(request("t1", "fs-1", "2"));
        harness.requests.push(request("t1", "fs-2", "12abc"));
        harness.requests.push(request("t1", "fs-3", "14"));
        let mut poller = poller(&harness);

        // Served as 2, 14, then the unparsable one
        let report = poller.run_cycle().await;
        assert!(report.aborted);
        assert_eq!(report.watermark, 14);
        // Dispatch happens before the version is looked at
        assert_eq!(report.fetched, 3);
        assert_eq!(harness.store.len(), 3);
        assert_eq!(
            harness
                .metrics
                .cycles
                .with_label_values(&["malformed_version"])
                .get(),
            1
        );

        let report = poller.run_cycle().await;
        assert!(report.aborted);
        assert_eq!(report.watermark, 14);
        assert_eq!(harness.requests.searches(), vec![0, 14]);
    }

    #[tokio::test]
    async fn test_stream_error_keeps_progress() {
        let harness = Harness::new();
        harness.requests.push(request("t1", "fs-1", "2"));
        harness.requests.push(request("t1", "fs-2", "3"));
        harness.requests.fail_stream_after(1);
        let mut poller = poller(&harness);

        let report = poller.run_cycle().await;
        assert!(report.aborted);
        assert_eq!(report.watermark, 2);

        let report = poller.run_cycle().await;
        assert!(!report.aborted);
        assert_eq!(report.watermark, 3);
        assert_eq!(harness.store.len(), 2);
    }

    #[tokio::test]
    async fn test_search_failure_ends_cycle() {
        let harness = Harness::new();
        harness.requests.push(request("t1", "fs-1", "2"));
        harness.requests.fail_next_search();
        let mut poller = poller(&harness);

        let report = poller.run_cycle().await;
        assert!(report.aborted);
        assert_eq!(report.fetched, 0);
        assert_eq!(
            harness
                .metrics
                .cycles
                .with_label_values(&["search_failed"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_create_then_delete_releases_nothing_early() {
        let harness = Harness::new();
        harness.requests.push(request("t1", "fs-1", "1"));
        let mut poller = poller(&harness);
        poller.run_cycle().await;

        let mut delete = request("t1", "fs-1", "2");
        delete.metadata.deletion_timestamp = Some(Utc::now());
        harness.requests.push(delete);
        poller.run_cycle().await;

        assert!(harness
            .store
            .get(StorageKind::Standard, "t1", "fs-1")
            .await
            .is_err());
        assert!(harness.requests.released().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let harness = Harness::new();
        harness.requests.push(request("t1", "fs-1", "1"));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(poller(&harness).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(harness.store.len(), 1);
        assert!(harness.requests.searches().len() >= 2);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_stalled_search() {
        let harness = Harness::new();
        harness.requests.stall_searches();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(poller(&harness).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(harness.requests.searches(), vec![0]);
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("poller ignored shutdown")
            .unwrap();
    }
}
