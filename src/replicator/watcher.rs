//! Status Feedback Watcher
//!
//! Follows change notifications of one storage kind and reports status
//! changes back to the request service. A deletion in the store is the
//! signal that the request's deletion hold can go.

use super::finalizer::FinalizerReleaser;
use super::metrics::ReplicatorMetrics;
use super::retry::RetryExecutor;
use crate::crd::FilesystemPhase;
use crate::domain::ports::{
    ChangeEvent, ObjectStoreRef, RequestServiceRef, StatusDetail, StatusUpdate, StorageKind,
    StorageResource,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// The part of a resource the request service cares about. Two versions of
/// a resource with equal fingerprints are not worth a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusFingerprint {
    pub phase: FilesystemPhase,
    pub detail: StatusDetail,
}

impl StatusFingerprint {
    pub fn of(resource: &StorageResource) -> Self {
        Self {
            phase: resource.phase(),
            detail: resource.status_detail(),
        }
    }
}

/// What handling one change notification amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Creation notifications carry nothing new
    Ignored,
    /// Status-relevant fields did not change
    Deduplicated,
    Forwarded,
    ForwardFailed,
    FinalizerReleased,
    FinalizerFailed,
}

/// Watches one storage kind across all namespaces
pub struct StatusWatcher {
    kind: StorageKind,
    store: ObjectStoreRef,
    requests: RequestServiceRef,
    retry: RetryExecutor,
    finalizer: FinalizerReleaser,
    metrics: Arc<ReplicatorMetrics>,
    resubscribe_delay: Duration,
}

impl StatusWatcher {
    pub fn new(
        kind: StorageKind,
        store: ObjectStoreRef,
        requests: RequestServiceRef,
        retry: RetryExecutor,
        finalizer: FinalizerReleaser,
        metrics: Arc<ReplicatorMetrics>,
    ) -> Self {
        Self {
            kind,
            store,
            requests,
            retry,
            finalizer,
            metrics,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }

    /// Pause before subscribing again after the change stream ended
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    /// Follow the change stream until `shutdown` fires, subscribing again
    /// whenever it ends.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(kind = %self.kind, "status watcher started");

        loop {
            let mut events = self.store.watch(self.kind);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!(kind = %self.kind, "status watcher stopped");
                        return;
                    }
                    next = events.next() => match next {
                        Some(Ok(event)) => {
                            tokio::select! {
                                _ = shutdown.cancelled() => {
                                    warn!(kind = %self.kind, "abandoning in-flight change notification");
                                    return;
                                }
                                _ = self.handle_event(event) => {}
                            }
                        }
                        Some(Err(e)) => {
                            warn!(kind = %self.kind, error = %e, "change stream error");
                        }
                        None => break,
                    }
                }
            }

            warn!(
                kind = %self.kind,
                delay_ms = self.resubscribe_delay.as_millis() as u64,
                "change stream ended, subscribing again"
            );
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(kind = %self.kind, "status watcher stopped");
                    return;
                }
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
            }
        }
    }

    /// React to one change notification. Failures are logged and counted,
    /// never returned.
    pub async fn handle_event(&self, event: ChangeEvent) -> WatchOutcome {
        let outcome = match event {
            ChangeEvent::Added(_) => WatchOutcome::Ignored,
            ChangeEvent::Updated { old, new } => {
                if StatusFingerprint::of(&old) == StatusFingerprint::of(&new) {
                    debug!(
                        kind = %self.kind,
                        tenant = %new.namespace(),
                        name = %new.name(),
                        "no status change, skipping"
                    );
                    WatchOutcome::Deduplicated
                } else {
                    self.forward(&new).await
                }
            }
            ChangeEvent::Deleted(resource) => {
                info!(
                    kind = %self.kind,
                    tenant = %resource.namespace(),
                    name = %resource.name(),
                    "storage resource deleted"
                );
                if self
                    .finalizer
                    .release(resource.namespace(), resource.name())
                    .await
                {
                    WatchOutcome::FinalizerReleased
                } else {
                    WatchOutcome::FinalizerFailed
                }
            }
        };

        let result = match outcome {
            WatchOutcome::Ignored => "ignored",
            WatchOutcome::Deduplicated => "deduplicated",
            WatchOutcome::Forwarded => "forwarded",
            WatchOutcome::ForwardFailed => "failed",
            WatchOutcome::FinalizerReleased | WatchOutcome::FinalizerFailed => "deleted",
        };
        self.metrics
            .status_updates
            .with_label_values(&[self.kind.as_str(), result])
            .inc();

        outcome
    }

    async fn forward(&self, resource: &StorageResource) -> WatchOutcome {
        let update = StatusUpdate::from_resource(resource);
        let target = resource.key().to_string();

        let result = self
            .retry
            .remote("update_status", &target, || self.requests.update_status(&update))
            .await;

        match result {
            Ok(()) => {
                info!(
                    kind = %self.kind,
                    tenant = %update.tenant,
                    name = %update.name,
                    resource_version = %update.resource_version,
                    phase = %update.phase,
                    "status forwarded"
                );
                WatchOutcome::Forwarded
            }
            Err(e) => {
                error!(
                    kind = %self.kind,
                    tenant = %update.tenant,
                    name = %update.name,
                    error = %e,
                    "failed to forward status"
                );
                WatchOutcome::ForwardFailed
            }
        }
    }
}
