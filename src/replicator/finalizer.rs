//! Finalizer Release
//!
//! Tells the request service a filesystem is gone from the object store so
//! it can drop its deletion hold.

use super::metrics::ReplicatorMetrics;
use super::retry::RetryExecutor;
use crate::domain::ports::RequestServiceRef;
use std::sync::Arc;
use tracing::{error, info};

/// Releases deletion holds under the bounded retry policy
#[derive(Clone)]
pub struct FinalizerReleaser {
    requests: RequestServiceRef,
    retry: RetryExecutor,
    metrics: Arc<ReplicatorMetrics>,
}

impl FinalizerReleaser {
    pub fn new(
        requests: RequestServiceRef,
        retry: RetryExecutor,
        metrics: Arc<ReplicatorMetrics>,
    ) -> Self {
        Self {
            requests,
            retry,
            metrics,
        }
    }

    /// Release the hold on `tenant/name`.
    ///
    /// Failures are logged and counted, never returned: the request service
    /// keeps the request in its deleting state and an operator can retry.
    /// Returns whether the release went through.
    pub async fn release(&self, tenant: &str, name: &str) -> bool {
        let target = format!("{}/{}", tenant, name);
        let result = self
            .retry
            .remote("remove_finalizer", &target, || {
                self.requests.remove_finalizer(tenant, name)
            })
            .await;

        match result {
            Ok(()) => {
                self.metrics
                    .finalizer_releases
                    .with_label_values(&["released"])
                    .inc();
                info!(tenant = %tenant, name = %name, "finalizer released");
                true
            }
            Err(e) => {
                self.metrics
                    .finalizer_releases
                    .with_label_values(&["failed"])
                    .inc();
                error!(tenant = %tenant, name = %name, error = %e, "failed to release finalizer");
                false
            }
        }
    }
}
