//! Retry Executor
//!
//! Bounded constant backoff around a single remote call. Store outcomes are
//! classified per operation: some failures mean the desired state already
//! holds and are reported as benign outcomes instead of errors.
//!
//! The budget is wall-clock: each attempt only gets the time left in it, so
//! a call that never answers still ends the invocation on time.

use super::config::RetrySettings;
use super::metrics::ReplicatorMetrics;
use crate::error::{Error, Result, StoreError, StoreResult};
use backoff::ExponentialBackoff;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Store operation being attempted; decides which failures are benign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Get,
    Update,
    Delete,
}

impl WriteOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOp::Create => "create",
            WriteOp::Get => "get",
            WriteOp::Update => "update",
            WriteOp::Delete => "delete",
        }
    }

    /// Map a failure that already satisfies the operation to its outcome
    fn benign<T>(&self, err: &StoreError) -> Option<Outcome<T>> {
        match (self, err) {
            (WriteOp::Create, StoreError::AlreadyExists { .. }) => Some(Outcome::AlreadyExists),
            (WriteOp::Delete | WriteOp::Update | WriteOp::Get, StoreError::NotFound { .. }) => {
                Some(Outcome::NotFound)
            }
            _ => None,
        }
    }
}

/// Result of a store operation that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The call went through
    Applied(T),
    /// Create found the object already there
    AlreadyExists,
    /// Delete, update or get found nothing to act on
    NotFound,
}

/// Runs remote calls under a bounded constant backoff
#[derive(Clone)]
pub struct RetryExecutor {
    settings: RetrySettings,
    metrics: Arc<ReplicatorMetrics>,
}

impl RetryExecutor {
    pub fn new(settings: RetrySettings, metrics: Arc<ReplicatorMetrics>) -> Self {
        Self { settings, metrics }
    }

    fn policy(&self) -> ExponentialBackoff {
        let interval = self.settings.interval();
        ExponentialBackoff {
            current_interval: interval,
            initial_interval: interval,
            randomization_factor: 0.0,
            multiplier: 1.0,
            max_interval: interval,
            max_elapsed_time: Some(self.settings.max_elapsed()),
            ..ExponentialBackoff::default()
        }
    }

    /// Time left of the budget for an invocation that began at `started`
    fn remaining(&self, started: Instant) -> Duration {
        self.settings.max_elapsed().saturating_sub(started.elapsed())
    }

    /// Run an object-store call, classifying its failures for `op`.
    ///
    /// `resource` only labels logs and the exhaustion error.
    pub async fn store<T, F, Fut>(&self, op: WriteOp, resource: &str, mut call: F) -> Result<Outcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let started = Instant::now();
        let result = backoff::future::retry_notify(
            self.policy(),
            || {
                let attempt = tokio::time::timeout(self.remaining(started), call());
                async move {
                    match attempt.await {
                        Err(_) => Err(backoff::Error::permanent(StoreError::Transient(format!(
                            "{} timed out after {}ms",
                            op.as_str(),
                            started.elapsed().as_millis()
                        )))),
                        Ok(Ok(value)) => Ok(Outcome::Applied(value)),
                        Ok(Err(err)) => match op.benign(&err) {
                            Some(outcome) => {
                                debug!(operation = op.as_str(), error = %err, "benign store outcome");
                                Ok(outcome)
                            }
                            None => Err(backoff::Error::transient(err)),
                        },
                    }
                }
            },
            |err: StoreError, wait: Duration| {
                self.metrics
                    .store_retries
                    .with_label_values(&[op.as_str()])
                    .inc();
                warn!(
                    operation = op.as_str(),
                    resource = %resource,
                    error = %err,
                    retry_in_ms = wait.as_millis() as u64,
                    "store operation failed, retrying"
                );
            },
        )
        .await;

        result.map_err(|err| Error::RetriesExhausted {
            operation: op.as_str().to_string(),
            resource: resource.to_string(),
            last_error: err.to_string(),
        })
    }

    /// Run a request-service call. Transient errors are retried within the
    /// budget; anything else is returned as is on the first occurrence. An
    /// attempt still pending when the budget runs out counts as exhaustion.
    pub async fn remote<T, F, Fut>(&self, operation: &str, target: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = backoff::future::retry_notify(
            self.policy(),
            || {
                let attempt = tokio::time::timeout(self.remaining(started), call());
                async move {
                    match attempt.await {
                        Err(_) => Err(backoff::Error::permanent(Error::Timeout {
                            operation: operation.to_string(),
                            resource: target.to_string(),
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        })),
                        Ok(result) => result.map_err(|err| {
                            if err.is_transient() {
                                backoff::Error::transient(err)
                            } else {
                                backoff::Error::permanent(err)
                            }
                        }),
                    }
                }
            },
            |err: Error, wait: Duration| {
                warn!(
                    operation = %operation,
                    target = %target,
                    error = %err,
                    retry_in_ms = wait.as_millis() as u64,
                    "request service call failed, retrying"
                );
            },
        )
        .await;

        result.map_err(|err| {
            if err.is_transient() {
                Error::RetriesExhausted {
                    operation: operation.to_string(),
                    resource: target.to_string(),
                    last_error: err.to_string(),
                }
            } else {
                err
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fast policy so exhaustion tests finish in milliseconds
    pub(crate) fn fast_settings() -> RetrySettings {
        RetrySettings {
            interval_ms: 5,
            max_elapsed_ms: 40,
        }
    }

    pub(crate) fn executor() -> RetryExecutor {
        RetryExecutor::new(fast_settings(), Arc::new(ReplicatorMetrics::new().unwrap()))
    }

    #[tokio::test]
    async fn test_create_already_exists_is_benign() {
        let attempts = AtomicU32::new(0);
        let outcome = executor()
            .store(WriteOp::Create, "tenant/fs", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StoreError::already_exists("StandardStorage", "tenant", "fs")) }
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::AlreadyExists);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_and_update_not_found_are_benign() {
        let exec = executor();
        for op in [WriteOp::Delete, WriteOp::Update, WriteOp::Get] {
            let outcome = exec
                .store(op, "tenant/fs", || async {
                    Err::<(), _>(StoreError::not_found("StandardStorage", "tenant", "fs"))
                })
                .await
                .unwrap();
            assert_eq!(outcome, Outcome::NotFound);
        }
    }

    #[tokio::test]
    async fn test_create_not_found_is_retried() {
        // Creating into a namespace that does not exist yet
        let attempts = AtomicU32::new(0);
        let result = executor()
            .store(WriteOp::Create, "tenant/fs", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StoreError::not_found("Namespace", "", "tenant")) }
            })
            .await;

        assert_matches!(result, Err(Error::RetriesExhausted { ref operation, .. }) if operation == "create");
        assert!(attempts.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let exec = executor();
        let attempts = AtomicU32::new(0);
        let outcome = exec
            .store(WriteOp::Update, "tenant/fs", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StoreError::Transient("etcd leader changed".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Applied(2));
        assert_eq!(
            exec.metrics
                .store_retries
                .with_label_values(&["update"])
                .get(),
            2
        );
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let result = executor()
            .store(WriteOp::Delete, "tenant/fs", || async {
                Err::<(), _>(StoreError::Transient("connection refused".into()))
            })
            .await;

        match result {
            Err(Error::RetriesExhausted {
                operation,
                resource,
                last_error,
            }) => {
                assert_eq!(operation, "delete");
                assert_eq!(resource, "tenant/fs");
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_permanent_error_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = executor()
            .remote("remove_finalizer", "tenant/fs", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(Error::RequestService {
                        status: 400,
                        message: "bad request".into(),
                    })
                }
            })
            .await;

        assert_matches!(result, Err(Error::RequestService { status: 400, .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hung_store_call_ends_within_budget() {
        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            executor().store(WriteOp::Create, "tenant/fs", || {
                std::future::pending::<StoreResult<()>>()
            }),
        )
        .await
        .expect("executor overran its budget");

        match result {
            Err(Error::RetriesExhausted { last_error, .. }) => {
                assert!(last_error.contains("timed out"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_hung_remote_call_after_failures() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = tokio::time::timeout(
            Duration::from_secs(1),
            executor().remote("update_status", "tenant/fs", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        return Err(Error::RequestStream("reset by peer".into()));
                    }
                    std::future::pending().await
                }
            }),
        )
        .await
        .expect("executor overran its budget");

        assert_matches!(result, Err(Error::RetriesExhausted { ref last_error, .. }) if last_error.contains("timed out"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_remote_transient_exhausts() {
        let result: Result<()> = executor()
            .remote("update_status", "tenant/fs", || async {
                Err(Error::RequestStream("reset by peer".into()))
            })
            .await;

        assert_matches!(result, Err(Error::RetriesExhausted { .. }));
    }
}
