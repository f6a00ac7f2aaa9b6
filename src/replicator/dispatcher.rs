//! Request Dispatcher
//!
//! Routes one filesystem request to its create, update or delete path and
//! performs the store writes under the retry executor.

use super::config::IpFilterPolicy;
use super::finalizer::FinalizerReleaser;
use super::materializer::{self, UpdatePlan};
use super::metrics::ReplicatorMetrics;
use super::retry::{Outcome, RetryExecutor, WriteOp};
use crate::domain::ports::{ObjectStoreRef, StorageKind};
use crate::domain::request::{FilesystemRequest, RequestAction};
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a dispatched request amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The store now holds the requested state
    Applied,
    /// Nothing to do: the resource was already created, already gone, or
    /// missing for an update
    AlreadySatisfied,
    /// The resource was already gone and the finalizer was released
    FinalizerReleased,
    /// The request targets a storage family this replicator does not serve
    Disabled,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Applied => "applied",
            DispatchOutcome::AlreadySatisfied => "already_satisfied",
            DispatchOutcome::FinalizerReleased => "finalizer_released",
            DispatchOutcome::Disabled => "disabled",
        }
    }
}

/// Applies filesystem requests to the object store
pub struct RequestDispatcher {
    store: ObjectStoreRef,
    retry: RetryExecutor,
    finalizer: FinalizerReleaser,
    metrics: Arc<ReplicatorMetrics>,
    general_purpose_enabled: bool,
    ip_filter_policy: IpFilterPolicy,
}

impl RequestDispatcher {
    pub fn new(
        store: ObjectStoreRef,
        retry: RetryExecutor,
        finalizer: FinalizerReleaser,
        metrics: Arc<ReplicatorMetrics>,
        general_purpose_enabled: bool,
        ip_filter_policy: IpFilterPolicy,
    ) -> Self {
        Self {
            store,
            retry,
            finalizer,
            metrics,
            general_purpose_enabled,
            ip_filter_policy,
        }
    }

    /// Apply one request. Deletion takes precedence over update, update over
    /// create.
    pub async fn dispatch(&self, request: &FilesystemRequest) -> Result<DispatchOutcome> {
        let action = request.action();
        let kind = StorageKind::for_class(request.spec.storage_class);

        let result = if kind == StorageKind::GeneralPurpose && !self.general_purpose_enabled {
            debug!(
                tenant = %request.tenant(),
                name = %request.name(),
                "general-purpose storage disabled, request not replicated"
            );
            Ok(DispatchOutcome::Disabled)
        } else {
            match action {
                RequestAction::Delete => self.delete(request, kind).await,
                RequestAction::Update => self.update(request, kind).await,
                RequestAction::Create => self.create(request).await,
            }
        };

        let outcome_label = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "failed",
        };
        self.metrics
            .items_processed
            .with_label_values(&[action.as_str(), kind.as_str(), outcome_label])
            .inc();

        result
    }

    async fn create(&self, request: &FilesystemRequest) -> Result<DispatchOutcome> {
        let resource = materializer::build(request)?;
        let key = resource.key().to_string();
        let tenant = request.tenant();

        self.retry
            .store(WriteOp::Create, tenant, || self.store.create_namespace(tenant))
            .await?;

        let outcome = self
            .retry
            .store(WriteOp::Create, &key, || self.store.create(&resource))
            .await?;

        match outcome {
            Outcome::Applied(created) => {
                info!(
                    tenant = %tenant,
                    name = %request.name(),
                    kind = %created.kind(),
                    resource_version = %created.resource_version(),
                    "storage resource created"
                );
                Ok(DispatchOutcome::Applied)
            }
            _ => {
                info!(tenant = %tenant, name = %request.name(), "storage resource already exists");
                Ok(DispatchOutcome::AlreadySatisfied)
            }
        }
    }

    async fn delete(&self, request: &FilesystemRequest, kind: StorageKind) -> Result<DispatchOutcome> {
        let (tenant, name) = (request.tenant(), request.name());
        let key = format!("{}/{}/{}", kind, tenant, name);

        let outcome = self
            .retry
            .store(WriteOp::Delete, &key, || self.store.delete(kind, tenant, name))
            .await?;

        match outcome {
            Outcome::NotFound => {
                // The watcher will never see a deletion for this one
                info!(tenant = %tenant, name = %name, "storage resource already gone");
                if self.finalizer.release(tenant, name).await {
                    Ok(DispatchOutcome::FinalizerReleased)
                } else {
                    Ok(DispatchOutcome::AlreadySatisfied)
                }
            }
            _ => {
                info!(tenant = %tenant, name = %name, kind = %kind, "storage resource deleted");
                Ok(DispatchOutcome::Applied)
            }
        }
    }

    async fn update(&self, request: &FilesystemRequest, kind: StorageKind) -> Result<DispatchOutcome> {
        let (tenant, name) = (request.tenant(), request.name());
        let key = format!("{}/{}/{}", kind, tenant, name);
        let plan = UpdatePlan::new(request, self.ip_filter_policy)?;
        let plan = &plan;

        // Read and write in one attempt so a retry starts from a fresh copy
        let outcome = self
            .retry
            .store(WriteOp::Update, &key, || async move {
                let mut resource = self.store.get(kind, tenant, name).await?;
                plan.apply(&mut resource);
                self.store.update(&resource).await
            })
            .await?;

        match outcome {
            Outcome::Applied(updated) => {
                info!(
                    tenant = %tenant,
                    name = %name,
                    size = %updated.size(),
                    resource_version = %updated.resource_version(),
                    "storage resource updated"
                );
                Ok(DispatchOutcome::Applied)
            }
            _ => {
                warn!(tenant = %tenant, name = %name, "storage resource to update not found, skipping");
                Ok(DispatchOutcome::AlreadySatisfied)
            }
        }
    }
}
