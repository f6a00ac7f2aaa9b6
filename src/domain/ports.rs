//! Domain Ports - Core trait definitions for the replicator
//!
//! These traits define the boundaries between the replication logic and the
//! two systems it keeps consistent: the request service and the object store.
//! Adapters implement these traits to provide concrete functionality.

use crate::crd::{FilesystemPhase, GeneralPurposeStorage, StandardStorage};
use crate::domain::request::{FilesystemRequest, StorageClass};
use crate::error::{Result, StoreResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Storage Resources
// =============================================================================

/// Downstream resource family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StorageKind {
    Standard,
    GeneralPurpose,
}

impl StorageKind {
    /// The family is fixed by the storage class for the lifetime of a request
    pub fn for_class(class: StorageClass) -> Self {
        match class {
            StorageClass::GeneralPurposeStd => StorageKind::GeneralPurpose,
            StorageClass::GeneralPurpose | StorageClass::AiOptimized => StorageKind::Standard,
        }
    }

    /// Kubernetes kind name
    pub fn kind_name(&self) -> &'static str {
        match self {
            StorageKind::Standard => "StandardStorage",
            StorageKind::GeneralPurpose => "GeneralPurposeStorage",
        }
    }

    /// Short label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Standard => "standard",
            StorageKind::GeneralPurpose => "general_purpose",
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// A typed storage resource, decoded at the store boundary
#[derive(Debug, Clone)]
pub enum StorageResource {
    Standard(StandardStorage),
    GeneralPurpose(GeneralPurposeStorage),
}

impl StorageResource {
    pub fn kind(&self) -> StorageKind {
        match self {
            StorageResource::Standard(_) => StorageKind::Standard,
            StorageResource::GeneralPurpose(_) => StorageKind::GeneralPurpose,
        }
    }

    fn metadata(&self) -> &kube::api::ObjectMeta {
        match self {
            StorageResource::Standard(s) => &s.metadata,
            StorageResource::GeneralPurpose(s) => &s.metadata,
        }
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut kube::api::ObjectMeta {
        match self {
            StorageResource::Standard(s) => &mut s.metadata,
            StorageResource::GeneralPurpose(s) => &mut s.metadata,
        }
    }

    /// Namespace, i.e. the owning tenant
    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or("")
    }

    pub fn resource_version(&self) -> &str {
        self.metadata().resource_version.as_deref().unwrap_or("")
    }

    /// Identity of the resource inside the store
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind(),
            namespace: self.namespace().to_string(),
            name: self.name().to_string(),
        }
    }

    /// Requested size in bytes, as written into the spec
    pub fn size(&self) -> &str {
        match self {
            StorageResource::Standard(s) => &s.spec.storage_request.size,
            StorageResource::GeneralPurpose(s) => &s.spec.storage_request.size,
        }
    }

    pub fn phase(&self) -> FilesystemPhase {
        match self {
            StorageResource::Standard(s) => s.phase(),
            StorageResource::GeneralPurpose(s) => s.phase(),
        }
    }

    /// Variant-specific status the request service wants to see
    pub fn status_detail(&self) -> StatusDetail {
        match self {
            StorageResource::Standard(s) => StatusDetail::Mount {
                cluster_addr: s.cluster_addr().to_string(),
            },
            StorageResource::GeneralPurpose(s) => {
                let props = s.volume_properties();
                StatusDetail::Volume {
                    size: props.size,
                    tenant_id: props.namespace_id,
                    filesystem_id: props.filesystem_id,
                }
            }
        }
    }
}

/// (kind, namespace, name) identity of a stored resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub kind: StorageKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: StorageKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Change notification for one resource kind
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Added(StorageResource),
    Updated {
        old: StorageResource,
        new: StorageResource,
    },
    Deleted(StorageResource),
}

// =============================================================================
// Status Feedback
// =============================================================================

/// Variant-specific part of a status report
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum StatusDetail {
    #[serde(rename_all = "camelCase")]
    Mount { cluster_addr: String },
    #[serde(rename_all = "camelCase")]
    Volume {
        size: String,
        tenant_id: i64,
        filesystem_id: i64,
    },
}

/// Status pushed back to the request service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub tenant: String,
    pub name: String,
    pub resource_version: String,
    pub phase: FilesystemPhase,
    pub detail: StatusDetail,
}

impl StatusUpdate {
    pub fn from_resource(resource: &StorageResource) -> Self {
        Self {
            tenant: resource.namespace().to_string(),
            name: resource.name().to_string(),
            resource_version: resource.resource_version().to_string(),
            phase: resource.phase(),
            detail: resource.status_detail(),
        }
    }
}

// =============================================================================
// Object Store Port
// =============================================================================

/// Generic namespaced resource API holding the declarative storage resources
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create a namespace; `AlreadyExists` when it is already there
    async fn create_namespace(&self, namespace: &str) -> StoreResult<()>;

    /// Create a resource in its namespace
    async fn create(&self, resource: &StorageResource) -> StoreResult<StorageResource>;

    /// Fetch a resource
    async fn get(&self, kind: StorageKind, namespace: &str, name: &str)
        -> StoreResult<StorageResource>;

    /// Replace a resource's desired state
    async fn update(&self, resource: &StorageResource) -> StoreResult<StorageResource>;

    /// Delete a resource
    async fn delete(&self, kind: StorageKind, namespace: &str, name: &str) -> StoreResult<()>;

    /// Change notifications for one kind across all namespaces
    fn watch(&self, kind: StorageKind) -> BoxStream<'static, StoreResult<ChangeEvent>>;
}

// =============================================================================
// Request Service Port
// =============================================================================

/// Central multi-tenant service owning filesystem requests
#[async_trait]
pub trait RequestService: Send + Sync {
    /// All requests with resource version >= `min_resource_version`,
    /// ascending by version
    async fn search_filesystem_requests(
        &self,
        availability_zone: &str,
        min_resource_version: u64,
    ) -> Result<BoxStream<'static, Result<FilesystemRequest>>>;

    /// Release the deletion hold on a request
    async fn remove_finalizer(&self, tenant: &str, name: &str) -> Result<()>;

    /// Report the observed state of a resource
    async fn update_status(&self, update: &StatusUpdate) -> Result<()>;

    /// Liveness check
    async fn ping(&self) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ObjectStoreRef = Arc<dyn ObjectStore>;
pub type RequestServiceRef = Arc<dyn RequestService>;
