//! StandardStorage CRD
//!
//! Declarative filesystem consumed by the parallel-filesystem provisioner.
//! The replicator writes the spec; the provisioner owns the status.

use super::types::{
    lenient_phase, FilesystemPhase, ProvisionerFilesystemType, ProvisionerMountProtocol,
    ProvisionerStorageClass, StorageRequest,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// StandardStorage CRD
// =============================================================================

/// StandardStorage describes one tenant filesystem on the standard backend.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "private.cloud.io",
    version = "v1alpha1",
    kind = "StandardStorage",
    plural = "standardstorages",
    shortname = "sstor",
    status = "StandardStorageStatus",
    printcolumn = r#"{"name": "Size", "type": "string", "jsonPath": ".spec.storageRequest.size"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StandardStorageSpec {
    pub availability_zone: String,

    pub storage_request: StorageRequest,

    #[serde(default)]
    pub encrypted: bool,

    /// Prefix applied to backend object names
    #[serde(default)]
    pub prefix: String,

    #[serde(default)]
    pub filesystem_type: ProvisionerFilesystemType,

    #[serde(default)]
    pub storage_class: ProvisionerStorageClass,

    #[serde(default)]
    pub mount_protocol: ProvisionerMountProtocol,

    pub provider_schedule: FilesystemSchedule,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Placement decided by the scheduler before the request reached us
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemSchedule {
    pub filesystem_name: String,
    pub cluster: AssignedCluster,
    pub namespace: AssignedNamespace,
}

/// Backend cluster hosting the filesystem
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignedCluster {
    pub name: String,
    pub addr: String,
    pub uuid: String,
    #[serde(default)]
    pub version: String,
}

/// Backend namespace (organisation) inside the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignedNamespace {
    pub name: String,
    #[serde(default)]
    pub credentials_path: String,
}

// =============================================================================
// Status
// =============================================================================

/// Status of a StandardStorage, written by the provisioner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StandardStorageStatus {
    #[serde(default, deserialize_with = "lenient_phase")]
    #[schemars(with = "FilesystemPhase")]
    pub phase: FilesystemPhase,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub mount: MountStatus,
}

/// Where clients reach the filesystem
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MountStatus {
    #[serde(default)]
    pub cluster_addr: String,
}

// =============================================================================
// Implementations
// =============================================================================

impl StandardStorage {
    /// Get the phase, treating a missing status as still provisioning
    pub fn phase(&self) -> FilesystemPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Get the mount address, empty until the provisioner reports one
    pub fn cluster_addr(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.mount.cluster_addr.as_str())
            .unwrap_or("")
    }
}
