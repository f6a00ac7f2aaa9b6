//! GeneralPurposeStorage CRD
//!
//! Declarative NFS filesystem consumed by the general-purpose provisioner.
//! Unlike StandardStorage it carries a network allow-list expressed as
//! inclusive IPv4 ranges.

use super::types::{
    lenient_phase, FilesystemPhase, ProvisionerFilesystemType, ProvisionerMountProtocol,
    ProvisionerStorageClass, StorageRequest,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// GeneralPurposeStorage CRD
// =============================================================================

/// GeneralPurposeStorage describes one tenant filesystem on the NFS backend.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "private.cloud.io",
    version = "v1alpha1",
    kind = "GeneralPurposeStorage",
    plural = "generalpurposestorages",
    shortname = "gpstor",
    status = "GeneralPurposeStorageStatus",
    printcolumn = r#"{"name": "Size", "type": "string", "jsonPath": ".spec.storageRequest.size"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GeneralPurposeStorageSpec {
    pub availability_zone: String,

    #[serde(default)]
    pub storage_class: ProvisionerStorageClass,

    pub filesystem_name: String,

    #[serde(default)]
    pub filesystem_type: ProvisionerFilesystemType,

    /// Prefix for CSI volumes backing this filesystem
    #[serde(default)]
    pub csi_volume_prefix: String,

    pub storage_request: StorageRequest,

    pub cluster_assignment: ClusterAssignment,

    pub mount_config: MountConfig,

    #[serde(default)]
    pub networks: Networks,
}

// =============================================================================
// Sub-Types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAssignment {
    #[serde(rename = "clusterUUID")]
    pub cluster_uuid: String,
    #[serde(default)]
    pub cluster_version: String,
    pub namespace_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MountConfig {
    #[serde(default)]
    pub volume_path: String,
    #[serde(default = "nfs_v4")]
    pub mount_protocol: ProvisionerMountProtocol,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Networks {
    #[serde(default)]
    pub security_groups: SecurityGroups,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroups {
    #[serde(default, rename = "ipFilters")]
    pub ip_filters: Vec<IpFilter>,
}

/// Inclusive IPv4 range allowed to mount the filesystem
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpFilter {
    pub start: String,
    pub end: String,
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneralPurposeStorageStatus {
    #[serde(default, deserialize_with = "lenient_phase")]
    #[schemars(with = "FilesystemPhase")]
    pub phase: FilesystemPhase,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub volume_properties: VolumeProperties,
}

/// Identifiers the backend assigned to the volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeProperties {
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub namespace_id: i64,
    #[serde(default)]
    pub filesystem_id: i64,
}

// =============================================================================
// Default Value Functions
// =============================================================================

fn nfs_v4() -> ProvisionerMountProtocol {
    ProvisionerMountProtocol::NFSV4
}

// =============================================================================
// Implementations
// =============================================================================

impl GeneralPurposeStorage {
    /// Get the phase, treating a missing status as still provisioning
    pub fn phase(&self) -> FilesystemPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Get the backend volume identifiers reported so far
    pub fn volume_properties(&self) -> VolumeProperties {
        self.status
            .as_ref()
            .map(|s| s.volume_properties.clone())
            .unwrap_or_default()
    }

    /// Get the current allow-list
    pub fn ip_filters(&self) -> &[IpFilter] {
        &self.spec.networks.security_groups.ip_filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_crd_identity() {
        let crd = GeneralPurposeStorage::crd();
        assert_eq!(crd.spec.group, "private.cloud.io");
        assert_eq!(crd.spec.names.plural, "generalpurposestorages");
    }

    #[test]
    fn test_spec_wire_names() {
        let spec = GeneralPurposeStorageSpec {
            cluster_assignment: ClusterAssignment {
                cluster_uuid: "u-1".into(),
                ..Default::default()
            },
            networks: Networks {
                security_groups: SecurityGroups {
                    ip_filters: vec![IpFilter {
                        start: "10.0.0.0".into(),
                        end: "10.0.0.255".into(),
                    }],
                },
            },
            ..Default::default()
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["clusterAssignment"]["clusterUUID"], "u-1");
        assert_eq!(
            value["networks"]["securityGroups"]["ipFilters"][0]["end"],
            "10.0.0.255"
        );
    }

    #[test]
    fn test_status_defaults() {
        let storage: GeneralPurposeStorage = serde_json::from_value(serde_json::json!({
            "apiVersion": "private.cloud.io/v1alpha1",
            "kind": "GeneralPurposeStorage",
            "metadata": {"name": "fs-2", "namespace": "tenant-1"},
            "spec": {
                "availabilityZone": "az1",
                "filesystemName": "fs-2",
                "storageRequest": {"size": "1000"},
                "clusterAssignment": {"clusterUUID": "u-1", "namespaceName": "ns"},
                "mountConfig": {}
            },
            "status": {"phase": "Failed", "volumeProperties": {"namespaceId": 7}}
        }))
        .unwrap();

        assert_eq!(storage.phase(), FilesystemPhase::Failed);
        assert_eq!(storage.volume_properties().namespace_id, 7);
        assert_eq!(
            storage.spec.mount_config.mount_protocol,
            ProvisionerMountProtocol::NFSV4
        );
        assert!(storage.ip_filters().is_empty());
    }
}
