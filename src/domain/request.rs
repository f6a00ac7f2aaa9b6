//! Filesystem requests as served by the request service
//!
//! These are read-only to the replicator. The lifecycle branch a request is
//! on is implied by which of its timestamps are set.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Request Enums
// =============================================================================

/// Storage class chosen by the tenant; selects the downstream family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageClass {
    #[default]
    GeneralPurpose,
    #[serde(rename = "AIOptimized", alias = "AiOptimized")]
    AiOptimized,
    GeneralPurposeStd,
}

impl std::fmt::Display for StorageClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageClass::GeneralPurpose => write!(f, "GeneralPurpose"),
            StorageClass::AiOptimized => write!(f, "AIOptimized"),
            StorageClass::GeneralPurposeStd => write!(f, "GeneralPurposeStd"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilesystemType {
    #[default]
    Unspecified,
    ComputeGeneral,
    ComputeKubernetes,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountProtocol {
    #[default]
    Weka,
    NfsV4,
}

/// Which write the replicator performs for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestAction {
    Create,
    Update,
    Delete,
}

impl RequestAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestAction::Create => "create",
            RequestAction::Update => "update",
            RequestAction::Delete => "delete",
        }
    }
}

impl std::fmt::Display for RequestAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Filesystem Request
// =============================================================================

/// A pending create/update/delete of a tenant filesystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemRequest {
    pub metadata: RequestMetadata,
    pub spec: RequestSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    /// Tenant id; doubles as the namespace in the object store
    pub cloud_account_id: String,
    pub name: String,
    /// Decimal integer, comparable across all tenants
    pub resource_version: String,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    pub availability_zone: String,
    pub request: CapacityRequest,
    #[serde(default)]
    pub storage_class: StorageClass,
    #[serde(default)]
    pub filesystem_type: FilesystemType,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub mount_protocol: MountProtocol,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub volume_path: String,
    #[serde(default)]
    pub security_group: Option<SecurityGroup>,
    #[serde(default)]
    pub scheduler: SchedulerAssignment,
}

/// Requested capacity, e.g. "5TB" or "1000000000"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityRequest {
    pub storage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    #[serde(default)]
    pub network_filter_allow: Vec<NetworkFilter>,
}

/// One allow rule as a subnet plus prefix length
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFilter {
    pub subnet: String,
    pub prefix_length: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerAssignment {
    #[serde(default)]
    pub cluster: ScheduledCluster,
    #[serde(default)]
    pub namespace: ScheduledNamespace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledCluster {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub cluster_addr: String,
    #[serde(default)]
    pub cluster_uuid: String,
    #[serde(default)]
    pub cluster_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledNamespace {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub credentials_path: String,
}

impl FilesystemRequest {
    /// Tenant id, which is also the namespace the resource lives in
    pub fn tenant(&self) -> &str {
        &self.metadata.cloud_account_id
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Classify the request. Deletion wins over update, update over create.
    pub fn action(&self) -> RequestAction {
        if self.metadata.deletion_timestamp.is_some() {
            RequestAction::Delete
        } else if self.metadata.update_timestamp.is_some() {
            RequestAction::Update
        } else {
            RequestAction::Create
        }
    }

    /// Parse the resource version into a watermark candidate
    pub fn version(&self) -> Result<u64> {
        self.metadata
            .resource_version
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::MalformedResourceVersion {
                name: self.metadata.name.clone(),
                version: self.metadata.resource_version.clone(),
            })
    }

    /// Allow rules, empty when the request carries no security group
    pub fn network_filters(&self) -> &[NetworkFilter] {
        self.spec
            .security_group
            .as_ref()
            .map(|sg| sg.network_filter_allow.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(version: &str) -> FilesystemRequest {
        FilesystemRequest {
            metadata: RequestMetadata {
                cloud_account_id: "123456789012".into(),
                name: "fs-1".into(),
                resource_version: version.into(),
                ..Default::default()
            },
            spec: RequestSpec::default(),
        }
    }

    #[test]
    fn test_action_precedence() {
        let mut req = request("1");
        assert_eq!(req.action(), RequestAction::Create);

        req.metadata.update_timestamp = Some(Utc::now());
        assert_eq!(req.action(), RequestAction::Update);

        req.metadata.deletion_timestamp = Some(Utc::now());
        assert_eq!(req.action(), RequestAction::Delete);

        req.metadata.update_timestamp = None;
        assert_eq!(req.action(), RequestAction::Delete);
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(request("42").version().unwrap(), 42);
        assert!(matches!(
            request("4x2").version(),
            Err(Error::MalformedResourceVersion { .. })
        ));
        assert!(request("-1").version().is_err());
        assert!(request("").version().is_err());
    }

    #[test]
    fn test_decode_wire_request() {
        let req: FilesystemRequest = serde_json::from_str(
            r#"{
                "metadata": {
                    "cloudAccountId": "123456789012",
                    "name": "fs-1",
                    "resourceVersion": "17",
                    "creationTimestamp": "2024-03-01T10:00:00Z",
                    "deletionTimestamp": "2024-03-02T10:00:00Z"
                },
                "spec": {
                    "availabilityZone": "az1",
                    "request": {"storage": "5TB"},
                    "storageClass": "GeneralPurposeStd",
                    "securityGroup": {
                        "networkFilterAllow": [{"subnet": "10.0.0.0", "prefixLength": 24}]
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(req.action(), RequestAction::Delete);
        assert_eq!(req.spec.storage_class, StorageClass::GeneralPurposeStd);
        assert_eq!(req.network_filters().len(), 1);
        assert_eq!(req.version().unwrap(), 17);
    }
}
