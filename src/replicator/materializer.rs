//! Resource Materializer
//!
//! Translates filesystem requests into the desired state of the downstream
//! storage resources: full resources for creation, update plans applied to
//! the resource currently in the store.

use super::capacity;
use super::cidr;
use super::config::IpFilterPolicy;
use crate::crd::{
    AssignedCluster, AssignedNamespace, ClusterAssignment, FilesystemSchedule,
    GeneralPurposeStorage, GeneralPurposeStorageSpec, IpFilter, MountConfig, Networks,
    ProvisionerFilesystemType, ProvisionerMountProtocol, ProvisionerStorageClass,
    SecurityGroups, StandardStorage, StandardStorageSpec, StorageRequest,
};
use crate::domain::ports::{StorageKind, StorageResource};
use crate::domain::request::{FilesystemRequest, FilesystemType, MountProtocol, StorageClass};
use crate::error::Result;
use tracing::warn;

/// Build the resource a create request asks for, named after the request and
/// placed in the tenant's namespace.
pub fn build(request: &FilesystemRequest) -> Result<StorageResource> {
    let size = capacity::to_byte_string(&request.spec.request.storage)?;

    let resource = match StorageKind::for_class(request.spec.storage_class) {
        StorageKind::Standard => {
            let mut storage = StandardStorage::new(request.name(), standard_spec(request, size));
            storage.metadata.namespace = Some(request.tenant().to_string());
            StorageResource::Standard(storage)
        }
        StorageKind::GeneralPurpose => {
            let mut storage =
                GeneralPurposeStorage::new(request.name(), general_purpose_spec(request, size));
            storage.metadata.namespace = Some(request.tenant().to_string());
            StorageResource::GeneralPurpose(storage)
        }
    };
    Ok(resource)
}

/// Changes an update request makes to an existing resource.
///
/// Everything that can fail is resolved up front so applying the plan to a
/// freshly read resource cannot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    size: String,
    /// `None` when the request carries no security group at all
    filters: Option<Vec<IpFilter>>,
    policy: IpFilterPolicy,
}

impl UpdatePlan {
    pub fn new(request: &FilesystemRequest, policy: IpFilterPolicy) -> Result<Self> {
        Ok(Self {
            size: capacity::to_byte_string(&request.spec.request.storage)?,
            filters: request
                .spec
                .security_group
                .as_ref()
                .map(|_| requested_filters(request)),
            policy,
        })
    }

    /// Only the size changes on standard filesystems. General-purpose
    /// filesystems also take the requested allow rules according to the
    /// policy; a request without any security group clears the allow-list.
    pub fn apply(&self, existing: &mut StorageResource) {
        match existing {
            StorageResource::Standard(storage) => {
                storage.spec.storage_request.size = self.size.clone();
            }
            StorageResource::GeneralPurpose(storage) => {
                storage.spec.storage_request.size = self.size.clone();
                let current = &mut storage.spec.networks.security_groups.ip_filters;
                match (&self.filters, self.policy) {
                    (None, _) => current.clear(),
                    (Some(requested), IpFilterPolicy::Merge) => {
                        cidr::merge_filters(current, requested.iter().cloned());
                    }
                    (Some(requested), IpFilterPolicy::Replace) => {
                        current.clear();
                        cidr::merge_filters(current, requested.iter().cloned());
                    }
                }
            }
        }
    }
}

fn standard_spec(request: &FilesystemRequest, size: String) -> StandardStorageSpec {
    let spec = &request.spec;
    let cluster = &spec.scheduler.cluster;
    let namespace = &spec.scheduler.namespace;

    StandardStorageSpec {
        availability_zone: spec.availability_zone.clone(),
        storage_request: StorageRequest { size },
        encrypted: spec.encrypted,
        prefix: spec.prefix.clone(),
        filesystem_type: match spec.filesystem_type {
            FilesystemType::Unspecified | FilesystemType::ComputeGeneral => {
                ProvisionerFilesystemType::ComputeGeneral
            }
            FilesystemType::ComputeKubernetes => ProvisionerFilesystemType::ComputeKubernetes,
        },
        storage_class: match spec.storage_class {
            StorageClass::AiOptimized => ProvisionerStorageClass::AIOptimized,
            _ => ProvisionerStorageClass::GeneralPurpose,
        },
        mount_protocol: match spec.mount_protocol {
            MountProtocol::Weka => ProvisionerMountProtocol::Weka,
            MountProtocol::NfsV4 => ProvisionerMountProtocol::NFSV4,
        },
        provider_schedule: FilesystemSchedule {
            filesystem_name: request.name().to_string(),
            cluster: AssignedCluster {
                name: cluster.cluster_name.clone(),
                addr: cluster.cluster_addr.clone(),
                uuid: cluster.cluster_uuid.clone(),
                version: cluster.cluster_version.clone().unwrap_or_default(),
            },
            namespace: AssignedNamespace {
                name: namespace.name.clone(),
                credentials_path: namespace.credentials_path.clone(),
            },
        },
    }
}

fn general_purpose_spec(request: &FilesystemRequest, size: String) -> GeneralPurposeStorageSpec {
    let spec = &request.spec;
    let cluster = &spec.scheduler.cluster;

    GeneralPurposeStorageSpec {
        availability_zone: spec.availability_zone.clone(),
        storage_class: ProvisionerStorageClass::GeneralPurpose,
        filesystem_name: request.name().to_string(),
        filesystem_type: ProvisionerFilesystemType::ComputeGeneral,
        csi_volume_prefix: spec.prefix.clone(),
        storage_request: StorageRequest { size },
        cluster_assignment: ClusterAssignment {
            cluster_uuid: cluster.cluster_uuid.clone(),
            cluster_version: cluster.cluster_version.clone().unwrap_or_default(),
            namespace_name: spec.scheduler.namespace.name.clone(),
        },
        mount_config: MountConfig {
            volume_path: spec.volume_path.clone(),
            mount_protocol: ProvisionerMountProtocol::NFSV4,
        },
        networks: Networks {
            security_groups: SecurityGroups {
                ip_filters: requested_filters(request),
            },
        },
    }
}

/// Allow rules of the request as ranges; rules that do not describe an IPv4
/// network are dropped.
fn requested_filters(request: &FilesystemRequest) -> Vec<IpFilter> {
    let mut filters = Vec::new();
    for rule in request.network_filters() {
        match cidr::ip_filter(&rule.subnet, rule.prefix_length) {
            Ok(filter) => {
                cidr::merge_filters(&mut filters, [filter]);
            }
            Err(e) => {
                warn!(
                    tenant = %request.tenant(),
                    name = %request.name(),
                    error = %e,
                    "skipping invalid allow rule"
                );
            }
        }
    }
    filters
}
