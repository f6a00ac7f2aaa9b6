//! Vocabulary shared by both filesystem storage CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Provisioning lifecycle of a storage resource, as reported by the provisioner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum FilesystemPhase {
    #[default]
    Provisioning,
    Ready,
    Failed,
    Deleting,
}

impl FilesystemPhase {
    /// Lenient parse used for phases written by external provisioners.
    /// Anything unrecognised is still provisioning from our point of view.
    pub fn from_provisioner(phase: &str) -> Self {
        match phase.to_ascii_lowercase().as_str() {
            "ready" => FilesystemPhase::Ready,
            "failed" => FilesystemPhase::Failed,
            "deleting" => FilesystemPhase::Deleting,
            _ => FilesystemPhase::Provisioning,
        }
    }
}

impl std::fmt::Display for FilesystemPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilesystemPhase::Provisioning => write!(f, "Provisioning"),
            FilesystemPhase::Ready => write!(f, "Ready"),
            FilesystemPhase::Failed => write!(f, "Failed"),
            FilesystemPhase::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Deserialize a phase without failing on values this controller does not know
pub(crate) fn lenient_phase<'de, D>(deserializer: D) -> std::result::Result<FilesystemPhase, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .map(FilesystemPhase::from_provisioner)
        .unwrap_or_default())
}

/// Storage class in the provisioner's vocabulary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ProvisionerStorageClass {
    #[default]
    GeneralPurpose,
    AIOptimized,
}

/// Workload the filesystem is mounted into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ProvisionerFilesystemType {
    #[default]
    ComputeGeneral,
    ComputeKubernetes,
}

/// Protocol clients use to mount the filesystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ProvisionerMountProtocol {
    #[default]
    Weka,
    NFSV4,
}

/// Requested capacity, always a decimal byte count
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageRequest {
    pub size: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct PhaseHolder {
        #[serde(default, deserialize_with = "lenient_phase")]
        phase: FilesystemPhase,
    }

    #[test]
    fn test_phase_from_provisioner() {
        assert_eq!(FilesystemPhase::from_provisioner("Ready"), FilesystemPhase::Ready);
        assert_eq!(FilesystemPhase::from_provisioner("FAILED"), FilesystemPhase::Failed);
        assert_eq!(FilesystemPhase::from_provisioner("Deleting"), FilesystemPhase::Deleting);
        assert_eq!(
            FilesystemPhase::from_provisioner("Reconciling"),
            FilesystemPhase::Provisioning
        );
    }

    #[test]
    fn test_lenient_phase_deserialize() {
        let holder: PhaseHolder = serde_json::from_str(r#"{"phase": "Ready"}"#).unwrap();
        assert_eq!(holder.phase, FilesystemPhase::Ready);

        let holder: PhaseHolder = serde_json::from_str(r#"{"phase": "Mystery"}"#).unwrap();
        assert_eq!(holder.phase, FilesystemPhase::Provisioning);

        let holder: PhaseHolder = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(holder.phase, FilesystemPhase::Provisioning);
    }
}
