//! Error types for the Filesystem Replicator
//!
//! Two layers of errors live here:
//! - [`StoreError`]: the object-store outcome taxonomy (not found, already
//!   exists, transient) that the retry executor classifies per operation.
//! - [`Error`]: the crate-wide error returned by replicator components.

use thiserror::Error;

/// Outcome of a failed object-store call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Anything the store may recover from on its own: timeouts, conflicts,
    /// throttling, decode failures of a half-written object.
    #[error("transient store error: {0}")]
    Transient(String),
}

impl StoreError {
    pub fn not_found(kind: impl Into<String>, namespace: &str, name: &str) -> Self {
        StoreError::NotFound {
            kind: kind.into(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, namespace: &str, name: &str) -> Self {
        StoreError::AlreadyExists {
            kind: kind.into(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
                kind: String::new(),
                namespace: String::new(),
                name: response.message.clone(),
            },
            kube::Error::Api(response)
                if response.code == 409 && response.reason == "AlreadyExists" =>
            {
                StoreError::AlreadyExists {
                    kind: String::new(),
                    namespace: String::new(),
                    name: response.message.clone(),
                }
            }
            _ => StoreError::Transient(err.to_string()),
        }
    }
}

/// Result type for object-store calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Unified error type for the replicator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Object Store Errors
    // =========================================================================
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{operation} of {resource} timed out after {elapsed_ms}ms")]
    Timeout {
        operation: String,
        resource: String,
        elapsed_ms: u64,
    },

    #[error("{operation} of {resource} failed after maximum retries: {last_error}")]
    RetriesExhausted {
        operation: String,
        resource: String,
        last_error: String,
    },

    // =========================================================================
    // Request Service Errors
    // =========================================================================
    #[error("Request service connection error: {0}")]
    RequestServiceConnection(#[from] reqwest::Error),

    #[error("Request service error: {status} - {message}")]
    RequestService { status: u16, message: String },

    #[error("Request stream error: {0}")]
    RequestStream(String),

    // =========================================================================
    // Request Content Errors
    // =========================================================================
    #[error("Malformed resource version {version:?} on {name}")]
    MalformedResourceVersion { name: String, version: String },

    #[error("Invalid CIDR {subnet}/{prefix_length}: {reason}")]
    InvalidCidr {
        subnet: String,
        prefix_length: u32,
        reason: String,
    },

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store(StoreError::Transient(_))
            | Error::Kube(_)
            | Error::RequestServiceConnection(_)
            | Error::RequestStream(_)
            | Error::Timeout { .. }
            | Error::RetriesExhausted { .. } => true,
            // Throttling and server-side failures may clear up on their own
            Error::RequestService { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for the replicator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "storages.private.cloud.io \"fs-1\"".into(),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn test_kube_error_mapping() {
        assert!(StoreError::from(api_error(404, "NotFound")).is_not_found());
        assert!(StoreError::from(api_error(409, "AlreadyExists")).is_already_exists());

        // A conflict on a stale resourceVersion is worth retrying
        let conflict = StoreError::from(api_error(409, "Conflict"));
        assert!(matches!(conflict, StoreError::Transient(_)));

        let unavailable = StoreError::from(api_error(503, "ServiceUnavailable"));
        assert!(matches!(unavailable, StoreError::Transient(_)));
    }

    #[test]
    fn test_error_transient() {
        let exhausted = Error::RetriesExhausted {
            operation: "create".into(),
            resource: "tenant-1/fs-1".into(),
            last_error: "timeout".into(),
        };
        assert!(exhausted.is_transient());

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_transient());

        let malformed = Error::MalformedResourceVersion {
            name: "fs-1".into(),
            version: "abc".into(),
        };
        assert!(!malformed.is_transient());

        let unavailable = Error::RequestService {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(unavailable.is_transient());
        let rejected = Error::RequestService {
            status: 404,
            message: "no such filesystem".into(),
        };
        assert!(!rejected.is_transient());
    }
}
