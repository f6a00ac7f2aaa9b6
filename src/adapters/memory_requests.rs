//! In-memory request service
//!
//! Holds filesystem requests in a list and records every call the replicator
//! makes against it. Failures can be injected per call type. Standalone runs
//! seed it from a YAML file.

use crate::domain::ports::{RequestService, StatusUpdate};
use crate::domain::request::FilesystemRequest;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

#[derive(Default)]
struct State {
    requests: Vec<FilesystemRequest>,
    released: Vec<(String, String)>,
    status_updates: Vec<StatusUpdate>,
    searches: Vec<u64>,
    fail_next_search: bool,
    stall_searches: bool,
    fail_stream_after: Option<usize>,
    finalizer_failures: usize,
    status_failures: usize,
}

/// Request service held entirely in process memory
#[derive(Default)]
pub struct MemoryRequestService {
    state: Mutex<State>,
}

impl MemoryRequestService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Service pre-loaded with the requests listed in a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let requests: Vec<FilesystemRequest> = serde_yaml::from_str(&raw)?;

        let service = Self::new();
        for request in requests {
            service.push(request);
        }
        info!(
            path = %path.display(),
            requests = service.pending(),
            "seeded filesystem requests"
        );
        Ok(service)
    }

    /// Add a request, replacing any earlier request for the same filesystem
    pub fn push(&self, request: FilesystemRequest) {
        let mut state = self.state.lock();
        state
            .requests
            .retain(|r| !(r.tenant() == request.tenant() && r.name() == request.name()));
        state.requests.push(request);
    }

    /// Number of requests still pending
    pub fn pending(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// (tenant, name) pairs whose finalizer was released
    pub fn released(&self) -> Vec<(String, String)> {
        self.state.lock().released.clone()
    }

    pub fn status_updates(&self) -> Vec<StatusUpdate> {
        self.state.lock().status_updates.clone()
    }

    /// Minimum resource versions the searches asked for, in call order
    pub fn searches(&self) -> Vec<u64> {
        self.state.lock().searches.clone()
    }

    /// Fail opening the next search
    pub fn fail_next_search(&self) {
        self.state.lock().fail_next_search = true;
    }

    /// Leave every later search hanging before it answers
    pub fn stall_searches(&self) {
        self.state.lock().stall_searches = true;
    }

    /// Break the next search stream after `items` requests
    pub fn fail_stream_after(&self, items: usize) {
        self.state.lock().fail_stream_after = Some(items);
    }

    pub fn fail_next_finalizer_releases(&self, count: usize) {
        self.state.lock().finalizer_failures = count;
    }

    pub fn fail_next_status_updates(&self, count: usize) {
        self.state.lock().status_failures = count;
    }
}

fn unavailable() -> Error {
    Error::RequestService {
        status: 503,
        message: "request service unavailable".into(),
    }
}

#[async_trait]
impl RequestService for MemoryRequestService {
    async fn search_filesystem_requests(
        &self,
        availability_zone: &str,
        min_resource_version: u64,
    ) -> Result<BoxStream<'static, Result<FilesystemRequest>>> {
        let stalled = {
            let mut state = self.state.lock();
            state.searches.push(min_resource_version);
            if std::mem::take(&mut state.fail_next_search) {
                return Err(unavailable());
            }
            state.stall_searches
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();

        // Versions that do not parse are still served, after all others;
        // the caller decides what to do with them
        let mut matching: Vec<FilesystemRequest> = state
            .requests
            .iter()
            .filter(|r| r.spec.availability_zone == availability_zone)
            .filter(|r| r.version().map_or(true, |v| v >= min_resource_version))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.version().unwrap_or(u64::MAX));
        let mut items: Vec<Result<FilesystemRequest>> = matching.into_iter().map(Ok).collect();

        if let Some(after) = state.fail_stream_after.take() {
            items.truncate(after);
            items.push(Err(Error::RequestStream("stream reset by peer".into())));
        }

        debug!(
            availability_zone = %availability_zone,
            min_resource_version,
            items = items.len(),
            "serving filesystem requests"
        );
        Ok(stream::iter(items).boxed())
    }

    async fn remove_finalizer(&self, tenant: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.finalizer_failures > 0 {
            state.finalizer_failures -= 1;
            return Err(unavailable());
        }

        // Releasing the hold completes the deletion
        state
            .requests
            .retain(|r| !(r.tenant() == tenant && r.name() == name));
        state.released.push((tenant.to_string(), name.to_string()));
        Ok(())
    }

    async fn update_status(&self, update: &StatusUpdate) -> Result<()> {
        let mut state = self.state.lock();
        if state.status_failures > 0 {
            state.status_failures -= 1;
            return Err(unavailable());
        }
        state.status_updates.push(update.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::request::{CapacityRequest, RequestMetadata, RequestSpec, StorageClass};
    use std::io::Write;
    use tempfile::NamedTempFile;

    pub(crate) fn request(tenant: &str, name: &str, version: &str) -> FilesystemRequest {
        FilesystemRequest {
            metadata: RequestMetadata {
                cloud_account_id: tenant.to_string(),
                name: name.to_string(),
                resource_version: version.to_string(),
                ..Default::default()
            },
            spec: RequestSpec {
                availability_zone: "az1".into(),
                request: CapacityRequest {
                    storage: "1TB".into(),
                },
                ..Default::default()
            },
        }
    }

    async fn collect(service: &MemoryRequestService, min: u64) -> Vec<Result<FilesystemRequest>> {
        service
            .search_filesystem_requests("az1", min)
            .await
            .unwrap()
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_search_from_version() {
        let service = MemoryRequestService::new();
        service.push(request("t1", "fs-1", "3"));
        service.push(request("t1", "fs-2", "5"));
        service.push(request("t2", "fs-3", "8"));

        let items = collect(&service, 5).await;
        let names: Vec<_> = items
            .iter()
            .map(|r| r.as_ref().unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["fs-2", "fs-3"]);
        assert_eq!(service.searches(), vec![5]);
    }

    #[tokio::test]
    async fn test_search_ascending_by_version() {
        let service = MemoryRequestService::new();
        service.push(request("t1", "fs-1", "30"));
        service.push(request("t1", "fs-2", "x7"));
        service.push(request("t2", "fs-3", "4"));
        service.push(request("t2", "fs-4", "12"));

        let versions: Vec<_> = collect(&service, 0)
            .await
            .into_iter()
            .map(|r| r.unwrap().metadata.resource_version)
            .collect();
        assert_eq!(versions, vec!["4", "12", "30", "x7"]);
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "- metadata:\n    cloudAccountId: \"123456789012\"\n    name: fs-1\n    resourceVersion: \"7\"\n  \
             spec:\n    availabilityZone: az1\n    request:\n      storage: 5TB\n    storageClass: GeneralPurposeStd\n\
             - metadata:\n    cloudAccountId: \"123456789012\"\n    name: fs-2\n    resourceVersion: \"3\"\n  \
             spec:\n    availabilityZone: az1\n    request:\n      storage: 1TB"
        )
        .unwrap();

        let service = MemoryRequestService::from_file(file.path()).unwrap();
        assert_eq!(service.pending(), 2);
        let items = collect(&service, 0).await;
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.name(), "fs-2");
        assert_eq!(items[1].as_ref().unwrap().spec.storage_class, StorageClass::GeneralPurposeStd);
    }

    #[test]
    fn test_from_missing_file() {
        let err = MemoryRequestService::from_file("/nonexistent/requests.yaml").err();
        assert!(matches!(err, Some(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_push_replaces_same_filesystem() {
        let service = MemoryRequestService::new();
        service.push(request("t1", "fs-1", "3"));
        service.push(request("t1", "fs-1", "9"));
        assert_eq!(service.pending(), 1);
        assert_eq!(collect(&service, 0).await.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_failure_is_one_shot() {
        let service = MemoryRequestService::new();
        service.push(request("t1", "fs-1", "1"));
        service.push(request("t1", "fs-2", "2"));
        service.fail_stream_after(1);

        let items = collect(&service, 0).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());

        assert!(collect(&service, 0).await.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn test_finalizer_release_completes_deletion() {
        let service = MemoryRequestService::new();
        service.push(request("t1", "fs-1", "1"));
        service.fail_next_finalizer_releases(1);

        assert!(service.remove_finalizer("t1", "fs-1").await.is_err());
        service.remove_finalizer("t1", "fs-1").await.unwrap();
        assert_eq!(service.released(), vec![("t1".to_string(), "fs-1".to_string())]);
        assert_eq!(service.pending(), 0);
    }
}
