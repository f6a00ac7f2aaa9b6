//! Kubernetes object store
//!
//! Typed access to both storage CRDs through `kube::Api`. The raw watcher
//! only reports the latest state of an object, so a last-seen cache turns
//! its events into added/updated/deleted notifications carrying the
//! previous state, the way an informer does.

use crate::crd::{GeneralPurposeStorage, StandardStorage};
use crate::domain::ports::{ChangeEvent, ObjectStore, StorageKind, StorageResource};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use kube::runtime::watcher;
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use tracing::{debug, info};

/// A storage CRD the store knows how to wrap into a [`StorageResource`]
trait StoredKind:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn wrap(self) -> StorageResource;
}

impl StoredKind for StandardStorage {
    fn wrap(self) -> StorageResource {
        StorageResource::Standard(self)
    }
}

impl StoredKind for GeneralPurposeStorage {
    fn wrap(self) -> StorageResource {
        StorageResource::GeneralPurpose(self)
    }
}

/// Map a kube error onto the store taxonomy, naming the object involved
fn store_error(kind: &str, namespace: &str, name: &str, err: kube::Error) -> StoreError {
    match StoreError::from(err) {
        StoreError::NotFound { .. } => StoreError::not_found(kind, namespace, name),
        StoreError::AlreadyExists { .. } => StoreError::already_exists(kind, namespace, name),
        other => other,
    }
}

/// Object store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K: StoredKind>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn watch_kind<K: StoredKind>(&self) -> BoxStream<'static, StoreResult<ChangeEvent>> {
        let api: Api<K> = Api::all(self.client.clone());
        let mut last_seen = LastSeen::default();

        watcher(api, watcher::Config::default())
            .default_backoff()
            .map(move |event| match event {
                Ok(event) => last_seen
                    .observe(Observed::from_watcher(event))
                    .into_iter()
                    .map(Ok)
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(StoreError::Transient(e.to_string()))],
            })
            .flat_map(stream::iter)
            .boxed()
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn create_namespace(&self, namespace: &str) -> StoreResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let object = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        api.create(&PostParams::default(), &object)
            .await
            .map_err(|e| store_error("Namespace", "", namespace, e))?;
        info!(namespace = %namespace, "namespace created");
        Ok(())
    }

    async fn create(&self, resource: &StorageResource) -> StoreResult<StorageResource> {
        let (namespace, name) = (resource.namespace(), resource.name());
        let kind = resource.kind().kind_name();
        let params = PostParams::default();

        let result = match resource {
            StorageResource::Standard(obj) => self
                .namespaced::<StandardStorage>(namespace)
                .create(&params, obj)
                .await
                .map(StoredKind::wrap),
            StorageResource::GeneralPurpose(obj) => self
                .namespaced::<GeneralPurposeStorage>(namespace)
                .create(&params, obj)
                .await
                .map(StoredKind::wrap),
        };
        result.map_err(|e| store_error(kind, namespace, name, e))
    }

    async fn get(
        &self,
        kind: StorageKind,
        namespace: &str,
        name: &str,
    ) -> StoreResult<StorageResource> {
        let result = match kind {
            StorageKind::Standard => self
                .namespaced::<StandardStorage>(namespace)
                .get(name)
                .await
                .map(StoredKind::wrap),
            StorageKind::GeneralPurpose => self
                .namespaced::<GeneralPurposeStorage>(namespace)
                .get(name)
                .await
                .map(StoredKind::wrap),
        };
        result.map_err(|e| store_error(kind.kind_name(), namespace, name, e))
    }

    async fn update(&self, resource: &StorageResource) -> StoreResult<StorageResource> {
        let (namespace, name) = (resource.namespace(), resource.name());
        let kind = resource.kind().kind_name();
        let params = PostParams::default();

        // replace() carries the resource version, so a stale copy conflicts
        let result = match resource {
            StorageResource::Standard(obj) => self
                .namespaced::<StandardStorage>(namespace)
                .replace(name, &params, obj)
                .await
                .map(StoredKind::wrap),
            StorageResource::GeneralPurpose(obj) => self
                .namespaced::<GeneralPurposeStorage>(namespace)
                .replace(name, &params, obj)
                .await
                .map(StoredKind::wrap),
        };
        result.map_err(|e| store_error(kind, namespace, name, e))
    }

    async fn delete(&self, kind: StorageKind, namespace: &str, name: &str) -> StoreResult<()> {
        let params = DeleteParams::default();
        let result = match kind {
            StorageKind::Standard => self
                .namespaced::<StandardStorage>(namespace)
                .delete(name, &params)
                .await
                .map(|_| ()),
            StorageKind::GeneralPurpose => self
                .namespaced::<GeneralPurposeStorage>(namespace)
                .delete(name, &params)
                .await
                .map(|_| ()),
        };
        result.map_err(|e| store_error(kind.kind_name(), namespace, name, e))
    }

    fn watch(&self, kind: StorageKind) -> BoxStream<'static, StoreResult<ChangeEvent>> {
        debug!(kind = %kind, "starting watch");
        match kind {
            StorageKind::Standard => self.watch_kind::<StandardStorage>(),
            StorageKind::GeneralPurpose => self.watch_kind::<GeneralPurposeStorage>(),
        }
    }
}

// =============================================================================
// Last-Seen Cache
// =============================================================================

/// Watcher event with the CRD already wrapped
#[derive(Debug)]
enum Observed {
    Applied(StorageResource),
    Deleted(StorageResource),
    /// Full relist after the watch was (re)established
    Relisted(Vec<StorageResource>),
}

impl Observed {
    fn from_watcher<K: StoredKind>(event: watcher::Event<K>) -> Self {
        match event {
            watcher::Event::Applied(obj) => Observed::Applied(obj.wrap()),
            watcher::Event::Deleted(obj) => Observed::Deleted(obj.wrap()),
            watcher::Event::Restarted(objs) => {
                Observed::Relisted(objs.into_iter().map(StoredKind::wrap).collect())
            }
        }
    }
}

/// Last state seen per (namespace, name)
#[derive(Debug, Default)]
struct LastSeen {
    objects: HashMap<(String, String), StorageResource>,
}

impl LastSeen {
    fn observe(&mut self, observed: Observed) -> Vec<ChangeEvent> {
        match observed {
            Observed::Applied(resource) => self.apply(resource).into_iter().collect(),
            Observed::Deleted(resource) => {
                self.objects.remove(&identity(&resource));
                vec![ChangeEvent::Deleted(resource)]
            }
            Observed::Relisted(resources) => {
                let mut events = Vec::new();
                let mut previous = std::mem::take(&mut self.objects);
                for resource in resources {
                    let id = identity(&resource);
                    match previous.remove(&id) {
                        Some(old) if old.resource_version() == resource.resource_version() => {}
                        Some(old) => events.push(ChangeEvent::Updated {
                            old,
                            new: resource.clone(),
                        }),
                        None => events.push(ChangeEvent::Added(resource.clone())),
                    }
                    self.objects.insert(id, resource);
                }
                // Whatever was not relisted disappeared while the watch was down
                events.extend(previous.into_values().map(ChangeEvent::Deleted));
                events
            }
        }
    }

    fn apply(&mut self, resource: StorageResource) -> Option<ChangeEvent> {
        let id = identity(&resource);
        match self.objects.insert(id, resource.clone()) {
            None => Some(ChangeEvent::Added(resource)),
            Some(old) if old.resource_version() == resource.resource_version() => None,
            Some(old) => Some(ChangeEvent::Updated {
                old,
                new: resource,
            }),
        }
    }
}

fn identity(resource: &StorageResource) -> (String, String) {
    (resource.namespace().to_string(), resource.name().to_string())
}
