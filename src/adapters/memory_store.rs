//! In-memory object store
//!
//! Backs standalone mode and the replicator tests. Behaves like the
//! Kubernetes API where it matters to the replicator: namespaces must exist
//! before objects are created in them, writes bump a global resource
//! version, stale updates conflict, and every change is broadcast to
//! watchers of its kind.

use crate::domain::ports::{ChangeEvent, ObjectStore, ResourceKey, StorageKind, StorageResource};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Object store held entirely in process memory
pub struct MemoryObjectStore {
    resources: DashMap<ResourceKey, StorageResource>,
    namespaces: DashSet<String>,
    /// Last resource version handed out
    version: AtomicU64,
    /// Calls left that fail with a transient error
    injected_failures: AtomicUsize,
    events: broadcast::Sender<(StorageKind, ChangeEvent)>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            resources: DashMap::new(),
            namespaces: DashSet::new(),
            version: AtomicU64::new(0),
            injected_failures: AtomicUsize::new(0),
            events,
        }
    }

    /// Make the next `count` store calls fail with a transient error
    pub fn fail_next(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace)
    }

    /// Number of stored resources across kinds and namespaces
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Mutate the status of a stored resource the way a provisioner would.
    /// Bumps the resource version and notifies watchers.
    pub fn patch_status<F>(
        &self,
        kind: StorageKind,
        namespace: &str,
        name: &str,
        patch: F,
    ) -> StoreResult<StorageResource>
    where
        F: FnOnce(&mut StorageResource),
    {
        let key = ResourceKey::new(kind, namespace, name);
        let (old, new) = {
            let mut entry = self
                .resources
                .get_mut(&key)
                .ok_or_else(|| StoreError::not_found(kind.kind_name(), namespace, name))?;
            let old = entry.clone();
            patch(entry.value_mut());
            self.stamp(entry.value_mut());
            (old, entry.clone())
        };

        self.publish(kind, ChangeEvent::Updated {
            old,
            new: new.clone(),
        });
        Ok(new)
    }

    fn take_injected_failure(&self) -> StoreResult<()> {
        let injected = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Transient("injected failure".into()));
        }
        Ok(())
    }

    fn stamp(&self, resource: &mut StorageResource) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        resource.metadata_mut().resource_version = Some(version.to_string());
    }

    fn publish(&self, kind: StorageKind, event: ChangeEvent) {
        // No receivers simply means nobody is watching yet
        let _ = self.events.send((kind, event));
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_namespace(&self, namespace: &str) -> StoreResult<()> {
        self.take_injected_failure()?;
        if !self.namespaces.insert(namespace.to_string()) {
            return Err(StoreError::already_exists("Namespace", "", namespace));
        }
        debug!(namespace = %namespace, "namespace created");
        Ok(())
    }

    async fn create(&self, resource: &StorageResource) -> StoreResult<StorageResource> {
        self.take_injected_failure()?;
        let key = resource.key();
        if !self.namespaces.contains(&key.namespace) {
            return Err(StoreError::not_found("Namespace", "", &key.namespace));
        }

        let mut stored = resource.clone();
        match self.resources.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(StoreError::already_exists(
                    key.kind.kind_name(),
                    &key.namespace,
                    &key.name,
                ));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                self.stamp(&mut stored);
                slot.insert(stored.clone());
            }
        }

        self.publish(key.kind, ChangeEvent::Added(stored.clone()));
        Ok(stored)
    }

    async fn get(
        &self,
        kind: StorageKind,
        namespace: &str,
        name: &str,
    ) -> StoreResult<StorageResource> {
        self.take_injected_failure()?;
        self.resources
            .get(&ResourceKey::new(kind, namespace, name))
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::not_found(kind.kind_name(), namespace, name))
    }

    async fn update(&self, resource: &StorageResource) -> StoreResult<StorageResource> {
        self.take_injected_failure()?;
        let key = resource.key();
        let (old, new) = {
            let mut entry = self.resources.get_mut(&key).ok_or_else(|| {
                StoreError::not_found(key.kind.kind_name(), &key.namespace, &key.name)
            })?;

            let submitted = resource.resource_version();
            if !submitted.is_empty() && submitted != entry.resource_version() {
                return Err(StoreError::Transient(format!(
                    "conflict on {}: resource version {} is stale",
                    key, submitted
                )));
            }

            // Status belongs to the provisioner; only the spec is replaced
            let old = entry.clone();
            let mut updated = resource.clone();
            match (&mut updated, &old) {
                (StorageResource::Standard(new), StorageResource::Standard(prev)) => {
                    new.status = prev.status.clone();
                }
                (StorageResource::GeneralPurpose(new), StorageResource::GeneralPurpose(prev)) => {
                    new.status = prev.status.clone();
                }
                _ => {}
            }
            self.stamp(&mut updated);
            *entry = updated.clone();
            (old, updated)
        };

        self.publish(key.kind, ChangeEvent::Updated {
            old,
            new: new.clone(),
        });
        Ok(new)
    }

    async fn delete(&self, kind: StorageKind, namespace: &str, name: &str) -> StoreResult<()> {
        self.take_injected_failure()?;
        let (_, removed) = self
            .resources
            .remove(&ResourceKey::new(kind, namespace, name))
            .ok_or_else(|| StoreError::not_found(kind.kind_name(), namespace, name))?;

        self.publish(kind, ChangeEvent::Deleted(removed));
        Ok(())
    }

    fn watch(&self, kind: StorageKind) -> BoxStream<'static, StoreResult<ChangeEvent>> {
        let receiver = self.events.subscribe();
        stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok((event_kind, event)) if event_kind == kind => {
                        return Some((Ok(event), receiver));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        return Some((
                            Err(StoreError::Transient(format!(
                                "watch fell behind, {} events dropped",
                                missed
                            ))),
                            receiver,
                        ));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
