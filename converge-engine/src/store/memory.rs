//! In-memory ObjectStore implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::model::{ManagedObject, ObjectKey};

use super::error::{Result, StoreError};
use super::event::Event;
use super::traits::ObjectStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct Inner<S, T> {
    objects: HashMap<ObjectKey, ManagedObject<S, T>>,
    version: u64,
}

impl<S, T> Inner<S, T> {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

/// In-memory store for one kind of object.
///
/// Besides the [`ObjectStore`] operations used by the engine, it exposes the
/// declarer side: [`MemoryStore::apply`] and [`MemoryStore::request_deletion`].
/// An object whose deletion was requested is removed once its finalizer set
/// becomes empty.
pub struct MemoryStore<S, T> {
    inner: RwLock<Inner<S, T>>,
    events: broadcast::Sender<Event>,
}

impl<S, T> MemoryStore<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Default + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                objects: HashMap::new(),
                version: 0,
            }),
            events,
        }
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Declare an object or replace the spec of an existing one.
    ///
    /// Status, finalizers and deletion marker of an existing object are kept.
    pub async fn apply(&self, key: ObjectKey, spec: S) -> Result<ManagedObject<S, T>> {
        let mut inner = self.inner.write().await;
        let version = inner.next_version();

        let object = match inner.objects.get_mut(&key) {
            Some(existing) if existing.is_being_deleted() => {
                return Err(StoreError::Conflict(format!(
                    "{} is being deleted and cannot be re-declared",
                    key
                )));
            }
            Some(existing) => {
                existing.spec = spec;
                existing.resource_version = version;
                existing.clone()
            }
            None => {
                let mut object = ManagedObject::new(key.clone(), spec);
                object.resource_version = version;
                inner.objects.insert(key.clone(), object.clone());
                object
            }
        };
        drop(inner);

        debug!(key = %key, version, "Object applied");
        self.emit(Event::Applied(key));
        Ok(object)
    }

    /// Request deletion of an object.
    ///
    /// Sets the deletion marker once; repeated requests keep the original
    /// timestamp. Returns `None` if the object had no finalizers and was
    /// removed immediately.
    pub async fn request_deletion(&self, key: &ObjectKey) -> Result<Option<ManagedObject<S, T>>> {
        let mut inner = self.inner.write().await;
        let version = inner.next_version();

        let object = inner
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if object.is_being_deleted() {
            return Ok(Some(object.clone()));
        }

        object.deletion_requested_at = Some(Utc::now());
        object.resource_version = version;

        if object.finalizers.is_empty() {
            inner.objects.remove(key);
            drop(inner);
            debug!(key = %key, "Object deleted (no finalizers)");
            self.emit(Event::Deleted(key.clone()));
            return Ok(None);
        }

        let object = object.clone();
        drop(inner);
        debug!(key = %key, "Object deletion requested");
        self.emit(Event::DeletionRequested(key.clone()));
        Ok(Some(object))
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<S, T> Default for MemoryStore<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S, T> ObjectStore<S, T> for MemoryStore<S, T>
where
    S: Clone + Send + Sync + 'static,
    T: Clone + Default + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedObject<S, T>>> {
        let inner = self.inner.read().await;
        Ok(inner.objects.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<ManagedObject<S, T>>> {
        let inner = self.inner.read().await;
        let mut objects: Vec<_> = inner.objects.values().cloned().collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn update(&self, object: &ManagedObject<S, T>) -> Result<ManagedObject<S, T>> {
        let mut inner = self.inner.write().await;

        let current = inner
            .objects
            .get(&object.key)
            .ok_or_else(|| StoreError::NotFound(object.key.to_string()))?;

        if current.resource_version != object.resource_version {
            return Err(StoreError::VersionMismatch {
                key: object.key.to_string(),
                expected: object.resource_version,
                actual: current.resource_version,
            });
        }

        // The deletion marker is owned by the store and cannot be changed here.
        let deletion_requested_at = current.deletion_requested_at;
        let mut next = object.clone();
        next.deletion_requested_at = deletion_requested_at;
        next.resource_version = inner.next_version();

        let key = next.key.clone();
        if next.is_being_deleted() && next.finalizers.is_empty() {
            inner.objects.remove(&key);
            drop(inner);
            debug!(key = %key, "Object deleted (finalizers cleared)");
            self.emit(Event::Deleted(key));
            return Ok(next);
        }

        inner.objects.insert(key.clone(), next.clone());
        drop(inner);
        self.emit(Event::Updated(key));
        Ok(next)
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FINALIZER;

    type Store = MemoryStore<String, String>;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("ns", name)
    }

    #[tokio::test]
    async fn test_apply_creates_and_replaces_spec() {
        let store = Store::new();
        let created = store.apply(key("a"), "v1".into()).await.unwrap();
        assert_eq!(created.spec, "v1");
        assert!(created.finalizers.is_empty());

        let replaced = store.apply(key("a"), "v2".into()).await.unwrap();
        assert_eq!(replaced.spec, "v2");
        assert!(replaced.resource_version > created.resource_version);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_rejects_stale_version() {
        let store = Store::new();
        let snapshot = store.apply(key("a"), "v1".into()).await.unwrap();
        store.apply(key("a"), "v2".into()).await.unwrap();

        let err = store.update(&snapshot).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_update_missing_object_is_not_found() {
        let store = Store::new();
        let orphan: ManagedObject<String, String> = ManagedObject::new(key("x"), "v".into());
        let err = store.update(&orphan).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_deletion_without_finalizer_removes_immediately() {
        let store = Store::new();
        store.apply(key("a"), "v1".into()).await.unwrap();
        assert!(store.request_deletion(&key("a")).await.unwrap().is_none());
        assert!(store.get(&key("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deletion_waits_for_finalizer_removal() {
        let store = Store::new();
        let mut obj = store.apply(key("a"), "v1".into()).await.unwrap();
        obj.add_finalizer(FINALIZER);
        store.update(&obj).await.unwrap();

        let mut deleting = store.request_deletion(&key("a")).await.unwrap().unwrap();
        assert!(deleting.is_being_deleted());
        let first_marker = deleting.deletion_requested_at;

        // Repeated requests keep the original marker.
        let again = store.request_deletion(&key("a")).await.unwrap().unwrap();
        assert_eq!(again.deletion_requested_at, first_marker);

        // Re-declaring a deleting object is refused.
        let err = store.apply(key("a"), "v2".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        deleting = store.get(&key("a")).await.unwrap().unwrap();
        deleting.remove_finalizer(FINALIZER);
        store.update(&deleting).await.unwrap();
        assert!(store.get(&key("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_cannot_clear_deletion_marker() {
        let store = Store::new();
        let mut obj = store.apply(key("a"), "v1".into()).await.unwrap();
        obj.add_finalizer(FINALIZER);
        store.update(&obj).await.unwrap();
        let mut deleting = store.request_deletion(&key("a")).await.unwrap().unwrap();

        deleting.deletion_requested_at = None;
        let stored = store.update(&deleting).await.unwrap();
        assert!(stored.is_being_deleted());
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let store = Store::new();
        let mut rx = store.subscribe();
        let mut obj = store.apply(key("a"), "v1".into()).await.unwrap();
        obj.add_finalizer(FINALIZER);
        store.update(&obj).await.unwrap();
        store.request_deletion(&key("a")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Event::Applied(key("a")));
        assert_eq!(rx.recv().await.unwrap(), Event::Updated(key("a")));
        assert_eq!(rx.recv().await.unwrap(), Event::DeletionRequested(key("a")));
    }
}
