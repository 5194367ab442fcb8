//! ObjectStore trait definition.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::model::{ManagedObject, ObjectKey};

use super::error::Result;
use super::event::Event;

/// Store of declared objects for a single kind.
///
/// The store is the single source of truth: the engine keeps no copy of an
/// object across reconcile passes and persists every mutation through
/// [`ObjectStore::update`].
#[async_trait]
pub trait ObjectStore<S, T>: Send + Sync {
    /// Get an object by key. `Ok(None)` means it does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedObject<S, T>>>;

    /// List all objects of this kind.
    async fn list(&self) -> Result<Vec<ManagedObject<S, T>>>;

    /// Write an object back.
    ///
    /// Fails with `StoreError::VersionMismatch` when the object changed since
    /// it was read, and with `StoreError::NotFound` when it no longer exists.
    /// Returns the stored object with its new `resource_version`.
    async fn update(&self, object: &ManagedObject<S, T>) -> Result<ManagedObject<S, T>>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}
