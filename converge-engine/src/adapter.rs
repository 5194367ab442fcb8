//! ResourceAdapter contract.
//!
//! One adapter per resource kind drives a single external system. The engine
//! is generic over the adapter, so the kind is fixed when a controller is
//! constructed.

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::model::{ManagedObject, ObjectKey};
use crate::store::{self, ObjectStore};

/// Object type handled by adapter `A`.
pub type Object<A> =
    ManagedObject<<A as ResourceAdapter>::Spec, <A as ResourceAdapter>::Status>;

/// Trait for per-kind resource adapters.
#[async_trait]
pub trait ResourceAdapter: Send + Sync + Sized + 'static {
    /// Desired state declared by users.
    type Spec: Clone + Send + Sync + 'static;
    /// Observed state recorded by the engine.
    type Status: Clone + Default + Send + Sync + 'static;
    /// Handle to the real-world resource.
    type Resource: Send + Sync + 'static;

    /// Kind name used in logs and events (e.g. `dnszones`).
    fn kind(&self) -> &'static str;

    /// Whether the external resource is deleted together with the object.
    fn is_cleanup_on_deletion(&self) -> bool;

    /// Read the current object snapshot. Must not mutate anything.
    async fn fetch_object(
        &self,
        store: &dyn ObjectStore<Self::Spec, Self::Status>,
        key: &ObjectKey,
    ) -> store::Result<Option<Object<Self>>> {
        store.get(key).await
    }

    /// Create the external resource. Only called after `retrieve_resource`
    /// reported it absent.
    async fn create_resource(&self, object: &Object<Self>) -> Result<Self::Resource, AdapterError>;

    /// Look up the external resource. `Ok(None)` means it does not exist.
    async fn retrieve_resource(
        &self,
        object: &Object<Self>,
    ) -> Result<Option<Self::Resource>, AdapterError>;

    /// Apply the declared spec to an existing resource.
    async fn update_resource(
        &self,
        object: &Object<Self>,
        resource: &Self::Resource,
    ) -> Result<Self::Resource, AdapterError>;

    /// Delete the external resource.
    async fn delete_resource(&self, object: &Object<Self>) -> Result<(), AdapterError>;

    /// Whether the resource has drifted from the declared spec.
    ///
    /// Called on every poll tick for every object; must be side-effect free.
    async fn is_update_needed(
        &self,
        object: &Object<Self>,
        resource: &Self::Resource,
    ) -> Result<bool, AdapterError>;

    /// Whether the recorded status no longer matches the resource.
    async fn is_status_update_needed(
        &self,
        object: &Object<Self>,
        resource: &Self::Resource,
    ) -> Result<bool, AdapterError>;

    /// Copy resource-derived fields into the object's status (in memory only).
    fn update_object_status(&self, object: &mut Object<Self>, resource: &Self::Resource);
}
