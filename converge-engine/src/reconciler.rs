//! Reconciler - drives one object's external resource toward its spec.
//!
//! Every pass re-reads the object and re-derives what to do from its current
//! fields (level-triggered):
//!
//! - object gone: nothing to do
//! - deleting with our finalizer: clean up (if the kind asks for it), then
//!   drop the finalizer
//! - deleting without our finalizer: cleanup already completed
//! - not deleting, no finalizer: add the finalizer and requeue, so it is
//!   durably recorded before any resource is created
//! - otherwise: create the resource if absent, update it if it drifted, and
//!   record a fresh status if the recorded one is stale

use std::sync::Arc;

use tracing::{debug, info};

use crate::adapter::{Object, ResourceAdapter};
use crate::error::ReconcileError;
use crate::model::{FINALIZER, ObjectKey};
use crate::recorder::{EventRecorder, Severity};
use crate::store::ObjectStore;

/// What to do with the key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Converged for now; wait for the next trigger.
    Done,
    /// Run another pass right away.
    Requeue,
}

/// Reconciler for one resource kind.
pub struct Reconciler<A: ResourceAdapter> {
    adapter: Arc<A>,
    store: Arc<dyn ObjectStore<A::Spec, A::Status>>,
    recorder: Arc<dyn EventRecorder>,
}

impl<A: ResourceAdapter> Reconciler<A> {
    pub fn new(
        adapter: Arc<A>,
        store: Arc<dyn ObjectStore<A::Spec, A::Status>>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            adapter,
            store,
            recorder,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.adapter.kind()
    }

    pub(crate) fn info_event(&self, key: &ObjectKey, reason: &str, message: &str) {
        self.recorder
            .record(self.kind(), key, Severity::Info, reason, message);
    }

    pub(crate) fn warn_event(&self, key: &ObjectKey, reason: &str, message: &str) {
        self.recorder
            .record(self.kind(), key, Severity::Warning, reason, message);
    }

    /// Run one reconcile pass for `key`.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let kind = self.kind();

        let Some(mut object) = self
            .adapter
            .fetch_object(self.store.as_ref(), key)
            .await
            .map_err(ReconcileError::Fetch)?
        else {
            debug!(kind, key = %key, "Object not found, nothing to reconcile");
            return Ok(Action::Done);
        };

        if object.is_being_deleted() {
            return self.finalize(object).await;
        }

        if !object.has_finalizer(FINALIZER) {
            debug!(kind, key = %key, "Adding finalizer");
            object.add_finalizer(FINALIZER);
            self.persist(&object, "Could not add object finalizer")
                .await?;
            return Ok(Action::Requeue);
        }

        self.converge(object).await
    }

    /// Deletion path: clean up and release the finalizer.
    async fn finalize(&self, mut object: Object<A>) -> Result<Action, ReconcileError> {
        let key = object.key.clone();

        if !object.has_finalizer(FINALIZER) {
            debug!(kind = self.kind(), key = %key, "Cleanup already completed");
            return Ok(Action::Done);
        }

        if self.adapter.is_cleanup_on_deletion() {
            let resource = self.adapter.retrieve_resource(&object).await.map_err(|e| {
                self.warn_event(
                    &key,
                    "ResourceRetrievalError",
                    &format!("Could not check if resource exists (for deletion): {}", e),
                );
                ReconcileError::adapter("retrieve external resource", e)
            })?;

            if resource.is_some() {
                self.adapter.delete_resource(&object).await.map_err(|e| {
                    self.warn_event(
                        &key,
                        "ResourceDeletionError",
                        &format!("Could not delete resource: {}", e),
                    );
                    ReconcileError::adapter("delete external resource", e)
                })?;
                info!(kind = self.kind(), key = %key, "Deleted external resource");
                self.info_event(&key, "ExternalResourceDeleted", "Deleted external resource");
            } else {
                debug!(kind = self.kind(), key = %key, "External resource already absent");
            }
        }

        object.remove_finalizer(FINALIZER);
        self.persist(&object, "Could not remove object finalizer")
            .await?;
        Ok(Action::Done)
    }

    /// Steady state: create, update, refresh status.
    async fn converge(&self, mut object: Object<A>) -> Result<Action, ReconcileError> {
        let key = object.key.clone();
        let kind = self.kind();

        let existing = self.adapter.retrieve_resource(&object).await.map_err(|e| {
            self.warn_event(
                &key,
                "ResourceRetrievalError",
                &format!("Could not retrieve resource: {}", e),
            );
            ReconcileError::adapter("retrieve external resource", e)
        })?;

        let Some(mut resource) = existing else {
            let resource = self.adapter.create_resource(&object).await.map_err(|e| {
                self.warn_event(
                    &key,
                    "ResourceCreationError",
                    &format!("Could not create resource: {}", e),
                );
                ReconcileError::adapter("create external resource", e)
            })?;
            info!(kind, key = %key, "Created external resource");
            self.info_event(&key, "ExternalResourceCreated", "Created external resource");

            self.adapter.update_object_status(&mut object, &resource);
            self.persist(&object, "Could not persist object status")
                .await?;
            return Ok(Action::Done);
        };

        let stale = self
            .adapter
            .is_update_needed(&object, &resource)
            .await
            .map_err(|e| {
                self.warn_event(
                    &key,
                    "StalenessCheckError",
                    &format!("Could not check if resource needs to be updated: {}", e),
                );
                ReconcileError::adapter("check external resource staleness", e)
            })?;

        if stale {
            resource = self
                .adapter
                .update_resource(&object, &resource)
                .await
                .map_err(|e| {
                    self.warn_event(
                        &key,
                        "ResourceUpdateError",
                        &format!("Could not update resource: {}", e),
                    );
                    ReconcileError::adapter("update external resource", e)
                })?;
            info!(kind, key = %key, "Updated external resource");
            self.info_event(&key, "ExternalResourceUpdated", "Updated external resource");
        }

        let status_stale = self
            .adapter
            .is_status_update_needed(&object, &resource)
            .await
            .map_err(|e| {
                self.warn_event(
                    &key,
                    "StalenessCheckError",
                    &format!("Could not check if object status needs to be updated: {}", e),
                );
                ReconcileError::adapter("check object status staleness", e)
            })?;

        if status_stale {
            debug!(kind, key = %key, "Refreshing object status");
            self.adapter.update_object_status(&mut object, &resource);
            self.persist(&object, "Could not persist object status update")
                .await?;
        }

        Ok(Action::Done)
    }

    async fn persist(&self, object: &Object<A>, context: &str) -> Result<Object<A>, ReconcileError> {
        self.store.update(object).await.map_err(|e| {
            self.warn_event(&object.key, "ObjectUpdateError", &format!("{}: {}", context, e));
            ReconcileError::Persist(e)
        })
    }
}
