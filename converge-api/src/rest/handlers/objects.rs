//! Declarative object endpoints, shared by every resource kind.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use converge_engine::{Enqueued, ManagedObject, ObjectKey, ObjectStore};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tracing::info;

use super::ApiError;
use crate::state::KindState;

/// Spec or status payload of a kind.
pub trait Payload: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<X> Payload for X where X: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

#[derive(Serialize)]
pub struct ObjectList<S, T> {
    pub items: Vec<ManagedObject<S, T>>,
}

#[derive(Serialize)]
pub struct DeletionResponse {
    pub object: String,
    /// True if the object had no finalizers and is already gone.
    pub removed: bool,
}

#[derive(Serialize)]
pub struct TriggerResponse {
    pub object: String,
    pub queued: &'static str,
}

/// List all objects of a kind, ordered by key.
pub async fn list_objects<S: Payload, T: Payload + Default>(
    State(kind): State<Arc<KindState<S, T>>>,
) -> Result<Json<ObjectList<S, T>>, ApiError> {
    let mut items = kind.store.list().await?;
    items.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(Json(ObjectList { items }))
}

/// Get one object.
pub async fn get_object<S: Payload, T: Payload + Default>(
    State(kind): State<Arc<KindState<S, T>>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<ManagedObject<S, T>>, ApiError> {
    let key = ObjectKey::new(namespace, name);
    kind.store
        .get(&key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("{} {} not found", kind.kind(), key)))
}

/// Declare an object or replace its spec.
pub async fn apply_object<S: Payload, T: Payload + Default>(
    State(kind): State<Arc<KindState<S, T>>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(spec): Json<S>,
) -> Result<Json<ManagedObject<S, T>>, ApiError> {
    let key = ObjectKey::new(namespace, name);
    let object = kind.store.apply(key, spec).await?;
    info!(kind = kind.kind(), key = %object.key, version = object.resource_version, "Object applied");
    Ok(Json(object))
}

/// Request deletion. The controller finishes it once cleanup is done.
pub async fn delete_object<S: Payload, T: Payload + Default>(
    State(kind): State<Arc<KindState<S, T>>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<(StatusCode, Json<DeletionResponse>), ApiError> {
    let key = ObjectKey::new(namespace, name);
    let remaining = kind.store.request_deletion(&key).await?;
    info!(kind = kind.kind(), key = %key, "Object deletion requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(DeletionResponse {
            object: key.to_string(),
            removed: remaining.is_none(),
        }),
    ))
}

/// Queue a reconcile pass for an existing object.
pub async fn trigger_reconcile<S: Payload, T: Payload + Default>(
    State(kind): State<Arc<KindState<S, T>>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    let key = ObjectKey::new(namespace, name);
    if kind.store.get(&key).await?.is_none() {
        return Err(ApiError::not_found(format!("{} {} not found", kind.kind(), key)));
    }

    let queued = match kind.handle.trigger(key.clone()).await? {
        Enqueued::Added => "added",
        Enqueued::Merged => "merged",
        Enqueued::Deferred => "deferred",
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            object: key.to_string(),
            queued,
        }),
    ))
}
