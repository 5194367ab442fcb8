//! Declared/observed object model.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Finalizer marker placed on every object the engine manages.
pub const FINALIZER: &str = "finalizers.converge.dev";

/// Unique identity of a managed object (namespace + name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Error parsing an `<namespace>/<name>` key.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid object key '{0}', expected <namespace>/<name>")]
pub struct ParseKeyError(pub String);

impl FromStr for ObjectKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(ParseKeyError(s.to_string())),
        }
    }
}

/// A declared object: desired spec, observed status and lifecycle markers.
///
/// Objects are owned by the object store. Callers work on snapshots and
/// write them back through `ObjectStore::update`, which rejects stale
/// snapshots by comparing `resource_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedObject<S, T> {
    pub key: ObjectKey,
    pub spec: S,
    pub status: T,
    pub finalizers: BTreeSet<String>,
    pub deletion_requested_at: Option<DateTime<Utc>>,
    pub resource_version: u64,
}

impl<S, T: Default> ManagedObject<S, T> {
    /// A freshly declared object: empty status, no finalizers, not deleting.
    pub fn new(key: ObjectKey, spec: S) -> Self {
        Self {
            key,
            spec,
            status: T::default(),
            finalizers: BTreeSet::new(),
            deletion_requested_at: None,
            resource_version: 0,
        }
    }
}

impl<S, T> ManagedObject<S, T> {
    pub fn is_being_deleted(&self) -> bool {
        self.deletion_requested_at.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.contains(finalizer)
    }

    /// Returns true if the finalizer was not present before.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        self.finalizers.insert(finalizer.to_string())
    }

    /// Returns true if the finalizer was present before.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        self.finalizers.remove(finalizer)
    }
}
