//! Change notifications emitted by object stores.

use crate::model::ObjectKey;

/// Events emitted when a stored object changes.
///
/// These are dispatched via broadcast channels to subscribers. They carry
/// only the key: subscribers re-read current state instead of trusting
/// the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The spec was declared or replaced.
    Applied(ObjectKey),
    /// The object was written back (finalizers, status).
    Updated(ObjectKey),
    /// Deletion was requested; cleanup is pending.
    DeletionRequested(ObjectKey),
    /// The object is gone from the store.
    Deleted(ObjectKey),
}

impl Event {
    /// Get the object key for this event.
    pub fn key(&self) -> &ObjectKey {
        match self {
            Event::Applied(key)
            | Event::Updated(key)
            | Event::DeletionRequested(key)
            | Event::Deleted(key) => key,
        }
    }
}
