//! Adapter and reconcile error types.

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Errors returned by a [`ResourceAdapter`](crate::ResourceAdapter).
///
/// "Resource not found" is not an error: adapters report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The external API call failed.
    #[error("external API error: {0}")]
    Api(String),

    /// The adapter received or produced something it cannot handle. This is
    /// a programming error in the adapter and is retried slowly.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// Any other adapter-internal failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AdapterError {
    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api(msg.into())
    }

    pub fn contract_violation(msg: impl Into<String>) -> Self {
        Self::ContractViolation(msg.into())
    }
}

/// Why a reconcile pass was aborted.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reading the object from the store failed.
    #[error("could not fetch object: {0}")]
    Fetch(#[source] StoreError),

    /// An adapter call failed.
    #[error("could not {operation}: {source}")]
    Adapter {
        operation: &'static str,
        #[source]
        source: AdapterError,
    },

    /// Writing the object back failed (including lost optimistic races).
    #[error("could not persist object: {0}")]
    Persist(#[source] StoreError),

    /// The pass exceeded its deadline.
    #[error("reconcile pass timed out after {0:?}")]
    Timeout(Duration),
}

impl ReconcileError {
    pub(crate) fn adapter(operation: &'static str, source: AdapterError) -> Self {
        Self::Adapter { operation, source }
    }

    /// Adapter bugs are retried on a slower schedule than transient failures.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            ReconcileError::Adapter {
                source: AdapterError::ContractViolation(_),
                ..
            }
        )
    }

    /// Lost an optimistic-concurrency race; re-fetching fixes it.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ReconcileError::Persist(StoreError::VersionMismatch { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let violation = ReconcileError::adapter(
            "create external resource",
            AdapterError::contract_violation("wrong resource type"),
        );
        assert!(violation.is_contract_violation());
        assert!(!violation.is_conflict());

        let conflict = ReconcileError::Persist(StoreError::VersionMismatch {
            key: "ns/a".into(),
            expected: 1,
            actual: 2,
        });
        assert!(conflict.is_conflict());
        assert!(!conflict.is_contract_violation());
    }

    #[test]
    fn test_display_includes_operation() {
        let err = ReconcileError::adapter(
            "delete external resource",
            AdapterError::api("403 forbidden"),
        );
        let msg = err.to_string();
        assert!(msg.contains("delete external resource"));
        assert!(msg.contains("403 forbidden"));
    }
}
