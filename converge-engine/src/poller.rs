//! Drift poller - periodically checks external resources for out-of-band
//! changes the watch path cannot see.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::adapter::{Object, ResourceAdapter};
use crate::controller::shutdown_requested;
use crate::error::AdapterError;
use crate::model::ObjectKey;
use crate::queue::{QueueError, WorkQueue};
use crate::recorder::{EventRecorder, Severity};
use crate::store::ObjectStore;

/// Default interval between scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Why an object needs another reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drift {
    ResourceMissing,
    ResourceStale,
    StatusStale,
}

/// Result of a single scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned: usize,
    pub skipped_deleting: usize,
    pub triggered: Vec<ObjectKey>,
    /// Drifted keys not queued because the queue was full.
    pub dropped: Vec<ObjectKey>,
    pub errors: usize,
}

/// Periodic scanner for one resource kind.
pub struct DriftPoller<A: ResourceAdapter> {
    adapter: Arc<A>,
    store: Arc<dyn ObjectStore<A::Spec, A::Status>>,
    recorder: Arc<dyn EventRecorder>,
    queue: Arc<WorkQueue>,
    interval: Duration,
}

impl<A: ResourceAdapter> DriftPoller<A> {
    pub fn new(
        adapter: Arc<A>,
        store: Arc<dyn ObjectStore<A::Spec, A::Status>>,
        recorder: Arc<dyn EventRecorder>,
        queue: Arc<WorkQueue>,
        interval: Duration,
    ) -> Self {
        Self {
            adapter,
            store,
            recorder,
            queue,
            interval,
        }
    }

    /// Scan every `interval` until shutdown is signalled.
    ///
    /// The first scan happens one interval after start; startup already
    /// queues every object.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let kind = self.adapter.kind();
        info!(kind, interval = ?self.interval, "Drift poller started");

        let mut ticker = interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }

            let report = tokio::select! {
                report = self.scan() => report,
                _ = shutdown_requested(&mut shutdown) => break,
            };
            debug!(
                kind,
                scanned = report.scanned,
                triggered = report.triggered.len(),
                dropped = report.dropped.len(),
                errors = report.errors,
                "Drift scan complete"
            );
        }

        info!(kind, "Drift poller stopped");
    }

    /// Check every object once and queue the ones that drifted.
    ///
    /// A failure for one object is logged and skipped; it never aborts the
    /// rest of the scan.
    pub async fn scan(&self) -> ScanReport {
        let kind = self.adapter.kind();
        let mut report = ScanReport::default();

        let objects = match self.store.list().await {
            Ok(objects) => objects,
            Err(e) => {
                error!(kind, error = %e, "Failed listing objects");
                report.errors += 1;
                return report;
            }
        };

        for object in objects {
            report.scanned += 1;

            if object.is_being_deleted() {
                debug!(kind, key = %object.key, "Ignoring object being deleted");
                report.skipped_deleting += 1;
                continue;
            }

            let drift = match self.check(&object).await {
                Ok(Some(drift)) => drift,
                Ok(None) => continue,
                Err(_) => {
                    report.errors += 1;
                    continue;
                }
            };

            debug!(kind, key = %object.key, ?drift, "Drift detected");
            match self.queue.try_add(object.key.clone()) {
                Ok(_) => report.triggered.push(object.key),
                Err(QueueError::Full) => {
                    warn!(kind, key = %object.key, "Work queue full, drift will be retried next scan");
                    report.dropped.push(object.key);
                }
                Err(QueueError::ShutDown) => break,
            }
        }

        report
    }

    /// Compare one object with its external resource.
    async fn check(&self, object: &Object<A>) -> Result<Option<Drift>, AdapterError> {
        let kind = self.adapter.kind();
        let key = &object.key;

        let resource = match self.adapter.retrieve_resource(object).await {
            Ok(Some(resource)) => resource,
            Ok(None) => return Ok(Some(Drift::ResourceMissing)),
            Err(e) => {
                self.warn(key, "ResourceRetrievalError", &format!("Could not retrieve resource: {}", e));
                error!(kind, key = %key, error = %e, "Failed retrieving resource");
                return Err(e);
            }
        };

        match self.adapter.is_update_needed(object, &resource).await {
            Ok(true) => return Ok(Some(Drift::ResourceStale)),
            Ok(false) => {}
            Err(e) => {
                self.warn(
                    key,
                    "StalenessCheckError",
                    &format!("Could not check if resource needs to be updated: {}", e),
                );
                error!(kind, key = %key, error = %e, "Failed checking resource staleness");
                return Err(e);
            }
        }

        match self.adapter.is_status_update_needed(object, &resource).await {
            Ok(true) => Ok(Some(Drift::StatusStale)),
            Ok(false) => Ok(None),
            Err(e) => {
                self.warn(
                    key,
                    "StalenessCheckError",
                    &format!("Could not check if object status needs to be updated: {}", e),
                );
                error!(kind, key = %key, error = %e, "Failed checking status staleness");
                Err(e)
            }
        }
    }

    fn warn(&self, key: &ObjectKey, reason: &str, message: &str) {
        self.recorder
            .record(self.adapter.kind(), key, Severity::Warning, reason, message);
    }
}
