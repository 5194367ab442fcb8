//! Controller - wires the store watch, the drift poller and a pool of
//! reconcile workers around one work queue.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::adapter::ResourceAdapter;
use crate::error::ReconcileError;
use crate::model::ObjectKey;
use crate::poller::{DEFAULT_POLL_INTERVAL, DriftPoller};
use crate::queue::{Backoff, BackoffConfig, DEFAULT_QUEUE_CAPACITY, Enqueued, QueueError, WorkQueue};
use crate::reconciler::{Action, Reconciler};
use crate::recorder::EventRecorder;
use crate::store::{Event, ObjectStore};

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interval between drift scans.
    pub poll_interval: Duration,
    /// Number of concurrent reconcile workers.
    pub workers: usize,
    /// Maximum number of distinct pending keys.
    pub queue_capacity: usize,
    /// Deadline for one reconcile pass. `None` disables it.
    pub reconcile_timeout: Option<Duration>,
    pub backoff: BackoffConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            workers: 4,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            reconcile_timeout: Some(Duration::from_secs(300)),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Cloneable handle for triggering reconciles from outside the controller.
#[derive(Clone)]
pub struct ControllerHandle {
    kind: &'static str,
    queue: Arc<WorkQueue>,
}

impl ControllerHandle {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Request a reconcile pass for `key`, waiting for queue room if needed.
    pub async fn trigger(&self, key: ObjectKey) -> Result<Enqueued, QueueError> {
        debug!(kind = self.kind, key = %key, "Manual reconcile trigger");
        self.queue.add(key).await
    }

    /// Number of keys waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Reconciliation controller for one resource kind.
pub struct Controller<A: ResourceAdapter> {
    adapter: Arc<A>,
    store: Arc<dyn ObjectStore<A::Spec, A::Status>>,
    recorder: Arc<dyn EventRecorder>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
}

impl<A: ResourceAdapter> Controller<A> {
    pub fn new(
        adapter: Arc<A>,
        store: Arc<dyn ObjectStore<A::Spec, A::Status>>,
        recorder: Arc<dyn EventRecorder>,
        config: ControllerConfig,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new(config.queue_capacity));
        Self {
            adapter,
            store,
            recorder,
            queue,
            config,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            kind: self.adapter.kind(),
            queue: Arc::clone(&self.queue),
        }
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    ///
    /// Startup enqueues every stored object. In-flight passes are abandoned
    /// at their next suspension point on shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let kind = self.adapter.kind();

        // Subscribe before the initial list so no change falls in between.
        let events = self.store.subscribe();

        let shared = Arc::new(Shared {
            reconciler: Reconciler::new(
                Arc::clone(&self.adapter),
                Arc::clone(&self.store),
                Arc::clone(&self.recorder),
            ),
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
            backoff: Backoff::new(self.config.backoff.clone()),
            reconcile_timeout: self.config.reconcile_timeout,
        });

        let poller = DriftPoller::new(
            Arc::clone(&self.adapter),
            Arc::clone(&self.store),
            Arc::clone(&self.recorder),
            Arc::clone(&self.queue),
            self.config.poll_interval,
        );

        info!(
            kind,
            workers = self.config.workers,
            poll_interval = ?self.config.poll_interval,
            reconcile_timeout = ?self.config.reconcile_timeout,
            "Controller started"
        );

        let mut tasks = Vec::with_capacity(self.config.workers + 2);
        for id in 0..self.config.workers.max(1) {
            tasks.push(tokio::spawn(worker(
                id,
                Arc::clone(&shared),
                shutdown.clone(),
            )));
        }
        tasks.push(tokio::spawn(watch_store(
            Arc::clone(&shared),
            events,
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(poller.run(shutdown.clone())));

        shutdown_requested(&mut shutdown).await;
        info!(kind, "Controller shutting down");
        self.queue.shut_down();

        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!(kind, error = %e, "Controller task failed");
            }
        }
        info!(kind, "Controller stopped");
    }
}

/// State shared by the controller tasks.
struct Shared<A: ResourceAdapter> {
    reconciler: Reconciler<A>,
    store: Arc<dyn ObjectStore<A::Spec, A::Status>>,
    queue: Arc<WorkQueue>,
    backoff: Backoff,
    reconcile_timeout: Option<Duration>,
}

impl<A: ResourceAdapter> Shared<A> {
    async fn run_pass(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        match self.reconcile_timeout {
            Some(limit) => tokio::time::timeout(limit, self.reconciler.reconcile(key))
                .await
                .unwrap_or(Err(ReconcileError::Timeout(limit))),
            None => self.reconciler.reconcile(key).await,
        }
    }

    /// Enqueue every stored object.
    async fn resync(&self) {
        let kind = self.reconciler.kind();
        let objects = match self.store.list().await {
            Ok(objects) => objects,
            Err(e) => {
                error!(kind, error = %e, "Failed listing objects for resync");
                return;
            }
        };

        debug!(kind, count = objects.len(), "Resync");
        for object in objects {
            if self.queue.add(object.key).await.is_err() {
                return;
            }
        }
    }
}

/// Wait until the shutdown flag is set or its sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn worker<A: ResourceAdapter>(
    id: usize,
    shared: Arc<Shared<A>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let kind = shared.reconciler.kind();
    debug!(kind, worker = id, "Worker started");

    while let Some(key) = shared.queue.get().await {
        let result = tokio::select! {
            result = shared.run_pass(&key) => result,
            _ = shutdown_requested(&mut shutdown) => {
                debug!(kind, key = %key, "Abandoning reconcile pass on shutdown");
                shared.queue.done(&key);
                break;
            }
        };

        match result {
            Ok(Action::Done) => {
                shared.backoff.forget(&key);
            }
            Ok(Action::Requeue) => {
                shared.backoff.forget(&key);
                // The key is still in flight, so this defers it until done().
                let _ = shared.queue.try_add(key.clone());
            }
            Err(e) => {
                let delay = shared
                    .backoff
                    .next_delay(&key, e.is_contract_violation());

                if let ReconcileError::Timeout(limit) = &e {
                    shared.reconciler.warn_event(
                        &key,
                        "ReconcileTimeout",
                        &format!("Reconcile pass did not finish within {:?}", limit),
                    );
                }

                if e.is_contract_violation() {
                    error!(kind, key = %key, error = %e, retry_in = ?delay, "Adapter contract violation");
                } else if e.is_conflict() {
                    debug!(kind, key = %key, error = %e, retry_in = ?delay, "Object changed during reconcile");
                } else {
                    warn!(kind, key = %key, error = %e, retry_in = ?delay, "Reconcile failed");
                }

                requeue_after(
                    Arc::clone(&shared.queue),
                    key.clone(),
                    delay,
                    shutdown.clone(),
                );
            }
        }

        shared.queue.done(&key);
    }

    debug!(kind, worker = id, "Worker stopped");
}

fn requeue_after(
    queue: Arc<WorkQueue>,
    key: ObjectKey,
    delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                let _ = queue.add(key).await;
            }
            _ = shutdown_requested(&mut shutdown) => {}
        }
    });
}

async fn watch_store<A: ResourceAdapter>(
    shared: Arc<Shared<A>>,
    mut events: broadcast::Receiver<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    let kind = shared.reconciler.kind();
    shared.resync().await;

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(Event::Deleted(key)) => {
                    debug!(kind, key = %key, "Object removed");
                }
                Ok(event) => {
                    if let Err(QueueError::ShutDown) = shared.queue.add(event.key().clone()).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(kind, missed, "Store watch lagged, resyncing");
                    shared.resync().await;
                }
                Err(RecvError::Closed) => {
                    warn!(kind, "Store watch closed");
                    break;
                }
            },
            _ = shutdown_requested(&mut shutdown) => break,
        }
    }

    debug!(kind, "Store watch stopped");
}
