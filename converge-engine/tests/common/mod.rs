//! Shared test utilities for converge-engine integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use converge_engine::{
    AdapterError, Controller, ControllerConfig, ControllerHandle, EventLog, FINALIZER,
    MemoryStore, Object, ObjectKey, ResourceAdapter, BackoffConfig,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub type FakeStore = MemoryStore<String, String>;

/// External resource managed by [`FakeAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeResource {
    pub id: String,
    pub value: String,
}

/// Adapter call, as seen by the fake external system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Retrieve(ObjectKey),
    Create(ObjectKey),
    Update(ObjectKey),
    Delete(ObjectKey),
    UpdateStatus(ObjectKey),
}

#[derive(Default)]
struct InFlight {
    per_key: HashMap<ObjectKey, usize>,
    max_per_key: usize,
    total: usize,
    max_total: usize,
}

/// Recording adapter backed by an in-memory "cloud".
///
/// Spec is the desired resource value; status is the resource id.
pub struct FakeAdapter {
    cleanup: bool,
    resources: Mutex<HashMap<ObjectKey, FakeResource>>,
    calls: Mutex<Vec<Call>>,
    /// Whether the object carried the finalizer at each create call.
    created_with_finalizer: Mutex<Vec<bool>>,
    in_flight: Mutex<InFlight>,
    next_id: AtomicUsize,
    pub force_update_needed: AtomicBool,
    pub fail_retrieve: Mutex<HashSet<ObjectKey>>,
    /// Number of upcoming create calls that fail.
    pub create_failures: AtomicUsize,
    pub contract_violation_on_create: AtomicBool,
    /// Delay inside every retrieve call.
    pub delay: Mutex<Option<Duration>>,
    /// Spec written to the store during the next create call, so the
    /// object changes between the pass's read and its status write.
    pub respec_on_create: Mutex<Option<(Arc<FakeStore>, String)>>,
}

struct InFlightGuard<'a> {
    adapter: &'a FakeAdapter,
    key: ObjectKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.adapter.in_flight.lock().unwrap();
        if let Some(count) = in_flight.per_key.get_mut(&self.key) {
            *count -= 1;
        }
        in_flight.total -= 1;
    }
}

impl FakeAdapter {
    pub fn new(cleanup: bool) -> Self {
        Self {
            cleanup,
            resources: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            created_with_finalizer: Mutex::new(Vec::new()),
            in_flight: Mutex::new(InFlight::default()),
            next_id: AtomicUsize::new(1),
            force_update_needed: AtomicBool::new(false),
            fail_retrieve: Mutex::new(HashSet::new()),
            create_failures: AtomicUsize::new(0),
            contract_violation_on_create: AtomicBool::new(false),
            delay: Mutex::new(None),
            respec_on_create: Mutex::new(None),
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    fn enter(&self, key: &ObjectKey) -> InFlightGuard<'_> {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.per_key.entry(key.clone()).or_insert(0);
        *count += 1;
        let count = *count;
        in_flight.max_per_key = in_flight.max_per_key.max(count);
        in_flight.total += 1;
        in_flight.max_total = in_flight.max_total.max(in_flight.total);
        InFlightGuard {
            adapter: self,
            key: key.clone(),
        }
    }

    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Number of mutating calls (create, update, delete).
    pub fn mutations(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(_) | Call::Update(_) | Call::Delete(_)))
            .count()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    pub fn created_with_finalizer(&self) -> Vec<bool> {
        self.created_with_finalizer.lock().unwrap().clone()
    }

    pub fn max_in_flight_per_key(&self) -> usize {
        self.in_flight.lock().unwrap().max_per_key
    }

    pub fn max_in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().max_total
    }

    /// Seed a resource as if it had been created out of band.
    pub fn insert_resource(&self, key: &ObjectKey, id: &str, value: &str) {
        self.resources.lock().unwrap().insert(
            key.clone(),
            FakeResource {
                id: id.to_string(),
                value: value.to_string(),
            },
        );
    }

    /// Remove a resource behind the engine's back.
    pub fn remove_resource(&self, key: &ObjectKey) {
        self.resources.lock().unwrap().remove(key);
    }

    pub fn resource(&self, key: &ObjectKey) -> Option<FakeResource> {
        self.resources.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ResourceAdapter for FakeAdapter {
    type Spec = String;
    type Status = String;
    type Resource = FakeResource;

    fn kind(&self) -> &'static str {
        "fakes"
    }

    fn is_cleanup_on_deletion(&self) -> bool {
        self.cleanup
    }

    async fn create_resource(&self, object: &Object<Self>) -> Result<FakeResource, AdapterError> {
        let _guard = self.enter(&object.key);
        self.log(Call::Create(object.key.clone()));
        self.created_with_finalizer
            .lock()
            .unwrap()
            .push(object.has_finalizer(FINALIZER));

        if self.contract_violation_on_create.load(Ordering::SeqCst) {
            return Err(AdapterError::contract_violation("unexpected resource shape"));
        }
        if self
            .create_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AdapterError::api("503 service unavailable"));
        }

        let resource = FakeResource {
            id: format!("res-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            value: object.spec.clone(),
        };
        self.resources
            .lock()
            .unwrap()
            .insert(object.key.clone(), resource.clone());

        let respec = self.respec_on_create.lock().unwrap().take();
        if let Some((store, spec)) = respec {
            store.apply(object.key.clone(), spec).await.unwrap();
        }
        Ok(resource)
    }

    async fn retrieve_resource(
        &self,
        object: &Object<Self>,
    ) -> Result<Option<FakeResource>, AdapterError> {
        let _guard = self.enter(&object.key);
        self.log(Call::Retrieve(object.key.clone()));

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_retrieve.lock().unwrap().contains(&object.key) {
            return Err(AdapterError::api("connection reset"));
        }
        Ok(self.resource(&object.key))
    }

    async fn update_resource(
        &self,
        object: &Object<Self>,
        _resource: &FakeResource,
    ) -> Result<FakeResource, AdapterError> {
        let _guard = self.enter(&object.key);
        self.log(Call::Update(object.key.clone()));

        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(&object.key)
            .ok_or_else(|| AdapterError::api("resource vanished"))?;
        resource.value = object.spec.clone();
        Ok(resource.clone())
    }

    async fn delete_resource(&self, object: &Object<Self>) -> Result<(), AdapterError> {
        let _guard = self.enter(&object.key);
        self.log(Call::Delete(object.key.clone()));
        self.resources.lock().unwrap().remove(&object.key);
        Ok(())
    }

    async fn is_update_needed(
        &self,
        object: &Object<Self>,
        resource: &FakeResource,
    ) -> Result<bool, AdapterError> {
        Ok(self.force_update_needed.load(Ordering::SeqCst) || resource.value != object.spec)
    }

    async fn is_status_update_needed(
        &self,
        object: &Object<Self>,
        resource: &FakeResource,
    ) -> Result<bool, AdapterError> {
        Ok(object.status != resource.id)
    }

    fn update_object_status(&self, object: &mut Object<Self>, resource: &FakeResource) {
        self.log(Call::UpdateStatus(object.key.clone()));
        object.status = resource.id.clone();
    }
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new("ns", name)
}

/// Controller settings that keep integration tests fast.
pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        poll_interval: Duration::from_millis(50),
        workers: 4,
        queue_capacity: 64,
        reconcile_timeout: Some(Duration::from_secs(5)),
        backoff: BackoffConfig {
            base: Duration::from_millis(10),
            max: Duration::from_millis(100),
            contract_violation_floor: Duration::from_millis(200),
        },
    }
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// A running controller over a [`FakeAdapter`] and an in-memory store.
pub struct TestController {
    pub store: Arc<FakeStore>,
    pub adapter: Arc<FakeAdapter>,
    pub events: Arc<EventLog>,
    pub handle: ControllerHandle,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TestController {
    pub fn spawn(adapter: FakeAdapter, config: ControllerConfig) -> Self {
        Self::spawn_with_store(adapter, Arc::new(FakeStore::new()), config)
    }

    pub fn spawn_with_store(
        adapter: FakeAdapter,
        store: Arc<FakeStore>,
        config: ControllerConfig,
    ) -> Self {
        let adapter = Arc::new(adapter);
        let events = Arc::new(EventLog::default());
        let controller = Controller::new(
            Arc::clone(&adapter),
            store.clone(),
            events.clone(),
            config,
        );
        let handle = controller.handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(controller.run(shutdown_rx));

        Self {
            store,
            adapter,
            events,
            handle,
            shutdown_tx,
            task,
        }
    }

    /// Whether the object exists with finalizer and the given status.
    pub async fn is_converged(&self, key: ObjectKey) -> bool {
        use converge_engine::ObjectStore;
        match self.store.get(&key).await.unwrap() {
            Some(obj) => {
                obj.has_finalizer(FINALIZER)
                    && self
                        .adapter
                        .resource(&key)
                        .is_some_and(|r| r.id == obj.status && r.value == obj.spec)
            }
            None => false,
        }
    }

    pub async fn stop(self) {
        self.shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("controller did not stop")
            .unwrap();
    }
}
