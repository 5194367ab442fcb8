pub mod adapter;
pub mod controller;
pub mod error;
pub mod model;
pub mod poller;
pub mod queue;
pub mod reconciler;
pub mod recorder;
pub mod store;

pub use adapter::{Object, ResourceAdapter};
pub use controller::{Controller, ControllerConfig, ControllerHandle};
pub use error::{AdapterError, ReconcileError};
pub use model::{FINALIZER, ManagedObject, ObjectKey, ParseKeyError};
pub use poller::{Drift, DriftPoller, ScanReport};
pub use queue::{Backoff, BackoffConfig, Enqueued, QueueError, WorkQueue};
pub use reconciler::{Action, Reconciler};
pub use recorder::{EventLog, EventRecorder, RecordedEvent, Severity};
pub use store::{Event, MemoryStore, ObjectStore, StoreError};
