//! Wiring of stores, adapters and controllers shared by the daemon and tests.

use std::sync::Arc;

use converge_engine::{Controller, ControllerConfig, ControllerHandle, EventLog, MemoryStore};
use converge_gcp::{
    ComputeApi, DnsApi, DnsZoneAdapter, DnsZoneSpec, DnsZoneStatus, IpAddressAdapter,
    IpAddressSpec, IpAddressStatus, OperationPolling,
};
use tokio::sync::watch;
use tracing::info;

/// Store and trigger handle of one resource kind.
pub struct KindState<S, T> {
    pub store: Arc<MemoryStore<S, T>>,
    pub handle: ControllerHandle,
}

impl<S, T> KindState<S, T> {
    pub fn kind(&self) -> &'static str {
        self.handle.kind()
    }
}

/// Shared application state
pub struct AppState {
    pub dns_zones: Arc<KindState<DnsZoneSpec, DnsZoneStatus>>,
    pub ip_addresses: Arc<KindState<IpAddressSpec, IpAddressStatus>>,
    pub events: Arc<EventLog>,
}

/// One controller per resource kind, run together.
pub struct Controllers {
    dns_zones: Controller<DnsZoneAdapter>,
    ip_addresses: Controller<IpAddressAdapter>,
}

impl Controllers {
    /// Run every controller until `shutdown` flips to true.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        tokio::join!(
            self.dns_zones.run(shutdown.clone()),
            self.ip_addresses.run(shutdown),
        );
        info!("Controllers stopped");
    }
}

/// Build the stores, adapters and controllers for both kinds.
pub fn build(
    dns: Arc<dyn DnsApi>,
    compute: Arc<dyn ComputeApi>,
    config: ControllerConfig,
    polling: OperationPolling,
) -> (Arc<AppState>, Controllers) {
    let events = Arc::new(EventLog::default());
    let ip_store: Arc<MemoryStore<IpAddressSpec, IpAddressStatus>> = Arc::new(MemoryStore::new());
    let zone_store: Arc<MemoryStore<DnsZoneSpec, DnsZoneStatus>> = Arc::new(MemoryStore::new());

    let ip_addresses = Controller::new(
        Arc::new(IpAddressAdapter::new(compute).with_polling(polling)),
        ip_store.clone(),
        events.clone(),
        config.clone(),
    );
    // Zones read address objects to resolve `ipaddress:` record data.
    let dns_zones = Controller::new(
        Arc::new(DnsZoneAdapter::new(dns, ip_store.clone()).with_polling(polling)),
        zone_store.clone(),
        events.clone(),
        config,
    );

    let state = Arc::new(AppState {
        dns_zones: Arc::new(KindState {
            store: zone_store,
            handle: dns_zones.handle(),
        }),
        ip_addresses: Arc::new(KindState {
            store: ip_store,
            handle: ip_addresses.handle(),
        }),
        events,
    });

    (
        state,
        Controllers {
            dns_zones,
            ip_addresses,
        },
    )
}
