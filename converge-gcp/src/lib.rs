pub mod address;
pub mod client;
pub mod dns;
pub mod types;

pub use address::IpAddressAdapter;
pub use client::{ComputeApi, DnsApi, GcpHttpClient, InMemoryCloud, OperationPolling};
pub use dns::{DnsZoneAdapter, ZoneAndRecords};
pub use types::{
    DnsRecord, DnsZoneSpec, DnsZoneStatus, IpAddressSpec, IpAddressStatus, IpVersion, NetworkTier,
};
