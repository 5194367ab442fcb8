//! Declared spec and observed status of the GCP resource kinds.

use serde::{Deserialize, Serialize};

/// A DNS record set declared on a zone.
///
/// For `A` records an rrdata may reference an IP address object as
/// `ipaddress:<namespace>/<name>`; it resolves to that object's address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub dns_name: String,
    pub ttl: i64,
    #[serde(default)]
    pub rrdatas: Vec<String>,
}

/// Declared state of a managed zone.
///
/// `project_id` and `zone_name` identify the zone. Changing either on an
/// existing object makes the controller create a new zone; the old one is
/// left in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsZoneSpec {
    pub project_id: String,
    /// Fully qualified domain name, with the trailing dot.
    pub dns_name: String,
    /// Managed zone name; defaults to `<namespace>-<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_name: Option<String>,
    #[serde(default)]
    pub records: Vec<DnsRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsZoneStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub zone_name: String,
}

/// Network service tier of a reserved address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkTier {
    #[default]
    Premium,
    Standard,
}

impl NetworkTier {
    /// Name used by the Compute Engine API.
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkTier::Premium => "PREMIUM",
            NetworkTier::Standard => "STANDARD",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpVersion {
    #[default]
    Ipv4,
    Ipv6,
}

impl IpVersion {
    /// Name used by the Compute Engine API.
    pub fn as_str(self) -> &'static str {
        match self {
            IpVersion::Ipv4 => "IPV4",
            IpVersion::Ipv6 => "IPV6",
        }
    }
}

/// Declared state of a reserved address.
///
/// `project_id` and `region` identify the address. Changing either on an
/// existing object reserves a new address; the old one stays reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAddressSpec {
    pub project_id: String,
    #[serde(default)]
    pub network_tier: NetworkTier,
    /// Only honored for global addresses; regional ones are always IPv4.
    #[serde(default)]
    pub ip_version: IpVersion,
    /// Region name; absent for a global address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl IpAddressSpec {
    /// Region of a regional address. An empty region means global.
    pub fn region_name(&self) -> Option<&str> {
        self.region.as_deref().filter(|r| !r.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAddressStatus {
    #[serde(default)]
    pub address: String,
}
