//! Canonical device records produced by both discoverers.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::protocol::artnet::{ArtPollReply, format_mac};
use crate::protocol::rdm::DeviceInfo;
use crate::protocol::uid::Uid;

/// Identity of a device within one registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DeviceKey {
    /// ArtNet node MAC, lower-case colon separated.
    Mac(String),
    Uid(Uid),
    /// ArtNet node that reported an all-zero MAC.
    Ip(Ipv4Addr),
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKey::Mac(mac) => write!(f, "mac {}", mac),
            DeviceKey::Uid(uid) => write!(f, "uid {}", uid),
            DeviceKey::Ip(ip) => write!(f, "ip {}", ip),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    ArtNet,
    Rdm,
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoverySource::ArtNet => write!(f, "ArtNet"),
            DiscoverySource::Rdm => write!(f, "RDM"),
        }
    }
}

/// Where an RDM responder was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusPosition {
    pub port: String,
    /// Discovery order on that port, from zero.
    pub index: usize,
}

/// Extra identification only RDM provides.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RdmDetails {
    pub model_id: u16,
    pub product_category: u16,
    pub software_version: u32,
    pub software_version_label: Option<String>,
    pub footprint: u16,
    pub current_personality: u8,
    pub personality_count: u8,
    pub sub_device_count: u16,
    pub sensor_count: u8,
    pub device_label: Option<String>,
}

impl From<&DeviceInfo> for RdmDetails {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            model_id: info.model_id,
            product_category: info.product_category,
            software_version: info.software_version,
            footprint: info.footprint,
            current_personality: info.current_personality,
            personality_count: info.personality_count,
            sub_device_count: info.sub_device_count,
            sensor_count: info.sensor_count,
            ..Default::default()
        }
    }
}

/// One discovered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub key: DeviceKey,
    pub name: String,
    pub source: DiscoverySource,
    pub ip: Option<Ipv4Addr>,
    pub bus: Option<BusPosition>,
    pub universe: Option<u16>,
    pub address: Option<u16>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub rdm: Option<RdmDetails>,
    /// Opaque reference attached by downstream collaborators.
    pub fixture_ref: Option<String>,
}

impl DeviceRecord {
    /// Bare record with only identity, name and source.
    pub fn new(key: DeviceKey, name: impl Into<String>, source: DiscoverySource) -> Self {
        Self {
            key,
            name: name.into(),
            source,
            ip: None,
            bus: None,
            universe: None,
            address: None,
            manufacturer: None,
            model: None,
            rdm: None,
            fixture_ref: None,
        }
    }

    /// Map an ArtPollReply; `patch` comes from the address heuristics.
    pub fn from_art_poll_reply(reply: &ArtPollReply, patch: Option<(u16, u16)>) -> Self {
        let key = if reply.mac_is_zero() {
            DeviceKey::Ip(reply.ip)
        } else {
            DeviceKey::Mac(format_mac(&reply.mac))
        };
        let name = if !reply.short_name.is_empty() {
            reply.short_name.clone()
        } else if !reply.long_name.is_empty() {
            reply.long_name.clone()
        } else {
            reply.ip.to_string()
        };
        let mut record = Self::new(key, name, DiscoverySource::ArtNet);
        record.ip = Some(reply.ip);
        record.model = (!reply.long_name.is_empty()).then(|| reply.long_name.clone());
        if let Some((universe, address)) = patch {
            record.universe = Some(universe);
            record.address = Some(address);
        }
        record
    }
}
