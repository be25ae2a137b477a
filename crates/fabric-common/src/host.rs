//! End hosts known to the topology service, and their events

use crate::{ConnectPoint, HostId, HostLocation, MacAddress, VlanId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

/// A host discovered in the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    /// Every location the host is attached at (more than one when dual-homed)
    pub locations: Vec<HostLocation>,
    pub ip_addresses: BTreeSet<IpAddr>,
}

impl Host {
    pub fn new(mac: MacAddress, vlan: VlanId) -> Self {
        Self {
            id: HostId::new(mac, vlan),
            locations: Vec::new(),
            ip_addresses: BTreeSet::new(),
        }
    }

    pub fn with_location(mut self, location: HostLocation) -> Self {
        self.locations.push(location);
        self
    }

    pub fn with_ip(mut self, ip: impl Into<IpAddr>) -> Self {
        self.ip_addresses.insert(ip.into());
        self
    }

    pub fn mac(&self) -> MacAddress {
        self.id.mac
    }

    pub fn vlan(&self) -> VlanId {
        self.id.vlan
    }

    pub fn has_ip(&self, ip: IpAddr) -> bool {
        self.ip_addresses.contains(&ip)
    }

    pub fn first_ipv4(&self) -> Option<Ipv4Addr> {
        self.ip_addresses.iter().find_map(|ip| match ip {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
    }

    /// Whether any of the host's locations is at `connect_point`
    pub fn is_located_at(&self, connect_point: &ConnectPoint) -> bool {
        self.locations
            .iter()
            .any(|location| &location.connect_point == connect_point)
    }
}

/// Host information published to the topology service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDescription {
    pub mac: MacAddress,
    pub vlan: VlanId,
    pub locations: Vec<HostLocation>,
    pub ip_addresses: BTreeSet<IpAddr>,
}

impl HostDescription {
    pub fn into_host(self) -> Host {
        Host {
            id: HostId::new(self.mac, self.vlan),
            locations: self.locations,
            ip_addresses: self.ip_addresses,
        }
    }
}

/// Topology change notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Added(Host),
    Updated(Host),
    Removed(Host),
    /// The host's location set changed; carries the host after the move
    Moved(Host),
}

impl HostEvent {
    pub fn subject(&self) -> &Host {
        match self {
            HostEvent::Added(host)
            | HostEvent::Updated(host)
            | HostEvent::Removed(host)
            | HostEvent::Moved(host) => host,
        }
    }
}
