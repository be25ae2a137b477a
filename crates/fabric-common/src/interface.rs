//! Logical interfaces configured on switch ports

use crate::{ConnectPoint, MacAddress, VlanId};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

/// A logical L3 interface bound to a connect point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub connect_point: ConnectPoint,
    pub mac: MacAddress,
    /// Interface addresses with their subnet, in configuration order
    #[serde(default)]
    pub ip_addresses: Vec<IpNet>,
    #[serde(default)]
    pub vlan_untagged: VlanId,
    #[serde(default)]
    pub vlan_native: VlanId,
    #[serde(default)]
    pub vlan_tagged: BTreeSet<VlanId>,
}

impl Interface {
    pub fn new(name: impl Into<String>, connect_point: ConnectPoint, mac: MacAddress) -> Self {
        Self {
            name: name.into(),
            connect_point,
            mac,
            ip_addresses: Vec::new(),
            vlan_untagged: VlanId::NONE,
            vlan_native: VlanId::NONE,
            vlan_tagged: BTreeSet::new(),
        }
    }

    pub fn with_ip(mut self, ip: IpNet) -> Self {
        self.ip_addresses.push(ip);
        self
    }

    pub fn with_untagged_vlan(mut self, vlan: VlanId) -> Self {
        self.vlan_untagged = vlan;
        self
    }

    pub fn with_native_vlan(mut self, vlan: VlanId) -> Self {
        self.vlan_native = vlan;
        self
    }

    pub fn with_tagged_vlan(mut self, vlan: VlanId) -> Self {
        self.vlan_tagged.insert(vlan);
        self
    }

    /// First IPv4 address configured on the interface
    pub fn first_ipv4(&self) -> Option<Ipv4Addr> {
        self.ip_addresses.iter().find_map(|net| match net.addr() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
    }

    /// VLAN used for traffic the interface sends untagged: the native VLAN
    /// when one is set, otherwise the untagged VLAN
    pub fn vlan(&self) -> VlanId {
        if self.vlan_native.is_tagged() {
            self.vlan_native
        } else {
            self.vlan_untagged
        }
    }

    /// Whether a packet carrying `vlan` belongs to this interface.
    ///
    /// Untagged packets match an interface with an untagged or native VLAN;
    /// tagged packets match only the tagged VLAN set.
    pub fn contains_vlan(&self, vlan: VlanId) -> bool {
        if vlan.is_none() {
            return self.vlan_untagged.is_tagged() || self.vlan_native.is_tagged();
        }
        self.vlan_tagged.contains(&vlan)
    }
}
