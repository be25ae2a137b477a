//! Locations in the managed network: devices, ports, connect points and hosts

use crate::{Error, MacAddress, Result, VlanId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Identifier of a managed device (e.g. `of:0000000000000001`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Port number on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortNumber(u64);

impl PortNumber {
    pub const fn new(port: u64) -> Self {
        Self(port)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A (device, port) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectPoint {
    pub device_id: DeviceId,
    pub port: PortNumber,
}

impl ConnectPoint {
    pub fn new(device_id: DeviceId, port: PortNumber) -> Self {
        Self { device_id, port }
    }
}

impl fmt::Display for ConnectPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.port)
    }
}

impl FromStr for ConnectPoint {
    type Err = Error;

    /// Parses `device/port`; the device part may itself contain `:`
    fn from_str(s: &str) -> Result<Self> {
        let (device, port) = s
            .rsplit_once('/')
            .ok_or_else(|| Error::InvalidConnectPoint(s.to_string()))?;
        if device.is_empty() {
            return Err(Error::InvalidConnectPoint(s.to_string()));
        }
        let port: u64 = port.parse().map_err(|_| Error::InvalidPort(port.to_string()))?;
        Ok(Self::new(DeviceId::new(device), PortNumber::new(port)))
    }
}

impl Serialize for ConnectPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConnectPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Host identity: MAC address scoped by VLAN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostId {
    pub mac: MacAddress,
    pub vlan: VlanId,
}

impl HostId {
    pub fn new(mac: MacAddress, vlan: VlanId) -> Self {
        Self { mac, vlan }
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mac, self.vlan)
    }
}

/// A connect point at which a host was observed, with the observation time
/// in milliseconds since the Unix epoch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostLocation {
    pub connect_point: ConnectPoint,
    pub time: i64,
}

impl HostLocation {
    pub fn new(connect_point: ConnectPoint, time: i64) -> Self {
        Self { connect_point, time }
    }

    /// Location observed now
    pub fn now(connect_point: ConnectPoint) -> Self {
        Self::new(connect_point, chrono::Utc::now().timestamp_millis())
    }
}
