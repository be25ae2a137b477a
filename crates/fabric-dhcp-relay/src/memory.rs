//! In-memory service implementations
//!
//! Simple collaborators for embedding the relay without a controller and for
//! testing.

use crate::error::{RelayError, Result};
use crate::packet::OutboundPacket;
use crate::record::DhcpRecord;
use crate::services::{
    DhcpRelayStore, HostService, InterfaceService, PacketService, RouteStore,
};
use async_trait::async_trait;
use fabric_common::{ConnectPoint, Host, HostDescription, HostId, Interface, Route};
use ipnet::IpNet;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::RwLock;

fn poisoned<E: std::fmt::Display>(e: E) -> RelayError {
    RelayError::Store(format!("lock poisoned: {}", e))
}

/// In-memory binding record store
pub struct MemoryRelayStore {
    records: RwLock<HashMap<HostId, DhcpRecord>>,
}

impl MemoryRelayStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of every stored record
    pub fn records(&self) -> Vec<DhcpRecord> {
        self.records
            .read()
            .map(|guard| guard.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryRelayStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DhcpRelayStore for MemoryRelayStore {
    async fn get_record(&self, id: &HostId) -> Result<Option<DhcpRecord>> {
        let guard = self.records.read().map_err(poisoned)?;
        Ok(guard.get(id).cloned())
    }

    async fn update_record(&self, id: HostId, record: DhcpRecord) -> Result<()> {
        let mut guard = self.records.write().map_err(poisoned)?;
        guard.insert(id, record);
        Ok(())
    }

    async fn replace_record(
        &self,
        id: HostId,
        expected: Option<&DhcpRecord>,
        record: DhcpRecord,
    ) -> Result<bool> {
        let mut guard = self.records.write().map_err(poisoned)?;
        if guard.get(&id) != expected {
            return Ok(false);
        }
        guard.insert(id, record);
        Ok(true)
    }
}

/// Static interface configuration
#[derive(Default)]
pub struct MemoryInterfaceService {
    interfaces: RwLock<Vec<Interface>>,
}

impl MemoryInterfaceService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_interface(&self, interface: Interface) {
        if let Ok(mut guard) = self.interfaces.write() {
            guard.push(interface);
        }
    }
}

#[async_trait]
impl InterfaceService for MemoryInterfaceService {
    async fn interfaces_by_port(&self, connect_point: &ConnectPoint) -> Vec<Interface> {
        match self.interfaces.read() {
            Ok(guard) => guard
                .iter()
                .filter(|iface| &iface.connect_point == connect_point)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Host table with a record of monitored addresses
#[derive(Default)]
pub struct MemoryHostService {
    hosts: RwLock<HashMap<HostId, Host>>,
    monitored: RwLock<BTreeSet<IpAddr>>,
}

impl MemoryHostService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a host
    pub fn add_host(&self, host: Host) {
        if let Ok(mut guard) = self.hosts.write() {
            guard.insert(host.id, host);
        }
    }

    pub fn remove_host(&self, id: &HostId) -> Option<Host> {
        self.hosts.write().ok()?.remove(id)
    }

    pub fn is_monitoring(&self, ip: IpAddr) -> bool {
        self.monitored
            .read()
            .map(|guard| guard.contains(&ip))
            .unwrap_or(false)
    }

    pub fn monitored_ips(&self) -> Vec<IpAddr> {
        self.monitored
            .read()
            .map(|guard| guard.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HostService for MemoryHostService {
    async fn host(&self, id: &HostId) -> Option<Host> {
        self.hosts.read().ok()?.get(id).cloned()
    }

    async fn hosts_by_ip(&self, ip: IpAddr) -> Vec<Host> {
        match self.hosts.read() {
            Ok(guard) => guard.values().filter(|h| h.has_ip(ip)).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn start_monitoring_ip(&self, ip: IpAddr) {
        if let Ok(mut guard) = self.monitored.write() {
            guard.insert(ip);
        }
    }

    async fn stop_monitoring_ip(&self, ip: IpAddr) {
        if let Ok(mut guard) = self.monitored.write() {
            guard.remove(&ip);
        }
    }

    async fn host_detected(&self, id: HostId, description: HostDescription) {
        if let Ok(mut guard) = self.hosts.write() {
            guard.insert(id, description.into_host());
        }
    }
}

/// Route table keyed by prefix
#[derive(Default)]
pub struct MemoryRouteStore {
    routes: RwLock<HashMap<IpNet, Route>>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, prefix: &IpNet) -> Option<Route> {
        self.routes.read().ok()?.get(prefix).cloned()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes
            .read()
            .map(|guard| guard.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn update_route(&self, route: Route) {
        if let Ok(mut guard) = self.routes.write() {
            guard.insert(route.prefix, route);
        }
    }
}

/// Packet service that keeps every emitted frame
#[derive(Default)]
pub struct RecordingPacketService {
    sent: RwLock<Vec<OutboundPacket>>,
}

impl RecordingPacketService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames emitted so far, oldest first
    pub fn sent(&self) -> Vec<OutboundPacket> {
        self.sent
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Drain the emitted frames
    pub fn take(&self) -> Vec<OutboundPacket> {
        self.sent
            .write()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }
}

#[async_trait]
impl PacketService for RecordingPacketService {
    async fn emit(&self, packet: OutboundPacket) -> Result<()> {
        let mut guard = self.sent.write().map_err(poisoned)?;
        guard.push(packet);
        Ok(())
    }
}
