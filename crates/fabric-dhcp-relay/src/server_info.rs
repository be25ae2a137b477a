//! Configured DHCP servers and their resolved link-layer bindings
//!
//! The registry keeps one ordered list per [`ServerPath`]. Only the head of
//! each list is used for relaying; a configuration push replaces the head.
//! Each entry learns the MAC and VLAN it is reached through from the host
//! service, first when the configuration is applied and later from host
//! events (see [`crate::topology`]).

use crate::config::{DhcpServerConfig, ServerPath};
use crate::error::{RelayError, Result};
use crate::services::HostService;
use fabric_common::{ConnectPoint, Host, MacAddress, VlanId};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// MAC and VLAN the server (or its gateway) answers on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerBinding {
    pub mac: MacAddress,
    pub vlan: VlanId,
}

impl ServerBinding {
    pub fn new(mac: MacAddress, vlan: VlanId) -> Self {
        Self { mac, vlan }
    }

    pub fn from_host(host: &Host) -> Self {
        Self::new(host.mac(), host.vlan())
    }
}

/// One configured server path
#[derive(Debug, Clone)]
pub struct DhcpServerInfo {
    server_connect_point: ConnectPoint,
    server_ip4: Ipv4Addr,
    gateway_ip4: Option<Ipv4Addr>,
    relay_agent_ip4: Option<Ipv4Addr>,
    binding: Option<ServerBinding>,
    /// Number of binding changes since the entry was built
    binding_updates: u64,
}

impl PartialEq for DhcpServerInfo {
    fn eq(&self, other: &Self) -> bool {
        self.server_connect_point == other.server_connect_point
            && self.server_ip4 == other.server_ip4
            && self.gateway_ip4 == other.gateway_ip4
            && self.relay_agent_ip4 == other.relay_agent_ip4
            && self.binding == other.binding
    }
}

impl Eq for DhcpServerInfo {}

impl DhcpServerInfo {
    /// Build an unresolved entry; fails when the config lacks a connect
    /// point or a server address
    pub fn from_config(config: &DhcpServerConfig) -> Result<Self> {
        let server_connect_point = config
            .server_connect_point
            .clone()
            .ok_or_else(|| RelayError::InvalidConfig("connect point not set".to_string()))?;
        let server_ip4 = config
            .server_ip4
            .ok_or_else(|| RelayError::InvalidConfig("DHCP server IPv4 not set".to_string()))?;

        Ok(Self {
            server_connect_point,
            server_ip4,
            gateway_ip4: config.gateway_ip4,
            relay_agent_ip4: config.relay_agent_ip4,
            binding: None,
            binding_updates: 0,
        })
    }

    pub fn server_connect_point(&self) -> &ConnectPoint {
        &self.server_connect_point
    }

    pub fn server_ip4(&self) -> Ipv4Addr {
        self.server_ip4
    }

    pub fn gateway_ip4(&self) -> Option<Ipv4Addr> {
        self.gateway_ip4
    }

    pub fn relay_agent_ip4(&self) -> Option<Ipv4Addr> {
        self.relay_agent_ip4
    }

    /// Resolved MAC and VLAN; `None` until the probed address is learned
    pub fn binding(&self) -> Option<ServerBinding> {
        self.binding
    }

    pub fn set_binding(&mut self, binding: Option<ServerBinding>) {
        self.binding = binding;
        self.binding_updates += 1;
    }

    /// Address whose owner the relay sends to: the gateway when configured,
    /// otherwise the server itself
    pub fn probe_ip(&self) -> Ipv4Addr {
        self.gateway_ip4.unwrap_or(self.server_ip4)
    }

    /// Whether `host` owns the gateway or the server address
    pub fn is_served_by(&self, host: &Host) -> bool {
        self.gateway_ip4
            .is_some_and(|ip| host.has_ip(IpAddr::V4(ip)))
            || host.has_ip(IpAddr::V4(self.server_ip4))
    }

    fn monitored_ips(&self) -> impl Iterator<Item = IpAddr> {
        self.gateway_ip4
            .into_iter()
            .chain(Some(self.server_ip4))
            .map(IpAddr::V4)
    }
}

/// The default and indirect server lists
pub struct ServerInfoRegistry {
    hosts: Arc<dyn HostService>,
    default_path: RwLock<Vec<DhcpServerInfo>>,
    indirect_path: RwLock<Vec<DhcpServerInfo>>,
    /// Serializes configuration pushes and deactivation
    config_lock: Mutex<()>,
}

impl ServerInfoRegistry {
    pub fn new(hosts: Arc<dyn HostService>) -> Self {
        Self {
            hosts,
            default_path: RwLock::new(Vec::new()),
            indirect_path: RwLock::new(Vec::new()),
            config_lock: Mutex::new(()),
        }
    }

    fn list(&self, path: ServerPath) -> &RwLock<Vec<DhcpServerInfo>> {
        match path {
            ServerPath::Default => &self.default_path,
            ServerPath::Indirect => &self.indirect_path,
        }
    }

    /// Replace the head of `path` with the first entry of `configs`.
    ///
    /// An empty config set and a config without a server IPv4 leave the list
    /// untouched. A config without a connect point is rejected before the old
    /// head is evicted.
    pub async fn apply_config(&self, path: ServerPath, configs: &[DhcpServerConfig]) -> Result<()> {
        let Some(config) = configs.first() else {
            debug!(path = %path, "Empty DHCP server config, nothing to update");
            return Ok(());
        };
        if configs.len() > 1 {
            debug!(path = %path, count = configs.len(), "Using the first DHCP server config only");
        }
        if config.server_ip4.is_none() {
            warn!(path = %path, "DHCP server config has no IPv4 address, ignoring");
            return Ok(());
        }
        let server_info = DhcpServerInfo::from_config(config)?;

        let _config_guard = self.config_lock.lock().await;

        if let Some(old) = self.head(path) {
            for ip in old.monitored_ips() {
                self.hosts.stop_monitoring_ip(ip).await;
            }
        }

        let probe_ip = IpAddr::V4(server_info.probe_ip());
        let probe_kind = if server_info.gateway_ip4.is_some() {
            "gateway"
        } else {
            "server"
        };
        debug!(
            path = %path,
            connect_point = %server_info.server_connect_point,
            server_ip = %server_info.server_ip4,
            "Probing to resolve {} IP {}",
            probe_kind,
            probe_ip
        );

        // Installed unresolved first so host events seen from here on reach it
        {
            let mut list = self.list(path).write().unwrap_or_else(PoisonError::into_inner);
            if !list.is_empty() {
                list.remove(0);
            }
            list.insert(0, server_info);
            dedup_in_order(&mut list);
        }

        self.hosts.start_monitoring_ip(probe_ip).await;
        let known = self
            .hosts
            .hosts_by_ip(probe_ip)
            .await
            .first()
            .map(ServerBinding::from_host);

        let mut list = self.list(path).write().unwrap_or_else(PoisonError::into_inner);
        if let Some(head) = list.first_mut() {
            // A host event applied meanwhile is newer than the lookup
            if head.binding_updates == 0 && known.is_some() {
                head.set_binding(known);
            }
            info!(
                path = %path,
                connect_point = %head.server_connect_point,
                server_ip = %head.server_ip4,
                resolved = head.binding.is_some(),
                "DHCP server configured"
            );
        }

        Ok(())
    }

    /// Head of `path`, if configured
    pub fn head(&self, path: ServerPath) -> Option<DhcpServerInfo> {
        self.list(path)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned()
    }

    /// Server info used for a client: the default head for direct clients,
    /// the indirect head (falling back to the default head) otherwise
    pub fn active_path(&self, directly_connected: bool) -> Option<DhcpServerInfo> {
        if !directly_connected {
            if let Some(indirect) = self.head(ServerPath::Indirect) {
                return Some(indirect);
            }
        }
        self.head(ServerPath::Default)
    }

    /// Whether a default server has been configured
    pub fn is_configured(&self) -> bool {
        !self
            .default_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Snapshot of a server list
    pub fn servers(&self, path: ServerPath) -> Vec<DhcpServerInfo> {
        self.list(path)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `update` to the head of each list. The binding change for one
    /// entry happens under its list's write lock.
    pub fn update_heads<F>(&self, mut update: F)
    where
        F: FnMut(ServerPath, &mut DhcpServerInfo),
    {
        for path in [ServerPath::Default, ServerPath::Indirect] {
            let mut list = self.list(path).write().unwrap_or_else(PoisonError::into_inner);
            if let Some(head) = list.first_mut() {
                update(path, head);
            }
        }
    }

    /// Stop monitoring every configured address and clear both lists
    pub async fn deactivate(&self) {
        let _config_guard = self.config_lock.lock().await;

        for path in [ServerPath::Default, ServerPath::Indirect] {
            let removed = std::mem::take(
                &mut *self.list(path).write().unwrap_or_else(PoisonError::into_inner),
            );
            for server_info in removed {
                for ip in server_info.monitored_ips() {
                    self.hosts.stop_monitoring_ip(ip).await;
                }
            }
        }
        info!("DHCP server lists cleared");
    }
}

impl std::fmt::Debug for ServerInfoRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInfoRegistry")
            .field("default_path", &self.servers(ServerPath::Default))
            .field("indirect_path", &self.servers(ServerPath::Indirect))
            .finish_non_exhaustive()
    }
}

/// Drop later duplicates, keeping first occurrences in order
fn dedup_in_order(list: &mut Vec<DhcpServerInfo>) {
    let mut seen: Vec<DhcpServerInfo> = Vec::with_capacity(list.len());
    list.retain(|info| {
        if seen.contains(info) {
            false
        } else {
            seen.push(info.clone());
            true
        }
    });
}
