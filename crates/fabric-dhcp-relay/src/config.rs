//! DHCP relay configuration
//!
//! This module provides the server configuration pushed by the controller's
//! configuration service, either built in code or parsed from the
//! application's JSON config:
//!
//! ```json
//! {
//!   "default": [{
//!     "dhcpServerConnectPoint": "of:0000000000000002/2",
//!     "serverIps": ["10.0.3.253", "2000::3fd"],
//!     "gatewayIps": ["10.0.3.100"],
//!     "relayAgentIps": ["10.0.1.1"]
//!   }],
//!   "indirect": []
//! }
//! ```

use crate::error::{RelayError, Result};
use fabric_common::ConnectPoint;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Which server list a configuration applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerPath {
    /// Servers for directly connected clients
    Default,
    /// Servers for clients behind another relay; falls back to `Default`
    /// when empty
    Indirect,
}

impl ServerPath {
    pub fn for_client(directly_connected: bool) -> Self {
        if directly_connected {
            ServerPath::Default
        } else {
            ServerPath::Indirect
        }
    }
}

impl fmt::Display for ServerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerPath::Default => f.write_str("default"),
            ServerPath::Indirect => f.write_str("indirect"),
        }
    }
}

/// One configured DHCP server endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "RawServerConfig")]
pub struct DhcpServerConfig {
    /// Where the server (or the gateway towards it) is attached
    pub server_connect_point: Option<ConnectPoint>,

    /// Server address; a config without one is not a DHCPv4 config
    pub server_ip4: Option<Ipv4Addr>,

    /// Gateway to reach the server through, when it is not on-link
    pub gateway_ip4: Option<Ipv4Addr>,

    /// Overrides the giaddr presented to the server
    pub relay_agent_ip4: Option<Ipv4Addr>,
}

impl DhcpServerConfig {
    /// Create a config for a server attached at `connect_point`
    pub fn new(connect_point: ConnectPoint, server_ip: Ipv4Addr) -> Self {
        Self {
            server_connect_point: Some(connect_point),
            server_ip4: Some(server_ip),
            ..Default::default()
        }
    }

    /// Set the server address
    pub fn with_server_ip(mut self, server_ip: Ipv4Addr) -> Self {
        self.server_ip4 = Some(server_ip);
        self
    }

    /// Reach the server through a gateway
    pub fn with_gateway_ip(mut self, gateway_ip: Ipv4Addr) -> Self {
        self.gateway_ip4 = Some(gateway_ip);
        self
    }

    /// Override the relay agent address (giaddr)
    pub fn with_relay_agent_ip(mut self, relay_agent_ip: Ipv4Addr) -> Self {
        self.relay_agent_ip4 = Some(relay_agent_ip);
        self
    }
}

/// JSON shape of a server entry
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerConfig {
    dhcp_server_connect_point: Option<ConnectPoint>,
    #[serde(default)]
    server_ips: Vec<IpAddr>,
    #[serde(default)]
    gateway_ips: Vec<IpAddr>,
    #[serde(default)]
    relay_agent_ips: Vec<IpAddr>,
}

fn first_ipv4(ips: &[IpAddr]) -> Option<Ipv4Addr> {
    ips.iter().find_map(|ip| match ip {
        IpAddr::V4(v4) => Some(*v4),
        IpAddr::V6(_) => None,
    })
}

impl From<RawServerConfig> for DhcpServerConfig {
    fn from(raw: RawServerConfig) -> Self {
        Self {
            server_connect_point: raw.dhcp_server_connect_point,
            server_ip4: first_ipv4(&raw.server_ips),
            gateway_ip4: first_ipv4(&raw.gateway_ips),
            relay_agent_ip4: first_ipv4(&raw.relay_agent_ips),
        }
    }
}

/// Complete relay configuration: one server list per path
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct DhcpRelayConfig {
    #[serde(default)]
    pub default: Vec<DhcpServerConfig>,

    #[serde(default)]
    pub indirect: Vec<DhcpServerConfig>,
}

impl DhcpRelayConfig {
    /// Parse the JSON application config
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RelayError::InvalidConfig(e.to_string()))
    }

    /// Append a server to the default list
    pub fn with_default(mut self, config: DhcpServerConfig) -> Self {
        self.default.push(config);
        self
    }

    /// Append a server to the indirect list
    pub fn with_indirect(mut self, config: DhcpServerConfig) -> Self {
        self.indirect.push(config);
        self
    }

    pub fn servers(&self, path: ServerPath) -> &[DhcpServerConfig] {
        match path {
            ServerPath::Default => &self.default,
            ServerPath::Indirect => &self.indirect,
        }
    }
}
