//! Error types for the DHCP relay
//!
//! Every failure is local to the packet, event or configuration push being
//! processed. The dispatch layer logs the error and drops the packet; nothing
//! here is meant to stop the relay.

use fabric_common::{ConnectPoint, HostId, MacAddress};
use thiserror::Error;

/// Error type for DHCP relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// Server configuration rejected; the previous configuration stays active
    #[error("invalid DHCP server config: {0}")]
    InvalidConfig(String),

    /// Failed to parse a frame or DHCP payload
    #[error("failed to parse DHCP packet: {0}")]
    ParseError(String),

    /// Failed to encode a frame or DHCP payload
    #[error("failed to encode DHCP packet: {0}")]
    EncodeError(String),

    /// Circuit id payload is not in the relay's own encoding
    #[error("invalid circuit id: {0}")]
    InvalidCircuitId(String),

    /// No default DHCP server configured yet
    #[error("default DHCP server not configured")]
    NotConfigured,

    /// The ingress port has no interface with an IPv4 address
    #[error("no IPv4 interface address on client port {0}")]
    NoClientInterfaceIp(ConnectPoint),

    /// No interface on the server's connect point matches its VLAN
    #[error("no {0} server interface available")]
    NoServerInterface(&'static str),

    /// The server-facing interface has no IPv4 address
    #[error("no IPv4 address on server interface {0}")]
    NoServerInterfaceIp(String),

    /// The server or gateway MAC is not learned yet
    #[error("DHCP server/gateway {0} not yet resolved")]
    ServerNotResolved(String),

    /// No interface could be found to reach the client
    #[error("no interface towards client {0}")]
    NoClientInterface(MacAddress),

    /// The client-facing interface has no IPv4 address
    #[error("no IPv4 address on client interface {0}")]
    NoRelayAgentIp(String),

    /// No binding record for an indirect client
    #[error("no DHCP record for host {0}")]
    RecordNotFound(HostId),

    /// Binding record carries no next hop
    #[error("no next hop recorded for host {0}")]
    NextHopUnknown(HostId),

    /// The gateway host of an indirect client is unknown
    #[error("gateway host {0} not found")]
    GatewayHostUnknown(HostId),

    /// The gateway host has no IPv4 address
    #[error("gateway host {0} has no IPv4 address")]
    GatewayIpUnknown(HostId),

    /// Binding record store failure
    #[error("record store error: {0}")]
    Store(String),

    /// Concurrent writers kept invalidating a record update
    #[error("gave up updating record {0} after {1} conflicting writes")]
    StoreContention(HostId, usize),

    /// Packet transport rejected an outbound packet
    #[error("failed to emit packet: {0}")]
    EmitFailed(String),
}

impl RelayError {
    /// Errors that clear up on their own once topology monitoring catches up
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::NoClientInterfaceIp(_)
                | RelayError::NoServerInterface(_)
                | RelayError::NoServerInterfaceIp(_)
                | RelayError::ServerNotResolved(_)
                | RelayError::NoClientInterface(_)
                | RelayError::NoRelayAgentIp(_)
                | RelayError::StoreContention(..)
        )
    }
}

impl From<fabric_common::Error> for RelayError {
    fn from(err: fabric_common::Error) -> Self {
        RelayError::ParseError(err.to_string())
    }
}

/// Result type for DHCP relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
