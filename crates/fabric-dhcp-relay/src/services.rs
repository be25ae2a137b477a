//! Controller services the relay depends on
//!
//! Each service is a trait so the relay can run against the controller's
//! real subsystems or against the in-memory implementations in
//! [`crate::memory`].

use crate::error::Result;
use crate::packet::OutboundPacket;
use crate::record::DhcpRecord;
use async_trait::async_trait;
use fabric_common::{ConnectPoint, Host, HostDescription, HostId, Interface, Route};
use std::net::IpAddr;
use std::sync::Arc;

/// Packet injection into the data plane
#[async_trait]
pub trait PacketService: Send + Sync {
    /// Send a frame out of `packet.egress`
    async fn emit(&self, packet: OutboundPacket) -> Result<()>;
}

/// Interface and VLAN configuration
#[async_trait]
pub trait InterfaceService: Send + Sync {
    /// All interfaces configured on a connect point
    async fn interfaces_by_port(&self, connect_point: &ConnectPoint) -> Vec<Interface>;
}

/// Host topology database and address resolution
#[async_trait]
pub trait HostService: Send + Sync {
    /// Look up a host by MAC and VLAN
    async fn host(&self, id: &HostId) -> Option<Host>;

    /// Hosts owning `ip`
    async fn hosts_by_ip(&self, ip: IpAddr) -> Vec<Host>;

    /// Keep probing `ip` until a host answers for it
    async fn start_monitoring_ip(&self, ip: IpAddr);

    /// Stop probing `ip`
    async fn stop_monitoring_ip(&self, ip: IpAddr);

    /// Publish a host learned by the relay
    async fn host_detected(&self, id: HostId, description: HostDescription);
}

/// Unicast route table
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Insert or replace the route for `route.prefix`
    async fn update_route(&self, route: Route);
}

/// Per-client binding records.
///
/// Writers follow read-copy-update: fetch the record, modify a copy and
/// install it with [`replace_record`](Self::replace_record), which only
/// succeeds when the stored record is still the one that was read.
#[async_trait]
pub trait DhcpRelayStore: Send + Sync {
    /// Fetch a record
    async fn get_record(&self, id: &HostId) -> Result<Option<DhcpRecord>>;

    /// Unconditionally store a record
    async fn update_record(&self, id: HostId, record: DhcpRecord) -> Result<()>;

    /// Store `record` if the current record equals `expected` (`None`: no
    /// record present). Returns whether the record was stored.
    async fn replace_record(
        &self,
        id: HostId,
        expected: Option<&DhcpRecord>,
        record: DhcpRecord,
    ) -> Result<bool>;
}

/// The collaborators a relay instance is wired to
#[derive(Clone)]
pub struct RelayServices {
    pub packets: Arc<dyn PacketService>,
    pub interfaces: Arc<dyn InterfaceService>,
    pub hosts: Arc<dyn HostService>,
    pub routes: Arc<dyn RouteStore>,
    pub store: Arc<dyn DhcpRelayStore>,
}

impl std::fmt::Debug for RelayServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServices").finish_non_exhaustive()
    }
}
