//! Publishing clients once their lease is acknowledged
//!
//! A directly connected client becomes a host in the topology. A client
//! behind another relay is reached through a /32 route via that relay.

use crate::error::{RelayError, Result};
use crate::relay::ServerReply;
use crate::services::{DhcpRelayStore, HostService, RouteStore};
use fabric_common::{HostDescription, HostId, HostLocation, Route};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct BindingReactor {
    hosts: Arc<dyn HostService>,
    routes: Arc<dyn RouteStore>,
    store: Arc<dyn DhcpRelayStore>,
}

impl BindingReactor {
    pub fn new(
        hosts: Arc<dyn HostService>,
        routes: Arc<dyn RouteStore>,
        store: Arc<dyn DhcpRelayStore>,
    ) -> Self {
        Self {
            hosts,
            routes,
            store,
        }
    }

    /// Publish the client of an ACK as a host or as a route
    pub async fn handle_ack(&self, reply: &ServerReply) -> Result<()> {
        let host_id = HostId::new(reply.client_mac, reply.vlan);
        let ip = reply.frame.message.yiaddr();

        if reply.directly_connected {
            let location = HostLocation::now(reply.client_interface.connect_point.clone());
            let mut locations = vec![location];

            // Dual-homed hosts keep their other locations
            if let Some(known) = self.hosts.host(&host_id).await {
                for existing in known.locations {
                    if !locations
                        .iter()
                        .any(|l| l.connect_point == existing.connect_point)
                    {
                        locations.push(existing);
                    }
                }
            }

            let description = HostDescription {
                mac: reply.client_mac,
                vlan: reply.vlan,
                locations,
                ip_addresses: BTreeSet::from([IpAddr::V4(ip)]),
            };
            self.hosts.host_detected(host_id, description).await;
            info!(host = %host_id, ip = %ip, "Published DHCP client host");
            return Ok(());
        }

        let record = self
            .store
            .get_record(&host_id)
            .await?
            .ok_or(RelayError::RecordNotFound(host_id))?;
        let gateway_mac = record
            .next_hop
            .ok_or(RelayError::NextHopUnknown(host_id))?;

        let gateway_id = HostId::new(gateway_mac, record.host_id.vlan);
        let gateway = self
            .hosts
            .host(&gateway_id)
            .await
            .ok_or(RelayError::GatewayHostUnknown(gateway_id))?;
        let next_hop = gateway
            .first_ipv4()
            .ok_or(RelayError::GatewayIpUnknown(gateway_id))?;

        self.routes.update_route(Route::host_route(ip, next_hop)).await;
        info!(host = %host_id, ip = %ip, next_hop = %next_hop, "Installed route to DHCP client");
        Ok(())
    }
}

impl std::fmt::Debug for BindingReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingReactor").finish_non_exhaustive()
    }
}
