//! Client classification and location
//!
//! Decides whether a client is attached to a fabric port directly or sits
//! behind another relay, and which interface a server reply must leave
//! through to reach it.

use crate::error::Result;
use crate::packet::decode_circuit_id;
use crate::services::{DhcpRelayStore, InterfaceService};
use dhcproto::v4::Message;
use fabric_common::{ConnectPoint, HostId, Interface, MacAddress, VlanId};
use std::sync::Arc;
use tracing::debug;

/// Whether the client is attached to the fabric directly.
///
/// A message without relay agent information is direct, and so is one whose
/// circuit id is in the relay's own encoding. Only information written by
/// another relay marks the client as indirect.
pub fn directly_connected(message: &Message) -> bool {
    decode_circuit_id(message).is_ok()
}

/// VLAN to tag a reply with: the interface's own VLAN unless it trunks
/// tagged VLANs, in which case the VLAN carried in the circuit id
pub fn reply_vlan(client_interface: &Interface, message: &Message) -> VlanId {
    if client_interface.vlan_tagged.is_empty() {
        return client_interface.vlan();
    }
    match decode_circuit_id(message) {
        Ok(Some(circuit_id)) => circuit_id.vlan,
        _ => VlanId::NONE,
    }
}

/// First interface on `connect_point` that admits `vlan`
pub async fn interface_with_vlan(
    interfaces: &dyn InterfaceService,
    connect_point: &ConnectPoint,
    vlan: VlanId,
) -> Option<Interface> {
    interfaces
        .interfaces_by_port(connect_point)
        .await
        .into_iter()
        .find(|iface| iface.contains_vlan(vlan))
}

/// Finds the interface a client is reachable through
#[derive(Clone)]
pub struct ClientLocationResolver {
    interfaces: Arc<dyn InterfaceService>,
    store: Arc<dyn DhcpRelayStore>,
}

impl ClientLocationResolver {
    pub fn new(interfaces: Arc<dyn InterfaceService>, store: Arc<dyn DhcpRelayStore>) -> Self {
        Self { interfaces, store }
    }

    /// Interface towards the client of a server reply.
    ///
    /// A circuit id in the relay's own encoding names the connect point and
    /// VLAN directly. Otherwise the client's binding record, keyed by the
    /// reply's wire VLAN, supplies the most recent location.
    pub async fn client_interface(
        &self,
        frame_vlan: VlanId,
        client_mac: MacAddress,
        message: &Message,
    ) -> Result<Option<Interface>> {
        match decode_circuit_id(message) {
            Ok(Some(circuit_id)) => {
                return Ok(interface_with_vlan(
                    self.interfaces.as_ref(),
                    &circuit_id.connect_point,
                    circuit_id.vlan,
                )
                .await);
            }
            Ok(None) => {}
            Err(e) => {
                debug!(mac = %client_mac, error = %e, "Circuit id not ours, using DHCP record");
            }
        }

        let host_id = HostId::new(client_mac, frame_vlan);
        let Some(record) = self.store.get_record(&host_id).await? else {
            debug!(host = %host_id, "No DHCP record for client");
            return Ok(None);
        };
        let Some(location) = record.latest_location() else {
            return Ok(None);
        };

        Ok(interface_with_vlan(self.interfaces.as_ref(), &location.connect_point, frame_vlan).await)
    }
}

impl std::fmt::Debug for ClientLocationResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientLocationResolver").finish_non_exhaustive()
    }
}
