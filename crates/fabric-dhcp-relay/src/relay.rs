//! DHCP relay engine
//!
//! This module provides the relay that rewrites client requests towards the
//! configured DHCP server and server replies back towards the client, and
//! keeps the per-client binding records up to date on the way.

use crate::binding::BindingReactor;
use crate::circuit_id::CircuitId;
use crate::config::{DhcpRelayConfig, DhcpServerConfig, ServerPath};
use crate::error::{RelayError, Result};
use crate::location::{directly_connected, interface_with_vlan, reply_vlan, ClientLocationResolver};
use crate::packet::{
    set_circuit_id, DhcpFrame, InboundPacket, OutboundPacket, DHCP_CLIENT_PORT, DHCP_SERVER_PORT,
    RELAY_TTL,
};
use crate::record::modify_record;
use crate::server_info::{DhcpServerInfo, ServerInfoRegistry};
use crate::services::RelayServices;
use crate::topology::TopologyReactor;
use dhcproto::v4::{Flags, MessageType};
use fabric_common::{ConnectPoint, HostId, HostLocation, Interface, MacAddress, VlanId};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// Event emitted by the relay
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// Packet loop started
    Started,
    /// A rewritten packet was handed to the packet service
    Forwarded {
        message_type: MessageType,
        client_mac: MacAddress,
        egress: ConnectPoint,
    },
    /// A packet was dropped
    Dropped {
        message_type: Option<MessageType>,
        client_mac: Option<MacAddress>,
        reason: String,
    },
    /// Packet loop stopped
    Stopped,
}

/// A client request rewritten for the server
#[derive(Debug, Clone)]
pub struct RelayedRequest {
    pub frame: DhcpFrame,
    /// Connect point of the selected server
    pub egress: ConnectPoint,
    pub directly_connected: bool,
}

/// A server reply rewritten for the client, with what was resolved about
/// the client on the way
#[derive(Debug, Clone)]
pub struct ServerReply {
    pub frame: DhcpFrame,
    pub client_interface: Interface,
    pub client_mac: MacAddress,
    /// VLAN the reply is tagged with; also keys the client's record
    pub vlan: VlanId,
    pub directly_connected: bool,
}

/// DHCPv4 relay
#[derive(Clone)]
pub struct DhcpRelay {
    services: RelayServices,
    registry: Arc<ServerInfoRegistry>,
    resolver: ClientLocationResolver,
    bindings: BindingReactor,
    event_sender: broadcast::Sender<RelayEvent>,
}

impl DhcpRelay {
    /// Create a relay wired to `services`; nothing is relayed until a
    /// default server is configured
    pub fn new(services: RelayServices) -> Self {
        let (event_sender, _) = broadcast::channel(1024);
        Self {
            registry: Arc::new(ServerInfoRegistry::new(services.hosts.clone())),
            resolver: ClientLocationResolver::new(
                services.interfaces.clone(),
                services.store.clone(),
            ),
            bindings: BindingReactor::new(
                services.hosts.clone(),
                services.routes.clone(),
                services.store.clone(),
            ),
            services,
            event_sender,
        }
    }

    /// Subscribe to relay events
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.event_sender.subscribe()
    }

    /// Reactor that keeps this relay's server bindings current
    pub fn topology_reactor(&self) -> TopologyReactor {
        TopologyReactor::new(self.registry.clone())
    }

    /// Apply a full configuration: default list first, then indirect
    pub async fn apply_config(&self, config: &DhcpRelayConfig) -> Result<()> {
        self.set_default_server_configs(&config.default).await?;
        self.set_indirect_server_configs(&config.indirect).await
    }

    pub async fn set_default_server_configs(&self, configs: &[DhcpServerConfig]) -> Result<()> {
        self.registry.apply_config(ServerPath::Default, configs).await
    }

    pub async fn set_indirect_server_configs(&self, configs: &[DhcpServerConfig]) -> Result<()> {
        self.registry.apply_config(ServerPath::Indirect, configs).await
    }

    pub fn default_server_infos(&self) -> Vec<DhcpServerInfo> {
        self.registry.servers(ServerPath::Default)
    }

    pub fn indirect_server_infos(&self) -> Vec<DhcpServerInfo> {
        self.registry.servers(ServerPath::Indirect)
    }

    /// Whether a default server is configured
    pub fn is_configured(&self) -> bool {
        self.registry.is_configured()
    }

    /// Stop monitoring all server addresses and forget the configuration
    pub async fn deactivate(&self) {
        self.registry.deactivate().await;
    }

    /// Run the packet loop, handling each packet in its own task
    pub async fn run(
        &self,
        mut packets: mpsc::Receiver<InboundPacket>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("DHCP relay started");
        let _ = self.event_sender.send(RelayEvent::Started);

        loop {
            tokio::select! {
                packet = packets.recv() => {
                    let Some(packet) = packet else {
                        debug!("Packet channel closed");
                        break;
                    };
                    let relay = self.clone();
                    tokio::spawn(async move {
                        relay.handle_packet(packet).await;
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("DHCP relay shutting down");
        let _ = self.event_sender.send(RelayEvent::Stopped);
        Ok(())
    }

    /// Process one packet, logging and reporting a drop on failure
    pub async fn handle_packet(&self, packet: InboundPacket) {
        let ingress = packet.ingress.clone();
        if let Err(dropped) = self.process_packet(packet).await {
            if matches!(dropped.error, RelayError::ParseError(_)) {
                debug!(ingress = %ingress, error = %dropped.error, "Ignoring non-DHCP packet");
            } else if dropped.error.is_transient() {
                debug!(ingress = %ingress, error = %dropped.error, "DHCP packet not relayed yet");
            } else {
                warn!(ingress = %ingress, error = %dropped.error, "Dropping DHCP packet");
            }
            let _ = self.event_sender.send(RelayEvent::Dropped {
                message_type: dropped.message_type,
                client_mac: dropped.client_mac,
                reason: dropped.error.to_string(),
            });
        }
    }

    async fn process_packet(&self, packet: InboundPacket) -> std::result::Result<(), Dropped> {
        if !self.is_configured() {
            return Err(Dropped::new(None, None, RelayError::NotConfigured));
        }

        let frame = DhcpFrame::parse(&packet.data).map_err(|e| Dropped::new(None, None, e))?;
        let client_mac = frame.client_mac().ok();
        let message_type = frame.message_type().ok_or_else(|| {
            Dropped::new(
                None,
                client_mac,
                RelayError::ParseError("missing message type".to_string()),
            )
        })?;
        let dropped = |e: RelayError| Dropped::new(Some(message_type), client_mac, e);

        match message_type {
            MessageType::Discover | MessageType::Request => self
                .relay_to_server(&packet.ingress, frame, message_type)
                .await
                .map_err(dropped),
            MessageType::Offer | MessageType::Ack => self
                .relay_to_client(frame, message_type)
                .await
                .map_err(dropped),
            MessageType::Release => {
                debug!(mac = ?client_mac, "DHCPRELEASE not handled");
                Ok(())
            }
            other => {
                trace!(message_type = ?other, "Ignoring DHCP message");
                Ok(())
            }
        }
    }

    async fn relay_to_server(
        &self,
        ingress: &ConnectPoint,
        frame: DhcpFrame,
        message_type: MessageType,
    ) -> Result<()> {
        let request = self.process_client_request(ingress, &frame).await?;

        if let Err(e) = self
            .write_request_record(ingress, &frame, message_type, request.directly_connected)
            .await
        {
            error!(ingress = %ingress, error = %e, "Failed to update DHCP record");
        }

        let client_mac = frame.client_mac()?;
        trace!(
            mac = %client_mac,
            egress = %request.egress,
            "Relaying {:?} to DHCP server",
            message_type
        );
        self.emit(request.egress.clone(), &request.frame).await?;
        let _ = self.event_sender.send(RelayEvent::Forwarded {
            message_type,
            client_mac,
            egress: request.egress,
        });
        Ok(())
    }

    async fn relay_to_client(&self, frame: DhcpFrame, message_type: MessageType) -> Result<()> {
        let reply = self.process_server_reply(&frame).await?;

        if let Err(e) = self.write_response_record(&reply, message_type).await {
            error!(mac = %reply.client_mac, error = %e, "Failed to update DHCP record");
        }
        if message_type == MessageType::Ack {
            if let Err(e) = self.bindings.handle_ack(&reply).await {
                warn!(mac = %reply.client_mac, error = %e, "Failed to publish DHCP client");
            }
        }

        self.send_to_client(reply, message_type).await
    }

    /// Rewrite a DISCOVER or REQUEST for the selected server
    pub async fn process_client_request(
        &self,
        ingress: &ConnectPoint,
        frame: &DhcpFrame,
    ) -> Result<RelayedRequest> {
        let client_interface_ip = self
            .services
            .interfaces
            .interfaces_by_port(ingress)
            .await
            .iter()
            .find_map(Interface::first_ipv4)
            .ok_or_else(|| RelayError::NoClientInterfaceIp(ingress.clone()))?;

        let direct = directly_connected(&frame.message);
        let server_info = self
            .registry
            .active_path(direct)
            .ok_or(RelayError::NotConfigured)?;
        let binding = server_info
            .binding()
            .ok_or_else(|| RelayError::ServerNotResolved(server_info.probe_ip().to_string()))?;

        let server_interface = interface_with_vlan(
            self.services.interfaces.as_ref(),
            server_info.server_connect_point(),
            binding.vlan,
        )
        .await
        .ok_or(RelayError::NoServerInterface(if direct {
            "direct"
        } else {
            "indirect"
        }))?;
        let ip_facing_server = server_interface
            .first_ipv4()
            .ok_or_else(|| RelayError::NoServerInterfaceIp(server_interface.name.clone()))?;

        let mut relayed = frame.clone();
        relayed.src_mac = server_interface.mac;
        relayed.src_ip = ip_facing_server;
        relayed.dst_mac = binding.mac;
        relayed.vlan = binding.vlan;
        relayed.dst_ip = server_info.server_ip4();

        if direct {
            let circuit_id = CircuitId::new(ingress.clone(), frame.vlan);
            set_circuit_id(&mut relayed.message, &circuit_id);
            relayed
                .message
                .set_giaddr(server_info.relay_agent_ip4().unwrap_or(client_interface_ip));
        } else if let Some(relay_agent_ip) = server_info.relay_agent_ip4() {
            // Option 82 already carries the downstream relay's information
            relayed.message.set_giaddr(relay_agent_ip);
        }

        relayed.message.set_flags(Flags::default());
        relayed.src_port = DHCP_SERVER_PORT;
        relayed.dst_port = DHCP_SERVER_PORT;
        relayed.ttl = RELAY_TTL;

        Ok(RelayedRequest {
            frame: relayed,
            egress: server_info.server_connect_point().clone(),
            directly_connected: direct,
        })
    }

    /// Rewrite an OFFER or ACK for the client it answers
    pub async fn process_server_reply(&self, frame: &DhcpFrame) -> Result<ServerReply> {
        let client_mac = frame.client_mac()?;
        let client_interface = self
            .resolver
            .client_interface(frame.vlan, client_mac, &frame.message)
            .await?
            .ok_or(RelayError::NoClientInterface(client_mac))?;

        let vlan = reply_vlan(&client_interface, &frame.message);
        let direct = directly_connected(&frame.message);

        let mut reply = frame.clone();
        reply.vlan = vlan;
        reply.src_mac = client_interface.mac;

        if direct {
            reply.dst_mac = client_mac;
        } else {
            let host_id = HostId::new(client_mac, vlan);
            let record = self
                .services
                .store
                .get_record(&host_id)
                .await?
                .ok_or(RelayError::RecordNotFound(host_id))?;
            reply.dst_mac = record
                .next_hop
                .ok_or(RelayError::NextHopUnknown(host_id))?;
        }

        let ip_facing_client = client_interface
            .first_ipv4()
            .ok_or_else(|| RelayError::NoRelayAgentIp(client_interface.name.clone()))?;
        reply.src_ip = ip_facing_client;
        reply.dst_ip = frame.message.yiaddr();
        reply.src_port = DHCP_SERVER_PORT;
        reply.dst_port = DHCP_CLIENT_PORT;

        Ok(ServerReply {
            frame: reply,
            client_interface,
            client_mac,
            vlan,
            directly_connected: direct,
        })
    }

    async fn write_request_record(
        &self,
        ingress: &ConnectPoint,
        frame: &DhcpFrame,
        message_type: MessageType,
        direct: bool,
    ) -> Result<()> {
        let host_id = HostId::new(frame.client_mac()?, frame.vlan);
        let previous_hop = frame.src_mac;

        modify_record(self.services.store.as_ref(), host_id, |record| {
            record.add_location(HostLocation::now(ingress.clone()));
            record.ip4_status = Some(message_type);
            record.directly_connected = direct;
            if !direct {
                record.next_hop = Some(previous_hop);
            }
        })
        .await?;
        Ok(())
    }

    async fn write_response_record(
        &self,
        reply: &ServerReply,
        message_type: MessageType,
    ) -> Result<()> {
        let host_id = HostId::new(reply.client_mac, reply.vlan);
        let location = &reply.client_interface.connect_point;
        let assigned = reply.frame.message.yiaddr();

        modify_record(self.services.store.as_ref(), host_id, |record| {
            record.add_location(HostLocation::now(location.clone()));
            if message_type == MessageType::Ack {
                record.ip4_address = Some(assigned);
            }
            record.ip4_status = Some(message_type);
            record.directly_connected = reply.directly_connected;
        })
        .await?;
        Ok(())
    }

    async fn send_to_client(&self, reply: ServerReply, message_type: MessageType) -> Result<()> {
        let ServerReply {
            mut frame,
            client_interface,
            client_mac,
            directly_connected,
            ..
        } = reply;

        if directly_connected {
            frame.strip_relay_info();
        }

        trace!(
            mac = %client_mac,
            egress = %client_interface.connect_point,
            vlan = %frame.vlan,
            "Relaying {:?} to DHCP client",
            message_type
        );
        self.emit(client_interface.connect_point.clone(), &frame).await?;
        let _ = self.event_sender.send(RelayEvent::Forwarded {
            message_type,
            client_mac,
            egress: client_interface.connect_point,
        });
        Ok(())
    }

    async fn emit(&self, egress: ConnectPoint, frame: &DhcpFrame) -> Result<()> {
        let data = frame.to_bytes()?;
        self.services
            .packets
            .emit(OutboundPacket { egress, data })
            .await
    }
}

impl std::fmt::Debug for DhcpRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhcpRelay")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// A packet the relay gave up on, with what was known about it
struct Dropped {
    message_type: Option<MessageType>,
    client_mac: Option<MacAddress>,
    error: RelayError,
}

impl Dropped {
    fn new(
        message_type: Option<MessageType>,
        client_mac: Option<MacAddress>,
        error: RelayError,
    ) -> Self {
        Self {
            message_type,
            client_mac,
            error,
        }
    }
}
