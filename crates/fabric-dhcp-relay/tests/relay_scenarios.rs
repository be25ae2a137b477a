//! End-to-end relay scenarios over the in-memory collaborators

use dhcproto::v4::relay::{RelayAgentInformation, RelayCode, RelayInfo};
use dhcproto::v4::{DhcpOption, Flags, Message, MessageType, Opcode};
use fabric_common::{
    ConnectPoint, Host, HostEvent, HostId, HostLocation, Interface, MacAddress, Route, VlanId,
};
use fabric_dhcp_relay::memory::{
    MemoryHostService, MemoryInterfaceService, MemoryRelayStore, MemoryRouteStore,
    RecordingPacketService,
};
use fabric_dhcp_relay::packet::{decode_circuit_id, relay_agent_info, set_circuit_id};
use fabric_dhcp_relay::{
    directly_connected, CircuitId, DhcpFrame, DhcpRelay, DhcpRelayStore, DhcpServerConfig,
    HostService, InboundPacket, RelayEvent, RelayServices,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

const OPTION_RELAY_AGENT_INFO: u8 = 82;
const OPTION_END: u8 = 255;

fn client_cp() -> ConnectPoint {
    "of:0000000000000001/1".parse().unwrap()
}

fn server_cp() -> ConnectPoint {
    "of:0000000000000002/2".parse().unwrap()
}

fn relay_cp() -> ConnectPoint {
    "of:0000000000000001/3".parse().unwrap()
}

fn client_mac() -> MacAddress {
    "00:aa:00:00:00:01".parse().unwrap()
}

fn server_mac() -> MacAddress {
    "00:00:00:00:03:fd".parse().unwrap()
}

/// MAC of the downstream relay in front of indirect clients
fn downstream_relay_mac() -> MacAddress {
    "00:00:00:00:04:01".parse().unwrap()
}

fn client_iface_mac() -> MacAddress {
    "00:00:00:00:01:01".parse().unwrap()
}

fn server_iface_mac() -> MacAddress {
    "00:00:00:00:02:02".parse().unwrap()
}

fn server_ip() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 3, 253)
}

struct Fabric {
    packets: Arc<RecordingPacketService>,
    interfaces: Arc<MemoryInterfaceService>,
    hosts: Arc<MemoryHostService>,
    routes: Arc<MemoryRouteStore>,
    store: Arc<MemoryRelayStore>,
    relay: DhcpRelay,
}

impl Fabric {
    fn new() -> Self {
        init_tracing();
        let packets = Arc::new(RecordingPacketService::new());
        let interfaces = Arc::new(MemoryInterfaceService::new());
        let hosts = Arc::new(MemoryHostService::new());
        let routes = Arc::new(MemoryRouteStore::new());
        let store = Arc::new(MemoryRelayStore::new());
        let relay = DhcpRelay::new(RelayServices {
            packets: packets.clone(),
            interfaces: interfaces.clone(),
            hosts: hosts.clone(),
            routes: routes.clone(),
            store: store.clone(),
        });

        interfaces.add_interface(
            Interface::new("leaf1-client", client_cp(), client_iface_mac())
                .with_ip("10.0.2.254/24".parse().unwrap())
                .with_untagged_vlan(VlanId::new(10).unwrap()),
        );
        interfaces.add_interface(
            Interface::new("leaf2-server", server_cp(), server_iface_mac())
                .with_ip("10.0.3.254/24".parse().unwrap())
                .with_untagged_vlan(VlanId::new(30).unwrap()),
        );
        interfaces.add_interface(
            Interface::new("leaf1-relay", relay_cp(), client_iface_mac())
                .with_ip("10.0.4.254/24".parse().unwrap())
                .with_native_vlan(VlanId::new(10).unwrap())
                .with_tagged_vlan(VlanId::new(20).unwrap()),
        );
        hosts.add_host(
            Host::new(server_mac(), VlanId::NONE)
                .with_location(HostLocation::new(server_cp(), 1))
                .with_ip(server_ip()),
        );
        hosts.add_host(
            Host::new(downstream_relay_mac(), VlanId::NONE)
                .with_location(HostLocation::new(relay_cp(), 1))
                .with_ip(Ipv4Addr::new(10, 0, 4, 1)),
        );

        Self {
            packets,
            interfaces,
            hosts,
            routes,
            store,
            relay,
        }
    }

    async fn configured(config: DhcpServerConfig) -> Self {
        let fabric = Self::new();
        fabric
            .relay
            .set_default_server_configs(&[config])
            .await
            .unwrap();
        fabric
    }

    async fn deliver(&self, ingress: ConnectPoint, frame: &DhcpFrame) -> Vec<DhcpFrame> {
        self.relay
            .handle_packet(InboundPacket::new(ingress, frame.to_bytes().unwrap()))
            .await;
        self.packets
            .take()
            .iter()
            .map(|p| DhcpFrame::parse(&p.data).unwrap())
            .collect()
    }
}

fn default_server() -> DhcpServerConfig {
    DhcpServerConfig::new(server_cp(), server_ip())
}

fn client_message(message_type: MessageType) -> Message {
    let mut msg = Message::default();
    msg.set_opcode(Opcode::BootRequest)
        .set_xid(0x0bad_cafe)
        .set_flags(Flags::default().set_broadcast())
        .set_chaddr(&client_mac().octets());
    msg.opts_mut().insert(DhcpOption::MessageType(message_type));
    msg
}

fn server_message(message_type: MessageType, yiaddr: Ipv4Addr, giaddr: Ipv4Addr) -> Message {
    let mut msg = Message::default();
    msg.set_opcode(Opcode::BootReply)
        .set_xid(0x0bad_cafe)
        .set_yiaddr(yiaddr)
        .set_giaddr(giaddr)
        .set_chaddr(&client_mac().octets());
    msg.opts_mut().insert(DhcpOption::MessageType(message_type));
    msg
}

fn with_foreign_option82(mut msg: Message, giaddr: Ipv4Addr) -> Message {
    let mut info = RelayAgentInformation::default();
    info.insert(RelayInfo::AgentCircuitId(b"ge-0/0/1.0".to_vec()));
    msg.opts_mut()
        .insert(DhcpOption::RelayAgentInformation(info));
    msg.set_giaddr(giaddr);
    msg
}

fn from_client(src_mac: MacAddress, message: Message) -> DhcpFrame {
    DhcpFrame {
        dst_mac: MacAddress::BROADCAST,
        src_mac,
        vlan: VlanId::NONE,
        src_ip: Ipv4Addr::UNSPECIFIED,
        dst_ip: Ipv4Addr::BROADCAST,
        ttl: 128,
        src_port: 68,
        dst_port: 67,
        message,
    }
}

fn from_server(message: Message) -> DhcpFrame {
    DhcpFrame {
        dst_mac: server_iface_mac(),
        src_mac: server_mac(),
        vlan: VlanId::NONE,
        src_ip: server_ip(),
        dst_ip: message.giaddr(),
        ttl: 64,
        src_port: 67,
        dst_port: 67,
        message,
    }
}

/// DHCP option codes of an encoded frame, in wire order
fn wire_option_codes(frame: &[u8]) -> Vec<u8> {
    let mut l3 = 14;
    if frame[12..14] == [0x81, 0x00] {
        l3 += 4;
    }
    let ihl = ((frame[l3] & 0x0f) as usize) * 4;
    let dhcp = &frame[l3 + ihl + 8..];

    let mut codes = Vec::new();
    let mut i = 240;
    while i < dhcp.len() {
        let code = dhcp[i];
        codes.push(code);
        match code {
            0 => i += 1,
            OPTION_END => break,
            _ => i += 2 + dhcp[i + 1] as usize,
        }
    }
    codes
}

#[tokio::test]
async fn test_direct_discover_reaches_server() {
    let fabric = Fabric::configured(default_server()).await;
    let frame = from_client(client_mac(), client_message(MessageType::Discover));

    fabric
        .relay
        .handle_packet(InboundPacket::new(client_cp(), frame.to_bytes().unwrap()))
        .await;

    let sent = fabric.packets.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].egress, server_cp());

    let codes = wire_option_codes(&sent[0].data);
    assert_eq!(
        codes.iter().filter(|c| **c == OPTION_RELAY_AGENT_INFO).count(),
        1
    );
    assert_eq!(codes.last(), Some(&OPTION_END));

    let out = DhcpFrame::parse(&sent[0].data).unwrap();
    assert_eq!(out.src_mac, server_iface_mac());
    assert_eq!(out.dst_mac, server_mac());
    assert_eq!(out.vlan, VlanId::NONE);
    assert_eq!(out.src_ip, Ipv4Addr::new(10, 0, 3, 254));
    assert_eq!(out.dst_ip, server_ip());
    assert_eq!((out.src_port, out.dst_port), (67, 67));
    assert_eq!(out.message.giaddr(), Ipv4Addr::new(10, 0, 2, 254));
    assert!(!out.message.flags().broadcast());
    assert_eq!(out.message.xid(), 0x0bad_cafe);
    assert_eq!(
        decode_circuit_id(&out.message).unwrap(),
        Some(CircuitId::new(client_cp(), VlanId::NONE))
    );

    let record = fabric
        .store
        .get_record(&HostId::new(client_mac(), VlanId::NONE))
        .await
        .unwrap()
        .unwrap();
    assert!(record.directly_connected);
    assert_eq!(record.ip4_status, Some(MessageType::Discover));
    assert_eq!(record.latest_location().unwrap().connect_point, client_cp());
    assert_eq!(record.next_hop, None);
}

#[tokio::test]
async fn test_configured_relay_agent_ip_overrides_giaddr() {
    let fabric =
        Fabric::configured(default_server().with_relay_agent_ip(Ipv4Addr::new(10, 0, 9, 1))).await;
    let frame = from_client(client_mac(), client_message(MessageType::Discover));

    let out = fabric.deliver(client_cp(), &frame).await;
    assert_eq!(out[0].message.giaddr(), Ipv4Addr::new(10, 0, 9, 1));
}

#[tokio::test]
async fn test_indirect_request_falls_back_to_default_server() {
    let fabric = Fabric::configured(default_server()).await;
    let downstream_giaddr = Ipv4Addr::new(10, 0, 5, 1);
    let message = with_foreign_option82(client_message(MessageType::Request), downstream_giaddr);
    let frame = from_client(downstream_relay_mac(), message);

    let out = fabric.deliver(relay_cp(), &frame).await;

    assert_eq!(out.len(), 1);
    let out = &out[0];
    assert_eq!(out.dst_mac, server_mac());
    assert_eq!(out.dst_ip, server_ip());
    assert_eq!(out.message.giaddr(), downstream_giaddr);
    assert!(!directly_connected(&out.message));
    let info = relay_agent_info(&out.message).unwrap();
    assert!(matches!(
        info.get(RelayCode::AgentCircuitId),
        Some(RelayInfo::AgentCircuitId(id)) if id.as_slice() == b"ge-0/0/1.0"
    ));

    let record = fabric
        .store
        .get_record(&HostId::new(client_mac(), VlanId::NONE))
        .await
        .unwrap()
        .unwrap();
    assert!(!record.directly_connected);
    assert_eq!(record.next_hop, Some(downstream_relay_mac()));
}

#[tokio::test]
async fn test_indirect_request_with_relay_agent_ip() {
    let fabric =
        Fabric::configured(default_server().with_relay_agent_ip(Ipv4Addr::new(10, 0, 9, 1))).await;
    let message = with_foreign_option82(
        client_message(MessageType::Request),
        Ipv4Addr::new(10, 0, 5, 1),
    );

    let out = fabric
        .deliver(relay_cp(), &from_client(downstream_relay_mac(), message))
        .await;
    assert_eq!(out[0].message.giaddr(), Ipv4Addr::new(10, 0, 9, 1));
}

#[tokio::test]
async fn test_indirect_server_used_when_configured() {
    let fabric = Fabric::configured(default_server()).await;
    let indirect_cp: ConnectPoint = "of:0000000000000003/1".parse().unwrap();
    let indirect_mac: MacAddress = "00:00:00:00:05:fd".parse().unwrap();
    fabric.interfaces.add_interface(
        Interface::new("leaf3-server", indirect_cp.clone(), server_iface_mac())
            .with_ip("10.0.6.254/24".parse().unwrap())
            .with_untagged_vlan(VlanId::new(60).unwrap()),
    );
    fabric.hosts.add_host(
        Host::new(indirect_mac, VlanId::NONE)
            .with_location(HostLocation::new(indirect_cp.clone(), 1))
            .with_ip(Ipv4Addr::new(10, 0, 6, 253)),
    );
    fabric
        .relay
        .set_indirect_server_configs(&[DhcpServerConfig::new(
            indirect_cp.clone(),
            Ipv4Addr::new(10, 0, 6, 253),
        )])
        .await
        .unwrap();

    let message = with_foreign_option82(
        client_message(MessageType::Discover),
        Ipv4Addr::new(10, 0, 5, 1),
    );
    fabric
        .relay
        .handle_packet(InboundPacket::new(
            relay_cp(),
            from_client(downstream_relay_mac(), message)
                .to_bytes()
                .unwrap(),
        ))
        .await;
    let sent = fabric.packets.take();
    assert_eq!(sent[0].egress, indirect_cp);
    assert_eq!(DhcpFrame::parse(&sent[0].data).unwrap().dst_mac, indirect_mac);

    // Direct clients keep using the default server
    let out = fabric
        .deliver(
            client_cp(),
            &from_client(client_mac(), client_message(MessageType::Discover)),
        )
        .await;
    assert_eq!(out[0].dst_mac, server_mac());
}

#[tokio::test]
async fn test_direct_offer_delivered_to_client() {
    let fabric = Fabric::configured(default_server()).await;
    let mut message = server_message(
        MessageType::Offer,
        Ipv4Addr::new(10, 0, 2, 10),
        Ipv4Addr::new(10, 0, 2, 254),
    );
    set_circuit_id(&mut message, &CircuitId::new(client_cp(), VlanId::NONE));

    fabric
        .relay
        .handle_packet(InboundPacket::new(
            server_cp(),
            from_server(message).to_bytes().unwrap(),
        ))
        .await;

    let sent = fabric.packets.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].egress, client_cp());
    assert!(!wire_option_codes(&sent[0].data).contains(&OPTION_RELAY_AGENT_INFO));

    let out = DhcpFrame::parse(&sent[0].data).unwrap();
    assert_eq!(out.dst_mac, client_mac());
    assert_eq!(out.src_mac, client_iface_mac());
    assert_eq!(out.vlan, VlanId::new(10).unwrap());
    assert_eq!(out.src_ip, Ipv4Addr::new(10, 0, 2, 254));
    assert_eq!(out.dst_ip, Ipv4Addr::new(10, 0, 2, 10));
    assert_eq!((out.src_port, out.dst_port), (67, 68));
    assert_eq!(out.message.giaddr(), Ipv4Addr::UNSPECIFIED);
    assert_eq!(out.message.yiaddr(), Ipv4Addr::new(10, 0, 2, 10));
}

#[tokio::test]
async fn test_direct_ack_publishes_host() {
    let fabric = Fabric::configured(default_server()).await;
    let mut message = server_message(
        MessageType::Ack,
        Ipv4Addr::new(10, 0, 2, 10),
        Ipv4Addr::new(10, 0, 2, 254),
    );
    set_circuit_id(&mut message, &CircuitId::new(client_cp(), VlanId::NONE));

    let out = fabric.deliver(server_cp(), &from_server(message)).await;
    assert_eq!(out.len(), 1);

    let id = HostId::new(client_mac(), VlanId::new(10).unwrap());
    let host = fabric.hosts.host(&id).await.unwrap();
    assert!(host.is_located_at(&client_cp()));
    assert!(host.has_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 2, 10))));
    assert!(fabric.routes.routes().is_empty());

    let record = fabric.store.get_record(&id).await.unwrap().unwrap();
    assert_eq!(record.ip4_address, Some(Ipv4Addr::new(10, 0, 2, 10)));
    assert_eq!(record.ip4_status, Some(MessageType::Ack));
}

#[tokio::test]
async fn test_indirect_ack_without_record_is_dropped() {
    let fabric = Fabric::configured(default_server()).await;
    let mut events = fabric.relay.subscribe();
    let message = with_foreign_option82(
        server_message(
            MessageType::Ack,
            Ipv4Addr::new(10, 0, 5, 20),
            Ipv4Addr::new(10, 0, 5, 1),
        ),
        Ipv4Addr::new(10, 0, 5, 1),
    );

    let out = fabric.deliver(server_cp(), &from_server(message)).await;

    assert!(out.is_empty());
    assert!(fabric.routes.routes().is_empty());
    assert!(fabric
        .hosts
        .host(&HostId::new(client_mac(), VlanId::NONE))
        .await
        .is_none());
    match events.recv().await.unwrap() {
        RelayEvent::Dropped {
            message_type,
            client_mac: mac,
            ..
        } => {
            assert_eq!(message_type, Some(MessageType::Ack));
            assert_eq!(mac, Some(client_mac()));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_indirect_client_lease_installs_route() {
    let fabric = Fabric::configured(default_server()).await;
    let downstream_giaddr = Ipv4Addr::new(10, 0, 5, 1);
    let leased = Ipv4Addr::new(10, 0, 5, 20);

    let request =
        with_foreign_option82(client_message(MessageType::Request), downstream_giaddr);
    let out = fabric
        .deliver(relay_cp(), &from_client(downstream_relay_mac(), request))
        .await;
    assert_eq!(out.len(), 1);

    let ack = with_foreign_option82(
        server_message(MessageType::Ack, leased, downstream_giaddr),
        downstream_giaddr,
    );
    let out = fabric.deliver(server_cp(), &from_server(ack)).await;

    assert_eq!(out.len(), 1);
    let reply = &out[0];
    assert_eq!(reply.dst_mac, downstream_relay_mac());
    assert_eq!(reply.vlan, VlanId::NONE);
    assert_eq!(reply.src_ip, Ipv4Addr::new(10, 0, 4, 254));
    assert_eq!(reply.message.giaddr(), downstream_giaddr);
    assert!(relay_agent_info(&reply.message).is_some());

    assert_eq!(
        fabric.routes.routes(),
        vec![Route::host_route(leased, Ipv4Addr::new(10, 0, 4, 1))]
    );
    let record = fabric
        .store
        .get_record(&HostId::new(client_mac(), VlanId::NONE))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.ip4_address, Some(leased));
    assert!(!record.directly_connected);
}

#[tokio::test]
async fn test_stripping_reverses_relaying() {
    let fabric = Fabric::configured(default_server()).await;
    let original = from_client(client_mac(), client_message(MessageType::Discover));

    let mut relayed = fabric
        .relay
        .process_client_request(&client_cp(), &original)
        .await
        .unwrap()
        .frame;
    assert!(relay_agent_info(&relayed.message).is_some());

    relayed.strip_relay_info();
    assert!(relay_agent_info(&relayed.message).is_none());
    assert_eq!(relayed.message.giaddr(), Ipv4Addr::UNSPECIFIED);
    assert_eq!(relayed.message.opts(), original.message.opts());
}

#[test]
fn test_client_classification() {
    let plain = client_message(MessageType::Discover);
    assert!(directly_connected(&plain));

    let mut ours = plain.clone();
    set_circuit_id(&mut ours, &CircuitId::new(client_cp(), VlanId::new(20).unwrap()));
    assert!(directly_connected(&ours));

    let foreign = with_foreign_option82(plain.clone(), Ipv4Addr::new(10, 0, 5, 1));
    assert!(!directly_connected(&foreign));

    // Relay information without a circuit id is not ours either
    let mut empty = plain;
    empty
        .opts_mut()
        .insert(DhcpOption::RelayAgentInformation(
            RelayAgentInformation::default(),
        ));
    assert!(!directly_connected(&empty));
}

#[tokio::test]
async fn test_config_replacement_moves_monitoring() {
    let fabric = Fabric::new();
    let first = DhcpServerConfig::new(server_cp(), Ipv4Addr::new(10, 0, 3, 1));
    let second = DhcpServerConfig::new(server_cp(), Ipv4Addr::new(10, 0, 3, 2))
        .with_gateway_ip(Ipv4Addr::new(10, 0, 3, 100));

    fabric.relay.set_default_server_configs(&[first.clone()]).await.unwrap();
    assert_eq!(
        fabric.hosts.monitored_ips(),
        vec![IpAddr::V4(Ipv4Addr::new(10, 0, 3, 1))]
    );

    fabric.relay.set_default_server_configs(&[second]).await.unwrap();
    assert_eq!(
        fabric.hosts.monitored_ips(),
        vec![IpAddr::V4(Ipv4Addr::new(10, 0, 3, 100))]
    );
    let servers = fabric.relay.default_server_infos();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].server_ip4(), Ipv4Addr::new(10, 0, 3, 2));

    // Re-applying the same server keeps a single entry
    fabric.relay.set_default_server_configs(&[first.clone()]).await.unwrap();
    fabric.relay.set_default_server_configs(&[first]).await.unwrap();
    assert_eq!(fabric.relay.default_server_infos().len(), 1);

    fabric.relay.deactivate().await;
    assert!(fabric.hosts.monitored_ips().is_empty());
    assert!(!fabric.relay.is_configured());
}

#[tokio::test]
async fn test_server_host_move_invalidates_binding() {
    let fabric = Fabric::configured(default_server()).await;
    let reactor = fabric.relay.topology_reactor();
    assert!(fabric.relay.default_server_infos()[0].binding().is_some());

    let moved = Host::new(server_mac(), VlanId::NONE)
        .with_location(HostLocation::new("of:0000000000000009/9".parse().unwrap(), 2))
        .with_ip(server_ip());
    reactor.handle_event(&HostEvent::Moved(moved.clone()));
    assert!(fabric.relay.default_server_infos()[0].binding().is_none());

    // Requests wait until the server is seen again
    let out = fabric
        .deliver(
            client_cp(),
            &from_client(client_mac(), client_message(MessageType::Discover)),
        )
        .await;
    assert!(out.is_empty());

    reactor.handle_event(&HostEvent::Updated(moved));
    assert!(fabric.relay.default_server_infos()[0].binding().is_some());
}

#[tokio::test]
async fn test_packet_loop_relays_concurrently() {
    let fabric = Fabric::configured(default_server()).await;
    let mut events = fabric.relay.subscribe();
    let (packet_tx, packet_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = fabric.relay.clone();
    let task = tokio::spawn(async move { relay.run(packet_rx, shutdown_rx).await });
    assert!(matches!(events.recv().await.unwrap(), RelayEvent::Started));

    let frame = from_client(client_mac(), client_message(MessageType::Discover));
    for _ in 0..4 {
        packet_tx
            .send(InboundPacket::new(client_cp(), frame.to_bytes().unwrap()))
            .await
            .unwrap();
    }

    let mut forwarded = 0;
    while forwarded < 4 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let RelayEvent::Forwarded { egress, .. } = event {
            assert_eq!(egress, server_cp());
            forwarded += 1;
        }
    }
    assert_eq!(fabric.packets.sent().len(), 4);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}
