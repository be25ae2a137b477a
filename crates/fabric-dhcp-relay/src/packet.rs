//! DHCP frame handling
//!
//! This module parses and builds the Ethernet/IPv4/UDP frames that carry
//! DHCPv4 messages through the fabric, and provides the relay agent
//! information (option 82) helpers used when rewriting them.

use crate::circuit_id::CircuitId;
use crate::error::{RelayError, Result};
use bytes::Bytes;
use dhcproto::v4::relay::{RelayAgentInformation, RelayCode, RelayInfo};
use dhcproto::v4::{DhcpOption, Message, MessageType, OptionCode};
use dhcproto::{Decodable, Encodable};
use fabric_common::{ConnectPoint, MacAddress, VlanId};
use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, EthernetRepr, IpProtocol, Ipv4Packet,
    Ipv4Repr, UdpPacket, UdpRepr,
};
use std::net::Ipv4Addr;

/// DHCP server port
pub const DHCP_SERVER_PORT: u16 = 67;

/// DHCP client port
pub const DHCP_CLIENT_PORT: u16 = 68;

/// TTL stamped on relayed requests
pub const RELAY_TTL: u8 = 64;

const ETHERNET_HEADER_SIZE: usize = 14;
const VLAN_TAG_SIZE: usize = 4;
const IPV4_HEADER_SIZE: usize = 20;
const UDP_HEADER_SIZE: usize = 8;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_IPV4: u16 = 0x0800;

/// A frame received from the packet transport
#[derive(Debug, Clone)]
pub struct InboundPacket {
    /// Where the frame entered the fabric
    pub ingress: ConnectPoint,
    pub data: Bytes,
}

impl InboundPacket {
    pub fn new(ingress: ConnectPoint, data: impl Into<Bytes>) -> Self {
        Self {
            ingress,
            data: data.into(),
        }
    }
}

/// A frame handed to the packet transport for injection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    /// Port to send the frame out of
    pub egress: ConnectPoint,
    pub data: Bytes,
}

/// A DHCPv4 message together with the Ethernet, IPv4 and UDP header fields
/// the relay rewrites
#[derive(Debug, Clone)]
pub struct DhcpFrame {
    pub dst_mac: MacAddress,
    pub src_mac: MacAddress,
    /// 802.1Q VLAN, `VlanId::NONE` when untagged
    pub vlan: VlanId,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub ttl: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub message: Message,
}

impl DhcpFrame {
    /// Parse an Ethernet frame carrying a DHCPv4 message
    pub fn parse(data: &[u8]) -> Result<Self> {
        let eth = EthernetFrame::new_checked(data)
            .map_err(|e| RelayError::ParseError(format!("ethernet: {}", e)))?;
        let dst_mac = MacAddress::new(eth.dst_addr().0);
        let src_mac = MacAddress::new(eth.src_addr().0);

        let (vlan, ethertype, l3) = match eth.ethertype() {
            EthernetProtocol::Unknown(ETHERTYPE_VLAN) => {
                let tag = eth.payload();
                if tag.len() < VLAN_TAG_SIZE {
                    return Err(RelayError::ParseError("truncated 802.1Q tag".to_string()));
                }
                let tci = u16::from_be_bytes([tag[0], tag[1]]);
                let inner = u16::from_be_bytes([tag[2], tag[3]]);
                (VlanId::from_tci(tci), inner, &tag[VLAN_TAG_SIZE..])
            }
            other => (VlanId::NONE, u16::from(other), eth.payload()),
        };
        if ethertype != ETHERTYPE_IPV4 {
            return Err(RelayError::ParseError(format!(
                "not an IPv4 frame (ethertype {:#06x})",
                ethertype
            )));
        }

        let ipv4 = Ipv4Packet::new_checked(l3)
            .map_err(|e| RelayError::ParseError(format!("ipv4: {}", e)))?;
        if ipv4.next_header() != IpProtocol::Udp {
            return Err(RelayError::ParseError("not a UDP packet".to_string()));
        }

        let udp = UdpPacket::new_checked(ipv4.payload())
            .map_err(|e| RelayError::ParseError(format!("udp: {}", e)))?;

        let message =
            Message::from_bytes(udp.payload()).map_err(|e| RelayError::ParseError(e.to_string()))?;

        Ok(Self {
            dst_mac,
            src_mac,
            vlan,
            src_ip: ipv4.src_addr().into(),
            dst_ip: ipv4.dst_addr().into(),
            ttl: ipv4.hop_limit(),
            src_port: udp.src_port(),
            dst_port: udp.dst_port(),
            message,
        })
    }

    /// Encode the frame, tagging it when `vlan` is set
    pub fn to_bytes(&self) -> Result<Bytes> {
        let dhcp_bytes = self
            .message
            .to_vec()
            .map_err(|e| RelayError::EncodeError(e.to_string()))?;

        let tag_len = if self.vlan.is_tagged() { VLAN_TAG_SIZE } else { 0 };
        let udp_len = UDP_HEADER_SIZE + dhcp_bytes.len();
        let ip_len = IPV4_HEADER_SIZE + udp_len;
        let mut packet = vec![0u8; ETHERNET_HEADER_SIZE + tag_len + ip_len];

        let eth_repr = EthernetRepr {
            src_addr: EthernetAddress(self.src_mac.octets()),
            dst_addr: EthernetAddress(self.dst_mac.octets()),
            ethertype: if self.vlan.is_tagged() {
                EthernetProtocol::Unknown(ETHERTYPE_VLAN)
            } else {
                EthernetProtocol::Ipv4
            },
        };
        let mut eth_frame = EthernetFrame::new_unchecked(&mut packet[..]);
        eth_repr.emit(&mut eth_frame);

        let payload = eth_frame.payload_mut();
        let l3 = if self.vlan.is_tagged() {
            payload[0..2].copy_from_slice(&self.vlan.to_short().to_be_bytes());
            payload[2..4].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
            &mut payload[VLAN_TAG_SIZE..]
        } else {
            payload
        };

        let checksums = ChecksumCapabilities::default();
        let ip_repr = Ipv4Repr {
            src_addr: self.src_ip.into(),
            dst_addr: self.dst_ip.into(),
            next_header: IpProtocol::Udp,
            payload_len: udp_len,
            hop_limit: self.ttl,
        };
        let mut ip_packet = Ipv4Packet::new_unchecked(l3);
        ip_repr.emit(&mut ip_packet, &checksums);

        let udp_repr = UdpRepr {
            src_port: self.src_port,
            dst_port: self.dst_port,
        };
        let mut udp_packet = UdpPacket::new_unchecked(ip_packet.payload_mut());
        udp_repr.emit(
            &mut udp_packet,
            &ip_repr.src_addr.into(),
            &ip_repr.dst_addr.into(),
            dhcp_bytes.len(),
            |buf| buf.copy_from_slice(&dhcp_bytes),
            &checksums,
        );

        Ok(Bytes::from(packet))
    }

    /// DHCP message type (option 53)
    pub fn message_type(&self) -> Option<MessageType> {
        message_type(&self.message)
    }

    /// Client hardware address from the DHCP header
    pub fn client_mac(&self) -> Result<MacAddress> {
        client_mac(&self.message)
    }

    /// Remove every trace of relaying before the message reaches a client:
    /// drops option 82 and zeroes giaddr
    pub fn strip_relay_info(&mut self) {
        remove_relay_agent_info(&mut self.message);
        self.message.set_giaddr(Ipv4Addr::UNSPECIFIED);
    }
}

/// DHCP message type (option 53)
pub fn message_type(message: &Message) -> Option<MessageType> {
    match message.opts().get(OptionCode::MessageType) {
        Some(DhcpOption::MessageType(mt)) => Some(*mt),
        _ => None,
    }
}

/// Client hardware address (chaddr)
pub fn client_mac(message: &Message) -> Result<MacAddress> {
    Ok(MacAddress::from_slice(message.chaddr())?)
}

/// Relay agent information option, if present
pub fn relay_agent_info(message: &Message) -> Option<&RelayAgentInformation> {
    match message.opts().get(OptionCode::RelayAgentInformation) {
        Some(DhcpOption::RelayAgentInformation(info)) => Some(info),
        _ => None,
    }
}

/// Raw circuit id sub-option payload
pub fn circuit_id_bytes(message: &Message) -> Option<&[u8]> {
    match relay_agent_info(message)?.get(RelayCode::AgentCircuitId) {
        Some(RelayInfo::AgentCircuitId(bytes)) => Some(bytes.as_slice()),
        _ => None,
    }
}

/// Circuit id in the relay's own encoding.
///
/// `Ok(None)` when the message carries no relay agent information at all;
/// an error when it carries information written by another relay.
pub fn decode_circuit_id(message: &Message) -> Result<Option<CircuitId>> {
    if relay_agent_info(message).is_none() {
        return Ok(None);
    }
    let bytes = circuit_id_bytes(message)
        .ok_or_else(|| RelayError::InvalidCircuitId("no circuit id sub-option".to_string()))?;
    CircuitId::deserialize(bytes).map(Some)
}

/// Replace any relay agent information with a fresh option carrying only
/// `circuit_id`
pub fn set_circuit_id(message: &mut Message, circuit_id: &CircuitId) {
    let mut info = RelayAgentInformation::default();
    info.insert(RelayInfo::AgentCircuitId(circuit_id.serialize()));

    let opts = message.opts_mut();
    opts.remove(OptionCode::RelayAgentInformation);
    opts.insert(DhcpOption::RelayAgentInformation(info));
}

/// Drop the relay agent information option
pub fn remove_relay_agent_info(message: &mut Message) {
    message.opts_mut().remove(OptionCode::RelayAgentInformation);
}
