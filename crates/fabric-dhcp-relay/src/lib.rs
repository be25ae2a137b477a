//! Fabric DHCP Relay
//!
//! This crate relays DHCPv4 between clients attached to controller-managed
//! switch ports and a configured DHCP server. Packets are punted to the
//! controller, rewritten here and injected back into the fabric.
//!
//! # Client Classification
//!
//! ## Direct
//! The client is attached to a fabric port. Its requests are stamped with a
//! circuit id (option 82) naming the ingress port and VLAN, and replies are
//! delivered straight to the client with the relay information removed.
//! Acknowledged clients are published as hosts.
//!
//! ## Indirect
//! The client sits behind another relay whose option 82 is left untouched.
//! Replies go to the MAC of that relay, and acknowledged clients are reached
//! through a /32 route via it. Indirect clients use the indirect server when
//! one is configured and the default server otherwise.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  DhcpRelay                          │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │   DISCOVER/REQUEST ──▶ server path            │  │
//! │  │   OFFER/ACK        ──▶ client interface       │  │
//! │  └───────────────────────────────────────────────┘  │
//! │          │                          │               │
//! │          ▼                          ▼               │
//! │  ┌────────────────────┐   ┌─────────────────────┐  │
//! │  │ ServerInfoRegistry │   │ DhcpRelayStore      │  │
//! │  │ default | indirect │   │ per-client records  │  │
//! │  └────────────────────┘   └─────────────────────┘  │
//! │          ▲                          │               │
//! │          │                          ▼               │
//! │  ┌────────────────────┐   ┌─────────────────────┐  │
//! │  │ TopologyReactor    │   │ BindingReactor      │  │
//! │  │ host events        │   │ hosts | routes      │  │
//! │  └────────────────────┘   └─────────────────────┘  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use fabric_dhcp_relay::{DhcpRelay, DhcpRelayConfig, RelayServices};
//!
//! let relay = DhcpRelay::new(services);
//! relay.apply_config(&DhcpRelayConfig::from_json(&json)?).await?;
//!
//! let reactor = relay.topology_reactor();
//! tokio::spawn(async move { reactor.run(host_events, shutdown_rx.clone()).await });
//!
//! relay.run(packets, shutdown_rx).await?;
//! ```

pub mod binding;
pub mod circuit_id;
pub mod config;
pub mod error;
pub mod location;
pub mod memory;
pub mod packet;
pub mod record;
pub mod relay;
pub mod server_info;
pub mod services;
pub mod topology;

pub use binding::BindingReactor;
pub use circuit_id::CircuitId;
pub use config::*;
pub use error::*;
pub use location::{directly_connected, ClientLocationResolver};
pub use packet::{DhcpFrame, InboundPacket, OutboundPacket, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
pub use record::{modify_record, DhcpRecord, MAX_RECORD_UPDATE_RETRIES};
pub use relay::*;
pub use server_info::{DhcpServerInfo, ServerBinding, ServerInfoRegistry};
pub use services::*;
pub use topology::TopologyReactor;
