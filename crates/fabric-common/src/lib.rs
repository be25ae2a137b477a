//! Network model shared by the fabric controller applications
//!
//! Addresses, VLANs, connect points, interfaces, hosts and routes as the
//! controller's topology and configuration services describe them.

pub mod error;
pub mod host;
pub mod interface;
pub mod location;
pub mod mac;
pub mod route;
pub mod vlan;

pub use error::Error;
pub use host::{Host, HostDescription, HostEvent};
pub use interface::Interface;
pub use location::{ConnectPoint, DeviceId, HostId, HostLocation, PortNumber};
pub use mac::MacAddress;
pub use route::{Route, RouteSource};
pub use vlan::VlanId;

pub type Result<T> = std::result::Result<T, Error>;
