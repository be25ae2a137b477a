use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// Origin of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteSource {
    Static,
    Dhcp,
}

/// A unicast route: traffic for `prefix` goes via `next_hop`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub source: RouteSource,
    pub prefix: IpNet,
    pub next_hop: IpAddr,
}

impl Route {
    pub fn new(source: RouteSource, prefix: IpNet, next_hop: IpAddr) -> Self {
        Self {
            source,
            prefix,
            next_hop,
        }
    }

    /// Static host route (/32) for `destination`
    pub fn host_route(destination: Ipv4Addr, next_hop: Ipv4Addr) -> Self {
        Self::new(
            RouteSource::Static,
            IpNet::V4(Ipv4Net::from(destination)),
            IpAddr::V4(next_hop),
        )
    }
}
