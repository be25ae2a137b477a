use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("invalid VLAN id: {0}")]
    InvalidVlan(String),

    #[error("invalid connect point: {0}")]
    InvalidConnectPoint(String),

    #[error("invalid port number: {0}")]
    InvalidPort(String),
}
