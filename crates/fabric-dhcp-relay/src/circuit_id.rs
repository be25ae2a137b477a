//! Circuit id sub-option codec
//!
//! The relay stamps every request it forwards for a directly connected client
//! with a circuit id naming the ingress connect point and VLAN, encoded as
//! ASCII `<device>/<port>:<vlan>` (e.g. `of:0000000000000001/3:100` or
//! `of:0000000000000001/3:None`). Anything else found in the sub-option was
//! written by another relay.

use crate::error::{RelayError, Result};
use fabric_common::{ConnectPoint, VlanId};
use std::fmt;

/// Connect point and VLAN a client request entered the fabric at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CircuitId {
    pub connect_point: ConnectPoint,
    pub vlan: VlanId,
}

impl CircuitId {
    pub fn new(connect_point: ConnectPoint, vlan: VlanId) -> Self {
        Self {
            connect_point,
            vlan,
        }
    }

    /// Sub-option payload bytes
    pub fn serialize(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Decode a sub-option payload.
    ///
    /// The device id may itself contain `:`, so the VLAN is split off at the
    /// last one. Both halves must parse.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| RelayError::InvalidCircuitId(String::from_utf8_lossy(bytes).into()))?;
        let invalid = || RelayError::InvalidCircuitId(text.to_string());

        let (connect_point, vlan) = text.rsplit_once(':').ok_or_else(invalid)?;
        let connect_point: ConnectPoint = connect_point.parse().map_err(|_| invalid())?;
        let vlan: VlanId = vlan.parse().map_err(|_| invalid())?;

        Ok(Self::new(connect_point, vlan))
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connect_point, self.vlan)
    }
}
