//! 802.1Q VLAN identifier

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const UNTAGGED: u16 = 0xffff;
const MAX_VLAN: u16 = 4095;

/// A VLAN id, or [`VlanId::NONE`] for untagged traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VlanId(u16);

impl VlanId {
    /// Untagged
    pub const NONE: VlanId = VlanId(UNTAGGED);

    /// Create a tagged VLAN id (0..=4095)
    pub fn new(id: u16) -> Result<Self> {
        if id > MAX_VLAN {
            return Err(Error::InvalidVlan(id.to_string()));
        }
        Ok(Self(id))
    }

    /// Map a raw 12-bit 802.1Q VID
    pub fn from_tci(tci: u16) -> Self {
        Self(tci & 0x0fff)
    }

    pub fn is_none(&self) -> bool {
        self.0 == UNTAGGED
    }

    pub fn is_tagged(&self) -> bool {
        !self.is_none()
    }

    /// Raw value (0xffff when untagged)
    pub fn to_short(&self) -> u16 {
        self.0
    }
}

impl Default for VlanId {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("None")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for VlanId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "None" {
            return Ok(Self::NONE);
        }
        let id: u16 = s.parse().map_err(|_| Error::InvalidVlan(s.to_string()))?;
        Self::new(id)
    }
}

impl Serialize for VlanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VlanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
