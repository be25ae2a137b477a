//! Per-client binding records
//!
//! A record tracks where a client has been seen, what it was offered and
//! whether it sits behind another relay. Records are values: writers read
//! the stored record, change a copy and install it atomically through
//! [`modify_record`].

use crate::error::{RelayError, Result};
use crate::services::DhcpRelayStore;
use chrono::{DateTime, Utc};
use dhcproto::v4::MessageType;
use fabric_common::{HostId, HostLocation, MacAddress};
use std::net::Ipv4Addr;
use tracing::debug;

/// Attempts a record writer makes before giving up on a contended key
pub const MAX_RECORD_UPDATE_RETRIES: usize = 8;

/// DHCP state of one client, keyed by MAC and VLAN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpRecord {
    pub host_id: HostId,

    /// Connect points the client was seen at, one entry per connect point
    pub locations: Vec<HostLocation>,

    /// Last address assigned by an ACK
    pub ip4_address: Option<Ipv4Addr>,

    /// Last DHCP message type relayed for the client
    pub ip4_status: Option<MessageType>,

    pub directly_connected: bool,

    /// MAC of the relay the client's requests arrive through (indirect only)
    pub next_hop: Option<MacAddress>,

    pub last_seen: DateTime<Utc>,
}

impl DhcpRecord {
    pub fn new(host_id: HostId) -> Self {
        Self {
            host_id,
            locations: Vec::new(),
            ip4_address: None,
            ip4_status: None,
            directly_connected: false,
            next_hop: None,
            last_seen: Utc::now(),
        }
    }

    /// Record a sighting; replaces an earlier one at the same connect point
    pub fn add_location(&mut self, location: HostLocation) {
        self.locations
            .retain(|existing| existing.connect_point != location.connect_point);
        self.locations.push(location);
    }

    /// The most recent location. On equal timestamps the earlier entry wins.
    pub fn latest_location(&self) -> Option<&HostLocation> {
        self.locations.iter().fold(None, |latest, location| match latest {
            Some(current) if location.time <= current.time => Some(current),
            _ => Some(location),
        })
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

/// Read-copy-update a record.
///
/// Fetches the record for `id` (or starts a new one), applies `update` to a
/// copy and installs it only if no other writer replaced the record in the
/// meantime. Lost races are retried up to [`MAX_RECORD_UPDATE_RETRIES`]
/// times.
pub async fn modify_record<F>(
    store: &dyn DhcpRelayStore,
    id: HostId,
    mut update: F,
) -> Result<DhcpRecord>
where
    F: FnMut(&mut DhcpRecord) + Send,
{
    for attempt in 1..=MAX_RECORD_UPDATE_RETRIES {
        let current = store.get_record(&id).await?;
        let mut record = current.clone().unwrap_or_else(|| DhcpRecord::new(id));
        update(&mut record);
        record.touch();

        if store.replace_record(id, current.as_ref(), record.clone()).await? {
            return Ok(record);
        }
        debug!(host = %id, attempt, "Record changed concurrently, retrying");
    }

    Err(RelayError::StoreContention(id, MAX_RECORD_UPDATE_RETRIES))
}
