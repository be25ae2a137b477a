//! Keeping server bindings in step with the host topology
//!
//! When the host owning a configured server or gateway address appears,
//! changes or disappears, the head server entries learn or forget the MAC and
//! VLAN they are reached through.

use crate::server_info::{ServerBinding, ServerInfoRegistry};
use fabric_common::HostEvent;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

#[derive(Clone)]
pub struct TopologyReactor {
    registry: Arc<ServerInfoRegistry>,
}

impl TopologyReactor {
    pub fn new(registry: Arc<ServerInfoRegistry>) -> Self {
        Self { registry }
    }

    /// Apply one host event to the server bindings
    pub fn handle_event(&self, event: &HostEvent) {
        if !self.registry.is_configured() {
            return;
        }

        let host = event.subject();
        self.registry.update_heads(|path, server| {
            if !server.is_served_by(host) {
                return;
            }
            match event {
                HostEvent::Added(_) | HostEvent::Updated(_) => {
                    let binding = ServerBinding::from_host(host);
                    debug!(path = %path, mac = %binding.mac, vlan = %binding.vlan, "DHCP server resolved");
                    server.set_binding(Some(binding));
                }
                HostEvent::Removed(_) => {
                    debug!(path = %path, host = %host.id, "DHCP server host removed");
                    server.set_binding(None);
                }
                HostEvent::Moved(_) => {
                    if !host.is_located_at(server.server_connect_point()) {
                        debug!(
                            path = %path,
                            host = %host.id,
                            connect_point = %server.server_connect_point(),
                            "DHCP server host moved away from its connect point"
                        );
                        server.set_binding(None);
                    }
                }
            }
        });
    }

    /// Consume host events until the channel closes or shutdown is signalled
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<HostEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Host event listener started");
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(&event),
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Host event listener stopped");
    }
}

impl std::fmt::Debug for TopologyReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyReactor")
            .field("registry", &self.registry)
            .finish()
    }
}
