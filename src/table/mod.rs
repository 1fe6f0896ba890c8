mod emitter;
mod hosts;
mod nd;
mod pending;
mod resolver;

pub use emitter::{EmitError, Emitter};
pub use hosts::{HostEntry, HostTable};
pub use nd::{NdError, NdTracker};
pub use pending::{pending_channel, PendingRoute, PendingRx, PendingTx, RouteEntry};
pub use resolver::{GwResolver, COOLDOWN};

use std::sync::Arc;

use log::{info, warn};

use crate::addresses::{mask_from_prefix, Family};
use crate::events::{Event, HostUpdate, RouteUpdate};
use crate::flowmod::RouteModType;
use crate::interfaces::InterfaceMap;
use crate::ipc::MessageSender;

/// Front half of the route-installation pipeline: consumes the unified
/// event stream, keeps the host table current, and feeds the resolver's
/// queue. The resolver owns the back half (and the route table).
pub struct FlowTable {
    agent_id: u64,
    interfaces: InterfaceMap,
    hosts: HostTable,
    nd: Arc<NdTracker>,
    pending: PendingTx,
    emitter: Emitter,
}

impl FlowTable {
    /// Wire up the table and its resolver. The caller spawns the resolver;
    /// it is the pending queue's only consumer.
    pub fn new(
        agent_id: u64,
        interfaces: InterfaceMap,
        ipc: Arc<dyn MessageSender>,
    ) -> (Arc<FlowTable>, GwResolver) {
        let hosts = HostTable::new();
        let nd = Arc::new(NdTracker::new());
        let (pending, queue) = pending_channel();
        let emitter = Emitter::new(agent_id, interfaces.clone(), hosts.clone(), ipc);
        let resolver = GwResolver::new(
            queue,
            pending.clone(),
            hosts.clone(),
            Arc::clone(&nd),
            interfaces.clone(),
            emitter.clone(),
        );
        let table = Arc::new(FlowTable {
            agent_id,
            interfaces,
            hosts,
            nd,
            pending,
            emitter,
        });
        (table, resolver)
    }

    pub fn agent_id(&self) -> u64 {
        self.agent_id
    }

    pub fn hosts(&self) -> &HostTable {
        &self.hosts
    }

    pub fn interfaces(&self) -> &InterfaceMap {
        &self.interfaces
    }

    pub(crate) fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Unified entry point for both event sources.
    pub fn process_event(&self, event: Event) {
        match event {
            Event::Host(update) => self.process_host(update),
            Event::Route(update) => self.process_route(update),
        }
    }

    fn process_host(&self, update: HostUpdate) {
        let interface = match self.interfaces.find_by_index(update.ifindex) {
            Some(interface) => interface,
            None => {
                warn!(
                    "interface {} not found, dropping host entry",
                    update.ifindex
                );
                return;
            }
        };
        if update.lladdr.is_none() {
            info!("received host entry with blank mac, ignoring");
            return;
        }

        let entry = HostEntry::new(update.address, update.lladdr, interface);
        info!("new neighbor: ip={} mac={}", entry.address, entry.hw_address);

        // The host rule goes out before the table insert, so a resolver pass
        // that observes the MAC can never race ahead of the host rule.
        if let Err(err) = self.emitter.send_host(RouteModType::Add, &entry) {
            warn!("host flow-mod for {} failed: {}", entry.address, err);
        }
        let address = entry.address;
        self.hosts.insert(entry);
        // Any outstanding discovery probe for this host has done its job.
        self.nd.stop_nd(&address);
    }

    fn process_route(&self, update: RouteUpdate) {
        let interface = match self.interfaces.find_by_index(update.ifindex) {
            Some(interface) => interface,
            None => {
                warn!(
                    "interface {} not found, dropping route entry",
                    update.ifindex
                );
                return;
            }
        };

        let family = Family::of(&update.destination);
        let netmask = match mask_from_prefix(family, update.prefix_len) {
            Ok(netmask) => netmask,
            Err(err) => {
                warn!("dropping route for {}: {}", update.destination, err);
                return;
            }
        };
        // Default route: zero the address to match the zero-length mask.
        let address = if update.prefix_len == 0 {
            family.zero()
        } else {
            update.destination
        };

        let entry = RouteEntry {
            address,
            netmask,
            gateway: update.gateway,
            interface,
        };
        info!("route {}: {}", update.op, entry);
        let _ = self.pending.send(PendingRoute::new(update.op, entry));
    }
}
