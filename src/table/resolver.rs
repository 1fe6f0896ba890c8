use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::time::sleep_until;

use super::emitter::Emitter;
use super::hosts::HostTable;
use super::nd::NdTracker;
use super::pending::{PendingRoute, PendingRx, PendingTx, RouteEntry};
use crate::events::RouteOp;
use crate::flowmod::RouteModType;
use crate::interfaces::InterfaceMap;

/// Minimum delay between successive attempts on the same pending route.
pub const COOLDOWN: Duration = Duration::from_secs(5);

/// Single consumer of the pending-route queue, and the only task that
/// touches the route table. Routes whose gateways cannot be resolved yet are
/// recycled to the tail so they never block the head of the queue.
pub struct GwResolver {
    queue: PendingRx,
    requeue: PendingTx,
    routes: HashMap<String, RouteEntry>,
    hosts: HostTable,
    nd: Arc<NdTracker>,
    interfaces: InterfaceMap,
    emitter: Emitter,
}

impl GwResolver {
    pub fn new(
        queue: PendingRx,
        requeue: PendingTx,
        hosts: HostTable,
        nd: Arc<NdTracker>,
        interfaces: InterfaceMap,
        emitter: Emitter,
    ) -> Self {
        GwResolver {
            queue,
            requeue,
            routes: HashMap::new(),
            hosts,
            nd,
            interfaces,
            emitter,
        }
    }

    pub async fn run(mut self) {
        while let Some(mut pr) = self.queue.recv().await {
            if !self.queue.is_empty() {
                info!("{} in pending routes", self.queue.len());
            }
            // Honor the head's gate before doing any work, then push the
            // route's own next attempt out by one cool-down.
            if Instant::now() < pr.not_before {
                debug!("resolver waiting to retry {}", pr.entry);
                sleep_until(tokio::time::Instant::from_std(pr.not_before)).await;
            }
            pr.advance(COOLDOWN);
            self.process(pr);
        }
    }

    /// One scheduling iteration, after the time gate has passed.
    fn process(&mut self, pr: PendingRoute) {
        let key = pr.entry.key();
        let existing = self.routes.contains_key(&key);

        if existing && pr.op == RouteOp::Add {
            info!("received duplicate route add for {}", pr.entry.address);
            return;
        }
        if !existing && pr.op == RouteOp::Delete {
            info!(
                "received route removal for {} but route cannot be found",
                pr.entry.address
            );
            return;
        }

        if pr.op != RouteOp::Delete && self.hosts.mac_for(&pr.entry.gateway).is_none() {
            // Unresolved next hop: have the kernel chase it and retry after
            // the cool-down. Resolution failures drop the route entirely.
            let iface = self
                .interfaces
                .find(&pr.entry.interface.name)
                .unwrap_or_else(|| pr.entry.interface.clone());
            match self.nd.resolve_gateway(pr.entry.gateway, &iface) {
                Ok(()) => {
                    let _ = self.requeue.send(pr);
                }
                Err(err) => {
                    warn!(
                        "an error occurred while attempting to resolve {}/{}: {}",
                        pr.entry.address, pr.entry.netmask, err
                    );
                }
            }
            return;
        }

        let mod_type = match pr.op {
            RouteOp::Add => RouteModType::Add,
            RouteOp::Delete => RouteModType::Delete,
        };
        if let Err(err) = self.emitter.send_route(mod_type, &pr.entry) {
            warn!(
                "an error occurred while pushing {}/{}: {}",
                pr.entry.address, pr.entry.netmask, err
            );
            let _ = self.requeue.send(pr);
            return;
        }

        // The table reflects only successfully pushed state.
        match pr.op {
            RouteOp::Add => {
                self.routes.insert(key, pr.entry);
            }
            RouteOp::Delete => {
                self.routes.remove(&key);
            }
        }
    }
}

#[cfg(test)]
impl GwResolver {
    pub(crate) fn try_pop(&mut self) -> Option<PendingRoute> {
        self.queue.try_recv().ok()
    }

    pub(crate) fn step(&mut self, pr: PendingRoute) {
        self.process(pr)
    }

    pub(crate) fn route_count(&self) -> usize {
        self.routes.len()
    }
}
