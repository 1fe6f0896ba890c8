use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::events::RouteOp;
use crate::interfaces::Interface;

/// A route as tracked by the agent. The key combines all four fields, so two
/// routes to the same destination via different gateways are distinct.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub address: IpAddr,
    pub netmask: IpAddr,
    pub gateway: IpAddr,
    pub interface: Interface,
}

impl RouteEntry {
    pub fn key(&self) -> String {
        format!(
            "{}/{} via {} dev {}",
            self.address, self.netmask, self.gateway, self.interface.name
        )
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}/{} via {} dev {}",
            self.address, self.netmask, self.gateway, self.interface.name
        )
    }
}

/// A route waiting to be pushed to the controller. `not_before` is advisory:
/// the resolver sleeps until it passes but the queue stays strictly FIFO and
/// is never re-sorted by time.
#[derive(Debug, Clone)]
pub struct PendingRoute {
    pub op: RouteOp,
    pub entry: RouteEntry,
    pub not_before: Instant,
}

impl PendingRoute {
    pub fn new(op: RouteOp, entry: RouteEntry) -> Self {
        PendingRoute {
            op,
            entry,
            not_before: Instant::now(),
        }
    }

    /// Push the earliest next attempt out by the cool-down.
    pub fn advance(&mut self, cooldown: Duration) {
        self.not_before = Instant::now() + cooldown;
    }
}

pub type PendingTx = mpsc::UnboundedSender<PendingRoute>;
pub type PendingRx = mpsc::UnboundedReceiver<PendingRoute>;

/// FIFO between the ingest tasks and the resolver, which is its only
/// consumer.
pub fn pending_channel() -> (PendingTx, PendingRx) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_entry(address: &str) -> RouteEntry {
        RouteEntry {
            address: address.parse().unwrap(),
            netmask: "255.255.255.0".parse().unwrap(),
            gateway: "10.0.0.1".parse().unwrap(),
            interface: Interface {
                name: "eth1".to_string(),
                port: 1,
                hw_address: "02:00:00:00:00:01".parse().unwrap(),
                addresses: vec![],
                active: true,
            },
        }
    }

    #[test]
    fn test_fifo_order() {
        let (tx, mut rx) = pending_channel();
        tx.send(PendingRoute::new(RouteOp::Add, test_entry("192.168.1.0")))
            .unwrap();
        tx.send(PendingRoute::new(RouteOp::Add, test_entry("192.168.2.0")))
            .unwrap();
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.entry.address.to_string(), "192.168.1.0");
        assert_eq!(second.entry.address.to_string(), "192.168.2.0");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_advance_pushes_out_retry() {
        let mut pr = PendingRoute::new(RouteOp::Add, test_entry("192.168.1.0"));
        let before = Instant::now();
        pr.advance(Duration::from_secs(5));
        assert!(pr.not_before >= before + Duration::from_secs(5));
    }

    #[test]
    fn test_key_distinguishes_gateways() {
        let mut a = test_entry("192.168.1.0");
        let mut b = test_entry("192.168.1.0");
        a.gateway = "10.0.0.1".parse().unwrap();
        b.gateway = "10.0.0.2".parse().unwrap();
        assert_ne!(a.key(), b.key());
    }
}
