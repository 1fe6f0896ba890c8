use std::fmt;
use std::net::IpAddr;

use log::warn;

use crate::flowmod::{Action, Match, RouteMod, RouteModType};
use crate::table::FlowTable;

/// Label-stack manipulation carried by a forwarding entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LabelOp {
    Push,
    Pop,
    Swap,
}

impl fmt::Display for LabelOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LabelOp::Push => write!(f, "push"),
            LabelOp::Pop => write!(f, "pop"),
            LabelOp::Swap => write!(f, "swap"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NhlfeOp {
    Add,
    Remove,
}

/// A next-hop label-forwarding entry operation from the label feed.
#[derive(Debug, Clone, PartialEq)]
pub struct NhlfeMessage {
    pub op: NhlfeOp,
    pub operation: LabelOp,
    pub in_label: u32,
    pub out_label: u32,
    pub next_hop: IpAddr,
}

impl FlowTable {
    /// Push/pop/swap rules keyed on the incoming label only. The next hop
    /// must already be in the host table; unlike routes there is no deferred
    /// resolution, a miss drops the operation.
    pub fn update_nhlfe(&self, msg: NhlfeMessage) {
        let mod_type = match msg.op {
            NhlfeOp::Add => RouteModType::Add,
            NhlfeOp::Remove => RouteModType::Delete,
        };

        // The host table tells us which interface reaches the next hop.
        let host = match self.hosts().get(&msg.next_hop) {
            Some(host) => host,
            None => {
                warn!("failed to locate interface for LSP via {}", msg.next_hop);
                return;
            }
        };
        let iface = match self.interfaces().find(&host.interface.name) {
            Some(iface) => iface,
            None => {
                warn!(
                    "interface {} for LSP no longer in registry",
                    host.interface.name
                );
                return;
            }
        };
        if !iface.active {
            warn!("cannot send label operation via inactive interface {}", iface.name);
            return;
        }
        if host.hw_address.is_none() {
            warn!("failed to resolve gateway MAC for LSP via {}", msg.next_hop);
            return;
        }

        let mut rm = RouteMod::new(mod_type, self.agent_id());
        rm.set_ethernet(iface.hw_address, host.hw_address);
        rm.add_match(Match::MplsLabel(msg.in_label));
        match msg.operation {
            LabelOp::Push => rm.add_action(Action::PushMpls(msg.out_label)),
            LabelOp::Pop => rm.add_action(Action::PopMpls),
            LabelOp::Swap => rm.add_action(Action::SwapMpls(msg.out_label)),
        }
        rm.add_action(Action::Output(iface.port));

        if let Err(err) = self.emitter().submit(rm) {
            warn!("label operation via {} not sent: {}", msg.next_hop, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::addresses::MacAddress;
    use crate::interfaces::{Interface, InterfaceMap};
    use crate::ipc::testing::MockSender;
    use crate::table::HostEntry;

    fn test_iface(active: bool) -> Interface {
        Interface {
            name: "eth1".to_string(),
            port: 1,
            hw_address: "02:00:00:00:00:01".parse().unwrap(),
            addresses: vec![],
            active,
        }
    }

    fn test_table(active: bool) -> (Arc<FlowTable>, Arc<MockSender>) {
        let interfaces = InterfaceMap::new(vec![(2, test_iface(active))]);
        let sender = Arc::new(MockSender::default());
        let (table, _resolver) = FlowTable::new(0x42, interfaces, sender.clone());
        (table, sender)
    }

    fn swap_message(next_hop: &str) -> NhlfeMessage {
        NhlfeMessage {
            op: NhlfeOp::Add,
            operation: LabelOp::Swap,
            in_label: 100,
            out_label: 200,
            next_hop: next_hop.parse().unwrap(),
        }
    }

    #[test]
    fn test_swap_emitted_for_known_next_hop() {
        let (table, sender) = test_table(true);
        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        table.hosts().insert(HostEntry::new(
            "10.0.0.1".parse().unwrap(),
            mac,
            test_iface(true),
        ));

        table.update_nhlfe(swap_message("10.0.0.1"));

        let mods = sender.route_mods();
        assert_eq!(mods.len(), 1);
        let rm = &mods[0];
        assert!(rm.matches.contains(&Match::MplsLabel(100)));
        assert!(rm.actions.contains(&Action::SwapMpls(200)));
        assert!(rm.actions.contains(&Action::SetEthDst(mac)));
        assert!(rm.actions.contains(&Action::Output(1)));
    }

    #[test]
    fn test_unknown_next_hop_dropped() {
        let (table, sender) = test_table(true);
        table.update_nhlfe(swap_message("10.0.0.9"));
        assert_eq!(sender.count(), 0);
    }

    #[test]
    fn test_inactive_interface_dropped() {
        let (table, sender) = test_table(false);
        table.hosts().insert(HostEntry::new(
            "10.0.0.1".parse().unwrap(),
            "aa:bb:cc:dd:ee:ff".parse().unwrap(),
            test_iface(false),
        ));
        table.update_nhlfe(swap_message("10.0.0.1"));
        assert_eq!(sender.count(), 0);
    }

    #[test]
    fn test_pop_has_no_label_argument() {
        let (table, sender) = test_table(true);
        table.hosts().insert(HostEntry::new(
            "10.0.0.1".parse().unwrap(),
            "aa:bb:cc:dd:ee:ff".parse().unwrap(),
            test_iface(true),
        ));
        let mut msg = swap_message("10.0.0.1");
        msg.operation = LabelOp::Pop;
        table.update_nhlfe(msg);

        let mods = sender.route_mods();
        assert!(mods[0].actions.contains(&Action::PopMpls));
    }
}
