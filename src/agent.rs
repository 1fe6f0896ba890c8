use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::flowmod::{
    Action, Match, ModOption, RouteMod, RouteModType, ETHERTYPE_IPV6, IPPROTO_ICMP,
    IPPROTO_ICMPV6, IPPROTO_TCP, PRIORITY_HIGH, PRIORITY_LOW, TPORT_BGP,
};
use crate::interfaces::{Interface, InterfaceMap};
use crate::ipc::{
    IpcError, IpcMessage, MessageSender, PortConfig, PortConfigOperation, PortRegister,
    CLIENT_SERVER_CHANNEL, CONTROLLER_ID,
};

/// The agent's controller-facing half: registers the host's ports at
/// startup and applies controller port-config callbacks to the registry.
pub struct Agent {
    id: u64,
    interfaces: InterfaceMap,
    ipc: Arc<dyn MessageSender>,
}

impl Agent {
    pub fn new(id: u64, interfaces: InterfaceMap, ipc: Arc<dyn MessageSender>) -> Agent {
        Agent {
            id,
            interfaces,
            ipc,
        }
    }

    /// Announce every loaded port to the controller.
    pub fn register_ports(&self) -> Result<(), IpcError> {
        for iface in self.interfaces.snapshot() {
            info!("registering client port (vm_port={})", iface.port);
            self.ipc.send(
                CLIENT_SERVER_CHANNEL,
                CONTROLLER_ID,
                IpcMessage::PortRegister(PortRegister {
                    id: self.id,
                    port: iface.port,
                    hw_address: iface.hw_address,
                }),
            )?;
        }
        Ok(())
    }

    /// Drain controller-originated messages until the transport closes.
    pub async fn listen(&self, mut inbound: UnboundedReceiver<IpcMessage>) {
        while let Some(message) = inbound.recv().await {
            match message {
                IpcMessage::PortConfig(config) => self.process_port_config(config),
                other => debug!("ignoring unexpected {} message", other.type_name()),
            }
        }
        info!("controller connection closed");
    }

    pub fn process_port_config(&self, config: PortConfig) {
        match config.operation() {
            PortConfigOperation::MapRequest => {
                warn!(
                    "received deprecated PortConfig (vm_port={})",
                    config.vm_port
                );
            }
            PortConfigOperation::Reset => {
                info!("received port reset (vm_port={})", config.vm_port);
                if !self.interfaces.deactivate(config.vm_port) {
                    warn!("port reset for unknown port {}", config.vm_port);
                }
            }
            PortConfigOperation::MapSuccess => {
                info!("successfully mapped port (vm_port={})", config.vm_port);
                if self.interfaces.activate(config.vm_port) {
                    if let Some(iface) = self.interfaces.find_by_port(config.vm_port) {
                        self.send_controller_rules(&iface);
                    }
                } else {
                    warn!("port map for unknown port {}", config.vm_port);
                }
            }
            PortConfigOperation::Unknown(operation_id) => {
                warn!(
                    "received unrecognised PortConfig operation {}",
                    operation_id
                );
            }
        }
    }

    /// Base to-controller rule: a host match on one interface address in the
    /// high band, output toward the port's datapath.
    fn controller_route_mod(&self, port: u32, address: IpAddr) -> RouteMod {
        let mut rm = RouteMod::new(RouteModType::Controller, self.id);
        match address {
            IpAddr::V4(v4) => rm.add_match(Match::Ipv4 {
                address: v4,
                mask: Ipv4Addr::BROADCAST,
            }),
            IpAddr::V6(v6) => rm.add_match(Match::Ipv6 {
                address: v6,
                mask: Ipv6Addr::from(u128::MAX),
            }),
        }
        rm.add_action(Action::Output(port));
        rm.add_option(ModOption::Priority(PRIORITY_HIGH));
        rm
    }

    /// Protocol traffic that must keep reaching the routing stack on this
    /// host once the port is mapped: ICMP(v6) and BGP in both directions per
    /// interface address, plus a broad low-band ICMPv6 rule so neighbor
    /// discovery survives.
    fn send_controller_rules(&self, iface: &Interface) {
        for address in &iface.addresses {
            match address {
                IpAddr::V4(_) => {
                    let mut rm = self.controller_route_mod(iface.port, *address);
                    rm.add_match(Match::NwProto(IPPROTO_ICMP));
                    self.submit(rm);
                }
                IpAddr::V6(_) => {
                    let mut rm = self.controller_route_mod(iface.port, *address);
                    rm.add_match(Match::NwProto(IPPROTO_ICMPV6));
                    self.submit(rm);

                    let mut rm = RouteMod::new(RouteModType::Controller, self.id);
                    rm.add_action(Action::Output(iface.port));
                    rm.add_match(Match::EtherType(ETHERTYPE_IPV6));
                    rm.add_match(Match::NwProto(IPPROTO_ICMPV6));
                    rm.add_option(ModOption::Priority(PRIORITY_LOW + 1));
                    self.submit(rm);
                }
            }

            let mut rm = self.controller_route_mod(iface.port, *address);
            rm.add_match(Match::NwProto(IPPROTO_TCP));
            rm.add_match(Match::TpSrc(TPORT_BGP));
            self.submit(rm);

            let mut rm = self.controller_route_mod(iface.port, *address);
            rm.add_match(Match::NwProto(IPPROTO_TCP));
            rm.add_match(Match::TpDst(TPORT_BGP));
            self.submit(rm);
        }
    }

    fn submit(&self, rm: RouteMod) {
        if let Err(err) = self
            .ipc
            .send(CLIENT_SERVER_CHANNEL, CONTROLLER_ID, IpcMessage::RouteMod(rm))
        {
            warn!("controller rule not sent: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::testing::MockSender;

    fn test_map() -> InterfaceMap {
        InterfaceMap::new(vec![(
            2,
            Interface {
                name: "eth1".to_string(),
                port: 1,
                hw_address: "02:00:00:00:00:01".parse().unwrap(),
                addresses: vec![
                    "10.0.0.2".parse().unwrap(),
                    "2001:db8::2".parse().unwrap(),
                ],
                active: false,
            },
        )])
    }

    fn port_config(operation_id: u32) -> PortConfig {
        PortConfig {
            id: 0x42,
            vm_port: 1,
            operation_id,
        }
    }

    #[test]
    fn test_register_ports() {
        let interfaces = test_map();
        let sender = Arc::new(MockSender::default());
        let agent = Agent::new(0x42, interfaces, sender.clone());
        agent.register_ports().unwrap();

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match &sent[0].2 {
            IpcMessage::PortRegister(reg) => {
                assert_eq!(reg.id, 0x42);
                assert_eq!(reg.port, 1);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_map_success_activates_and_sends_rules() {
        let interfaces = test_map();
        let sender = Arc::new(MockSender::default());
        let agent = Agent::new(0x42, interfaces.clone(), sender.clone());

        agent.process_port_config(port_config(2));

        assert!(interfaces.find("eth1").unwrap().active);
        // 3 rules for the IPv4 address, 4 for the IPv6 address
        let mods = sender.route_mods();
        assert_eq!(mods.len(), 7);
        let high = mods
            .iter()
            .filter(|rm| rm.priority() == Some(PRIORITY_HIGH))
            .count();
        let catch_all = mods
            .iter()
            .filter(|rm| rm.priority() == Some(PRIORITY_LOW + 1))
            .count();
        assert_eq!(high, 6);
        assert_eq!(catch_all, 1);
        assert!(mods
            .iter()
            .all(|rm| rm.mod_type == RouteModType::Controller));
        assert!(mods.iter().all(|rm| rm.actions.contains(&Action::Output(1))));
    }

    #[test]
    fn test_reset_deactivates() {
        let interfaces = test_map();
        let sender = Arc::new(MockSender::default());
        let agent = Agent::new(0x42, interfaces.clone(), sender.clone());

        agent.process_port_config(port_config(2));
        agent.process_port_config(port_config(1));

        assert!(!interfaces.find("eth1").unwrap().active);
    }

    #[test]
    fn test_deprecated_and_unknown_operations_ignored() {
        let interfaces = test_map();
        let sender = Arc::new(MockSender::default());
        let agent = Agent::new(0x42, interfaces.clone(), sender.clone());

        agent.process_port_config(port_config(0));
        agent.process_port_config(port_config(99));

        assert_eq!(sender.count(), 0);
        assert!(!interfaces.find("eth1").unwrap().active);
    }
}
