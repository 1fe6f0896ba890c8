use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::addresses::{prefix_len, AddressError, MacAddress};

/// Masked IP rules live in the low band, scaled by prefix length so a longer
/// prefix always wins. To-controller rules sit in the high band, above any
/// masked match.
pub const PRIORITY_LOW: u16 = 0x4010;
pub const PRIORITY_BAND: u16 = 0x000a;
pub const PRIORITY_HIGH: u16 = 0x8020;

pub const TPORT_BGP: u16 = 179;
pub const IPPROTO_ICMP: u16 = 1;
pub const IPPROTO_TCP: u16 = 6;
pub const IPPROTO_ICMPV6: u16 = 58;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteModType {
    Add,
    Delete,
    Controller,
}

impl fmt::Display for RouteModType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            RouteModType::Add => "ADD",
            RouteModType::Delete => "DELETE",
            RouteModType::Controller => "CONTROLLER",
        };
        write!(f, "{}", word)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Match {
    Ipv4 { address: Ipv4Addr, mask: Ipv4Addr },
    Ipv6 { address: Ipv6Addr, mask: Ipv6Addr },
    EthSrc(MacAddress),
    EthDst(MacAddress),
    EtherType(u16),
    NwProto(u16),
    TpSrc(u16),
    TpDst(u16),
    MplsLabel(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    SetEthSrc(MacAddress),
    SetEthDst(MacAddress),
    Output(u32),
    PushMpls(u32),
    PopMpls,
    SwapMpls(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModOption {
    Priority(u16),
}

/// A flow modification bound for the controller: what to match, what to do
/// with matching packets, and how the rule ranks against its neighbors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMod {
    pub mod_type: RouteModType,
    pub id: u64,
    pub matches: Vec<Match>,
    pub actions: Vec<Action>,
    pub options: Vec<ModOption>,
}

impl RouteMod {
    pub fn new(mod_type: RouteModType, id: u64) -> Self {
        RouteMod {
            mod_type,
            id,
            matches: Vec::new(),
            actions: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn add_match(&mut self, m: Match) {
        self.matches.push(m);
    }

    pub fn add_action(&mut self, a: Action) {
        self.actions.push(a);
    }

    pub fn add_option(&mut self, o: ModOption) {
        self.options.push(o);
    }

    /// Ethernet rewrite toward the next hop. Deletes carry no Ethernet
    /// actions; the controller identifies the rule by match + output port.
    pub fn set_ethernet(&mut self, local: MacAddress, gateway: MacAddress) {
        if self.mod_type != RouteModType::Delete {
            self.add_action(Action::SetEthSrc(local));
            self.add_action(Action::SetEthDst(gateway));
        }
    }

    /// Masked IP match plus the low-band priority for its prefix length.
    pub fn set_ip(&mut self, address: IpAddr, mask: IpAddr) -> Result<(), AddressError> {
        let len = prefix_len(&mask)?;
        match (address, mask) {
            (IpAddr::V4(address), IpAddr::V4(mask)) => {
                self.add_match(Match::Ipv4 { address, mask })
            }
            (IpAddr::V6(address), IpAddr::V6(mask)) => {
                self.add_match(Match::Ipv6 { address, mask })
            }
            _ => return Err(AddressError::FamilyMismatch),
        }
        self.add_option(ModOption::Priority(
            PRIORITY_LOW + u16::from(len) * PRIORITY_BAND,
        ));
        Ok(())
    }

    pub fn priority(&self) -> Option<u16> {
        self.options.iter().map(|ModOption::Priority(p)| *p).next()
    }
}

impl fmt::Display for RouteMod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<RouteMod {} id={:#x} matches={} actions={}>",
            self.mod_type,
            self.id,
            self.matches.len(),
            self.actions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_ip_priority() {
        let mut rm = RouteMod::new(RouteModType::Add, 1);
        rm.set_ip(
            "192.168.1.0".parse().unwrap(),
            "255.255.255.0".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(rm.priority(), Some(PRIORITY_LOW + 24 * PRIORITY_BAND));
        assert_eq!(rm.matches.len(), 1);
    }

    #[test]
    fn test_longer_prefix_wins() {
        let mut shorter = RouteMod::new(RouteModType::Add, 1);
        shorter
            .set_ip("10.0.0.0".parse().unwrap(), "255.0.0.0".parse().unwrap())
            .unwrap();
        let mut longer = RouteMod::new(RouteModType::Add, 1);
        longer
            .set_ip(
                "10.1.0.0".parse().unwrap(),
                "255.255.0.0".parse().unwrap(),
            )
            .unwrap();
        assert!(longer.priority() > shorter.priority());
    }

    #[test]
    fn test_set_ip_family_mismatch() {
        let mut rm = RouteMod::new(RouteModType::Add, 1);
        let err = rm
            .set_ip("10.0.0.0".parse().unwrap(), "ffff::".parse().unwrap())
            .unwrap_err();
        assert_eq!(err, AddressError::FamilyMismatch);
    }

    #[test]
    fn test_delete_has_no_ethernet_actions() {
        let local: MacAddress = "02:00:00:00:00:01".parse().unwrap();
        let gateway: MacAddress = "02:00:00:00:00:02".parse().unwrap();

        let mut add = RouteMod::new(RouteModType::Add, 1);
        add.set_ethernet(local, gateway);
        assert_eq!(
            add.actions,
            vec![Action::SetEthSrc(local), Action::SetEthDst(gateway)]
        );

        let mut del = RouteMod::new(RouteModType::Delete, 1);
        del.set_ethernet(local, gateway);
        assert!(del.actions.is_empty());
    }
}
