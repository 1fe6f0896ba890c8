use std::collections::HashMap;
use std::error;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use log::info;
use nix::ifaddrs::getifaddrs;

use crate::addresses::MacAddress;

/// A host NIC exposed to the controller as a logical port.
///
/// `addresses` is fixed after load; only `active` changes, and only through
/// the registry when the controller confirms or revokes the port mapping.
#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub port: u32,
    pub hw_address: MacAddress,
    pub addresses: Vec<IpAddr>,
    pub active: bool,
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<Interface {} port={} {} active={}>",
            self.name, self.port, self.hw_address, self.active
        )
    }
}

/// Thread-safe registry of the interfaces discovered at startup. No entries
/// are added after load; lookups return clones so the lock is never held
/// across emissions.
#[derive(Clone)]
pub struct InterfaceMap {
    inner: Arc<Mutex<HashMap<String, Interface>>>,
    by_index: Arc<HashMap<u32, String>>,
    by_port: Arc<HashMap<u32, String>>,
}

impl InterfaceMap {
    pub fn new(interfaces: Vec<(u32, Interface)>) -> Self {
        let mut inner = HashMap::with_capacity(interfaces.len());
        let mut by_index = HashMap::with_capacity(interfaces.len());
        let mut by_port = HashMap::with_capacity(interfaces.len());
        for (index, iface) in interfaces {
            by_index.insert(index, iface.name.clone());
            by_port.insert(iface.port, iface.name.clone());
            inner.insert(iface.name.clone(), iface);
        }
        InterfaceMap {
            inner: Arc::new(Mutex::new(inner)),
            by_index: Arc::new(by_index),
            by_port: Arc::new(by_port),
        }
    }

    pub fn find(&self, name: &str) -> Option<Interface> {
        self.inner.lock().unwrap().get(name).cloned()
    }

    pub fn find_by_index(&self, index: u32) -> Option<Interface> {
        self.by_index.get(&index).and_then(|name| self.find(name))
    }

    pub fn find_by_port(&self, port: u32) -> Option<Interface> {
        self.by_port.get(&port).and_then(|name| self.find(name))
    }

    /// Mark the port's interface usable. Returns false for unknown ports.
    pub fn activate(&self, port: u32) -> bool {
        self.set_active(port, true)
    }

    pub fn deactivate(&self, port: u32) -> bool {
        self.set_active(port, false)
    }

    fn set_active(&self, port: u32, active: bool) -> bool {
        let name = match self.by_port.get(&port) {
            Some(name) => name,
            None => return false,
        };
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(name) {
            Some(iface) => {
                iface.active = active;
                true
            }
            None => false,
        }
    }

    /// Copy of every interface, for the startup registration pass.
    pub fn snapshot(&self) -> Vec<Interface> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Logical port number from the interface name: the digit run starting at
/// the first nonzero digit. "eth1" -> 1, "eth12" -> 12, "eth0" -> None.
fn port_number(name: &str) -> Option<u32> {
    let start = name.find(|c: char| ('1'..='9').contains(&c))?;
    let digits: String = name[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// MAC of a named interface, read from the system's address list.
pub fn hwaddr_of(name: &str) -> Option<MacAddress> {
    let addrs = getifaddrs().ok()?;
    for ifa in addrs {
        if ifa.interface_name != name {
            continue;
        }
        if let Some(link) = ifa.address.as_ref().and_then(|a| a.as_link_addr()) {
            if let Some(mac) = link.addr() {
                return Some(MacAddress::from(mac));
            }
        }
    }
    None
}

/// Gather the datapath-facing interfaces on the system: every `eth*` device
/// except the control interface, keeping only names that yield a port
/// number. Interfaces come up inactive; only a controller port-map
/// confirmation activates them.
pub fn load_interfaces(control_ifname: &str) -> Result<InterfaceMap, InterfaceError> {
    let mut interfaces: HashMap<String, (u32, Interface)> = HashMap::new();
    let mut addresses: HashMap<String, Vec<IpAddr>> = HashMap::new();

    for ifa in getifaddrs().map_err(InterfaceError::System)? {
        let name = ifa.interface_name.clone();
        let addr = match ifa.address {
            Some(addr) => addr,
            None => continue,
        };

        if let Some(link) = addr.as_link_addr() {
            if !name.starts_with("eth") || name == control_ifname {
                continue;
            }
            let port = match port_number(&name) {
                Some(port) => port,
                None => {
                    info!("cannot get port number for {}, ignoring", name);
                    continue;
                }
            };
            let hw_address = link.addr().map(MacAddress::from).unwrap_or(MacAddress::NONE);
            let index = link.ifindex() as u32;
            interfaces.insert(
                name.clone(),
                (
                    index,
                    Interface {
                        name,
                        port,
                        hw_address,
                        addresses: Vec::new(),
                        active: false,
                    },
                ),
            );
        } else if let Some(sin) = addr.as_sockaddr_in() {
            addresses
                .entry(name)
                .or_default()
                .push(IpAddr::V4(sin.ip().into()));
        } else if let Some(sin6) = addr.as_sockaddr_in6() {
            // Scope ids are carried separately; the bare address is enough.
            addresses
                .entry(name)
                .or_default()
                .push(IpAddr::V6(sin6.ip()));
        }
    }

    if interfaces.is_empty() {
        return Err(InterfaceError::NoInterfaces);
    }

    let loaded = interfaces
        .into_iter()
        .map(|(name, (index, mut iface))| {
            if let Some(addrs) = addresses.remove(&name) {
                iface.addresses = addrs;
            }
            info!("loaded interface: {}", iface);
            for address in &iface.addresses {
                info!("interface {} has IP address {}", iface.name, address);
            }
            (index, iface)
        })
        .collect();

    Ok(InterfaceMap::new(loaded))
}

#[derive(Debug)]
pub enum InterfaceError {
    NoInterfaces,
    System(nix::Error),
}

impl fmt::Display for InterfaceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InterfaceError::NoInterfaces => write!(f, "No usable interfaces discovered"),
            InterfaceError::System(errno) => write!(f, "Interface discovery failed: {}", errno),
        }
    }
}

impl error::Error for InterfaceError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_iface(name: &str, port: u32) -> Interface {
        Interface {
            name: name.to_string(),
            port,
            hw_address: "02:00:00:00:00:01".parse().unwrap(),
            addresses: vec![],
            active: false,
        }
    }

    #[test]
    fn test_port_number() {
        assert_eq!(port_number("eth1"), Some(1));
        assert_eq!(port_number("eth12"), Some(12));
        assert_eq!(port_number("eth2.5"), Some(2));
        assert_eq!(port_number("eth0"), None);
        assert_eq!(port_number("lo"), None);
    }

    #[test]
    fn test_lookups() {
        let map = InterfaceMap::new(vec![(3, test_iface("eth1", 1)), (4, test_iface("eth2", 2))]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.find("eth1").unwrap().port, 1);
        assert_eq!(map.find_by_index(4).unwrap().name, "eth2");
        assert_eq!(map.find_by_port(2).unwrap().name, "eth2");
        assert!(map.find("eth9").is_none());
        assert!(map.find_by_index(9).is_none());
    }

    #[test]
    fn test_activate_deactivate() {
        let map = InterfaceMap::new(vec![(3, test_iface("eth1", 1))]);
        assert!(!map.find("eth1").unwrap().active);
        assert!(map.activate(1));
        assert!(map.find("eth1").unwrap().active);
        assert!(map.deactivate(1));
        assert!(!map.find("eth1").unwrap().active);
        assert!(!map.activate(9));
    }
}
