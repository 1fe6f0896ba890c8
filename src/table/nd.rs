use std::collections::HashMap;
use std::error;
use std::fmt;
use std::net::{IpAddr, SocketAddrV4};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Mutex;

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::socket::{connect, socket, AddressFamily, SockFlag, SockType, SockaddrIn};

use crate::interfaces::Interface;

#[derive(Debug)]
pub enum NdError {
    InactiveInterface(String),
    Ipv6Unsupported(IpAddr),
    Socket(Errno),
}

impl fmt::Display for NdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NdError::InactiveInterface(name) => {
                write!(f, "cannot resolve via inactive interface {}", name)
            }
            NdError::Ipv6Unsupported(addr) => {
                write!(f, "neighbour discovery unsupported for IPv6 {}", addr)
            }
            NdError::Socket(errno) => write!(f, "socket error: {}", errno),
        }
    }
}

impl error::Error for NdError {}

/// Outstanding kernel-resolver provocations, at most one per IP. The map
/// owns each probe socket; dropping the fd closes it, so removal and process
/// teardown both release the handle.
#[derive(Default)]
pub struct NdTracker {
    pending: Mutex<HashMap<String, OwnedFd>>,
}

impl NdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the kernel to resolve `gateway`. Success means a resolution is
    /// outstanding, whether started here or earlier.
    pub fn resolve_gateway(&self, gateway: IpAddr, iface: &Interface) -> Result<(), NdError> {
        if !iface.active {
            return Err(NdError::InactiveInterface(iface.name.clone()));
        }

        let key = gateway.to_string();
        let mut pending = self.pending.lock().unwrap();
        if pending.contains_key(&key) {
            info!("already doing neighbour discovery for {}", key);
            return Ok(());
        }

        info!("starting neighbour discovery for {}", key);
        let probe = initiate_nd(&gateway)?;
        pending.insert(key, probe);
        Ok(())
    }

    /// Close and forget the probe for `host`. No-op if none exists.
    pub fn stop_nd(&self, host: &IpAddr) {
        let mut pending = self.pending.lock().unwrap();
        pending.remove(&host.to_string());
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Provoke the kernel's resolver with a non-blocking connect that is never
/// expected to complete. The returned socket is the "resolution pending"
/// handle; it matters only that it stays open until the kernel answers.
fn initiate_nd(host: &IpAddr) -> Result<OwnedFd, NdError> {
    let v4 = match host {
        IpAddr::V4(v4) => *v4,
        IpAddr::V6(_) => {
            warn!("refusing to initiate neighbour discovery for IPv6 {}", host);
            return Err(NdError::Ipv6Unsupported(*host));
        }
    };

    let probe = socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK,
        None,
    )
    .map_err(NdError::Socket)?;

    // The connect itself may fail immediately; the SYN attempt is what makes
    // the kernel ARP for the next hop.
    let addr = SockaddrIn::from(SocketAddrV4::new(v4, 0));
    match connect(probe.as_raw_fd(), &addr) {
        Ok(()) | Err(Errno::EINPROGRESS) => {}
        Err(errno) => debug!("neighbour discovery connect for {}: {}", host, errno),
    }
    Ok(probe)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_iface(active: bool) -> Interface {
        Interface {
            name: "eth1".to_string(),
            port: 1,
            hw_address: "02:00:00:00:00:01".parse().unwrap(),
            addresses: vec![],
            active,
        }
    }

    #[test]
    fn test_at_most_one_probe_per_gateway() {
        let nd = NdTracker::new();
        let gw: IpAddr = "192.0.2.1".parse().unwrap();
        nd.resolve_gateway(gw, &test_iface(true)).unwrap();
        assert_eq!(nd.pending_count(), 1);
        // Second attempt succeeds without opening another probe
        nd.resolve_gateway(gw, &test_iface(true)).unwrap();
        assert_eq!(nd.pending_count(), 1);
    }

    #[test]
    fn test_stop_nd() {
        let nd = NdTracker::new();
        let gw: IpAddr = "192.0.2.2".parse().unwrap();
        nd.resolve_gateway(gw, &test_iface(true)).unwrap();
        nd.stop_nd(&gw);
        assert_eq!(nd.pending_count(), 0);
        // No-op when nothing is pending
        nd.stop_nd(&gw);
        assert_eq!(nd.pending_count(), 0);
    }

    #[test]
    fn test_inactive_interface_refused() {
        let nd = NdTracker::new();
        let gw: IpAddr = "192.0.2.3".parse().unwrap();
        assert!(nd.resolve_gateway(gw, &test_iface(false)).is_err());
        assert_eq!(nd.pending_count(), 0);
    }

    #[test]
    fn test_ipv6_refused() {
        let nd = NdTracker::new();
        let gw: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(nd.resolve_gateway(gw, &test_iface(true)).is_err());
        assert_eq!(nd.pending_count(), 0);
    }
}
