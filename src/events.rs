use std::fmt;
use std::net::IpAddr;

use crate::addresses::MacAddress;

/// Which feed supplies route events. Neighbor events always come from the
/// kernel; routes can come from the kernel or from a streaming routing
/// daemon. Both produce the same [`Event`] stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RouteSource {
    Netlink,
    Fpm,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RouteOp {
    Add,
    Delete,
}

impl fmt::Display for RouteOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RouteOp::Add => write!(f, "add"),
            RouteOp::Delete => write!(f, "delete"),
        }
    }
}

/// A neighbor the kernel has resolved (or re-announced).
#[derive(Debug, Clone, PartialEq)]
pub struct HostUpdate {
    pub ifindex: u32,
    pub address: IpAddr,
    pub lladdr: MacAddress,
}

/// A unicast route change from the kernel's main table.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteUpdate {
    pub op: RouteOp,
    pub destination: IpAddr,
    pub prefix_len: u8,
    pub gateway: IpAddr,
    pub ifindex: u32,
}

/// Unified stream item produced by every event source.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Host(HostUpdate),
    Route(RouteUpdate),
}
