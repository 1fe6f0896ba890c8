use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_packet_route::neighbour::{NeighbourAddress, NeighbourAttribute, NeighbourMessage};
use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteHeader, RouteMessage};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_sys::{AsyncSocket, SocketAddr};
use rtnetlink::constants::{
    RTMGRP_IPV4_MROUTE, RTMGRP_IPV4_ROUTE, RTMGRP_IPV6_MROUTE, RTMGRP_IPV6_ROUTE, RTMGRP_NEIGH,
};

use crate::addresses::{Family, MacAddress};
use crate::events::{Event, HostUpdate, RouteOp, RouteUpdate};
use crate::table::FlowTable;

/// Subscribe to the kernel's neighbor group and feed the flow table until
/// the socket closes.
pub async fn neighbor_listener(table: Arc<FlowTable>) -> io::Result<()> {
    let mut messages = subscribe(RTMGRP_NEIGH)?;
    info!("netlink neighbor interface enabled");
    while let Some((message, _addr)) = messages.next().await {
        if let Some(event) = neighbor_event(message) {
            table.process_event(event);
        }
    }
    Ok(())
}

/// Subscribe to the kernel's v4/v6 unicast and multicast route groups and
/// feed the flow table until the socket closes.
pub async fn route_listener(table: Arc<FlowTable>) -> io::Result<()> {
    let groups = RTMGRP_IPV4_ROUTE | RTMGRP_IPV4_MROUTE | RTMGRP_IPV6_ROUTE | RTMGRP_IPV6_MROUTE;
    let mut messages = subscribe(groups)?;
    info!("netlink route interface enabled");
    while let Some((message, _addr)) = messages.next().await {
        if let Some(event) = route_event(message) {
            table.process_event(event);
        }
    }
    Ok(())
}

fn subscribe(
    groups: u32,
) -> io::Result<impl Stream<Item = (NetlinkMessage<RouteNetlinkMessage>, SocketAddr)>> {
    let (mut connection, _handle, messages) = rtnetlink::new_connection()?;
    connection
        .socket_mut()
        .socket_mut()
        .bind(&SocketAddr::new(0, groups))?;
    tokio::spawn(connection);
    Ok(messages)
}

fn neighbor_event(message: NetlinkMessage<RouteNetlinkMessage>) -> Option<Event> {
    match message.payload {
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewNeighbour(neigh)) => {
            parse_neighbour(neigh).map(Event::Host)
        }
        // Withdrawals are left alone; a later event overwrites the entry.
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelNeighbour(_)) => None,
        _ => None,
    }
}

pub(crate) fn route_event(message: NetlinkMessage<RouteNetlinkMessage>) -> Option<Event> {
    match message.payload {
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewRoute(route)) => {
            parse_route(RouteOp::Add, route).map(Event::Route)
        }
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelRoute(route)) => {
            parse_route(RouteOp::Delete, route).map(Event::Route)
        }
        _ => None,
    }
}

/// Translate a kernel neighbor announcement. Entries with no usable
/// destination are dropped; a missing link-layer address is passed through
/// as `MacAddress::NONE` for the table to reject.
pub fn parse_neighbour(message: NeighbourMessage) -> Option<HostUpdate> {
    let ifindex = message.header.ifindex;
    let mut address: Option<IpAddr> = None;
    let mut lladdr = MacAddress::NONE;

    for attr in message.attributes {
        match attr {
            NeighbourAttribute::Destination(dst) => {
                address = neighbour_address(dst);
                if address.is_none() {
                    warn!("blank neighbor address, dropping host entry");
                    return None;
                }
            }
            NeighbourAttribute::LinkLocalAddress(bytes) => {
                match MacAddress::try_from(bytes.as_slice()) {
                    Ok(mac) => lladdr = mac,
                    Err(err) => {
                        warn!("unusable link-layer address, dropping host entry: {}", err);
                        return None;
                    }
                }
            }
            _ => {}
        }
    }

    let address = address?;
    Some(HostUpdate {
        ifindex,
        address,
        lladdr,
    })
}

/// Translate a main-table unicast route change. Non-main tables are dropped
/// silently; multipath routes contribute only their first next-hop.
pub fn parse_route(op: RouteOp, message: RouteMessage) -> Option<RouteUpdate> {
    if message.header.table != RouteHeader::RT_TABLE_MAIN {
        return None;
    }

    let family = match message.header.address_family {
        AddressFamily::Inet => Family::Ipv4,
        AddressFamily::Inet6 => Family::Ipv6,
        other => {
            debug!("unrecognised route family {:?}, dropping", other);
            return None;
        }
    };
    let prefix_len = message.header.destination_prefix_length;

    let mut destination: Option<IpAddr> = None;
    let mut gateway: Option<IpAddr> = None;
    let mut ifindex: Option<u32> = None;

    for attr in message.attributes {
        match attr {
            RouteAttribute::Destination(dst) => {
                destination = route_address(dst);
                if destination.is_none() {
                    warn!("blank route destination, dropping");
                    return None;
                }
            }
            RouteAttribute::Gateway(gw) => {
                gateway = route_address(gw);
                if gateway.is_none() {
                    warn!("blank route gateway, dropping");
                    return None;
                }
            }
            RouteAttribute::Oif(index) => ifindex = Some(index),
            RouteAttribute::MultiPath(hops) => {
                if let Some(hop) = hops.into_iter().next() {
                    ifindex = Some(hop.interface_index);
                    for nested in hop.attributes {
                        if let RouteAttribute::Gateway(gw) = nested {
                            gateway = route_address(gw);
                            break;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let destination = destination.unwrap_or_else(|| family.zero());
    let gateway = match gateway {
        Some(gateway) => gateway,
        None => {
            // Directly connected; there is no gateway to resolve.
            debug!("route without gateway, dropping");
            return None;
        }
    };
    let ifindex = match ifindex {
        Some(ifindex) => ifindex,
        None => {
            warn!("route without output interface, dropping");
            return None;
        }
    };

    Some(RouteUpdate {
        op,
        destination,
        prefix_len,
        gateway,
        ifindex,
    })
}

fn neighbour_address(addr: NeighbourAddress) -> Option<IpAddr> {
    match addr {
        NeighbourAddress::Inet(v4) => Some(IpAddr::V4(v4)),
        NeighbourAddress::Inet6(v6) => Some(IpAddr::V6(v6)),
        _ => None,
    }
}

fn route_address(addr: RouteAddress) -> Option<IpAddr> {
    match addr {
        RouteAddress::Inet(v4) => Some(IpAddr::V4(v4)),
        RouteAddress::Inet6(v6) => Some(IpAddr::V6(v6)),
        _ => None,
    }
}
