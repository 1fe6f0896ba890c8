use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use byteorder::{ByteOrder, NetworkEndian};
use log::{debug, info, warn};
use netlink_packet_core::NetlinkMessage;
use netlink_packet_route::RouteNetlinkMessage;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use crate::mpls::{LabelOp, NhlfeMessage, NhlfeOp};
use crate::netlink::route_event;
use crate::table::FlowTable;

/// Default TCP port of the streaming route feed.
pub const FPM_PORT: u16 = 2620;

const FPM_VERSION: u8 = 1;
const FPM_MSG_NETLINK: u8 = 1;
const FPM_MSG_LABEL: u8 = 2;
const FPM_HEADER_LEN: usize = 4;
const LABEL_OP_LEN: usize = 28;

/// Accept routing-daemon connections and replay their route stream into the
/// flow table. One peer at a time; the daemon reconnects after restarts.
pub async fn serve(listen: SocketAddr, table: Arc<FlowTable>) -> io::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!("streaming route feed enabled on {}", listen);
    loop {
        let (stream, peer) = listener.accept().await?;
        info!("route feed connected from {}", peer);
        if let Err(err) = serve_stream(stream, &table).await {
            warn!("route feed from {} ended: {}", peer, err);
        }
    }
}

/// Frames are `{version, type, length}` headers followed by a payload; the
/// length covers the header itself.
async fn serve_stream(mut stream: TcpStream, table: &Arc<FlowTable>) -> io::Result<()> {
    let mut header = [0u8; FPM_HEADER_LEN];
    loop {
        stream.read_exact(&mut header).await?;
        let version = header[0];
        let msg_type = header[1];
        let total = NetworkEndian::read_u16(&header[2..4]) as usize;
        if version != FPM_VERSION || total < FPM_HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad route feed header",
            ));
        }

        let mut payload = vec![0u8; total - FPM_HEADER_LEN];
        stream.read_exact(&mut payload).await?;

        match msg_type {
            FPM_MSG_NETLINK => process_netlink(&payload, table),
            FPM_MSG_LABEL => match parse_label_op(&payload) {
                Some(msg) => table.update_nhlfe(msg),
                None => warn!("malformed label operation, dropping"),
            },
            other => debug!("unrecognised route feed message type {}, dropping", other),
        }
    }
}

fn process_netlink(payload: &[u8], table: &Arc<FlowTable>) {
    match NetlinkMessage::<RouteNetlinkMessage>::deserialize(payload) {
        Ok(message) => {
            if let Some(event) = route_event(message) {
                table.process_event(event);
            }
        }
        Err(err) => warn!("undecodable netlink payload in route feed: {}", err),
    }
}

/// Fixed-layout label operation: ip version, table op, LSP op, a reserved
/// byte, in/out labels in network order, then 16 bytes of next-hop address
/// (the first 4 carry an IPv4 address).
fn parse_label_op(payload: &[u8]) -> Option<NhlfeMessage> {
    if payload.len() < LABEL_OP_LEN {
        return None;
    }
    let op = match payload[1] {
        0 => NhlfeOp::Add,
        1 => NhlfeOp::Remove,
        other => {
            warn!("unrecognised label table operation {}", other);
            return None;
        }
    };
    let operation = match payload[2] {
        0 => LabelOp::Push,
        1 => LabelOp::Pop,
        2 => LabelOp::Swap,
        other => {
            warn!("unknown LSP operation {}", other);
            return None;
        }
    };
    let in_label = NetworkEndian::read_u32(&payload[4..8]);
    let out_label = NetworkEndian::read_u32(&payload[8..12]);
    let next_hop = match payload[0] {
        4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&payload[12..16]);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&payload[12..28]);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => {
            warn!("unrecognised label next-hop family {}", other);
            return None;
        }
    };
    Some(NhlfeMessage {
        op,
        operation,
        in_label,
        out_label,
        next_hop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label_payload(version: u8, table_op: u8, lsp_op: u8) -> Vec<u8> {
        let mut payload = vec![0u8; LABEL_OP_LEN];
        payload[0] = version;
        payload[1] = table_op;
        payload[2] = lsp_op;
        NetworkEndian::write_u32(&mut payload[4..8], 100);
        NetworkEndian::write_u32(&mut payload[8..12], 200);
        payload[12..16].copy_from_slice(&[10, 0, 0, 1]);
        payload
    }

    #[test]
    fn test_parse_label_op_swap() {
        let msg = parse_label_op(&label_payload(4, 0, 2)).unwrap();
        assert_eq!(msg.op, NhlfeOp::Add);
        assert_eq!(msg.operation, LabelOp::Swap);
        assert_eq!(msg.in_label, 100);
        assert_eq!(msg.out_label, 200);
        assert_eq!(msg.next_hop.to_string(), "10.0.0.1");
    }

    #[test]
    fn test_parse_label_op_remove_pop() {
        let msg = parse_label_op(&label_payload(4, 1, 1)).unwrap();
        assert_eq!(msg.op, NhlfeOp::Remove);
        assert_eq!(msg.operation, LabelOp::Pop);
    }

    #[test]
    fn test_parse_label_op_rejects_garbage() {
        // Truncated
        assert!(parse_label_op(&[0u8; 8]).is_none());
        // Unknown table operation
        assert!(parse_label_op(&label_payload(4, 9, 0)).is_none());
        // Unknown LSP operation
        assert!(parse_label_op(&label_payload(4, 0, 9)).is_none());
        // Unknown address family
        assert!(parse_label_op(&label_payload(5, 0, 0)).is_none());
    }

    #[test]
    fn test_parse_label_op_v6_next_hop() {
        let mut payload = label_payload(6, 0, 0);
        payload[12..28].copy_from_slice(&[
            0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
        ]);
        let msg = parse_label_op(&payload).unwrap();
        assert_eq!(msg.next_hop.to_string(), "2001:db8::1");
    }
}
