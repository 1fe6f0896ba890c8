use std::io;

use byteorder::{ByteOrder, NetworkEndian};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use super::IpcMessage;

/// Upper bound on a single frame, so a corrupt peer cannot run us out of
/// memory.
const MAX_FRAME: usize = 1 << 20;

/// One routed message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub to: String,
    pub message: IpcMessage,
}

/// Length-prefixed JSON frames: a u32 payload length, then the payload.
#[derive(Debug, Default)]
pub struct IpcCodec;

impl Decoder for IpcCodec {
    type Item = Envelope;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Envelope>, io::Error> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let length = NetworkEndian::read_u32(&buf[..4]) as usize;
        if length > MAX_FRAME {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "oversized IPC frame",
            ));
        }
        if buf.len() < 4 + length {
            return Ok(None);
        }
        buf.advance(4);
        let payload = buf.split_to(length);
        let envelope = serde_json::from_slice(&payload)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(Some(envelope))
    }
}

impl Encoder<Envelope> for IpcCodec {
    type Error = io::Error;

    fn encode(&mut self, envelope: Envelope, buf: &mut BytesMut) -> Result<(), io::Error> {
        let payload = serde_json::to_vec(&envelope)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        buf.reserve(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::PortRegister;

    fn test_envelope() -> Envelope {
        Envelope {
            channel: "client-server".to_string(),
            to: "controller".to_string(),
            message: IpcMessage::PortRegister(PortRegister {
                id: 0xaabb,
                port: 2,
                hw_address: "aa:bb:cc:dd:ee:ff".parse().unwrap(),
            }),
        }
    }

    #[test]
    fn test_roundtrip() {
        let mut codec = IpcCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(test_envelope(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, test_envelope());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = IpcCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(test_envelope(), &mut buf).unwrap();
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        // Remainder arrives, frame completes
        partial.unsplit(buf);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = IpcCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);
        assert!(codec.decode(&mut buf).is_err());
    }
}
