use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use log::{debug, error, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use super::codec::{Envelope, IpcCodec};
use super::{IpcError, IpcMessage, MessageSender};

/// Handle for submitting messages to the bus; cheap to clone into every
/// task. Submissions are queued and written by a dedicated task, so `send`
/// never blocks the caller.
#[derive(Clone)]
pub struct IpcSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl MessageSender for IpcSender {
    fn send(&self, channel: &str, to: &str, message: IpcMessage) -> Result<(), IpcError> {
        let envelope = Envelope {
            channel: channel.to_string(),
            to: to.to_string(),
            message,
        };
        self.tx.send(envelope).map_err(|_| IpcError::ChannelClosed)
    }
}

pub struct IpcClient;

impl IpcClient {
    /// Connect to the bus endpoint. Returns the submission handle plus the
    /// stream of inbound messages addressed to `id`.
    pub async fn connect(
        addr: SocketAddr,
        id: String,
    ) -> Result<(IpcSender, mpsc::UnboundedReceiver<IpcMessage>), IpcError> {
        let stream = TcpStream::connect(addr).await?;
        let framed = Framed::new(stream, IpcCodec::default());
        let (mut sink, mut source) = framed.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                if let Err(err) = sink.send(envelope).await {
                    error!("IPC send failed: {}", err);
                    break;
                }
            }
            debug!("IPC writer finished");
        });

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(envelope) => {
                        if envelope.to != id {
                            debug!("ignoring message addressed to {}", envelope.to);
                            continue;
                        }
                        if in_tx.send(envelope.message).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!("IPC decode error: {}", err);
                        break;
                    }
                }
            }
            debug!("IPC reader finished");
        });

        Ok((IpcSender { tx: out_tx }, in_rx))
    }
}
