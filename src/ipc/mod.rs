mod client;
mod codec;

pub use client::{IpcClient, IpcSender};
pub use codec::{Envelope, IpcCodec};

use std::error;
use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use crate::addresses::MacAddress;
use crate::flowmod::RouteMod;

/// Channel shared by every agent and the controller.
pub const CLIENT_SERVER_CHANNEL: &str = "client-server";
/// Well-known identity of the controller on that channel.
pub const CONTROLLER_ID: &str = "controller";

/// Announces one logical port (and its MAC) to the controller at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRegister {
    pub id: u64,
    pub port: u32,
    pub hw_address: MacAddress,
}

/// Controller-originated result of a port-mapping attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    pub id: u64,
    pub vm_port: u32,
    pub operation_id: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PortConfigOperation {
    MapRequest,
    Reset,
    MapSuccess,
    Unknown(u32),
}

impl From<u32> for PortConfigOperation {
    fn from(operation_id: u32) -> Self {
        match operation_id {
            0 => PortConfigOperation::MapRequest,
            1 => PortConfigOperation::Reset,
            2 => PortConfigOperation::MapSuccess,
            other => PortConfigOperation::Unknown(other),
        }
    }
}

impl PortConfig {
    pub fn operation(&self) -> PortConfigOperation {
        PortConfigOperation::from(self.operation_id)
    }
}

/// Typed messages on the client-server channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcMessage {
    PortRegister(PortRegister),
    RouteMod(RouteMod),
    PortConfig(PortConfig),
}

impl IpcMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            IpcMessage::PortRegister(_) => "PortRegister",
            IpcMessage::RouteMod(_) => "RouteMod",
            IpcMessage::PortConfig(_) => "PortConfig",
        }
    }
}

/// Fire-and-forget submission toward the bus. This is the only capability
/// the emitters hold; a successful submit is treated as success.
pub trait MessageSender: Send + Sync {
    fn send(&self, channel: &str, to: &str, message: IpcMessage) -> Result<(), IpcError>;
}

#[derive(Debug)]
pub enum IpcError {
    /// The transport's outbound queue is gone (writer task ended).
    ChannelClosed,
    Transport(String),
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("IPC Error: ")?;
        match self {
            IpcError::ChannelClosed => write!(f, "outbound channel closed"),
            IpcError::Transport(reason) => write!(f, "transport error [{}]", reason),
        }
    }
}

impl From<io::Error> for IpcError {
    fn from(error: io::Error) -> Self {
        IpcError::Transport(error.to_string())
    }
}

impl error::Error for IpcError {}
