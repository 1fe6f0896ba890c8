use std::error;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use log::info;

use super::hosts::{HostEntry, HostTable};
use super::pending::RouteEntry;
use crate::addresses::{full_mask, AddressError, Family, MacAddress};
use crate::flowmod::{Action, RouteMod, RouteModType};
use crate::interfaces::InterfaceMap;
use crate::ipc::{IpcError, IpcMessage, MessageSender, CLIENT_SERVER_CHANNEL, CONTROLLER_ID};

#[derive(Debug)]
pub enum EmitError {
    /// The gateway's MAC is not in the host table yet.
    Unresolved(IpAddr),
    InactivePort(String),
    UnknownInterface(String),
    UnhandledType(RouteModType),
    Address(AddressError),
    Ipc(IpcError),
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use EmitError::*;
        match self {
            Unresolved(gateway) => write!(f, "cannot resolve {}", gateway),
            InactivePort(name) => write!(f, "cannot send RouteMod for down port {}", name),
            UnknownInterface(name) => write!(f, "interface {} not in registry", name),
            UnhandledType(mod_type) => write!(f, "unhandled RouteMod type {}", mod_type),
            Address(err) => write!(f, "{}", err),
            Ipc(err) => write!(f, "{}", err),
        }
    }
}

impl error::Error for EmitError {}

/// Builds flow modifications and hands them to the IPC transport. Holds only
/// the interface-lookup and IPC-send capabilities plus a read handle on the
/// host table; interface state is re-read at emission time so a port that
/// went down since the event is still refused.
#[derive(Clone)]
pub struct Emitter {
    agent_id: u64,
    interfaces: InterfaceMap,
    hosts: HostTable,
    ipc: Arc<dyn MessageSender>,
}

impl Emitter {
    pub fn new(
        agent_id: u64,
        interfaces: InterfaceMap,
        hosts: HostTable,
        ipc: Arc<dyn MessageSender>,
    ) -> Self {
        Emitter {
            agent_id,
            interfaces,
            hosts,
            ipc,
        }
    }

    pub fn agent_id(&self) -> u64 {
        self.agent_id
    }

    /// Host form: a /32 or /128 rule rewriting straight to the host's own
    /// MAC.
    pub fn send_host(&self, mod_type: RouteModType, entry: &HostEntry) -> Result<(), EmitError> {
        let mask = full_mask(Family::of(&entry.address));
        self.send(
            mod_type,
            entry.address,
            mask,
            &entry.interface.name,
            entry.hw_address,
        )
    }

    /// Route form: adds resolve the gateway MAC from the host table and fail
    /// if it is unknown; deletes go out with no Ethernet rewrite.
    pub fn send_route(&self, mod_type: RouteModType, entry: &RouteEntry) -> Result<(), EmitError> {
        match mod_type {
            RouteModType::Delete => self.send(
                mod_type,
                entry.address,
                entry.netmask,
                &entry.interface.name,
                MacAddress::NONE,
            ),
            RouteModType::Add => {
                let remote_mac = self.hosts.mac_for(&entry.gateway);
                if remote_mac.is_none() {
                    info!("cannot resolve {}", entry.gateway);
                    return Err(EmitError::Unresolved(entry.gateway));
                }
                self.send(
                    mod_type,
                    entry.address,
                    entry.netmask,
                    &entry.interface.name,
                    remote_mac,
                )
            }
            other => Err(EmitError::UnhandledType(other)),
        }
    }

    fn send(
        &self,
        mod_type: RouteModType,
        address: IpAddr,
        mask: IpAddr,
        ifname: &str,
        gateway_mac: MacAddress,
    ) -> Result<(), EmitError> {
        let iface = self
            .interfaces
            .find(ifname)
            .ok_or_else(|| EmitError::UnknownInterface(ifname.to_string()))?;
        if !iface.active {
            info!("cannot send RouteMod for down port {}", iface.name);
            return Err(EmitError::InactivePort(iface.name));
        }

        let mut rm = RouteMod::new(mod_type, self.agent_id);
        rm.set_ethernet(iface.hw_address, gateway_mac);
        rm.set_ip(address, mask).map_err(EmitError::Address)?;
        // The controller needs the port even on deletes, to pick the
        // datapath the rule lives on.
        rm.add_action(Action::Output(iface.port));

        info!(
            "sending {} for {}/{} via {} on port {}",
            rm, address, mask, gateway_mac, iface.port
        );
        self.submit(rm).map_err(EmitError::Ipc)
    }

    /// Hand a finished flow-mod to the transport.
    pub(crate) fn submit(&self, rm: RouteMod) -> Result<(), IpcError> {
        self.ipc
            .send(CLIENT_SERVER_CHANNEL, CONTROLLER_ID, IpcMessage::RouteMod(rm))
    }
}
