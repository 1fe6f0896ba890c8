use std::net::SocketAddr;

use crate::events::RouteSource;

/// Default controller IPC endpoint.
pub const DEFAULT_CONTROLLER: &str = "127.0.0.1:6999";
/// Interface whose MAC seeds the agent id when none is given. Also the one
/// interface never exposed to the controller as a datapath port.
pub const DEFAULT_CONTROL_INTERFACE: &str = "eth0";

/// Runtime settings assembled from the command line.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Stable 64-bit identity carried in every message to the controller.
    pub id: u64,
    pub controller: SocketAddr,
    pub source: RouteSource,
    pub control_interface: String,
    /// Where the streaming route feed listens when `source` is `Fpm`.
    pub fpm_listen: SocketAddr,
}
