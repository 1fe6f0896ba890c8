use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::addresses::MacAddress;
use crate::interfaces::Interface;

/// A resolved neighbor: where to rewrite Ethernet when forwarding toward
/// this IP. Overwritten wholesale by each neighbor event, never deleted.
#[derive(Debug, Clone)]
pub struct HostEntry {
    pub address: IpAddr,
    pub hw_address: MacAddress,
    pub interface: Interface,
    learned_at: DateTime<Utc>,
}

impl HostEntry {
    pub fn new(address: IpAddr, hw_address: MacAddress, interface: Interface) -> Self {
        HostEntry {
            address,
            hw_address,
            interface,
            learned_at: Utc::now(),
        }
    }
}

impl fmt::Display for HostEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let age = Utc::now()
            .signed_duration_since(self.learned_at)
            .num_seconds();
        write!(
            f,
            "<HostEntry {} {} dev {} age={}s>",
            self.address, self.hw_address, self.interface.name, age
        )
    }
}

/// Neighbor map keyed by canonical IP string, shared across tasks. The lock
/// spans single map operations only; it is never held across an emission or
/// a sleep.
#[derive(Clone, Default)]
pub struct HostTable {
    inner: Arc<Mutex<HashMap<String, HostEntry>>>,
}

impl HostTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: HostEntry) {
        let key = entry.address.to_string();
        self.inner.lock().unwrap().insert(key, entry);
    }

    pub fn get(&self, address: &IpAddr) -> Option<HostEntry> {
        self.inner.lock().unwrap().get(&address.to_string()).cloned()
    }

    /// MAC for the host, `MacAddress::NONE` when unresolved. No discovery is
    /// performed here.
    pub fn mac_for(&self, address: &IpAddr) -> MacAddress {
        self.inner
            .lock()
            .unwrap()
            .get(&address.to_string())
            .map(|entry| entry.hw_address)
            .unwrap_or(MacAddress::NONE)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
