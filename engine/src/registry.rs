//! Read-only seams to the external collaborators: the device registry, the
//! hostname cache, and the ARP cache. The core never writes through these.
//!
//! The in-memory implementations back the standalone daemon (seeded from the
//! config file) and the tests; a deployment embedding the engine provides its
//! own.

use dashmap::DashMap;
use std::net::IpAddr;

use crate::config::DeviceEntry;

/// Read-only view of the external device registry.
pub trait DeviceRegistry: Send + Sync {
    /// Operator-entered product name for a MAC, if the device is known.
    fn product_name(&self, mac: &str) -> Option<String>;

    /// All registered device MAC addresses.
    fn mac_addresses(&self) -> Vec<String>;

    /// Whether the operator marked the device idle (training capture mode).
    fn is_idle(&self, mac: &str) -> bool;

    /// Operator annotation labels recorded into BFV tails: (state, event).
    fn annotation(&self, mac: &str) -> (String, String);
}

/// Hostname-by-IP resolution, fed externally by DNS/SNI snooping.
pub trait HostnameResolver: Send + Sync {
    fn hostname(&self, ip: &IpAddr) -> Option<String>;
}

/// IP → MAC resolution for rewriting the observer host's address.
pub trait ArpCache: Send + Sync {
    fn mac_for_ip(&self, ip: &IpAddr) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
struct DeviceInfo {
    product_name: Option<String>,
    idle: bool,
    state: String,
    event: String,
}

/// In-memory device registry keyed by lowercase MAC.
#[derive(Default)]
pub struct MemoryRegistry {
    devices: DashMap<String, DeviceInfo>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry from config `[[devices]]` entries.
    pub fn from_entries(entries: &[DeviceEntry]) -> Self {
        let registry = Self::new();
        for entry in entries {
            registry.devices.insert(
                entry.mac.to_lowercase(),
                DeviceInfo {
                    product_name: Some(entry.name.clone()),
                    idle: entry.idle,
                    state: entry.state.clone(),
                    event: entry.event.clone(),
                },
            );
        }
        registry
    }

    pub fn insert(&self, mac: &str, product_name: &str) {
        self.devices.insert(
            mac.to_lowercase(),
            DeviceInfo {
                product_name: Some(product_name.to_string()),
                ..Default::default()
            },
        );
    }

    pub fn set_idle(&self, mac: &str, idle: bool) {
        self.devices
            .entry(mac.to_lowercase())
            .or_default()
            .idle = idle;
    }

    pub fn set_annotation(&self, mac: &str, state: &str, event: &str) {
        let mut info = self.devices.entry(mac.to_lowercase()).or_default();
        info.state = state.to_string();
        info.event = event.to_string();
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn product_name(&self, mac: &str) -> Option<String> {
        self.devices
            .get(&mac.to_lowercase())
            .and_then(|info| info.product_name.clone())
    }

    fn mac_addresses(&self) -> Vec<String> {
        let mut macs: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        macs.sort_unstable();
        macs
    }

    fn is_idle(&self, mac: &str) -> bool {
        self.devices
            .get(&mac.to_lowercase())
            .map(|info| info.idle)
            .unwrap_or(false)
    }

    fn annotation(&self, mac: &str) -> (String, String) {
        self.devices
            .get(&mac.to_lowercase())
            .map(|info| (info.state.clone(), info.event.clone()))
            .unwrap_or_default()
    }
}

/// In-memory IP → hostname cache.
#[derive(Default)]
pub struct MemoryHostnames {
    entries: DashMap<IpAddr, String>,
}

impl MemoryHostnames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ip: IpAddr, hostname: &str) {
        self.entries.insert(ip, hostname.to_string());
    }
}

impl HostnameResolver for MemoryHostnames {
    fn hostname(&self, ip: &IpAddr) -> Option<String> {
        self.entries.get(ip).map(|h| h.clone())
    }
}

/// In-memory IP → MAC cache.
#[derive(Default)]
pub struct MemoryArpCache {
    entries: DashMap<IpAddr, String>,
}

impl MemoryArpCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ip: IpAddr, mac: &str) {
        self.entries.insert(ip, mac.to_lowercase());
    }
}

impl ArpCache for MemoryArpCache {
    fn mac_for_ip(&self, ip: &IpAddr) -> Option<String> {
        self.entries.get(ip).map(|m| m.clone())
    }
}
