//! Shared pipeline context: queues, flags, caches, collaborator handles, and
//! the observable outputs. One explicit struct passed to every worker — the
//! only cross-stage state in the system.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::TtlCache;
use crate::config::AppConfig;
use crate::features::{Bfv, Sbfv};
use crate::model::ModelStore;
use crate::packet::{LocalNets, PacketRecord};
use crate::queue::BoundedQueue;
use crate::registry::{ArpCache, DeviceRegistry, HostnameResolver};

/// Per-device event emissions: `(burst start_time, event name)` in arrival
/// order. The observable output of the whole pipeline.
pub type EventLog = DashMap<String, Vec<(f64, String)>>;

pub struct PipelineContext {
    pub config: AppConfig,
    pub local: LocalNets,

    pub packet_queue: BoundedQueue<PacketRecord>,
    pub burst_queue: BoundedQueue<Bfv>,
    pub ss_burst_queue: BoundedQueue<Sbfv>,
    pub filtered_burst_queue: BoundedQueue<Sbfv>,
    pub idle_burst_queue: BoundedQueue<Bfv>,

    pub registry: Arc<dyn DeviceRegistry>,
    pub hostnames: Arc<dyn HostnameResolver>,
    pub arp: Arc<dyn ArpCache>,

    pub models: ModelStore,

    /// Observable event output, per device MAC.
    pub events: EventLog,

    /// Latest flow-statistics snapshot, swapped in by the assembler's flush.
    pub flow_stats: DashMap<crate::burst::FlowStatKey, crate::burst::FlowStats>,

    product_names: TtlCache<String, Option<String>>,
    device_macs: TtlCache<(), Arc<HashSet<String>>>,

    is_running: AtomicBool,
    is_inspecting: AtomicBool,
}

impl PipelineContext {
    pub fn new(
        config: AppConfig,
        registry: Arc<dyn DeviceRegistry>,
        hostnames: Arc<dyn HostnameResolver>,
        arp: Arc<dyn ArpCache>,
    ) -> Arc<Self> {
        let capacity = config.queue_capacity;
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        let local = LocalNets::from_config(&config);
        let models = ModelStore::new(&config);

        Arc::new(Self {
            local,
            packet_queue: BoundedQueue::new("packet_queue", capacity),
            burst_queue: BoundedQueue::new("burst_queue", capacity),
            ss_burst_queue: BoundedQueue::new("ss_burst_queue", capacity),
            filtered_burst_queue: BoundedQueue::new("filtered_burst_queue", capacity),
            idle_burst_queue: BoundedQueue::new("idle_burst_queue", capacity),
            registry,
            hostnames,
            arp,
            models,
            events: DashMap::new(),
            flow_stats: DashMap::new(),
            product_names: TtlCache::new(ttl, config.cache_capacity),
            device_macs: TtlCache::new(ttl, 1),
            is_running: AtomicBool::new(true),
            is_inspecting: AtomicBool::new(true),
            config,
        })
    }

    // -- flags --------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Break every worker loop at its next dequeue timeout.
    pub fn shutdown(&self) {
        self.is_running.store(false, Ordering::Relaxed);
    }

    pub fn is_inspecting(&self) -> bool {
        self.is_inspecting.load(Ordering::Relaxed)
    }

    /// Operator-visible pause: enqueues are silently dropped while false.
    pub fn set_inspecting(&self, inspecting: bool) {
        self.is_inspecting.store(inspecting, Ordering::Relaxed);
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.config.dequeue_timeout_millis)
    }

    // -- cached registry reads ----------------------------------------------

    /// Product name by MAC through the TTL cache. An unknown device logs one
    /// informational line per TTL window (inside the loader).
    pub fn product_name(&self, mac: &str) -> Option<String> {
        let registry = &self.registry;
        self.product_names.get_with(mac.to_string(), || {
            let name = registry.product_name(mac);
            if name.is_none() {
                info!(mac, "Unknown device");
            }
            name
        })
    }

    /// The registered device MAC set, TTL-cached.
    pub fn device_macs(&self) -> Arc<HashSet<String>> {
        let registry = &self.registry;
        self.device_macs.get_with((), || {
            Arc::new(registry.mac_addresses().into_iter().collect())
        })
    }

    /// Append one event emission for a device.
    pub fn push_event(&self, mac: &str, ts: f64, event: &str) {
        self.events
            .entry(mac.to_string())
            .or_default()
            .push((ts, event.to_string()));
    }
}

/// Context over empty in-memory collaborators, for unit tests.
#[cfg(test)]
pub(crate) fn test_context(
    config: AppConfig,
) -> (
    Arc<PipelineContext>,
    Arc<crate::registry::MemoryRegistry>,
) {
    use crate::registry::{MemoryArpCache, MemoryHostnames, MemoryRegistry};
    let registry = Arc::new(MemoryRegistry::new());
    let ctx = PipelineContext::new(
        config,
        registry.clone(),
        Arc::new(MemoryHostnames::new()),
        Arc::new(MemoryArpCache::new()),
    );
    (ctx, registry)
}
