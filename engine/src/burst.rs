//! Burst assembler: groups packets by direction-normalized flow key into
//! fixed-window bursts and emits one BFV per sealed burst.
//!
//! This is the only stage with per-flow mutable state; one assembler task
//! owns the maps. It never blocks on downstream backpressure — the bounded
//! queues drop their oldest entry instead.
//!
//! A supplementary per-flow statistics accumulator rides along: every
//! accepted packet updates a 7-tuple keyed `{start_ts, end_ts, bytes,
//! packets}` record, flushed to the shared snapshot on a fixed interval.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::features::{
    compute_features, hosts_label, protocol_label, Bfv, BurstPacket, Tail,
};
use crate::normalize::fold_ec2_host;
use crate::packet::{is_valid_ip, orient, FlowKey, PacketRecord, Transport, BROADCAST_MAC};
use crate::state::PipelineContext;

/// Key of the supplementary flow statistics accumulator, in capture
/// orientation (not direction-normalized).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowStatKey {
    pub src_mac: String,
    pub dst_mac: String,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: &'static str,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FlowStats {
    pub start_ts: f64,
    pub end_ts: f64,
    pub byte_count: u64,
    pub packet_count: u64,
}

/// An open (unsealed) burst.
struct OpenBurst {
    packets: Vec<BurstPacket>,
    tags: BTreeSet<String>,
    peer_mac: String,
}

impl OpenBurst {
    fn new(peer_mac: String) -> Self {
        Self {
            packets: Vec::new(),
            tags: BTreeSet::new(),
            peer_mac,
        }
    }
}

pub struct BurstAssembler {
    ctx: Arc<PipelineContext>,
    /// Open-burst clock per flow.
    start_ts: HashMap<FlowKey, f64>,
    /// Open-burst packet buffers, keyed by (flow, burst start time).
    buffers: HashMap<(FlowKey, u64), OpenBurst>,
    flows: HashMap<FlowStatKey, FlowStats>,
    last_flow_flush: Instant,
    last_packet_wall: Instant,
}

impl BurstAssembler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            start_ts: HashMap::new(),
            buffers: HashMap::new(),
            flows: HashMap::new(),
            last_flow_flush: Instant::now(),
            last_packet_wall: Instant::now(),
        }
    }

    /// Accept one packet: update an open burst, seal and emit bursts, or
    /// discard it.
    pub fn on_packet(&mut self, pkt: PacketRecord) -> Result<(), PipelineError> {
        self.maybe_flush_flows();
        self.last_packet_wall = Instant::now();

        let Some(transport) = Transport::from_protocol_number(pkt.transport) else {
            return Ok(());
        };

        if pkt.dst_mac.eq_ignore_ascii_case(BROADCAST_MAC)
            || pkt.dst_ip == IpAddr::from([255, 255, 255, 255])
        {
            return Ok(());
        }
        if Self::is_link_local(&pkt.dst_ip) {
            return Ok(());
        }
        if !is_valid_ip(&pkt.src_ip) || !is_valid_ip(&pkt.dst_ip) {
            return Err(PipelineError::MalformedPacket(format!(
                "invalid addresses {} -> {}",
                pkt.src_ip, pkt.dst_ip
            )));
        }

        // The observer host sits in the middle of every monitored flow;
        // swap its MAC for the real one and ignore traffic it did not relay.
        let mut pkt = pkt;
        let observer = self.ctx.config.observer_mac.clone();
        if !observer.is_empty() {
            if pkt.src_mac.eq_ignore_ascii_case(&observer) {
                pkt.src_mac = self.ctx.arp.mac_for_ip(&pkt.src_ip).unwrap_or_default();
            } else if pkt.dst_mac.eq_ignore_ascii_case(&observer) {
                pkt.dst_mac = self.ctx.arp.mac_for_ip(&pkt.dst_ip).unwrap_or_default();
            } else {
                return Ok(());
            }
        }

        self.update_flow_stats(&pkt, transport);

        let Some(oriented) = orient(&pkt, transport, &self.ctx.local) else {
            debug!(src = %pkt.src_ip, dst = %pkt.dst_ip, "No device side, skipping packet");
            return Ok(());
        };

        let local = self.ctx.local.is_private(&pkt.src_ip) && self.ctx.local.is_private(&pkt.dst_ip);
        let peer_host = if oriented.outbound {
            pkt.dst_host.clone()
        } else {
            pkt.src_host.clone()
        };
        let burst_packet = BurstPacket {
            ts: pkt.ts,
            frame_len: pkt.frame_len as f64,
            outbound: oriented.outbound,
            local,
            peer_host,
        };

        let t_now = pkt.ts;
        let window = self.ctx.config.burst_window_secs;

        // 1. A packet past the window seals the flow's open burst and
        //    restarts its clock.
        let existing = self.start_ts.get(&oriented.key).copied();
        let t0 = match existing {
            Some(t0) if t_now - t0 > window => {
                self.seal(&oriented.key, t0);
                self.start_ts.insert(oriented.key.clone(), t_now);
                t_now
            }
            Some(t0) => t0,
            None => {
                self.start_ts.insert(oriented.key.clone(), t_now);
                t_now
            }
        };

        // 2. Append the packet to its buffer.
        let open = self
            .buffers
            .entry((oriented.key.clone(), t0.to_bits()))
            .or_insert_with(|| OpenBurst::new(oriented.peer_mac.clone()));
        open.packets.push(burst_packet);
        if !pkt.highest_proto.is_empty() {
            open.tags.insert(pkt.highest_proto.clone());
        }

        // 3. Sweep every open buffer past its window.
        self.sweep(t_now);

        Ok(())
    }

    /// Idle tick from the worker loop: flush flow statistics and, once the
    /// stream has paused past the window, seal everything still open.
    pub fn on_idle(&mut self) {
        self.maybe_flush_flows();
        if self.buffers.is_empty() {
            return;
        }
        if self.last_packet_wall.elapsed().as_secs_f64() > self.ctx.config.burst_window_secs {
            let open: Vec<(FlowKey, f64)> = self.start_ts.drain().collect();
            for (key, t0) in open {
                self.seal(&key, t0);
            }
            self.buffers.clear();
        }
    }

    /// Open bursts currently tracked (tests and introspection).
    pub fn open_bursts(&self) -> usize {
        self.buffers.len()
    }

    fn is_link_local(ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => v4.is_link_local(),
            IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
        }
    }

    fn sweep(&mut self, t_now: f64) {
        let window = self.ctx.config.burst_window_secs;
        let expired: Vec<(FlowKey, f64)> = self
            .start_ts
            .iter()
            .filter(|(_, &t0)| t_now - t0 > window)
            .map(|(key, &t0)| (key.clone(), t0))
            .collect();
        for (key, t0) in expired {
            self.seal(&key, t0);
            self.start_ts.remove(&key);
        }
    }

    fn seal(&mut self, key: &FlowKey, t0: f64) {
        let Some(open) = self.buffers.remove(&(key.clone(), t0.to_bits())) else {
            return;
        };
        if open.packets.len() < 2 {
            debug!(device = %key.device_mac, "Discarding singleton burst");
            return;
        }
        let bfv = self.build_bfv(key, &open);
        self.emit(bfv);
    }

    fn build_bfv(&self, key: &FlowKey, open: &OpenBurst) -> Bfv {
        let features = compute_features(&open.packets);
        let start_time = open
            .packets
            .iter()
            .map(|p| p.ts)
            .fold(f64::INFINITY, f64::min);

        let protocol = protocol_label(open.tags.iter().map(String::as_str), key.transport);

        // Hostnames attached by the collector win; the resolver seam is the
        // fallback for the flow's peer address.
        let mut names: BTreeSet<String> = BTreeSet::new();
        for p in &open.packets {
            if let Some(host) = &p.peer_host {
                if !host.is_empty() {
                    names.insert(fold_ec2_host(&host.to_lowercase()));
                }
            }
        }
        if names.is_empty() {
            if let Some(host) = self.ctx.hostnames.hostname(&key.b_ip) {
                if !host.is_empty() {
                    names.insert(fold_ec2_host(&host.to_lowercase()));
                }
            }
        }
        let all_local = open.packets.iter().all(|p| p.local);
        let hosts = hosts_label(&names, all_local, &open.peer_mac);

        let (state, event) = self.ctx.registry.annotation(&key.device_mac);

        Bfv {
            features,
            tail: Tail {
                device_mac: key.device_mac.clone(),
                state,
                event,
                start_time,
                protocol,
                hosts,
            },
        }
    }

    fn emit(&self, bfv: Bfv) {
        debug!(
            device = %bfv.tail.device_mac,
            protocol = %bfv.tail.protocol,
            hosts = %bfv.tail.hosts,
            packets = bfv.features[11],
            "Sealed burst"
        );
        if self.ctx.registry.is_idle(&bfv.tail.device_mac)
            && self.ctx.idle_burst_queue.push(bfv.clone())
        {
            warn!(
                "{}",
                PipelineError::Backpressure(self.ctx.idle_burst_queue.name())
            );
        }
        if self.ctx.burst_queue.push(bfv) {
            warn!("{}", PipelineError::Backpressure(self.ctx.burst_queue.name()));
        }
    }

    // -- flow statistics ----------------------------------------------------

    fn update_flow_stats(&mut self, pkt: &PacketRecord, transport: Transport) {
        let key = FlowStatKey {
            src_mac: pkt.src_mac.clone(),
            dst_mac: pkt.dst_mac.clone(),
            src_ip: pkt.src_ip,
            dst_ip: pkt.dst_ip,
            src_port: pkt.src_port,
            dst_port: pkt.dst_port,
            protocol: match transport {
                Transport::Tcp => "tcp",
                Transport::Udp => "udp",
            },
        };
        let stats = self.flows.entry(key).or_insert(FlowStats {
            start_ts: pkt.ts,
            end_ts: pkt.ts,
            byte_count: 0,
            packet_count: 0,
        });
        stats.end_ts = pkt.ts;
        stats.byte_count += pkt.frame_len as u64;
        stats.packet_count += 1;
    }

    fn maybe_flush_flows(&mut self) {
        if self.last_flow_flush.elapsed().as_secs_f64() > self.ctx.config.flow_flush_secs {
            self.flush_flows();
        }
    }

    /// Swap the accumulator into the shared snapshot and log a summary.
    pub fn flush_flows(&mut self) {
        self.last_flow_flush = Instant::now();
        if self.flows.is_empty() {
            return;
        }
        let flows = std::mem::take(&mut self.flows);
        info!(
            flows = flows.len(),
            pending_packets = self.ctx.packet_queue.len(),
            "Flushed flow statistics"
        );
        self.ctx.flow_stats.clear();
        for (key, stats) in flows {
            self.ctx.flow_stats.insert(key, stats);
        }
    }
}

/// Worker loop: one assembler task owns all per-flow state.
pub async fn run_assembler(ctx: Arc<PipelineContext>) {
    let mut assembler = BurstAssembler::new(ctx.clone());
    info!("Burst assembler started");
    while ctx.is_running() {
        match ctx.packet_queue.pop_timeout(ctx.dequeue_timeout()).await {
            Some(pkt) => {
                if let Err(e) = assembler.on_packet(pkt) {
                    debug!(error = %e, "Dropped packet");
                }
            }
            None => assembler.on_idle(),
        }
    }
    info!("Burst assembler stopped");
}
