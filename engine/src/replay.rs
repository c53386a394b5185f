//! JSONL capture replay — the stand-in packet source for the out-of-scope
//! sniffer. One `PacketRecord` per line; unparseable lines are counted and
//! skipped.

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::packet::PacketRecord;
use crate::state::PipelineContext;

/// Feed a JSONL capture into the packet queue. The `is_inspecting` gate is
/// honored at enqueue: paused captures are silently dropped. Returns the
/// number of packets enqueued.
pub fn replay_file(ctx: &Arc<PipelineContext>, path: &Path) -> anyhow::Result<usize> {
    let contents = std::fs::read_to_string(path)?;
    let mut enqueued = 0usize;
    let mut skipped = 0usize;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let pkt: PacketRecord = match serde_json::from_str(line) {
            Ok(pkt) => pkt,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        if !ctx.is_inspecting() {
            continue;
        }
        ctx.packet_queue.push(pkt);
        enqueued += 1;
    }

    if skipped > 0 {
        warn!(skipped, "Skipped unparseable capture lines");
    }
    info!(path = %path.display(), enqueued, "Capture replayed");
    Ok(enqueued)
}
