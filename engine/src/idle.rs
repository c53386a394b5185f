//! Idle recorder: append raw BFVs of operator-idle devices to per-device
//! CSVs, the training substrate for every offline model.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::features::{to_csv_record, Bfv, COLUMNS};
use crate::normalize::sanitize_name;
use crate::state::PipelineContext;

/// Serializes concurrent appends per CSV path.
#[derive(Default)]
pub struct IdleRecorder {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl IdleRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of a device's idle capture file.
    pub fn csv_path(ctx: &PipelineContext, mac: &str) -> PathBuf {
        ctx.config
            .idle_data_dir()
            .join(format!("{}.csv", sanitize_name(mac)))
    }

    /// Append one BFV row, creating the file with its header on first write.
    pub fn record(&self, ctx: &PipelineContext, bfv: &Bfv) -> Result<(), PipelineError> {
        let path = Self::csv_path(ctx, &bfv.tail.device_mac);

        let lock = self
            .locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().expect("idle file mutex poisoned");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let is_new = !path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            info!(device = %bfv.tail.device_mac, path = %path.display(), "Creating idle capture file");
            writer
                .write_record(COLUMNS)
                .map_err(|e| PipelineError::TransformFailure(e.to_string()))?;
        }
        writer
            .write_record(to_csv_record(&bfv.features, &bfv.tail))
            .map_err(|e| PipelineError::TransformFailure(e.to_string()))?;
        writer
            .flush()
            .map_err(PipelineError::Io)?;
        Ok(())
    }
}

/// Worker loop: idle_burst_queue → per-device CSVs.
pub async fn run_idle_recorder(ctx: Arc<PipelineContext>) {
    let recorder = IdleRecorder::new();
    info!("Idle recorder started");
    while ctx.is_running() {
        let Some(bfv) = ctx.idle_burst_queue.pop_timeout(ctx.dequeue_timeout()).await else {
            continue;
        };
        match recorder.record(&ctx, &bfv) {
            Ok(()) => debug!(device = %bfv.tail.device_mac, "Recorded idle burst"),
            Err(e) => warn!(device = %bfv.tail.device_mac, error = %e, "Idle record failed"),
        }
    }
    info!("Idle recorder stopped");
}
