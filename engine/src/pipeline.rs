//! Worker spawning and shutdown for the five pipeline stages.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::state::PipelineContext;
use crate::{burst, filter, idle, predict, standardize};

/// Spawn one worker per stage. Workers exit at their next dequeue timeout
/// once `ctx.shutdown()` is called.
pub fn spawn_pipeline(ctx: &Arc<PipelineContext>) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(burst::run_assembler(ctx.clone())),
        tokio::spawn(standardize::run_standardizer(ctx.clone())),
        tokio::spawn(filter::run_filter(ctx.clone())),
        tokio::spawn(predict::run_predictor(ctx.clone())),
        tokio::spawn(idle::run_idle_recorder(ctx.clone())),
    ]
}

/// Signal shutdown and wait for every worker to observe it.
pub async fn shutdown(ctx: &Arc<PipelineContext>, handles: Vec<JoinHandle<()>>) {
    ctx.shutdown();
    for handle in handles {
        let _ = handle.await;
    }
    info!("Pipeline stopped");
}
