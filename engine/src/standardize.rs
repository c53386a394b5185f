//! Standardizer stage: apply the device's pre-fitted scaler to the numeric
//! part of each BFV, carrying the tail fields through verbatim.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::features::{Bfv, Sbfv};
use crate::resolver;
use crate::state::PipelineContext;

/// Resolve the on-disk model name for a device product name.
pub fn model_name_for(ctx: &PipelineContext, product_name: &str) -> Result<String, PipelineError> {
    let folders = ctx.models.model_folders();
    resolver::resolve_model(
        &ctx.config.device_models,
        &folders,
        product_name,
        ctx.config.match_threshold,
    )
    .ok_or_else(|| PipelineError::UnknownModel(product_name.to_string()))
}

/// `standardize(bfv) → sbfv`, or the reason the BFV was dropped.
pub fn standardize_one(ctx: &PipelineContext, bfv: &Bfv) -> Result<Sbfv, PipelineError> {
    let mac = &bfv.tail.device_mac;
    let product_name = ctx
        .product_name(mac)
        .ok_or_else(|| PipelineError::UnknownDevice(mac.clone()))?;

    let model = model_name_for(ctx, &product_name)?;

    let scaler = ctx
        .models
        .scaler_for(&model, mac)
        .ok_or_else(|| PipelineError::UnknownModel(format!("no standardizer for '{model}'")))?;

    let features = scaler.transform(&bfv.features);
    if features.iter().any(|f| !f.is_finite()) {
        return Err(PipelineError::TransformFailure(format!(
            "non-finite output for device '{product_name}'"
        )));
    }

    Ok(Sbfv {
        features,
        tail: bfv.tail.clone(),
    })
}

/// Worker loop: burst_queue → ss_burst_queue.
pub async fn run_standardizer(ctx: Arc<PipelineContext>) {
    info!("Standardizer started");
    while ctx.is_running() {
        let Some(bfv) = ctx.burst_queue.pop_timeout(ctx.dequeue_timeout()).await else {
            continue;
        };
        match standardize_one(&ctx, &bfv) {
            Ok(sbfv) => {
                debug!(device = %sbfv.tail.device_mac, "Standardized burst");
                if ctx.ss_burst_queue.push(sbfv) {
                    warn!("{}", PipelineError::Backpressure(ctx.ss_burst_queue.name()));
                }
            }
            Err(e) if e.is_expected() => {
                debug!(device = %bfv.tail.device_mac, error = %e, "Dropped burst");
            }
            Err(e) => {
                warn!(device = %bfv.tail.device_mac, error = %e, "Standardization failed");
            }
        }
    }
    info!("Standardizer stopped");
}
