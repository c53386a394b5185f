//! Event predictor stage: run the device's per-event binary classifiers over
//! each filtered SBFV; the first positive classifier in filename order names
//! the event.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::features::Sbfv;
use crate::standardize::model_name_for;
use crate::state::PipelineContext;

/// `predict(sbfv) → Some((ts, event)) | None` for periodic/unexpected
/// traffic that no classifier claimed.
pub fn predict_one(
    ctx: &PipelineContext,
    sbfv: &Sbfv,
) -> Result<Option<(f64, String)>, PipelineError> {
    let mac = &sbfv.tail.device_mac;
    let product_name = ctx
        .product_name(mac)
        .ok_or_else(|| PipelineError::UnknownDevice(mac.clone()))?;
    let model = model_name_for(ctx, &product_name)?;

    let ensemble = ctx
        .models
        .classifiers_for(&model)
        .ok_or_else(|| PipelineError::UnknownModel(format!("no classifiers for '{model}'")))?;

    let ts = sbfv.tail.start_time;
    for (event, classifier) in ensemble.iter() {
        // Probabilities are observability only; the hard 0/1 decision rules.
        match classifier.predict_proba(&sbfv.features) {
            Ok(proba) => {
                debug!(
                    device = %model,
                    event = %event,
                    p_positive = proba[1],
                    "Classifier vote"
                );
            }
            Err(e) => {
                warn!(device = %model, event = %event, error = %e, "Classifier skipped");
                continue;
            }
        }
        match classifier.predict(&sbfv.features) {
            Ok(1) => {
                ctx.push_event(mac, ts, event);
                return Ok(Some((ts, event.clone())));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(device = %model, event = %event, error = %e, "Classifier skipped");
            }
        }
    }
    Ok(None)
}

/// Worker loop: filtered_burst_queue → filtered_event_queue.
pub async fn run_predictor(ctx: Arc<PipelineContext>) {
    info!("Event predictor started");
    while ctx.is_running() {
        let Some(sbfv) = ctx
            .filtered_burst_queue
            .pop_timeout(ctx.dequeue_timeout())
            .await
        else {
            continue;
        };
        match predict_one(&ctx, &sbfv) {
            Ok(Some((ts, event))) => {
                info!(device = %sbfv.tail.device_mac, event = %event, ts, "Event detected");
            }
            Ok(None) => {
                info!(device = %sbfv.tail.device_mac, "Periodic/unexpected event");
            }
            Err(e) if e.is_expected() => {
                debug!(device = %sbfv.tail.device_mac, error = %e, "Dropped burst");
            }
            Err(e) => {
                warn!(device = %sbfv.tail.device_mac, error = %e, "Prediction failed");
            }
        }
    }
    info!("Event predictor stopped");
}
