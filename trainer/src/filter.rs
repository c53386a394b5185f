//! Periodic filter training: one density model per fingerprint tuple,
//! fitted on the standardized idle training rows that match the tuple's
//! (host, protocol).

use anyhow::Result;
use tracing::{info, warn};

use argus_engine::config::AppConfig;
use argus_engine::features::fill_nan;
use argus_engine::model::density::{DensityArtifact, DensityModel};
use argus_engine::model::fingerprint::{Fingerprint, FingerprintEntry};
use argus_engine::model::ModelStore;
use argus_engine::normalize::{host_transform, is_control_protocol, protocol_transform};

use crate::util::{load_bfv_csv, model_name_for_mac, std_csv_paths};

const MIN_SAMPLES: usize = 5;
/// Cap on training rows per tuple.
const MAX_TRAIN_ROWS: usize = 5000;

/// One standardized row with its normalized matching keys.
struct PreparedRow {
    features: Vec<f64>,
    proto: String,
    host: String,
}

fn prepare(rows: Vec<crate::util::Row>) -> Vec<PreparedRow> {
    rows.into_iter()
        .map(|(mut features, tail)| {
            fill_nan(&mut features);
            PreparedRow {
                features: features.to_vec(),
                proto: protocol_transform(&tail.protocol),
                host: host_transform(&tail.hosts),
            }
        })
        .collect()
}

fn matched_indices(rows: &[PreparedRow], entry: &FingerprintEntry) -> Vec<bool> {
    let strict: Vec<bool> = rows
        .iter()
        .map(|r| entry.matches(&r.host, &r.proto))
        .collect();
    if strict.iter().any(|&m| m) {
        return strict;
    }
    rows.iter()
        .map(|r| entry.matches_relaxed(&r.host, &r.proto))
        .collect()
}

pub fn train_periodic_filter(config: &AppConfig, mac: &str) -> Result<()> {
    let model_name = model_name_for_mac(config, mac);
    let store = ModelStore::new(config);

    let (train_path, test_path) = std_csv_paths(config, mac);
    if !train_path.exists() {
        warn!(mac, path = %train_path.display(), "No standardized training data");
        return Ok(());
    }
    let train = prepare(load_bfv_csv(&train_path)?);
    let mut test = if test_path.exists() {
        prepare(load_bfv_csv(&test_path)?)
    } else {
        Vec::new()
    };

    let fingerprint = match Fingerprint::load(&store.fingerprint_path(&model_name)) {
        Ok(fp) if !fp.is_empty() => fp,
        _ => {
            warn!(model = %model_name, "No fingerprint; nothing to train");
            return Ok(());
        }
    };

    // DNS/NTP-class rows are noise in the held-out set too.
    let before = test.len();
    test.retain(|r| r.host != "multicast" && !is_control_protocol(&r.proto));
    info!(
        model = %model_name,
        train = train.len(),
        test = test.len(),
        control_plane_removed = before - test.len(),
        tuples = fingerprint.entries.len(),
        "Training periodic filter models"
    );

    let eps = store.eps_for(&model_name);
    let mut total_periodic = 0usize;
    let mut total_kept = 0usize;

    for entry in &fingerprint.entries {
        let train_part: Vec<Vec<f64>> = train
            .iter()
            .filter(|r| entry.matches(&r.host, &r.proto))
            .take(MAX_TRAIN_ROWS)
            .map(|r| r.features.clone())
            .collect();

        let matched = matched_indices(&test, entry);
        let test_part_len = matched.iter().filter(|&&m| m).count();

        let model = if !train_part.is_empty() {
            DensityModel::fit(&train_part, eps, MIN_SAMPLES)
        } else if test_part_len > 0 {
            // No matching training rows at all; fit on the held-out slice so
            // a model still exists for the tuple.
            let test_part: Vec<Vec<f64>> = test
                .iter()
                .zip(&matched)
                .filter(|(_, &m)| m)
                .map(|(r, _)| r.features.clone())
                .collect();
            DensityModel::fit(&test_part, eps, MIN_SAMPLES)
        } else {
            info!(host = %entry.host, proto = %entry.protocol, "No data for tuple, skipping");
            continue;
        };

        let artifact_path = store.filter_model_path(&model_name, &entry.host, &entry.protocol);
        DensityArtifact {
            trained_model: model.clone(),
        }
        .save(&artifact_path)?;
        info!(
            path = %artifact_path.display(),
            clusters = model.components.len(),
            train_rows = train_part.len(),
            "Saved filter model"
        );

        if test_part_len == 0 {
            continue;
        }

        // Evaluate on the matched held-out rows and remove the ones the
        // model claims as periodic, so later tuples see a shrinking set.
        let mut periodic = 0usize;
        let mut kept = 0usize;
        let mut keep = Vec::with_capacity(test.len());
        for (row, &m) in test.iter().zip(&matched) {
            if !m {
                keep.push(true);
                continue;
            }
            if model.predict(&row.features) >= 0 {
                periodic += 1;
                keep.push(false);
            } else {
                kept += 1;
                keep.push(true);
            }
        }
        test = test
            .into_iter()
            .zip(keep)
            .filter_map(|(row, k)| k.then_some(row))
            .collect();

        info!(
            host = %entry.host,
            proto = %entry.protocol,
            periodic,
            kept,
            "Held-out evaluation"
        );
        total_periodic += periodic;
        total_kept += kept;
    }

    info!(
        model = %model_name,
        total_periodic,
        total_kept,
        "Periodic filter training complete"
    );
    Ok(())
}
