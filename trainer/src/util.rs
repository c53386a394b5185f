//! Shared trainer helpers: BFV CSV loading and device → model-name
//! resolution from the config file.

use anyhow::{Context, Result};
use std::path::Path;

use argus_engine::config::AppConfig;
use argus_engine::features::{parse_csv_record, Tail, NUM_FEATURES, TOTAL_COLUMNS};
use argus_engine::normalize::sanitize_name;

pub type Row = ([f64; NUM_FEATURES], Tail);

/// Load a 28-column BFV CSV (header expected). Numeric cells that fail to
/// parse come back as NaN; callers decide on the fill.
pub fn load_bfv_csv(path: &Path) -> Result<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let header = reader.headers().context("reading CSV header")?;
    anyhow::ensure!(
        header.len() == TOTAL_COLUMNS,
        "{}: expected {} columns, found {}",
        path.display(),
        TOTAL_COLUMNS,
        header.len()
    );

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("reading CSV record")?;
        let row = parse_csv_record(&record)
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Path of a device's raw idle capture.
pub fn idle_csv_path(config: &AppConfig, mac: &str) -> std::path::PathBuf {
    config
        .idle_data_dir()
        .join(format!("{}.csv", sanitize_name(mac)))
}

/// Paths of a device's standardized train/test CSVs.
pub fn std_csv_paths(config: &AppConfig, mac: &str) -> (std::path::PathBuf, std::path::PathBuf) {
    let dir = config.idle_std_dir();
    let mac = sanitize_name(mac);
    (
        dir.join(format!("{mac}_train.csv")),
        dir.join(format!("{mac}_test.csv")),
    )
}

/// Model folder name for a device MAC: the configured product name mapped
/// through the explicit table, else lowercased with spaces dashed; the
/// sanitized MAC when the device is not configured at all.
pub fn model_name_for_mac(config: &AppConfig, mac: &str) -> String {
    let entry = config
        .devices
        .iter()
        .find(|d| d.mac.eq_ignore_ascii_case(mac));
    match entry {
        Some(device) => config
            .device_models
            .get(&device.name)
            .cloned()
            .unwrap_or_else(|| device.name.to_lowercase().replace(' ', "-")),
        None => sanitize_name(mac),
    }
}

/// Write a 28-column BFV CSV (test fixture helper).
#[cfg(test)]
pub(crate) fn write_bfv_csv(path: &Path, rows: &[Row]) {
    use argus_engine::features::{to_csv_record, COLUMNS};
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut writer = csv::Writer::from_path(path).unwrap();
    writer.write_record(COLUMNS).unwrap();
    for (features, tail) in rows {
        writer.write_record(to_csv_record(features, tail)).unwrap();
    }
    writer.flush().unwrap();
}
