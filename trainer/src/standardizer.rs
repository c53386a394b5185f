//! Standardizer fit: 80/20 row-order split of the idle capture, scaler fit
//! on the training share, standardized train/test CSVs for the downstream
//! trainers.

use anyhow::Result;
use tracing::{info, warn};

use argus_engine::config::AppConfig;
use argus_engine::features::{fill_nan, to_csv_record, COLUMNS, NUM_FEATURES};
use argus_engine::model::scaler::{Scaler, ScalerArtifact};
use argus_engine::normalize::sanitize_name;

use crate::util::{idle_csv_path, load_bfv_csv, std_csv_paths, Row};

pub fn train_standardizer(config: &AppConfig, mac: &str) -> Result<()> {
    let idle_path = idle_csv_path(config, mac);
    if !idle_path.exists() {
        warn!(mac, path = %idle_path.display(), "Idle capture not found");
        return Ok(());
    }

    let mut rows = load_bfv_csv(&idle_path)?;
    for (features, _) in rows.iter_mut() {
        fill_nan(features);
    }

    // Row-order split, not time-order.
    let split_index = (rows.len() as f64 * 0.8) as usize;
    let (train, test) = rows.split_at(split_index);
    if train.is_empty() || test.is_empty() {
        warn!(
            mac,
            train = train.len(),
            test = test.len(),
            "Not enough idle data to split"
        );
        return Ok(());
    }
    info!(mac, train = train.len(), test = test.len(), "Fitting standardizer");

    let features: Vec<[f64; NUM_FEATURES]> = train.iter().map(|(f, _)| *f).collect();
    let scaler = Scaler::fit(&features);

    let artifact_path = config
        .models_dir()
        .join("SS_PCA")
        .join(format!("{}.json", sanitize_name(mac)));
    ScalerArtifact { ss: scaler.clone() }.save(&artifact_path)?;
    info!(path = %artifact_path.display(), "Saved standardizer artifact");

    let (train_path, test_path) = std_csv_paths(config, mac);
    write_standardized(&scaler, train, &train_path)?;
    write_standardized(&scaler, test, &test_path)?;
    info!(
        train = %train_path.display(),
        test = %test_path.display(),
        "Wrote standardized idle data"
    );
    Ok(())
}

fn write_standardized(scaler: &Scaler, rows: &[Row], path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(COLUMNS)?;
    for (features, tail) in rows {
        let transformed = scaler.transform(features);
        writer.write_record(to_csv_record(&transformed, tail))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_engine::features::Tail;
    use crate::util::write_bfv_csv;

    const MAC: &str = "aa:bb:cc:dd:ee:ff";

    fn config_in(dir: &std::path::Path) -> AppConfig {
        AppConfig {
            project_dir: dir.to_path_buf(),
            ..AppConfig::default()
        }
    }

    fn idle_rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let mut features = [0.0; NUM_FEATURES];
                features[0] = 100.0 + (i % 7) as f64 * 5.0;
                features[11] = 2.0 + (i % 3) as f64;
                (
                    features,
                    Tail {
                        device_mac: MAC.to_string(),
                        state: "idle".to_string(),
                        event: String::new(),
                        start_time: i as f64,
                        protocol: "TCP".to_string(),
                        hosts: "h.example.com".to_string(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_split_fit_and_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        write_bfv_csv(&idle_csv_path(&config, MAC), &idle_rows(10));

        train_standardizer(&config, MAC).unwrap();

        // Artifact exists and is loadable.
        let artifact = ScalerArtifact::load(
            &config
                .models_dir()
                .join("SS_PCA")
                .join("aa-bb-cc-dd-ee-ff.json"),
        )
        .unwrap();
        assert_eq!(artifact.ss.mean.len(), NUM_FEATURES);

        // 80/20 by row order.
        let (train_path, test_path) = std_csv_paths(&config, MAC);
        let train = load_bfv_csv(&train_path).unwrap();
        let test = load_bfv_csv(&test_path).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
        assert_eq!(test[0].1.start_time, 8.0, "split is by row order");

        // Tail columns are reattached verbatim.
        assert_eq!(train[0].1.protocol, "TCP");
        assert_eq!(train[0].1.hosts, "h.example.com");

        // Standardized training data: column 0 has ~zero mean.
        let mean0: f64 = train.iter().map(|(f, _)| f[0]).sum::<f64>() / train.len() as f64;
        assert!(mean0.abs() < 1e-9);

        // Round-trip through the saved scaler reproduces the raw value.
        let raw = idle_rows(10);
        let back = artifact.ss.inverse_transform(&train[0].0);
        assert!((back[0] - raw[0].0[0]).abs() < 1e-6);
    }

    #[test]
    fn test_missing_idle_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        train_standardizer(&config, MAC).unwrap();
        assert!(!config.idle_std_dir().exists());
    }

    #[test]
    fn test_too_few_rows_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        write_bfv_csv(&idle_csv_path(&config, MAC), &idle_rows(1));
        train_standardizer(&config, MAC).unwrap();
        let (train_path, _) = std_csv_paths(&config, MAC);
        assert!(!train_path.exists());
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        write_bfv_csv(&idle_csv_path(&config, MAC), &idle_rows(10));

        train_standardizer(&config, MAC).unwrap();
        let (train_path, _) = std_csv_paths(&config, MAC);
        let first = std::fs::read(&train_path).unwrap();

        train_standardizer(&config, MAC).unwrap();
        let second = std::fs::read(&train_path).unwrap();
        assert_eq!(first, second);
    }
}
