//! Periodicity inference: discover `(protocol, host)` tuples whose idle
//! traffic recurs on a fixed period.
//!
//! Candidate periods come from significant DFT bins (significance set by a
//! permutation null); autocorrelation validates them. Detected tuples feed
//! the fingerprint file the runtime filter loads.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use argus_engine::config::AppConfig;
use argus_engine::normalize::{host_transform, last_labels, protocol_transform, sanitize_name};

use crate::spectrum::{acf, dft_magnitudes, permutation_threshold};
use crate::util::{idle_csv_path, load_bfv_csv, model_name_for_mac};

const PERMUTATIONS: usize = 100;
/// ACF significance numerator; the test is `ρ ≥ 3.315 / √N`.
const ACF_SIGNIFICANCE: f64 = 3.315;
/// Shortest admissible period, in samples.
const MIN_PERIOD_SAMPLES: usize = 10;

pub fn infer_periodicity(config: &AppConfig, mac: &str) -> Result<()> {
    let idle_path = idle_csv_path(config, mac);
    if !idle_path.exists() {
        warn!(mac, path = %idle_path.display(), "Idle capture not found");
        return Ok(());
    }
    let rows = load_bfv_csv(&idle_path)?;
    if rows.is_empty() {
        warn!(mac, "Idle capture is empty");
        return Ok(());
    }

    let sampling = config.sampling_rate_secs.max(1);

    // Normalized (protocol, host, time-bin) triples.
    let samples: Vec<(String, String, i64)> = rows
        .iter()
        .map(|(_, tail)| {
            let bin = if sampling == 1 {
                tail.start_time as i64
            } else {
                (tail.start_time / sampling as f64).round() as i64
            };
            (
                protocol_transform(&tail.protocol),
                host_transform(&tail.hosts),
                bin,
            )
        })
        .collect();

    let t_min = samples.iter().map(|s| s.2).min().unwrap_or(0);
    let t_max = samples.iter().map(|s| s.2).max().unwrap_or(0);
    let n_bins = (t_max - t_min + 1) as usize;
    info!(mac, rows = rows.len(), n_bins, "Running periodicity inference");

    let protocols: BTreeSet<&String> = samples.iter().map(|s| &s.0).collect();
    let mut rng = StdRng::seed_from_u64(config.permutation_seed);
    let mut lines: Vec<String> = Vec::new();

    for protocol in protocols {
        let mut domains: BTreeSet<String> = samples
            .iter()
            .filter(|s| &s.0 == protocol)
            .map(|s| s.1.clone())
            .collect();
        coalesce_domains(&mut domains);

        for domain in &domains {
            let matched: Vec<i64> = samples
                .iter()
                .filter(|s| &s.0 == protocol && domain_matches(domain, &s.1))
                .map(|s| s.2)
                .collect();
            if matched.is_empty() {
                continue;
            }

            let mut y = vec![0.0; n_bins];
            for t in &matched {
                y[(t - t_min) as usize] += 1.0;
            }
            let nonzero_bins = y.iter().filter(|v| **v > 0.0).count();

            let periods = analyze_series(&y, nonzero_bins, sampling, &mut rng);
            if periods.is_empty() {
                info!(protocol = %protocol, host = %domain, "No period detected");
                lines.push(format!(
                    "No period detected {protocol} {domain} # {}",
                    matched.len()
                ));
            } else {
                info!(protocol = %protocol, host = %domain, period = periods[0], "Period detected");
                let mut line = format!(
                    "{protocol} {domain} # {}: best: {}",
                    matched.len(),
                    periods[0].round() as i64
                );
                if let Some(second) = periods.get(1) {
                    line.push_str(&format!(", {}", second.round() as i64));
                }
                lines.push(line);
            }
        }
    }

    let out_dir = config
        .models_dir()
        .join("freq_period")
        .join(format!("{sampling}s"));
    std::fs::create_dir_all(&out_dir)?;
    let out_path = out_dir.join(format!("{}.txt", sanitize_name(mac)));
    std::fs::write(&out_path, lines.join("\n") + "\n")?;
    info!(path = %out_path.display(), tuples = lines.len(), "Wrote periodicity results");

    emit_fingerprint(config, mac)
}

/// Merge hosts sharing their last-three-labels suffix into one `*.suffix`
/// wildcard (only hosts with at least four labels start a merge).
fn coalesce_domains(domains: &mut BTreeSet<String>) {
    for host in domains.clone() {
        if !domains.contains(&host) {
            continue;
        }
        if host.split('.').count() < 4 {
            continue;
        }
        let suffix = last_labels(&host, 3);
        let mut matched = false;
        for other in domains.clone() {
            if other == host || other.starts_with('*') {
                continue;
            }
            if other.ends_with(&suffix) {
                domains.remove(&other);
                matched = true;
            }
        }
        if matched {
            domains.remove(&host);
            domains.insert(format!("*.{suffix}"));
        }
    }
}

fn domain_matches(domain: &str, host: &str) -> bool {
    if host == domain {
        return true;
    }
    match domain.strip_prefix("*.") {
        Some(suffix) => host.ends_with(suffix),
        None => false,
    }
}

/// Candidate extraction + validation over one binned series. Returns the
/// best (and second-best) period in samples, or an empty vec.
fn analyze_series(y: &[f64], nonzero_bins: usize, sampling: u64, rng: &mut StdRng) -> Vec<f64> {
    let n = y.len();
    if n < 4 {
        return Vec::new();
    }

    let magnitudes = dft_magnitudes(y);
    let keep = if sampling >= 600 { 11 } else { 6 };
    let threshold = permutation_threshold(y, PERMUTATIONS, keep, rng);

    // Significant bins, skipping DC and the fundamental; consecutive bins
    // rounding to the same period collapse to one candidate.
    let mut candidates: Vec<(usize, usize)> = Vec::new();
    for (k, magnitude) in magnitudes.iter().enumerate().skip(2) {
        if *magnitude > threshold {
            let period = (n as f64 / k as f64).round() as usize;
            if sampling > 600 || period >= MIN_PERIOD_SAMPLES {
                if candidates.last().map(|c| c.1) != Some(period) {
                    candidates.push((k, period));
                }
            }
        }
    }

    // Autocorrelation validation around each candidate's lag neighborhood.
    let rho = acf(y);
    let significance = ACF_SIGNIFICANCE / (n as f64).sqrt();
    let mut validated: BTreeMap<usize, f64> = BTreeMap::new();
    for &(k, period) in &candidates {
        let hi = ((n as f64 / (k as f64 - 1.0)).round() as usize).max(period + 1);
        let lo = ((n as f64 / (k as f64 + 1.0)).round() as usize).min(period.saturating_sub(1));
        for lag in lo..=hi {
            if lag < rho.len() && rho[lag] >= significance {
                validated.insert(lag, rho[lag]);
            }
        }
    }

    let mut ranked: Vec<(usize, f64)> = validated.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    if !ranked.is_empty() {
        let mut periods = vec![ranked[0].0 as f64];
        if let Some(second) = ranked.get(1) {
            periods.push(second.0 as f64);
        }
        return periods;
    }

    // Small-sample fallback: 4–6 occupied bins with near-constant spacing.
    if (4..=6).contains(&nonzero_bins) {
        let time_list: Vec<f64> = y
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0.0)
            .map(|(i, _)| i as f64)
            .collect();
        let diffs: Vec<f64> = time_list.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
        let second_diffs: Vec<f64> = diffs.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
        if !second_diffs.is_empty()
            && second_diffs.iter().all(|d| *d <= 3600.0 / sampling as f64)
        {
            let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
            return vec![mean];
        }
    }

    Vec::new()
}

/// Turn the raw periodicity lines into the runtime fingerprint file:
/// `"<proto> <host> <period>"` for every detected tuple.
pub fn emit_fingerprint(config: &AppConfig, mac: &str) -> Result<()> {
    let sampling = config.sampling_rate_secs.max(1);
    let raw_path = config
        .models_dir()
        .join("freq_period")
        .join(format!("{sampling}s"))
        .join(format!("{}.txt", sanitize_name(mac)));
    if !raw_path.exists() {
        warn!(mac, path = %raw_path.display(), "No periodicity results to emit");
        return Ok(());
    }

    let contents = std::fs::read_to_string(&raw_path)?;
    let mut lines = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("No period detected") {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let best = tokens.iter().position(|t| *t == "best:");
        let (Some(protocol), Some(host), Some(best_idx)) =
            (tokens.first(), tokens.get(1), best)
        else {
            warn!(line, "Skipping malformed periodicity line");
            continue;
        };
        let Some(period) = tokens.get(best_idx + 1).map(|p| p.trim_end_matches(',')) else {
            warn!(line, "Skipping periodicity line without a period");
            continue;
        };
        lines.push(format!("{protocol} {host} {period}"));
    }

    let model = model_name_for_mac(config, mac);
    let out_path = config
        .models_dir()
        .join("freq_period")
        .join("fingerprints")
        .join(format!("{}.txt", sanitize_name(&model)));
    std::fs::create_dir_all(out_path.parent().unwrap_or(std::path::Path::new(".")))?;
    std::fs::write(&out_path, lines.join("\n") + "\n")?;
    info!(path = %out_path.display(), entries = lines.len(), "Wrote fingerprint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{write_bfv_csv, Row};
    use argus_engine::config::DeviceEntry;
    use argus_engine::features::{Tail, NUM_FEATURES};
    use argus_engine::model::fingerprint::Fingerprint;

    const MAC: &str = "aa:bb:cc:dd:ee:ff";

    fn config_in(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig {
            project_dir: dir.to_path_buf(),
            ..AppConfig::default()
        };
        config.devices.push(DeviceEntry {
            mac: MAC.to_string(),
            name: "Amazon Plug".to_string(),
            idle: true,
            state: "idle".to_string(),
            event: String::new(),
        });
        config
            .device_models
            .insert("Amazon Plug".to_string(), "amazon-plug".to_string());
        config
    }

    fn row(start_time: f64, protocol: &str, hosts: &str) -> Row {
        (
            [0.0; NUM_FEATURES],
            Tail {
                device_mac: MAC.to_string(),
                state: "idle".to_string(),
                event: String::new(),
                start_time,
                protocol: protocol.to_string(),
                hosts: hosts.to_string(),
            },
        )
    }

    fn raw_results_path(config: &AppConfig) -> std::path::PathBuf {
        config
            .models_dir()
            .join("freq_period")
            .join("1s")
            .join("aa-bb-cc-dd-ee-ff.txt")
    }

    #[test]
    fn test_sixty_second_beacon_detected() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        // Twenty minutes of one TLS burst every 60 s to the same host.
        let rows: Vec<Row> = (0..20)
            .map(|i| row(i as f64 * 60.0, "TLS", "h.example.com"))
            .collect();
        write_bfv_csv(&idle_csv_path(&config, MAC), &rows);

        infer_periodicity(&config, MAC).unwrap();

        let raw = std::fs::read_to_string(raw_results_path(&config)).unwrap();
        assert!(raw.contains("TCP h.example.com # 20: best:"), "raw: {raw}");

        let fp = Fingerprint::load(
            &config
                .models_dir()
                .join("freq_period")
                .join("fingerprints")
                .join("amazon-plug.txt"),
        )
        .unwrap();
        assert_eq!(fp.entries.len(), 1);
        assert_eq!(fp.entries[0].protocol, "TCP");
        assert_eq!(fp.entries[0].host, "h.example.com");
        assert!(
            (58.0..=62.0).contains(&fp.entries[0].period),
            "period {} out of range",
            fp.entries[0].period
        );
    }

    #[test]
    fn test_constant_chatter_has_no_period() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        // One burst in every bin: all spectral power sits in DC.
        let rows: Vec<Row> = (0..20)
            .map(|i| row(i as f64, "TCP", "h.example.com"))
            .collect();
        write_bfv_csv(&idle_csv_path(&config, MAC), &rows);

        infer_periodicity(&config, MAC).unwrap();

        let raw = std::fs::read_to_string(raw_results_path(&config)).unwrap();
        assert!(raw.contains("No period detected TCP h.example.com # 20"));

        let fp_path = config
            .models_dir()
            .join("freq_period")
            .join("fingerprints")
            .join("amazon-plug.txt");
        let fp = std::fs::read_to_string(fp_path).unwrap();
        assert_eq!(fp.trim(), "", "no detected lines, empty fingerprint");
    }

    #[test]
    fn test_small_sample_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        // Four evenly spaced events; every admissible DFT period is under
        // the 10-sample floor, so only the fallback can fire.
        let rows: Vec<Row> = [0.0, 3.0, 6.0, 9.0]
            .iter()
            .map(|&t| row(t, "UDP", "ntp-pool.example.org"))
            .collect();
        write_bfv_csv(&idle_csv_path(&config, MAC), &rows);

        infer_periodicity(&config, MAC).unwrap();

        let raw = std::fs::read_to_string(raw_results_path(&config)).unwrap();
        assert!(
            raw.contains("UDP ntp-pool.example.org # 4: best: 3"),
            "raw: {raw}"
        );
    }

    #[test]
    fn test_host_coalescing_merges_suffix() {
        let mut domains: BTreeSet<String> = ["a.b.example.com", "c.b.example.com", "other.net"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        coalesce_domains(&mut domains);
        assert!(domains.contains("*.b.example.com"));
        assert!(domains.contains("other.net"));
        assert_eq!(domains.len(), 2);
    }

    #[test]
    fn test_domain_matches_wildcard() {
        assert!(domain_matches("*.b.example.com", "x.b.example.com"));
        assert!(!domain_matches("*.b.example.com", "example.com"));
        assert!(domain_matches("plain.example.com", "plain.example.com"));
        assert!(!domain_matches("plain.example.com", "other.example.com"));
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let rows: Vec<Row> = (0..10)
            .map(|i| row(i as f64 * 60.0, "TLS", "h.example.com"))
            .collect();
        write_bfv_csv(&idle_csv_path(&config, MAC), &rows);

        infer_periodicity(&config, MAC).unwrap();
        let first = std::fs::read(raw_results_path(&config)).unwrap();

        infer_periodicity(&config, MAC).unwrap();
        let second = std::fs::read(raw_results_path(&config)).unwrap();
        assert_eq!(first, second, "fixed seed makes reruns byte-identical");
    }

    #[test]
    fn test_emit_fingerprint_parses_two_periods() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let raw_dir = config.models_dir().join("freq_period").join("1s");
        std::fs::create_dir_all(&raw_dir).unwrap();
        std::fs::write(
            raw_dir.join("aa-bb-cc-dd-ee-ff.txt"),
            "TCP h.example.com # 42: best: 60, 120\nNo period detected UDP x.example.org # 3\n",
        )
        .unwrap();

        emit_fingerprint(&config, MAC).unwrap();

        let fp = Fingerprint::load(
            &config
                .models_dir()
                .join("freq_period")
                .join("fingerprints")
                .join("amazon-plug.txt"),
        )
        .unwrap();
        assert_eq!(fp.entries.len(), 1);
        assert_eq!(fp.entries[0].period, 60.0, "first listed period wins");
    }
}
