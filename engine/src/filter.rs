//! Periodic filter stage: suppress SBFVs that match a device's periodic
//! fingerprint and fall inside a core neighborhood of the corresponding
//! density model. Control-plane chatter is dropped outright.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::features::Sbfv;
use crate::model::fingerprint::FingerprintEntry;
use crate::normalize::{host_transform, is_control_protocol, is_mac_like, protocol_transform};
use crate::standardize::model_name_for;
use crate::state::PipelineContext;

/// What the filter decided for one SBFV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Non-periodic; forwarded to the predictor.
    Pass,
    /// Inside a periodic cluster; dropped.
    Periodic,
    /// DNS/NTP-class noise or local chatter; dropped.
    ControlPlane,
    /// Device has no fingerprint; dropped.
    NoFingerprint,
}

/// `filter(sbfv) → pass | periodic | no-fingerprint`, with control-plane
/// bursts always dropped first.
pub fn filter_one(ctx: &PipelineContext, sbfv: &Sbfv) -> Result<FilterOutcome, PipelineError> {
    let proto = protocol_transform(&sbfv.tail.protocol);
    let host = host_transform(&sbfv.tail.hosts);

    if is_control_protocol(&proto)
        || host == "multicast"
        || is_mac_like(&host)
        || ctx.device_macs().contains(&host)
    {
        return Ok(FilterOutcome::ControlPlane);
    }

    let mac = &sbfv.tail.device_mac;
    let product_name = ctx
        .product_name(mac)
        .ok_or_else(|| PipelineError::UnknownDevice(mac.clone()))?;
    let model = model_name_for(ctx, &product_name)?;

    let Some(fingerprint) = ctx.models.fingerprint_for(&model) else {
        return Ok(FilterOutcome::NoFingerprint);
    };

    // Strict host matching first; the relaxed last-three-labels pass only
    // runs when nothing matched strictly.
    let strict: Vec<&FingerprintEntry> = fingerprint
        .entries
        .iter()
        .filter(|e| e.matches(&host, &proto))
        .collect();
    let candidates: Vec<&FingerprintEntry> = if strict.is_empty() {
        fingerprint
            .entries
            .iter()
            .filter(|e| e.matches_relaxed(&host, &proto))
            .collect()
    } else {
        strict
    };

    for entry in candidates {
        let Some(model_for_tuple) = ctx.models.filter_model(&model, &entry.host, &entry.protocol)
        else {
            let path = ctx
                .models
                .filter_model_path(&model, &entry.host, &entry.protocol);
            debug!(
                "{}",
                PipelineError::MissingFilterModel(path.display().to_string())
            );
            continue;
        };
        if model_for_tuple.predict(&sbfv.features) >= 0 {
            return Ok(FilterOutcome::Periodic);
        }
        // Still an aperiodic candidate; keep scanning remaining tuples.
    }

    Ok(FilterOutcome::Pass)
}

/// Worker loop: ss_burst_queue → filtered_burst_queue.
pub async fn run_filter(ctx: Arc<PipelineContext>) {
    info!("Periodic filter started");
    while ctx.is_running() {
        let Some(sbfv) = ctx.ss_burst_queue.pop_timeout(ctx.dequeue_timeout()).await else {
            continue;
        };
        match filter_one(&ctx, &sbfv) {
            Ok(FilterOutcome::Pass) => {
                info!(
                    device = %sbfv.tail.device_mac,
                    hosts = %sbfv.tail.hosts,
                    "Non-periodic burst forwarded"
                );
                if ctx.filtered_burst_queue.push(sbfv) {
                    warn!(
                        "{}",
                        PipelineError::Backpressure(ctx.filtered_burst_queue.name())
                    );
                }
            }
            Ok(FilterOutcome::Periodic) => {
                debug!(device = %sbfv.tail.device_mac, "Periodic burst suppressed");
            }
            Ok(FilterOutcome::ControlPlane) => {
                debug!(device = %sbfv.tail.device_mac, protocol = %sbfv.tail.protocol, "Control-plane burst dropped");
            }
            Ok(FilterOutcome::NoFingerprint) => {
                info!(device = %sbfv.tail.device_mac, "No fingerprint, burst dropped");
            }
            Err(e) if e.is_expected() => {
                debug!(device = %sbfv.tail.device_mac, error = %e, "Dropped burst");
            }
            Err(e) => {
                warn!(device = %sbfv.tail.device_mac, error = %e, "Filter failed");
            }
        }
    }
    info!("Periodic filter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::features::{Tail, NUM_FEATURES};
    use crate::model::density::{DensityArtifact, DensityModel};
    use crate::state::test_context;
    use std::collections::HashMap;

    const DEV_MAC: &str = "aa:bb:cc:dd:ee:ff";

    fn sbfv(protocol: &str, hosts: &str, features: [f64; NUM_FEATURES]) -> Sbfv {
        Sbfv {
            features,
            tail: Tail {
                device_mac: DEV_MAC.to_string(),
                state: String::new(),
                event: String::new(),
                start_time: 10.0,
                protocol: protocol.to_string(),
                hosts: hosts.to_string(),
            },
        }
    }

    fn plug_context(dir: &std::path::Path) -> Arc<PipelineContext> {
        let mut device_models = HashMap::new();
        device_models.insert("Amazon Plug".to_string(), "amazon-plug".to_string());
        let config = AppConfig {
            project_dir: dir.to_path_buf(),
            device_models,
            ..AppConfig::default()
        };
        let (ctx, registry) = test_context(config);
        registry.insert(DEV_MAC, "Amazon Plug");
        ctx
    }

    fn write_fingerprint(ctx: &PipelineContext, lines: &str) {
        let path = ctx.models.fingerprint_path("amazon-plug");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, lines).unwrap();
    }

    /// One cluster centered at the origin with radius well under eps.
    fn write_filter_model(ctx: &PipelineContext, host: &str, proto: &str) {
        let points: Vec<Vec<f64>> = (0..6)
            .map(|i| {
                let mut p = vec![0.0; NUM_FEATURES];
                p[0] = i as f64 * 0.01;
                p
            })
            .collect();
        let model = DensityModel::fit(&points, 1.0, 5);
        DensityArtifact {
            trained_model: model,
        }
        .save(&ctx.models.filter_model_path("amazon-plug", host, proto))
        .unwrap();
    }

    #[test]
    fn test_control_plane_always_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = plug_context(dir.path());

        for proto in ["DNS", "MDNS", "NTP", "SSDP", "DHCP"] {
            let outcome = filter_one(&ctx, &sbfv(proto, "h.example.com", [0.0; NUM_FEATURES]));
            assert_eq!(outcome.unwrap(), FilterOutcome::ControlPlane, "{proto}");
        }

        let outcome = filter_one(&ctx, &sbfv("UDP", "multicast", [0.0; NUM_FEATURES]));
        assert_eq!(outcome.unwrap(), FilterOutcome::ControlPlane);

        let outcome = filter_one(&ctx, &sbfv("UDP", "11:22:33:44:55:66", [0.0; NUM_FEATURES]));
        assert_eq!(outcome.unwrap(), FilterOutcome::ControlPlane);
    }

    #[test]
    fn test_local_device_mac_host_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = plug_context(dir.path());
        // DEV_MAC is registered, so a burst whose host collapsed to it is
        // local chatter. (It is also MAC-like, but the registry check must
        // hold for registered devices regardless.)
        let outcome = filter_one(&ctx, &sbfv("TCP", DEV_MAC, [0.0; NUM_FEATURES]));
        assert_eq!(outcome.unwrap(), FilterOutcome::ControlPlane);
    }

    #[test]
    fn test_no_fingerprint_drops() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = plug_context(dir.path());
        let outcome = filter_one(&ctx, &sbfv("TCP", "plug.example.com", [0.0; NUM_FEATURES]));
        assert_eq!(outcome.unwrap(), FilterOutcome::NoFingerprint);
    }

    #[test]
    fn test_periodic_burst_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = plug_context(dir.path());
        write_fingerprint(&ctx, "TCP plug.example.com 60\n");
        write_filter_model(&ctx, "plug.example.com", "TCP");

        // TLS normalizes to TCP; inside the cluster → periodic.
        let outcome = filter_one(&ctx, &sbfv("TLS", "plug.example.com", [0.0; NUM_FEATURES]));
        assert_eq!(outcome.unwrap(), FilterOutcome::Periodic);
    }

    #[test]
    fn test_outlier_burst_passes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = plug_context(dir.path());
        write_fingerprint(&ctx, "TCP plug.example.com 60\n");
        write_filter_model(&ctx, "plug.example.com", "TCP");

        let mut far = [0.0; NUM_FEATURES];
        far[0] = 50.0;
        let outcome = filter_one(&ctx, &sbfv("TCP", "plug.example.com", far));
        assert_eq!(outcome.unwrap(), FilterOutcome::Pass);
    }

    #[test]
    fn test_unmatched_host_passes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = plug_context(dir.path());
        write_fingerprint(&ctx, "TCP plug.example.com 60\n");
        write_filter_model(&ctx, "plug.example.com", "TCP");

        let outcome = filter_one(&ctx, &sbfv("TCP", "unrelated.example.org", [0.0; NUM_FEATURES]));
        assert_eq!(outcome.unwrap(), FilterOutcome::Pass);
    }

    #[test]
    fn test_wildcard_fingerprint_matches() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = plug_context(dir.path());
        write_fingerprint(&ctx, "TCP *.compute.amazonaws.com 3600\n");
        write_filter_model(&ctx, "*.compute.amazonaws.com", "TCP");

        let outcome = filter_one(
            &ctx,
            &sbfv("TCP", "ec2-1-2-3-4.compute.amazonaws.com", [0.0; NUM_FEATURES]),
        );
        assert_eq!(outcome.unwrap(), FilterOutcome::Periodic);
    }

    #[test]
    fn test_relaxed_match_used_when_strict_misses() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = plug_context(dir.path());
        write_fingerprint(&ctx, "TCP api.east.plugcloud.example.net 60\n");
        write_filter_model(&ctx, "api.east.plugcloud.example.net", "TCP");

        // Different first labels, same last three → relaxed match fires.
        let outcome = filter_one(
            &ctx,
            &sbfv("TCP", "cdn.plugcloud.example.net", [0.0; NUM_FEATURES]),
        );
        assert_eq!(outcome.unwrap(), FilterOutcome::Periodic);
    }

    #[test]
    fn test_missing_filter_model_scans_on() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = plug_context(dir.path());
        // Both tuples match the host, but only the second has a trained
        // model; the scan skips the missing one and still finds the cluster.
        write_fingerprint(
            &ctx,
            "TCP *.example.com 60\nTCP plug.example.com 120\n",
        );
        write_filter_model(&ctx, "plug.example.com", "TCP");

        let outcome = filter_one(&ctx, &sbfv("TCP", "plug.example.com", [0.0; NUM_FEATURES]));
        assert_eq!(outcome.unwrap(), FilterOutcome::Periodic);
    }

    #[test]
    fn test_unknown_device_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            project_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        let (ctx, _) = test_context(config);
        let err = filter_one(&ctx, &sbfv("TCP", "h.example.com", [0.0; NUM_FEATURES])).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownDevice(_)));
    }
}
