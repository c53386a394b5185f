//! Burst feature vectors.
//!
//! A sealed burst is reduced to 22 numeric features over frame lengths,
//! inter-packet times, and direction counters, plus 6 tail fields
//! `(device, state, event, start_time, protocol, hosts)` — 28 columns total,
//! the row format of every queue payload and every training CSV.

use std::collections::BTreeSet;

use crate::error::PipelineError;
use crate::packet::Transport;

pub const NUM_FEATURES: usize = 22;
pub const TAIL_FIELDS: usize = 6;
pub const TOTAL_COLUMNS: usize = NUM_FEATURES + TAIL_FIELDS;

/// Column names, order-significant everywhere (queues, CSVs, scalers).
pub const COLUMNS: [&str; TOTAL_COLUMNS] = [
    "meanBytes",
    "minBytes",
    "maxBytes",
    "medAbsDev",
    "skewLength",
    "kurtosisLength",
    "meanTBP",
    "varTBP",
    "medianTBP",
    "kurtosisTBP",
    "skewTBP",
    "network_total",
    "network_in",
    "network_out",
    "network_external",
    "network_local",
    "network_in_local",
    "network_out_local",
    "meanBytes_out_external",
    "meanBytes_in_external",
    "meanBytes_out_local",
    "meanBytes_in_local",
    "device",
    "state",
    "event",
    "start_time",
    "protocol",
    "hosts",
];

/// Normal-consistency constant for the median absolute deviation
/// (Φ⁻¹(3/4)); medAbsDev is MAD divided by this.
const MAD_SCALE: f64 = 0.674_489_750_196_081_7;

/// The 6 non-numeric fields carried verbatim through every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Tail {
    pub device_mac: String,
    pub state: String,
    pub event: String,
    pub start_time: f64,
    pub protocol: String,
    pub hosts: String,
}

/// Raw burst feature vector.
#[derive(Debug, Clone)]
pub struct Bfv {
    pub features: [f64; NUM_FEATURES],
    pub tail: Tail,
}

/// Standardized burst feature vector (scaler applied, tail untouched).
#[derive(Debug, Clone)]
pub struct Sbfv {
    pub features: [f64; NUM_FEATURES],
    pub tail: Tail,
}

/// The per-packet view the assembler buffers for feature extraction.
#[derive(Debug, Clone)]
pub struct BurstPacket {
    pub ts: f64,
    pub frame_len: f64,
    /// Device → peer direction.
    pub outbound: bool,
    /// Both endpoints are on the local network.
    pub local: bool,
    /// Hostname attached to the non-device peer, when the collector knew it.
    pub peer_host: Option<String>,
}

// ---------------------------------------------------------------------------
// Statistics helpers
// ---------------------------------------------------------------------------

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

pub fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population variance (second central moment).
pub fn variance(xs: &[f64]) -> f64 {
    let m = mean(xs);
    central_moment(xs, m, 2)
}

fn central_moment(xs: &[f64], m: f64, k: u32) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().map(|x| (x - m).powi(k as i32)).sum::<f64>() / xs.len() as f64
}

/// Fisher (moment) skewness; 0 for zero-variance input.
pub fn skewness(xs: &[f64]) -> f64 {
    let m = mean(xs);
    let m2 = central_moment(xs, m, 2);
    if !m2.is_finite() {
        return f64::NAN;
    }
    if m2 < 1e-12 {
        return 0.0;
    }
    central_moment(xs, m, 3) / m2.powf(1.5)
}

/// Fisher (excess) kurtosis; −1 for zero-variance input, matching the
/// pipeline's NaN fill value.
pub fn kurtosis(xs: &[f64]) -> f64 {
    let m = mean(xs);
    let m2 = central_moment(xs, m, 2);
    if !m2.is_finite() {
        return f64::NAN;
    }
    if m2 < 1e-12 {
        return -1.0;
    }
    central_moment(xs, m, 4) / (m2 * m2) - 3.0
}

/// Median absolute deviation, scaled for normal consistency.
pub fn med_abs_dev(xs: &[f64]) -> f64 {
    let med = median(xs);
    if !med.is_finite() {
        return f64::NAN;
    }
    let devs: Vec<f64> = xs.iter().map(|x| (x - med).abs()).collect();
    median(&devs) / MAD_SCALE
}

// ---------------------------------------------------------------------------
// Feature extraction
// ---------------------------------------------------------------------------

fn mean_or_zero(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        mean(xs)
    }
}

/// Compute the 22 numeric features of a sealed burst.
///
/// Non-finite results are replaced with −1 so every emitted vector is finite.
pub fn compute_features(packets: &[BurstPacket]) -> [f64; NUM_FEATURES] {
    let lens: Vec<f64> = packets.iter().map(|p| p.frame_len).collect();

    // Inter-packet times in arrival order, first delta pinned to zero.
    let mut tbp = Vec::with_capacity(packets.len());
    for (i, p) in packets.iter().enumerate() {
        if i == 0 {
            tbp.push(0.0);
        } else {
            tbp.push(p.ts - packets[i - 1].ts);
        }
    }

    let total = packets.len() as f64;
    let count = |f: &dyn Fn(&BurstPacket) -> bool| packets.iter().filter(|p| f(p)).count() as f64;
    let lens_where = |f: &dyn Fn(&BurstPacket) -> bool| -> Vec<f64> {
        packets
            .iter()
            .filter(|p| f(p))
            .map(|p| p.frame_len)
            .collect()
    };

    let net_in = count(&|p| !p.local && !p.outbound);
    let net_out = count(&|p| !p.local && p.outbound);
    let net_local = count(&|p| p.local);
    let net_in_local = count(&|p| p.local && !p.outbound);
    let net_out_local = count(&|p| p.local && p.outbound);

    let mut features = [
        mean(&lens),
        lens.iter().cloned().fold(f64::INFINITY, f64::min),
        lens.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        med_abs_dev(&lens),
        skewness(&lens),
        kurtosis(&lens),
        mean(&tbp),
        variance(&tbp),
        median(&tbp),
        kurtosis(&tbp),
        skewness(&tbp),
        total,
        net_in,
        net_out,
        net_in + net_out,
        net_local,
        net_in_local,
        net_out_local,
        mean_or_zero(&lens_where(&|p| !p.local && p.outbound)),
        mean_or_zero(&lens_where(&|p| !p.local && !p.outbound)),
        mean_or_zero(&lens_where(&|p| p.local && p.outbound)),
        mean_or_zero(&lens_where(&|p| p.local && !p.outbound)),
    ];

    for f in features.iter_mut() {
        if !f.is_finite() {
            *f = -1.0;
        }
    }
    features
}

/// Assemble the burst's protocol label: the distinct highest-layer tags
/// joined with `;`, collapsed onto the bare transport when no
/// application-layer tag was seen.
pub fn protocol_label<'a>(tags: impl IntoIterator<Item = &'a str>, transport: Transport) -> String {
    let set: BTreeSet<&str> = tags.into_iter().filter(|t| !t.is_empty()).collect();
    if set.is_empty() || set.iter().all(|t| *t == "TCP" || *t == "UDP") {
        transport.name().to_string()
    } else {
        set.into_iter().collect::<Vec<_>>().join(";")
    }
}

/// Assemble the burst's hosts label from the resolved peer hostnames.
///
/// With no resolved name, an all-local burst is labeled with the peer MAC,
/// anything else with the `(local network)` placeholder.
pub fn hosts_label(names: &BTreeSet<String>, all_local: bool, peer_mac: &str) -> String {
    if !names.is_empty() {
        names.iter().cloned().collect::<Vec<_>>().join(";")
    } else if all_local {
        peer_mac.to_string()
    } else {
        "(local network)".to_string()
    }
}

// ---------------------------------------------------------------------------
// CSV row conversion
// ---------------------------------------------------------------------------

/// Serialize one 28-column row.
pub fn to_csv_record(features: &[f64; NUM_FEATURES], tail: &Tail) -> Vec<String> {
    let mut record: Vec<String> = features.iter().map(|v| v.to_string()).collect();
    record.push(tail.device_mac.clone());
    record.push(tail.state.clone());
    record.push(tail.event.clone());
    record.push(tail.start_time.to_string());
    record.push(tail.protocol.clone());
    record.push(tail.hosts.clone());
    record
}

/// Parse one 28-column row. Unparseable numeric cells become NaN; callers
/// that need finite input apply [`fill_nan`].
pub fn parse_csv_record(
    record: &csv::StringRecord,
) -> Result<([f64; NUM_FEATURES], Tail), PipelineError> {
    if record.len() != TOTAL_COLUMNS {
        return Err(PipelineError::TransformFailure(format!(
            "expected {} columns, got {}",
            TOTAL_COLUMNS,
            record.len()
        )));
    }
    let mut features = [0.0; NUM_FEATURES];
    for (i, cell) in record.iter().take(NUM_FEATURES).enumerate() {
        features[i] = cell.trim().parse::<f64>().unwrap_or(f64::NAN);
    }
    let tail = Tail {
        device_mac: record[NUM_FEATURES].to_string(),
        state: record[NUM_FEATURES + 1].to_string(),
        event: record[NUM_FEATURES + 2].to_string(),
        start_time: record[NUM_FEATURES + 3].trim().parse::<f64>().unwrap_or(0.0),
        protocol: record[NUM_FEATURES + 4].to_string(),
        hosts: record[NUM_FEATURES + 5].to_string(),
    };
    Ok((features, tail))
}

/// Replace non-finite cells with −1 (the pipeline's NaN fill).
pub fn fill_nan(features: &mut [f64; NUM_FEATURES]) {
    for f in features.iter_mut() {
        if !f.is_finite() {
            *f = -1.0;
        }
    }
}
