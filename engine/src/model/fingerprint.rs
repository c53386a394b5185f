//! Periodic fingerprints: per-device `(host, protocol, period)` tuples
//! asserting that matching traffic recurs on a fixed period.

use std::path::Path;

use crate::error::PipelineError;
use crate::normalize::last_labels;

/// One fingerprint tuple. `host` may start with `*.` for suffix matching.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintEntry {
    pub host: String,
    pub protocol: String,
    pub period: f64,
}

impl FingerprintEntry {
    /// Strict match: equal protocol, and literal host equality or the `*.`
    /// suffix rule.
    pub fn matches(&self, host: &str, protocol: &str) -> bool {
        if self.protocol != protocol {
            return false;
        }
        if host == self.host {
            return true;
        }
        match self.host.strip_prefix("*.") {
            Some(suffix) => host.ends_with(suffix),
            None => false,
        }
    }

    /// Relaxed match: equal protocol and the last three labels of the
    /// fingerprint host as a suffix.
    pub fn matches_relaxed(&self, host: &str, protocol: &str) -> bool {
        if self.protocol != protocol {
            return false;
        }
        host.ends_with(&last_labels(self.host.trim_start_matches("*."), 3))
    }
}

/// A device's full fingerprint, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fingerprint {
    pub entries: Vec<FingerprintEntry>,
}

impl Fingerprint {
    /// Parse `"<proto> <host> <period>"` lines. A `#` host marks an empty
    /// host; blank lines are skipped; malformed lines fail the whole file.
    pub fn parse(text: &str) -> Result<Self, PipelineError> {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (proto, host, period) = match (parts.next(), parts.next(), parts.next()) {
                (Some(p), Some(h), Some(t)) => (p, h, t),
                _ => {
                    return Err(PipelineError::MissingFingerprint(format!(
                        "malformed fingerprint line: '{line}'"
                    )))
                }
            };
            let host = if host == "#" { "" } else { host };
            let period = period.parse::<f64>().map_err(|_| {
                PipelineError::MissingFingerprint(format!("bad period in line: '{line}'"))
            })?;
            entries.push(FingerprintEntry {
                host: host.to_string(),
                protocol: proto.to_string(),
                period,
            });
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
